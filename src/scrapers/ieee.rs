//! IEEE Xplore journal scraper (TPAMI and other periodicals).
//!
//! Uses the site's JSON endpoints instead of rendering pages:
//!
//! 1. `GET /rest/publication/home/metadata?pubid=<p>` resolves the current issue
//! 2. `POST /rest/search/pub/<p>/issue/<i>/toc` returns one page of records
//!
//! Paging stops at the declared page count, an empty page, the task limit, or
//! the first failed page. Full texts sit behind a subscription, so records
//! carry no `pdf_url`.

use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::Paper;
use crate::task::TaskConfig;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

static TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]*>").expect("static regex"));

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TocPage {
    #[serde(default)]
    total_pages: Option<u32>,
    #[serde(default)]
    total_records: Option<u64>,
    #[serde(default)]
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TocRecord {
    #[serde(default)]
    article_number: Option<Value>,
    #[serde(default)]
    highlighted_title: Option<String>,
    #[serde(default)]
    article_title: Option<String>,
    #[serde(default)]
    authors: Vec<TocAuthor>,
    #[serde(default, rename = "abstract")]
    abstract_text: Option<String>,
    #[serde(default)]
    document_link: Option<String>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TocAuthor {
    #[serde(default)]
    name: String,
}

#[derive(Debug)]
pub struct IeeeScraper<'a> {
    config: TaskConfig,
    ctx: &'a AppContext,
}

impl<'a> IeeeScraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        Self { config, ctx }
    }

    fn base_url(&self) -> &str {
        self.config
            .url
            .as_deref()
            .unwrap_or(&self.ctx.settings.ieee.base_url)
            .trim_end_matches('/')
    }

    #[instrument(level = "info", skip_all, fields(task = %self.config.name))]
    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        let punumber = self
            .config
            .punumber
            .as_deref()
            .ok_or(ScrapeError::MissingConfig("punumber"))?;

        let Some(issue) = self.issue_number(punumber).await else {
            return Ok(Vec::new());
        };
        info!(%punumber, %issue, "Resolved current issue");

        let base = self.base_url();
        let toc_url = format!("{base}/rest/search/pub/{punumber}/issue/{issue}/toc");
        let delay = Duration::from_millis(self.ctx.settings.ieee.page_delay_ms);
        let limit = self.config.limit;

        let mut papers: Vec<Paper> = Vec::new();
        let mut page_number: u32 = 1;
        let mut total_pages: u32 = 1;

        loop {
            let payload = json!({
                "pageNumber": page_number.to_string(),
                "punumber": punumber,
                "isnumber": issue,
            });
            let referer = format!("{base}/xpl/conhome/{punumber}/proceeding?pageNumber={page_number}");
            let Some(resp) = self
                .ctx
                .http
                .post_json(&toc_url, &[("Referer", referer.as_str())], &payload)
                .await
            else {
                error!(page_number, collected = papers.len(), "Listing page failed; keeping collected records");
                break;
            };
            let page: TocPage = match resp.json() {
                Ok(p) => p,
                Err(e) => {
                    error!(page_number, error = %e, "Listing page is not valid JSON; stopping");
                    break;
                }
            };

            if page_number == 1 {
                total_pages = page.total_pages.unwrap_or(1).max(1);
                info!(
                    total_records = page.total_records.unwrap_or_default(),
                    total_pages, "Listing size declared"
                );
            }
            if page.records.is_empty() {
                debug!(page_number, "Empty page; listing finished");
                break;
            }

            for raw in page.records {
                match serde_json::from_value::<TocRecord>(raw) {
                    Ok(rec) => papers.push(record_to_paper(rec, base)),
                    Err(e) => warn!(page_number, error = %e, "Skipping malformed record"),
                }
                if limit.is_some_and(|l| papers.len() >= l) {
                    break;
                }
            }

            if limit.is_some_and(|l| papers.len() >= l) || page_number >= total_pages {
                break;
            }
            page_number += 1;
            if !delay.is_zero() {
                sleep(delay).await;
            }
        }

        info!(count = papers.len(), pages = page_number, "Collected journal records");
        Ok(papers)
    }

    async fn issue_number(&self, punumber: &str) -> Option<String> {
        let base = self.base_url();
        let url = format!("{base}/rest/publication/home/metadata?pubid={punumber}");
        let referer = format!("{base}/xpl/conhome/{punumber}/proceeding");
        let resp = self
            .ctx
            .http
            .get_with_headers(&url, &[("Referer", referer.as_str())])
            .await?;

        let data: Value = match resp.json() {
            Ok(v) => v,
            Err(e) => {
                error!(%url, error = %e, "Metadata response is not JSON");
                return None;
            }
        };
        let issue = match &data["currentIssue"]["issueNumber"] {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        };
        if issue.is_none() {
            error!(%url, "Metadata carries no currentIssue.issueNumber");
        }
        issue
    }
}

fn strip_tags(s: &str) -> String {
    TAGS.replace_all(s, " ").into_owned()
}

fn record_to_paper(rec: TocRecord, base: &str) -> Paper {
    let source_url = rec
        .document_link
        .as_deref()
        .map(|l| format!("{base}{l}"))
        .unwrap_or_default();
    let id = match rec.article_number {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };

    Paper::builder(source_url)
        .id(id)
        .title(rec.highlighted_title.or(rec.article_title).map(|t| strip_tags(&t)))
        .authors(rec.authors.into_iter().map(|a| a.name).collect())
        .abstract_text(rec.abstract_text.map(|a| strip_tags(&a)))
        .published(rec.publication_date)
        .doi(rec.doi)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::network::testing::FakeTransport;
    use crate::task::SourceKind;
    use std::sync::Arc;

    const BASE: &str = "https://ieeexplore.ieee.org";

    fn tpami_task(limit: Option<usize>) -> TaskConfig {
        let mut cfg = TaskConfig::new("TPAMI_latest", SourceKind::PaginatedRest);
        cfg.punumber = Some("34".into());
        cfg.limit = limit;
        cfg
    }

    fn page(records: usize, start: usize) -> String {
        let recs: Vec<Value> = (start..start + records)
            .map(|i| {
                json!({
                    "articleNumber": format!("{}", 10_000 + i),
                    "highlightedTitle": format!("Deep <br>Vision {i}"),
                    "authors": [{"name": "Y. LeCun"}, {"name": "G. Hinton"}],
                    "abstract": "Abstract.",
                    "documentLink": format!("/document/{}/", 10_000 + i)
                })
            })
            .collect();
        json!({"totalRecords": 75, "totalPages": 3, "records": recs}).to_string()
    }

    fn toc_url() -> String {
        format!("{BASE}/rest/search/pub/34/issue/10500/toc")
    }

    fn fake_journal() -> Arc<FakeTransport> {
        let fake = Arc::new(FakeTransport::new());
        fake.route(
            &format!("{BASE}/rest/publication/home/metadata?pubid=34"),
            200,
            r#"{"currentIssue": {"issueNumber": 10500}}"#,
        );
        fake
    }

    #[tokio::test]
    async fn test_stops_at_limit_despite_more_pages() {
        let fake = fake_journal();
        fake.route(&toc_url(), 200, &page(25, 0));
        let ctx = context(fake.clone());

        let papers = IeeeScraper::new(tpami_task(Some(10)), &ctx).scrape().await.unwrap();
        assert_eq!(papers.len(), 10);
        assert_eq!(fake.calls_matching("/toc"), 1);
    }

    #[tokio::test]
    async fn test_pages_until_declared_total() {
        let fake = fake_journal();
        fake.route(&toc_url(), 200, &page(25, 0));
        let ctx = context(fake.clone());

        let papers = IeeeScraper::new(tpami_task(None), &ctx).scrape().await.unwrap();
        assert_eq!(papers.len(), 75);
        assert_eq!(fake.calls_matching("/toc"), 3);
    }

    #[tokio::test]
    async fn test_record_fields_normalized() {
        let fake = fake_journal();
        fake.route(&toc_url(), 200, &page(1, 0));
        let ctx = context(fake);

        let papers = IeeeScraper::new(tpami_task(Some(1)), &ctx).scrape().await.unwrap();
        let p = &papers[0];
        assert_eq!(p.id, "10000");
        assert_eq!(p.title, "Deep Vision 0");
        assert_eq!(p.authors, vec!["Y. LeCun", "G. Hinton"]);
        assert_eq!(p.source_url, "https://ieeexplore.ieee.org/document/10000/");
        assert!(p.pdf_url.is_none());
    }

    #[tokio::test]
    async fn test_missing_issue_yields_empty() {
        let fake = Arc::new(FakeTransport::new());
        fake.route(
            &format!("{BASE}/rest/publication/home/metadata?pubid=34"),
            200,
            r#"{"currentIssue": {}}"#,
        );
        let ctx = context(fake.clone());
        let papers = IeeeScraper::new(tpami_task(None), &ctx).scrape().await.unwrap();
        assert!(papers.is_empty());
        assert_eq!(fake.calls_matching("/toc"), 0);
    }

    #[tokio::test]
    async fn test_failed_page_ends_listing() {
        let fake = fake_journal();
        fake.route(&toc_url(), 503, "");
        let ctx = context(fake);
        let papers = IeeeScraper::new(tpami_task(None), &ctx).scrape().await.unwrap();
        assert!(papers.is_empty());
    }

    #[test]
    fn test_malformed_record_is_rejected() {
        let bad = json!({"authors": "not a list"});
        assert!(serde_json::from_value::<TocRecord>(bad).is_err());
    }
}
