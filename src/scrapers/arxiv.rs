//! arXiv scraper over the Atom export API.
//!
//! One request per task: the listing already carries full metadata, so no
//! detail pages are fetched. The query is either the task's verbatim
//! `search_query` or is composed from category, author and free terms.

use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::Paper;
use crate::task::{ArxivQuery, TaskConfig};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event};
use tracing::{error, info, instrument, warn};

const DEFAULT_QUERY: &str = "cat:cs.AI";

/// Compose the `search_query` parameter.
///
/// Parts are `cat:<category>`, `au:<author>` (quoted when it contains a
/// space) and `all:"<term>"` per term, joined with the operator (default
/// `AND`). An empty composition falls back to `cat:cs.AI`.
pub fn build_query(q: &ArxivQuery) -> String {
    if let Some(raw) = q.search_query.as_deref().filter(|s| !s.trim().is_empty()) {
        return raw.trim().to_string();
    }

    let mut parts: Vec<String> = Vec::new();
    if let Some(cat) = q.category.as_deref().filter(|s| !s.is_empty()) {
        parts.push(format!("cat:{cat}"));
    }
    if let Some(author) = q.author.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        if author.contains(' ') {
            parts.push(format!("au:\"{author}\""));
        } else {
            parts.push(format!("au:{author}"));
        }
    }
    parts.extend(
        q.terms
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .map(|t| format!("all:\"{t}\"")),
    );

    if parts.is_empty() {
        return DEFAULT_QUERY.to_string();
    }
    let op = q
        .operator
        .as_deref()
        .map(|o| o.trim().to_uppercase())
        .filter(|o| matches!(o.as_str(), "AND" | "OR" | "ANDNOT"))
        .unwrap_or_else(|| "AND".to_string());
    parts.join(&format!(" {op} "))
}

#[derive(Debug)]
pub struct ArxivScraper<'a> {
    config: TaskConfig,
    ctx: &'a AppContext,
}

impl<'a> ArxivScraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        Self { config, ctx }
    }

    pub fn request_url(&self) -> String {
        let q = &self.config.arxiv;
        format!(
            "{}?search_query={}&start=0&max_results={}&sortBy={}&sortOrder={}",
            self.ctx.settings.arxiv.endpoint,
            urlencoding::encode(&build_query(q)),
            q.max_results,
            urlencoding::encode(&q.sort_by),
            urlencoding::encode(&q.sort_order),
        )
    }

    #[instrument(level = "info", skip_all, fields(task = %self.config.name))]
    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        let url = self.request_url();
        info!(query = %build_query(&self.config.arxiv), "Querying arXiv");

        let Some(resp) = self.ctx.http.get(&url).await else {
            return Ok(Vec::new());
        };
        match parse_feed(&resp.text()) {
            Ok(papers) => {
                info!(count = papers.len(), "Parsed arXiv feed");
                Ok(papers)
            }
            Err(e) => {
                error!(%url, error = %e, "arXiv feed is not valid Atom");
                Ok(Vec::new())
            }
        }
    }
}

#[derive(Debug, Default)]
struct EntryDraft {
    id: String,
    title: String,
    summary: String,
    published: String,
    authors: Vec<String>,
    categories: Vec<String>,
    pdf_url: Option<String>,
    journal_ref: String,
    doi: String,
    comment: String,
}

impl EntryDraft {
    fn into_paper(self) -> Paper {
        let short_id = self.id.trim_end_matches('/').rsplit('/').next().unwrap_or_default().to_string();
        Paper::builder(self.id.trim())
            .id(short_id)
            .title(Some(self.title))
            .authors(self.authors)
            .abstract_text(Some(self.summary))
            .pdf_url(self.pdf_url)
            .keywords(self.categories)
            .published(Some(self.published))
            .journal_ref(Some(self.journal_ref))
            .doi(Some(self.doi))
            .comment(Some(self.comment))
            .build()
    }

    /// Handle attributes of `<link>` and `<category>`.
    fn absorb_attributes(&mut self, e: &BytesStart<'_>) {
        let mut href = None;
        let mut title = None;
        let mut term = None;
        for attr in e.attributes().flatten() {
            let val = String::from_utf8_lossy(&attr.value).to_string();
            match attr.key.local_name().as_ref() {
                b"href" => href = Some(val),
                b"title" => title = Some(val),
                b"term" => term = Some(val),
                _ => {}
            }
        }
        match e.local_name().as_ref() {
            b"link" if title.as_deref() == Some("pdf") => self.pdf_url = href,
            b"category" => self.categories.extend(term),
            _ => {}
        }
    }
}

/// Parse an Atom feed into papers. Entries lacking an id are skipped.
fn parse_feed(xml: &str) -> Result<Vec<Paper>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    let mut papers = Vec::new();
    let mut entry: Option<EntryDraft> = None;
    let mut path: Vec<Vec<u8>> = Vec::new();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let name = e.local_name().as_ref().to_vec();
                if name == b"entry" {
                    entry = Some(EntryDraft::default());
                } else if let Some(d) = entry.as_mut() {
                    d.absorb_attributes(&e);
                }
                path.push(name);
            }
            Event::Empty(e) => {
                if let Some(d) = entry.as_mut() {
                    d.absorb_attributes(&e);
                }
            }
            Event::Text(t) => {
                let (Some(d), Some(tag)) = (entry.as_mut(), path.last()) else {
                    continue;
                };
                let text = t.unescape()?;
                let parent_is_author = path.len() >= 2 && path[path.len() - 2] == b"author";
                match tag.as_slice() {
                    b"id" => d.id.push_str(&text),
                    b"title" => d.title.push_str(&text),
                    b"summary" => d.summary.push_str(&text),
                    b"published" => d.published.push_str(&text),
                    b"name" if parent_is_author => d.authors.push(text.trim().to_string()),
                    b"journal_ref" => d.journal_ref.push_str(&text),
                    b"doi" => d.doi.push_str(&text),
                    b"comment" => d.comment.push_str(&text),
                    _ => {}
                }
            }
            Event::End(e) => {
                path.pop();
                if e.local_name().as_ref() == b"entry" {
                    match entry.take() {
                        Some(d) if !d.id.trim().is_empty() => papers.push(d.into_paper()),
                        Some(_) => warn!("Skipping feed entry without id"),
                        None => {}
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(papers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::context;
    use crate::network::testing::FakeTransport;
    use crate::task::SourceKind;
    use std::sync::Arc;

    fn entry(i: usize) -> String {
        format!(
            r#"<entry>
    <id>http://arxiv.org/abs/2401.0000{i}v1</id>
    <published>2024-01-0{d}T00:00:00Z</published>
    <title>Agents &amp; Tools {i}</title>
    <summary>  Summary
      number {i}. </summary>
    <author><name>Ada Lovelace</name></author>
    <author><name>Alan Turing</name><arxiv:affiliation>Bletchley</arxiv:affiliation></author>
    <arxiv:comment>12 pages</arxiv:comment>
    <arxiv:journal_ref>JMLR 25</arxiv:journal_ref>
    <arxiv:doi>10.1000/xyz{i}</arxiv:doi>
    <link href="http://arxiv.org/abs/2401.0000{i}v1" rel="alternate" type="text/html"/>
    <link title="pdf" href="http://arxiv.org/pdf/2401.0000{i}v1" rel="related" type="application/pdf"/>
    <category term="cs.AI" scheme="http://arxiv.org/schemas/atom"/>
    <category term="cs.CL" scheme="http://arxiv.org/schemas/atom"/>
  </entry>"#,
            d = i + 1
        )
    }

    fn feed(n: usize) -> String {
        let entries: String = (0..n).map(entry).collect();
        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<feed xmlns="http://www.w3.org/2005/Atom" xmlns:arxiv="http://arxiv.org/schemas/atom">
  <title>ArXiv Query</title>
  <id>http://arxiv.org/api/abc</id>
  {entries}
</feed>"#
        )
    }

    fn task(query: ArxivQuery) -> TaskConfig {
        let mut cfg = TaskConfig::new("arxiv_latest", SourceKind::Arxiv);
        cfg.arxiv = ArxivQuery {
            sort_by: "submittedDate".into(),
            sort_order: "descending".into(),
            ..query
        };
        cfg
    }

    #[tokio::test]
    async fn test_scrape_parses_full_feed() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let scraper = ArxivScraper::new(
            task(ArxivQuery {
                search_query: Some("cat:cs.AI".into()),
                max_results: 5,
                ..ArxivQuery::default()
            }),
            &ctx,
        );
        fake.route(&scraper.request_url(), 200, &feed(5));

        let papers = scraper.scrape().await.unwrap();
        assert_eq!(papers.len(), 5);
        assert_eq!(fake.call_count(), 1);

        let p = &papers[0];
        assert_eq!(p.id, "2401.00000v1");
        assert_eq!(p.title, "Agents & Tools 0");
        assert_eq!(p.abstract_text, "Summary number 0.");
        assert_eq!(p.authors, vec!["Ada Lovelace", "Alan Turing"]);
        assert_eq!(p.pdf_url.as_deref(), Some("http://arxiv.org/pdf/2401.00000v1"));
        assert_eq!(p.source_url, "http://arxiv.org/abs/2401.00000v1");
        assert_eq!(p.keywords, vec!["cs.AI", "cs.CL"]);
        assert_eq!(p.published.as_deref(), Some("2024-01-01T00:00:00Z"));
        assert_eq!(p.journal_ref.as_deref(), Some("JMLR 25"));
        assert_eq!(p.doi.as_deref(), Some("10.1000/xyz0"));
        assert_eq!(p.comment.as_deref(), Some("12 pages"));
    }

    #[test]
    fn test_request_url_encodes_query() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake);
        let scraper = ArxivScraper::new(
            task(ArxivQuery {
                category: Some("cs.CL".into()),
                max_results: 3,
                ..ArxivQuery::default()
            }),
            &ctx,
        );
        assert_eq!(
            scraper.request_url(),
            "http://export.arxiv.org/api/query?search_query=cat%3Acs.CL&start=0&max_results=3&sortBy=submittedDate&sortOrder=descending"
        );
    }

    #[test]
    fn test_build_query_composition() {
        let q = ArxivQuery {
            category: Some("cs.CL".into()),
            author: Some("Yoshua Bengio".into()),
            terms: vec!["large language model".into(), " ".into()],
            operator: Some("or".into()),
            ..ArxivQuery::default()
        };
        assert_eq!(
            build_query(&q),
            r#"cat:cs.CL OR au:"Yoshua Bengio" OR all:"large language model""#
        );
    }

    #[test]
    fn test_build_query_defaults() {
        assert_eq!(build_query(&ArxivQuery::default()), "cat:cs.AI");
        let q = ArxivQuery {
            author: Some("Hinton".into()),
            operator: Some("XOR".into()),
            terms: vec!["capsules".into()],
            ..ArxivQuery::default()
        };
        assert_eq!(build_query(&q), r#"au:Hinton AND all:"capsules""#);
    }

    #[test]
    fn test_verbatim_query_wins() {
        let q = ArxivQuery {
            search_query: Some("ti:transformer".into()),
            category: Some("cs.LG".into()),
            ..ArxivQuery::default()
        };
        assert_eq!(build_query(&q), "ti:transformer");
    }

    #[test]
    fn test_feed_without_entries() {
        let papers = parse_feed(&feed(0)).unwrap();
        assert!(papers.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_feed_yields_empty() {
        let fake = Arc::new(FakeTransport::new());
        let ctx = context(fake.clone());
        let scraper = ArxivScraper::new(task(ArxivQuery::default()), &ctx);
        fake.route(&scraper.request_url(), 200, "<feed><entry></feed>");
        let papers = scraper.scrape().await.unwrap();
        assert!(papers.is_empty());
    }
}
