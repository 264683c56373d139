//! Static HTML scraper for proceedings sites (CVF, PMLR, ACL Anthology).
//!
//! Two phases:
//!
//! 1. **Indexing**: fetch the index page and collect detail-page links with the
//!    family's link rule, then apply the task limit
//! 2. **Fetching**: fetch each detail page through the worker pool and run the
//!    family's field rules against it
//!
//! The index decides how many items exist. A detail page that fails or matches
//! nothing drops only that item.

use super::{apply_limit, resolve_url};
use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::{Paper, split_authors};
use crate::task::TaskConfig;
use itertools::Itertools;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Extraction rules for one site family.
#[derive(Debug, Clone, Copy)]
pub struct FamilyRules {
    pub family: &'static str,
    pub index_links: &'static str,
    /// Links whose href matches are not papers (front matter, volume pages).
    pub exclude_links: Option<&'static str>,
    pub title: &'static str,
    /// Every match contributes names; text is split on separators.
    pub authors: &'static str,
    pub abstract_text: &'static str,
    /// Element carrying the PDF URL in `content` or `href`.
    pub pdf_link: &'static str,
}

pub const FAMILIES: &[FamilyRules] = &[
    FamilyRules {
        family: "cvf",
        index_links: r#"dt.ptitle > a[href$=".html"]"#,
        exclude_links: None,
        title: "#papertitle",
        authors: "#authors > b > i",
        abstract_text: "#abstract",
        pdf_link: r#"meta[name="citation_pdf_url"]"#,
    },
    FamilyRules {
        family: "pmlr",
        index_links: r#"div.paper .links a:nth-of-type(1)[href$=".html"]"#,
        exclude_links: None,
        title: "h1.title",
        authors: "span.authors",
        abstract_text: "div.abstract",
        pdf_link: r#"meta[name="citation_pdf_url"], div.paper .links a[href$=".pdf"]"#,
    },
    FamilyRules {
        family: "acl",
        index_links: "p.d-sm-flex strong a.align-middle",
        exclude_links: Some(r"\.0/?$"),
        title: "h2#title",
        authors: "p.lead a",
        abstract_text: "div.acl-abstract > span",
        pdf_link: r#"meta[name="citation_pdf_url"]"#,
    },
];

pub fn family_rules(family: &str) -> Option<&'static FamilyRules> {
    FAMILIES.iter().find(|f| f.family.eq_ignore_ascii_case(family))
}

/// [`FamilyRules`] with selectors parsed once per run.
#[derive(Debug)]
struct CompiledRules {
    index_links: Selector,
    exclude_links: Option<Regex>,
    title: Selector,
    authors: Selector,
    abstract_text: Selector,
    pdf_link: Selector,
}

impl CompiledRules {
    fn compile(rules: &FamilyRules) -> Result<Self, String> {
        let sel = |s: &str| Selector::parse(s).map_err(|e| format!("bad selector '{s}': {e}"));
        Ok(Self {
            index_links: sel(rules.index_links)?,
            exclude_links: rules
                .exclude_links
                .map(Regex::new)
                .transpose()
                .map_err(|e| e.to_string())?,
            title: sel(rules.title)?,
            authors: sel(rules.authors)?,
            abstract_text: sel(rules.abstract_text)?,
            pdf_link: sel(rules.pdf_link)?,
        })
    }
}

#[derive(Debug)]
pub struct HtmlScraper<'a> {
    config: TaskConfig,
    ctx: &'a AppContext,
}

impl<'a> HtmlScraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        Self { config, ctx }
    }

    #[instrument(level = "info", skip_all, fields(task = %self.config.name))]
    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        let index_url = self
            .config
            .url
            .as_deref()
            .ok_or(ScrapeError::MissingConfig("url"))?;
        let family = self.config.parser_family.as_deref().unwrap_or_default();

        let Some(rules) = family_rules(family) else {
            error!(%family, %index_url, "Unknown parser family; nothing to extract");
            return Ok(Vec::new());
        };
        let compiled = match CompiledRules::compile(rules) {
            Ok(c) => c,
            Err(e) => {
                error!(%family, error = %e, "Extraction rules failed to compile");
                return Ok(Vec::new());
            }
        };

        info!(%index_url, %family, "Scraping HTML index page");
        let Some(index) = self.ctx.http.get(index_url).await else {
            return Ok(Vec::new());
        };
        let Ok(base) = Url::parse(&index.url).or_else(|_| Url::parse(index_url)) else {
            error!(%index_url, "Index URL is not absolute");
            return Ok(Vec::new());
        };

        let links = extract_links(&index.text(), &compiled, &base);
        if links.is_empty() {
            warn!(%index_url, selector = rules.index_links, "No paper links found on index page");
            return Ok(Vec::new());
        }
        info!(count = links.len(), "Found potential paper links");

        let links = apply_limit(links, self.config.limit, &self.config.name);
        let delay = Duration::from_millis(self.ctx.settings.html.detail_delay_ms);
        let compiled = &compiled;

        let papers = self
            .ctx
            .pool
            .run(self.config.max_workers, links, |url| async move {
                let paper = self.fetch_detail(&url, compiled).await;
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                paper
            })
            .await;

        info!(count = papers.len(), "Parsed detail pages");
        Ok(papers)
    }

    async fn fetch_detail(&self, url: &str, rules: &CompiledRules) -> Option<Paper> {
        let Some(resp) = self.ctx.http.get(url).await else {
            debug!(%url, "Detail page unavailable; dropping item");
            return None;
        };
        let paper = parse_detail(&resp.text(), url, rules);
        if paper.is_none() {
            warn!(%url, "Detail page matched no extraction rule; dropping item");
        }
        paper
    }
}

fn extract_links(body: &str, rules: &CompiledRules, base: &Url) -> Vec<String> {
    let document = Html::parse_document(body);
    document
        .select(&rules.index_links)
        .filter_map(|a| a.value().attr("href"))
        .filter(|href| {
            rules
                .exclude_links
                .as_ref()
                .is_none_or(|re| !re.is_match(href))
        })
        .filter_map(|href| resolve_url(base, href))
        .unique()
        .collect()
}

fn element_text(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ")
}

fn parse_detail(body: &str, url: &str, rules: &CompiledRules) -> Option<Paper> {
    let document = Html::parse_document(body);

    let title = document.select(&rules.title).next().map(element_text);
    let authors: Vec<String> = document
        .select(&rules.authors)
        .flat_map(|el| split_authors(&element_text(el)))
        .collect();
    let abstract_text = document.select(&rules.abstract_text).next().map(element_text);
    let pdf_href = document.select(&rules.pdf_link).find_map(|el| {
        el.value()
            .attr("content")
            .or_else(|| el.value().attr("href"))
            .map(str::to_string)
    });

    if title.is_none() && authors.is_empty() && abstract_text.is_none() && pdf_href.is_none() {
        return None;
    }

    let pdf_url = pdf_href.and_then(|href| {
        Url::parse(url)
            .ok()
            .and_then(|base| resolve_url(&base, &href))
    });

    Some(
        Paper::builder(url)
            .title(title)
            .authors(authors)
            .abstract_text(abstract_text)
            .pdf_url(pdf_url)
            .build(),
    )
}
