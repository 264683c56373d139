//! The canonical paper record every scraper emits.
//!
//! This module defines the data shapes that flow through the crawler:
//! - [`Paper`]: one normalized publication, immutable once built
//! - [`PaperBuilder`]: the only way to construct a [`Paper`]; applies sentinels
//! - [`Decision`]: closed taxonomy of peer-review outcomes
//!
//! Scrapers fill a builder with whatever they could extract. `build()` makes
//! the record safe for downstream writers: `title`, `abstract` and
//! `source_url` are never empty and `pdf_url` is either absent or absolute.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;
use url::Url;

/// Placeholder for fields a source could not provide.
pub const NOT_AVAILABLE: &str = "N/A";

/// Peer-review outcome, normalized from free-text decision strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Decision {
    Oral,
    Spotlight,
    Poster,
    Reject,
    Accept,
}

impl Decision {
    /// Map a venue's decision text onto the closed taxonomy.
    ///
    /// Matching is case-insensitive substring search with precedence
    /// oral > spotlight > poster > reject > accept, so
    /// `"Accept (Oral)"` is `Oral` and `"Accept"` alone is `Accept`.
    ///
    /// # Examples
    ///
    /// ```ignore
    /// assert_eq!(Decision::normalize("Accept (spotlight)"), Some(Decision::Spotlight));
    /// assert_eq!(Decision::normalize("Desk withdrawn"), None);
    /// ```
    pub fn normalize(raw: &str) -> Option<Self> {
        let lower = raw.to_lowercase();
        [
            ("oral", Decision::Oral),
            ("spotlight", Decision::Spotlight),
            ("poster", Decision::Poster),
            ("reject", Decision::Reject),
            ("accept", Decision::Accept),
        ]
        .into_iter()
        .find(|(needle, _)| lower.contains(needle))
        .map(|(_, d)| d)
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Oral => "Oral",
            Decision::Spotlight => "Spotlight",
            Decision::Poster => "Poster",
            Decision::Reject => "Reject",
            Decision::Accept => "Accept",
        };
        f.write_str(s)
    }
}

/// One scraped publication in normalized form.
///
/// Fields are public for serialization and reading. Records are only
/// produced by [`PaperBuilder::build`] and [`Paper::annotate`]; nothing else
/// mutates a record once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Paper {
    /// Source-scoped identifier (URL slug, arXiv id, OpenReview note id, ...).
    pub id: String,
    pub title: String,
    pub authors: Vec<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: String,
    /// Absolute URL of the PDF, when the source exposes one.
    pub pdf_url: Option<String>,
    /// Absolute URL of the canonical detail page. Used for dedup.
    pub source_url: String,
    /// Set by the orchestrator, never by a scraper.
    pub conference: Option<String>,
    /// Set by the orchestrator, never by a scraper.
    pub year: Option<u32>,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub published: Option<String>,
    pub decision: Option<Decision>,
    pub avg_rating: Option<f64>,
    #[serde(default)]
    pub review_ratings: Vec<u32>,
    pub journal_ref: Option<String>,
    pub doi: Option<String>,
    pub comment: Option<String>,
}

impl Paper {
    /// Start building a record for the given detail page.
    pub fn builder(source_url: impl Into<String>) -> PaperBuilder {
        PaperBuilder {
            source_url: source_url.into(),
            ..PaperBuilder::default()
        }
    }

    /// Attach the task's conference and year.
    pub fn annotate(self, conference: Option<&str>, year: Option<u32>) -> Paper {
        Paper {
            conference: conference.map(str::to_string),
            year,
            ..self
        }
    }

    /// Authors joined for flat text outputs, or the sentinel when unknown.
    pub fn authors_display(&self) -> String {
        if self.authors.is_empty() {
            NOT_AVAILABLE.to_string()
        } else {
            self.authors.join(", ")
        }
    }
}

/// Collects whatever a scraper managed to extract; see [`PaperBuilder::build`].
#[derive(Debug, Default, Clone)]
pub struct PaperBuilder {
    id: Option<String>,
    title: Option<String>,
    authors: Vec<String>,
    abstract_text: Option<String>,
    pdf_url: Option<String>,
    source_url: String,
    keywords: Vec<String>,
    published: Option<String>,
    decision: Option<Decision>,
    avg_rating: Option<f64>,
    review_ratings: Vec<u32>,
    journal_ref: Option<String>,
    doi: Option<String>,
    comment: Option<String>,
}

impl PaperBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn authors(mut self, authors: Vec<String>) -> Self {
        self.authors = authors;
        self
    }

    pub fn abstract_text(mut self, text: Option<String>) -> Self {
        self.abstract_text = text;
        self
    }

    pub fn pdf_url(mut self, url: Option<String>) -> Self {
        self.pdf_url = url;
        self
    }

    pub fn keywords(mut self, keywords: Vec<String>) -> Self {
        self.keywords = keywords;
        self
    }

    pub fn published(mut self, published: Option<String>) -> Self {
        self.published = published;
        self
    }

    pub fn reviews(mut self, review: Option<ReviewSummary>) -> Self {
        if let Some(r) = review {
            self.decision = r.decision;
            self.avg_rating = r.avg_rating;
            self.review_ratings = r.ratings;
        }
        self
    }

    pub fn journal_ref(mut self, v: Option<String>) -> Self {
        self.journal_ref = v;
        self
    }

    pub fn doi(mut self, v: Option<String>) -> Self {
        self.doi = v;
        self
    }

    pub fn comment(mut self, v: Option<String>) -> Self {
        self.comment = v;
        self
    }

    /// Apply sentinels and URL validation, producing an immutable [`Paper`].
    pub fn build(self) -> Paper {
        let title = non_blank(self.title).unwrap_or_else(|| NOT_AVAILABLE.to_string());
        let source_url =
            non_blank(Some(self.source_url)).unwrap_or_else(|| NOT_AVAILABLE.to_string());

        let pdf_url = match non_blank(self.pdf_url) {
            Some(u) if is_absolute_http(&u) => Some(u),
            Some(u) => {
                debug!(pdf_url = %u, %source_url, "Dropping non-absolute pdf_url");
                None
            }
            None => None,
        };

        let id = non_blank(self.id).unwrap_or_else(|| derive_id(&source_url, &title));

        Paper {
            id,
            title,
            authors: self
                .authors
                .into_iter()
                .map(|a| collapse_whitespace(&a))
                .filter(|a| !a.is_empty())
                .collect(),
            abstract_text: non_blank(self.abstract_text)
                .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            pdf_url,
            source_url,
            conference: None,
            year: None,
            keywords: self.keywords,
            published: non_blank(self.published),
            decision: self.decision,
            avg_rating: self.avg_rating,
            review_ratings: self.review_ratings,
            journal_ref: non_blank(self.journal_ref),
            doi: non_blank(self.doi),
            comment: non_blank(self.comment),
        }
    }
}

/// Review-derived metadata for one OpenReview submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewSummary {
    pub decision: Option<Decision>,
    pub avg_rating: Option<f64>,
    pub ratings: Vec<u32>,
}

/// Split a free-text author list into names.
///
/// Separators are `,`, `;` and a standalone `and`. Surrounding whitespace
/// is trimmed and empty fragments are dropped.
pub fn split_authors(raw: &str) -> Vec<String> {
    raw.split([',', ';'])
        .flat_map(|part| part.split(" and "))
        .map(collapse_whitespace)
        .map(|s| s.trim_start_matches("and ").to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Collapse runs of whitespace (including newlines and tabs) to one space.
pub fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn non_blank(v: Option<String>) -> Option<String> {
    v.map(|s| collapse_whitespace(&s)).filter(|s| !s.is_empty())
}

fn is_absolute_http(u: &str) -> bool {
    Url::parse(u)
        .map(|p| matches!(p.scheme(), "http" | "https") && p.host_str().is_some())
        .unwrap_or(false)
}

fn derive_id(source_url: &str, title: &str) -> String {
    source_url
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && *s != NOT_AVAILABLE)
        .map(|s| s.trim_end_matches(".html").to_string())
        .unwrap_or_else(|| title.to_string())
}
