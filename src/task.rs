//! Task builder: resolve a [`TaskSpec`] plus the source-definition table into
//! the flat [`TaskConfig`] a scraper needs.
//!
//! Resolution rules:
//! - `url_override` always wins over computed URLs
//! - string definitions substitute the `YYYY` placeholder
//! - venue definitions produce a venue id and pick the OpenReview API version
//! - pattern maps look the year up explicitly
//!
//! Build failures are typed ([`TaskBuildError`]) and happen before any network call.

use crate::config::{SourceDefinition, SourceDefinitions, TaskSpec};
use crate::error::TaskBuildError;
use std::fmt;
use std::str::FromStr;
use tracing::debug;

const YEAR_PLACEHOLDER: &str = "YYYY";

/// Scraper family selected by a task's `source_type` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    OpenReview,
    StaticHtml,
    Browser,
    PaginatedRest,
    Arxiv,
}

/// Tag → scraper family. Aliases keep older configuration files working.
const REGISTRY: &[(&str, SourceKind)] = &[
    ("openreview", SourceKind::OpenReview),
    ("html_cvf", SourceKind::StaticHtml),
    ("html_pmlr", SourceKind::StaticHtml),
    ("html_acl", SourceKind::StaticHtml),
    ("html_other", SourceKind::StaticHtml),
    ("selenium", SourceKind::Browser),
    ("browser", SourceKind::Browser),
    ("ieee", SourceKind::PaginatedRest),
    ("tpami", SourceKind::PaginatedRest),
    ("arxiv", SourceKind::Arxiv),
];

impl FromStr for SourceKind {
    type Err = TaskBuildError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        REGISTRY
            .iter()
            .find(|(t, _)| *t == tag)
            .map(|(_, k)| *k)
            .or_else(|| tag.starts_with("html_").then_some(SourceKind::StaticHtml))
            .ok_or_else(|| TaskBuildError::UnknownSourceType(tag.to_string()))
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceKind::OpenReview => "openreview",
            SourceKind::StaticHtml => "static-html",
            SourceKind::Browser => "browser",
            SourceKind::PaginatedRest => "paginated-rest",
            SourceKind::Arxiv => "arxiv",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V1,
    V2,
}

/// Structured arXiv query parameters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArxivQuery {
    pub search_query: Option<String>,
    pub category: Option<String>,
    pub author: Option<String>,
    pub terms: Vec<String>,
    pub operator: Option<String>,
    pub max_results: usize,
    pub sort_by: String,
    pub sort_order: String,
}

/// Flat, read-only configuration for one scraper run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub name: String,
    pub source_type: String,
    pub kind: SourceKind,
    pub conference: Option<String>,
    pub year: Option<u32>,
    pub url: Option<String>,
    pub venue_id: Option<String>,
    pub api_version: ApiVersion,
    /// Extraction rule family (`cvf`, `pmlr`, `acl`, or a browser site name).
    pub parser_family: Option<String>,
    pub limit: Option<usize>,
    pub max_workers: usize,
    pub filters: Vec<String>,
    pub fetch_reviews: bool,
    pub download_pdfs: bool,
    pub arxiv: ArxivQuery,
    pub punumber: Option<String>,
}

impl TaskConfig {
    /// Minimal configuration for `kind`; used by tests and as the base of [`build_task_config`].
    pub fn new(name: impl Into<String>, kind: SourceKind) -> Self {
        Self {
            name: name.into(),
            source_type: kind.to_string(),
            kind,
            conference: None,
            year: None,
            url: None,
            venue_id: None,
            api_version: ApiVersion::V2,
            parser_family: None,
            limit: None,
            max_workers: 1,
            filters: Vec::new(),
            fetch_reviews: false,
            download_pdfs: false,
            arxiv: ArxivQuery::default(),
            punumber: None,
        }
    }

    /// Folder-friendly conference label for sinks.
    pub fn conference_label(&self) -> &str {
        self.conference.as_deref().unwrap_or(&self.source_type)
    }

    /// Folder-friendly year label for sinks.
    pub fn year_label(&self) -> String {
        self.year
            .map(|y| y.to_string())
            .unwrap_or_else(|| "latest".to_string())
    }
}

/// Resolve `spec` against `definitions`.
///
/// # Errors
///
/// - [`TaskBuildError::UnknownSourceType`] when no scraper handles the tag
/// - [`TaskBuildError::MissingField`] when conference or year is needed but absent
/// - [`TaskBuildError::MissingDefinition`] when the table has no entry for the pair
/// - [`TaskBuildError::MissingYearPattern`] when a pattern map lacks the year
pub fn build_task_config(
    spec: &TaskSpec,
    definitions: &SourceDefinitions,
) -> Result<TaskConfig, TaskBuildError> {
    let kind: SourceKind = spec.source_type.parse()?;
    let mut config = TaskConfig {
        source_type: spec.source_type.clone(),
        conference: spec.conference.clone(),
        year: spec.year,
        limit: spec.limit,
        max_workers: spec.max_workers.unwrap_or(1).max(1),
        filters: spec.filters.clone(),
        fetch_reviews: spec.fetch_reviews,
        download_pdfs: spec.download_pdfs,
        punumber: spec.punumber.clone(),
        ..TaskConfig::new(spec.display_name(), kind)
    };

    match kind {
        SourceKind::Arxiv => {
            debug!(task = %config.name, "arXiv task; no definition lookup needed");
            config.arxiv = arxiv_query(spec);
            return Ok(config);
        }
        SourceKind::PaginatedRest => {
            if config.punumber.is_none() {
                return Err(TaskBuildError::MissingField("punumber"));
            }
            config.url = spec.url_override.clone();
            return Ok(config);
        }
        _ => {}
    }

    let conference = spec
        .conference
        .clone()
        .ok_or(TaskBuildError::MissingField("conference"))?;
    let year = spec.year.ok_or(TaskBuildError::MissingField("year"))?;

    match kind {
        SourceKind::StaticHtml => {
            config.parser_family = spec
                .source_type
                .split_once('_')
                .map(|(_, family)| family.to_string());
        }
        SourceKind::Browser => config.parser_family = Some(conference.clone()),
        _ => {}
    }

    if let Some(url) = &spec.url_override {
        // For OpenReview the override names the venue directly.
        if kind == SourceKind::OpenReview {
            config.venue_id = Some(url.clone());
        } else {
            config.url = Some(url.clone());
        }
        return Ok(config);
    }

    let definition = definitions
        .get(&spec.source_type)
        .and_then(|by_conf| by_conf.get(&conference))
        .ok_or_else(|| TaskBuildError::MissingDefinition {
            source_type: spec.source_type.clone(),
            conference: conference.clone(),
        })?;

    match definition {
        SourceDefinition::Pattern(pattern) => {
            config.url = Some(pattern.replace(YEAR_PLACEHOLDER, &year.to_string()));
        }
        SourceDefinition::Venue {
            venue_id,
            api_v1_years,
        } => {
            config.venue_id = Some(venue_id.replace(YEAR_PLACEHOLDER, &year.to_string()));
            config.api_version = if api_v1_years.contains(&year) {
                ApiVersion::V1
            } else {
                ApiVersion::V2
            };
        }
        SourceDefinition::PatternMap {
            pattern_map,
            base_url,
        } => {
            let fragment = pattern_map
                .get(&year)
                .ok_or_else(|| TaskBuildError::MissingYearPattern {
                    conference: conference.clone(),
                    year,
                })?;
            config.url = Some(format!(
                "{}/{}/",
                base_url.trim_end_matches('/'),
                fragment.trim_matches('/')
            ));
        }
    }

    Ok(config)
}

fn arxiv_query(spec: &TaskSpec) -> ArxivQuery {
    ArxivQuery {
        search_query: spec.search_query.clone(),
        category: spec.category.clone(),
        author: spec.author.clone(),
        terms: spec.terms.clone(),
        operator: spec.operator.clone(),
        max_results: spec.limit.or(spec.max_results).unwrap_or(10),
        sort_by: spec
            .sort_by
            .clone()
            .unwrap_or_else(|| "submittedDate".to_string()),
        sort_order: spec
            .sort_order
            .clone()
            .unwrap_or_else(|| "descending".to_string()),
    }
}
