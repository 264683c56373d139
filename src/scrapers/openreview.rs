//! OpenReview venue scraper (ICLR, NeurIPS, ...).
//!
//! Lists every submission note under a venue id through the public REST API,
//! paging with `limit`/`offset`. API v1 returns flat content fields, v2 wraps
//! each one in `{ "value": ... }`; [`field`] reads both shapes.
//!
//! With `fetch_reviews` set, each submission's forum is fetched as well and
//! summarized into a decision plus numeric reviewer ratings.

use super::apply_limit;
use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::{Decision, Paper, PaperBuilder, ReviewSummary};
use crate::task::{ApiVersion, TaskConfig};
use chrono::DateTime;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, instrument, warn};

static DECISION_INVITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/Decision").expect("static regex"));
static REVIEW_INVITATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/Review|/Official_Review").expect("static regex"));
static LEADING_INT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+").expect("static regex"));
static BIBTEX_URL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"url\s*=\s*\{([^}]+)\}").expect("static regex"));

#[derive(Debug, Default, Deserialize)]
struct NotesPage {
    #[serde(default)]
    notes: Vec<Value>,
}

#[derive(Debug)]
pub struct OpenReviewScraper<'a> {
    config: TaskConfig,
    ctx: &'a AppContext,
}

impl<'a> OpenReviewScraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        Self { config, ctx }
    }

    fn api_base(&self) -> &str {
        let s = &self.ctx.settings.openreview;
        match self.config.api_version {
            ApiVersion::V1 => &s.v1_base_url,
            ApiVersion::V2 => &s.v2_base_url,
        }
    }

    #[instrument(level = "info", skip_all, fields(task = %self.config.name, api = ?self.config.api_version))]
    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        let venue = self
            .config
            .venue_id
            .as_deref()
            .ok_or(ScrapeError::MissingConfig("venue_id"))?;

        let notes = self.list_notes(venue).await;
        if notes.is_empty() {
            warn!(%venue, "No submissions found for venue");
            return Ok(Vec::new());
        }

        let site = self.ctx.settings.openreview.site_url.trim_end_matches('/');
        let drafts: Vec<(String, PaperBuilder)> = notes
            .iter()
            .filter_map(|note| draft_from_note(note, site))
            .collect();
        let drafts = apply_limit(drafts, self.config.limit, &self.config.name);
        info!(count = drafts.len(), %venue, "Parsed submission notes");

        if !self.config.fetch_reviews {
            return Ok(drafts.into_iter().map(|(_, b)| b.build()).collect());
        }

        let delay = Duration::from_millis(self.ctx.settings.openreview.review_delay_ms);
        let papers = self
            .ctx
            .pool
            .run(self.config.max_workers, drafts, |(forum, builder)| async move {
                if !delay.is_zero() {
                    sleep(delay).await;
                }
                let summary = self.fetch_reviews(&forum).await;
                Some(builder.reviews(summary).build())
            })
            .await;
        info!(count = papers.len(), "Attached review details");
        Ok(papers)
    }

    /// Page through the venue until a short page, a failed page or the limit.
    async fn list_notes(&self, venue: &str) -> Vec<Value> {
        let page_size = self.ctx.settings.openreview.page_size.max(1);
        let venue_enc = urlencoding::encode(venue);
        let mut notes: Vec<Value> = Vec::new();

        loop {
            let want = match self.config.limit {
                Some(limit) if notes.len() >= limit => break,
                Some(limit) => page_size.min(limit - notes.len()),
                None => page_size,
            };
            let url = format!(
                "{}/notes?content.venueid={}&limit={}&offset={}",
                self.api_base(),
                venue_enc,
                want,
                notes.len()
            );
            let Some(page) = self.ctx.http.get_json::<NotesPage>(&url).await else {
                warn!(%url, collected = notes.len(), "Listing page unavailable; stopping");
                break;
            };
            let got = page.notes.len();
            debug!(offset = notes.len(), got, "Fetched listing page");
            notes.extend(page.notes);
            if got < want {
                break;
            }
        }
        notes
    }

    async fn fetch_reviews(&self, forum: &str) -> Option<ReviewSummary> {
        let url = format!(
            "{}/notes?forum={}",
            self.ctx.settings.openreview.v2_base_url,
            urlencoding::encode(forum)
        );
        let page = self.ctx.http.get_json::<NotesPage>(&url).await;
        if page.is_none() {
            debug!(%forum, "Review thread unavailable");
        }
        page.map(|p| summarize_reviews(&p.notes))
    }
}

/// Read a content field in either the v1 (flat) or v2 (`{value}`) shape.
fn field<'v>(content: &'v Value, key: &str) -> Option<&'v Value> {
    let v = content.get(key)?;
    Some(v.get("value").unwrap_or(v))
}

fn field_str(content: &Value, key: &str) -> Option<String> {
    field(content, key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn field_list(content: &Value, key: &str) -> Vec<String> {
    match field(content, key) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

/// Turn a submission note into a builder keyed by its forum id.
fn draft_from_note(note: &Value, site: &str) -> Option<(String, PaperBuilder)> {
    let id = note.get("id").and_then(Value::as_str)?.to_string();
    let content = note.get("content")?;
    let forum = note
        .get("forum")
        .and_then(Value::as_str)
        .unwrap_or(&id)
        .to_string();

    let published = ["pdate", "cdate", "tcdate"]
        .iter()
        .find_map(|k| note.get(*k).and_then(Value::as_i64))
        .and_then(DateTime::from_timestamp_millis)
        .map(|d| d.format("%Y-%m-%d").to_string());

    let builder = Paper::builder(format!("{site}/forum?id={forum}"))
        .id(id.clone())
        .title(field_str(content, "title"))
        .authors(field_list(content, "authors"))
        .abstract_text(field_str(content, "abstract"))
        .pdf_url(Some(pdf_url(content, &id, site)))
        .keywords(field_list(content, "keywords"))
        .published(published);
    Some((forum, builder))
}

/// `content.pdf` (string or `{url}`), then the bibtex `url={...}`, then the
/// site's canonical `pdf?id=` link.
fn pdf_url(content: &Value, id: &str, site: &str) -> String {
    let from_field = field(content, "pdf").and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        Value::Object(o) => o.get("url").and_then(Value::as_str).map(str::to_string),
        _ => None,
    });
    let from_bibtex = || {
        field_str(content, "_bibtex")
            .and_then(|b| BIBTEX_URL.captures(&b).map(|c| c[1].trim().to_string()))
    };

    match from_field.or_else(from_bibtex) {
        Some(p) if p.starts_with('/') => format!("{site}{p}"),
        Some(p) if p.starts_with("http") => p,
        _ => format!("{site}/pdf?id={id}"),
    }
}

fn invitations(note: &Value) -> Vec<&str> {
    match note.get("invitations") {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
        _ => note
            .get("invitation")
            .and_then(Value::as_str)
            .into_iter()
            .collect(),
    }
}

/// Leading integer of a rating string (`"8: accept"` → 8) or the integer
/// part of a number. Anything else is ignored.
pub(crate) fn parse_rating(v: &Value) -> Option<u32> {
    match v {
        Value::String(s) => LEADING_INT.find(s.trim()).and_then(|m| m.as_str().parse().ok()),
        Value::Number(n) => n.as_f64().filter(|f| *f >= 0.0).map(|f| f.trunc() as u32),
        _ => None,
    }
}

/// Collapse a forum's replies into a decision and reviewer ratings.
fn summarize_reviews(notes: &[Value]) -> ReviewSummary {
    let mut summary = ReviewSummary::default();
    for note in notes {
        let invs = invitations(note);
        let Some(content) = note.get("content") else {
            continue;
        };
        if invs.iter().any(|i| DECISION_INVITATION.is_match(i)) {
            if let Some(d) = field_str(content, "decision").as_deref().and_then(Decision::normalize) {
                summary.decision = Some(d);
            }
        }
        if invs.iter().any(|i| REVIEW_INVITATION.is_match(i)) {
            if let Some(r) = field(content, "rating").and_then(parse_rating) {
                summary.ratings.push(r);
            }
        }
    }
    if !summary.ratings.is_empty() {
        let mean = summary.ratings.iter().sum::<u32>() as f64 / summary.ratings.len() as f64;
        summary.avg_rating = Some((mean * 100.0).round() / 100.0);
    }
    summary
}
