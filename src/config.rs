//! YAML configuration: task descriptors, source definitions and settings.
//!
//! ```yaml
//! tasks:
//!   - name: ICLR_2024
//!     conference: ICLR
//!     year: 2024
//!     source_type: openreview
//!     enabled: true
//!     fetch_reviews: true
//!     limit: 50
//! source_definitions:
//!   openreview:
//!     ICLR: { venue_id: "ICLR.cc/YYYY/Conference", api_v1_years: [2019, 2020, 2021, 2022, 2023] }
//!   html_cvf:
//!     CVPR: "https://openaccess.thecvf.com/CVPRYYYY?day=all"
//!   html_acl:
//!     NAACL: { pattern_map: { 2024: "volumes/2024.naacl-long" } }
//! settings:
//!   task_delay_ms: 500
//! ```

use crate::error::ConfigError;
use crate::network::RetryPolicy;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;
use tracing::{info, instrument};

/// source_type → conference → definition.
pub type SourceDefinitions = HashMap<String, HashMap<String, SourceDefinition>>;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub tasks: Vec<TaskSpec>,
    #[serde(default)]
    pub source_definitions: SourceDefinitions,
    #[serde(default)]
    pub settings: Settings,
}

/// One declarative task entry as written in the YAML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskSpec {
    pub name: Option<String>,
    pub conference: Option<String>,
    pub year: Option<u32>,
    pub source_type: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub filters: Vec<String>,
    pub limit: Option<usize>,
    #[serde(default)]
    pub download_pdfs: bool,
    pub max_workers: Option<usize>,
    pub url_override: Option<String>,
    #[serde(default)]
    pub fetch_reviews: bool,

    // arXiv
    pub search_query: Option<String>,
    pub category: Option<String>,
    pub author: Option<String>,
    #[serde(default)]
    pub terms: Vec<String>,
    pub operator: Option<String>,
    pub max_results: Option<usize>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,

    // Paginated REST (IEEE Xplore)
    #[serde(alias = "publication_number")]
    pub punumber: Option<String>,
}

impl TaskSpec {
    /// Display name: explicit `name`, else `<conference|source_type>_<year|latest>`.
    pub fn display_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| {
            format!(
                "{}_{}",
                self.conference.as_deref().unwrap_or(&self.source_type),
                self.year
                    .map(|y| y.to_string())
                    .unwrap_or_else(|| "latest".to_string())
            )
        })
    }
}

/// How a conference's entry point is computed for a year.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SourceDefinition {
    /// URL with a `YYYY` placeholder.
    Pattern(String),
    /// OpenReview venue identifier template plus the years still served by API v1.
    Venue {
        venue_id: String,
        #[serde(default)]
        api_v1_years: Vec<u32>,
    },
    /// Explicit year → URL fragment table for irregularly named venues.
    PatternMap {
        pattern_map: BTreeMap<u32, String>,
        #[serde(default = "default_anthology_base")]
        base_url: String,
    },
}

fn default_anthology_base() -> String {
    "https://aclanthology.org/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub network: NetworkSettings,
    pub task_delay_ms: u64,
    pub max_workers_cap: usize,
    pub browser: BrowserSettings,
    pub openreview: OpenReviewSettings,
    pub html: HtmlSettings,
    pub ieee: IeeeSettings,
    pub arxiv: ArxivSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            network: NetworkSettings::default(),
            task_delay_ms: 500,
            max_workers_cap: 16,
            browser: BrowserSettings::default(),
            openreview: OpenReviewSettings::default(),
            html: HtmlSettings::default(),
            ieee: IeeeSettings::default(),
            arxiv: ArxivSettings::default(),
        }
    }
}

impl Settings {
    pub fn task_delay(&self) -> Duration {
        Duration::from_millis(self.task_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NetworkSettings {
    pub retries: usize,
    pub backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub jitter_ms: u64,
    pub timeout_secs: u64,
    pub retry_statuses: Vec<u16>,
}

impl Default for NetworkSettings {
    fn default() -> Self {
        let p = RetryPolicy::default();
        Self {
            retries: p.retries,
            backoff_ms: p.backoff.as_millis() as u64,
            max_backoff_ms: p.max_backoff.as_millis() as u64,
            jitter_ms: p.jitter_ms,
            timeout_secs: p.timeout.as_secs(),
            retry_statuses: p.retry_statuses,
        }
    }
}

impl NetworkSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.retries,
            backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter_ms: self.jitter_ms,
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            retry_statuses: self.retry_statuses.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    pub webdriver_url: String,
    pub settle_secs: u64,
    pub dump_dir: Option<String>,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            webdriver_url: "http://localhost:9515".to_string(),
            settle_secs: 10,
            dump_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OpenReviewSettings {
    pub page_size: usize,
    pub review_delay_ms: u64,
    pub v1_base_url: String,
    pub v2_base_url: String,
    pub site_url: String,
}

impl Default for OpenReviewSettings {
    fn default() -> Self {
        Self {
            page_size: 1000,
            review_delay_ms: 300,
            v1_base_url: "https://api.openreview.net".to_string(),
            v2_base_url: "https://api2.openreview.net".to_string(),
            site_url: "https://openreview.net".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HtmlSettings {
    pub detail_delay_ms: u64,
}

impl Default for HtmlSettings {
    fn default() -> Self {
        Self { detail_delay_ms: 200 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IeeeSettings {
    pub base_url: String,
    pub page_delay_ms: u64,
}

impl Default for IeeeSettings {
    fn default() -> Self {
        Self {
            base_url: "https://ieeexplore.ieee.org".to_string(),
            page_delay_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArxivSettings {
    pub endpoint: String,
}

impl Default for ArxivSettings {
    fn default() -> Self {
        Self {
            endpoint: "http://export.arxiv.org/api/query".to_string(),
        }
    }
}

/// Parse a configuration document.
pub fn parse_config(yaml: &str) -> Result<Config, ConfigError> {
    Ok(serde_yaml::from_str(yaml)?)
}

/// Load and parse the configuration file at `path`.
///
/// # Errors
///
/// [`ConfigError::NotFound`] when the file does not exist, otherwise I/O or
/// YAML errors.
#[instrument(level = "info", skip_all, fields(path = %path.display()))]
pub async fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !tokio::fs::try_exists(path).await.unwrap_or(false) {
        return Err(ConfigError::NotFound(path.display().to_string()));
    }
    let text = tokio::fs::read_to_string(path).await?;
    let config = parse_config(&text)?;
    info!(
        tasks = config.tasks.len(),
        source_types = config.source_definitions.len(),
        "Loaded configuration"
    );
    Ok(config)
}
