//! Browser-automation scraper for JavaScript-rendered listings (IJCAI, KDD).
//!
//! The page is loaded in a headless Chrome driven over the W3C WebDriver
//! protocol, left to settle, then queried with a per-site CSS rule. Only the
//! title and link are extracted, and only for the elements kept by the task
//! limit. The browser session is released on every exit path, including a
//! panic inside the extraction step.

use super::apply_limit;
use crate::context::AppContext;
use crate::error::ScrapeError;
use crate::models::{Paper, collapse_whitespace};
use crate::network::{HttpResponse, Request, Transport, USER_AGENT};
use crate::task::TaskConfig;
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{Value, json};
use std::panic::{AssertUnwindSafe, resume_unwind};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// W3C element reference key.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Page loads and session startup can be slow; allow more than a plain fetch.
const WEBDRIVER_TIMEOUT: Duration = Duration::from_secs(120);

/// Opaque reference to an element on the rendered page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ElementHandle(pub String);

/// An anchor read from a rendered page.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkElement {
    pub href: Option<String>,
    pub text: String,
}

/// One live browser.
#[async_trait]
pub trait BrowserSession: Send {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError>;
    /// Elements matching `css`, in document order. Reads nothing from them.
    async fn find_elements(&mut self, css: &str) -> Result<Vec<ElementHandle>, ScrapeError>;
    /// `href` property and visible text of one element.
    async fn read_link(&mut self, element: &ElementHandle) -> Result<LinkElement, ScrapeError>;
    async fn page_source(&mut self) -> Result<String, ScrapeError>;
    /// Release the browser. Must be safe to call once per session.
    async fn quit(&mut self) -> Result<(), ScrapeError>;
}

/// Factory for browser sessions, injected through the application context.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError>;
}

/// Launches headless Chrome sessions against a running WebDriver server
/// (chromedriver, selenium-server).
#[derive(Clone)]
pub struct WebDriverLauncher {
    transport: Arc<dyn Transport>,
    base: String,
}

impl std::fmt::Debug for WebDriverLauncher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDriverLauncher")
            .field("base", &self.base)
            .finish_non_exhaustive()
    }
}

impl WebDriverLauncher {
    pub fn new(webdriver_url: &str, transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base: webdriver_url.trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": [
                            "--headless",
                            "--no-sandbox",
                            "--disable-dev-shm-usage",
                            format!("--user-agent={USER_AGENT}"),
                        ]
                    }
                }
            }
        });

        let request = Request::post_json(format!("{}/session", self.base), &capabilities)
            .timeout(WEBDRIVER_TIMEOUT);
        let resp = self
            .transport
            .send(&request)
            .await
            .map_err(|e| ScrapeError::BrowserLaunch(e.to_string()))?;
        let body = payload(&resp);
        if resp.status >= 400 {
            return Err(ScrapeError::BrowserLaunch(driver_message(&body, resp.status)));
        }

        let session_id = body["value"]["sessionId"]
            .as_str()
            .or_else(|| body["sessionId"].as_str())
            .ok_or_else(|| ScrapeError::BrowserLaunch("no sessionId in response".into()))?
            .to_string();
        debug!(%session_id, "WebDriver session started");

        Ok(Box::new(WebDriverSession {
            transport: self.transport.clone(),
            session_url: format!("{}/session/{}", self.base, session_id),
            closed: false,
        }))
    }
}

/// Response body as JSON; WebDriver error pages are not always JSON.
fn payload(resp: &HttpResponse) -> Value {
    resp.json().unwrap_or(Value::Null)
}

fn driver_message(body: &Value, status: u16) -> String {
    body["value"]["message"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| format!("unexpected WebDriver response (HTTP {status})"))
}

struct WebDriverSession {
    transport: Arc<dyn Transport>,
    session_url: String,
    closed: bool,
}

impl WebDriverSession {
    /// Send one command and return its `value` member.
    async fn command(&self, request: Request) -> Result<Value, ScrapeError> {
        let resp = self
            .transport
            .send(&request.timeout(WEBDRIVER_TIMEOUT))
            .await
            .map_err(|e| ScrapeError::WebDriver(e.to_string()))?;
        let mut body = payload(&resp);
        if resp.status >= 400 {
            return Err(ScrapeError::WebDriver(driver_message(&body, resp.status)));
        }
        Ok(body["value"].take())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.session_url, path)
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn navigate(&mut self, url: &str) -> Result<(), ScrapeError> {
        self.command(Request::post_json(self.url("/url"), &json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn find_elements(&mut self, css: &str) -> Result<Vec<ElementHandle>, ScrapeError> {
        let found = self
            .command(Request::post_json(
                self.url("/elements"),
                &json!({ "using": "css selector", "value": css }),
            ))
            .await?;

        Ok(found
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|el| el[ELEMENT_KEY].as_str())
                    .map(|id| ElementHandle(id.to_string()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn read_link(&mut self, element: &ElementHandle) -> Result<LinkElement, ScrapeError> {
        let id = &element.0;
        let href = self
            .command(Request::get(self.url(&format!("/element/{id}/property/href"))))
            .await?;
        let text = self
            .command(Request::get(self.url(&format!("/element/{id}/text"))))
            .await?;
        Ok(LinkElement {
            href: href.as_str().map(str::to_string),
            text: text.as_str().unwrap_or_default().to_string(),
        })
    }

    async fn page_source(&mut self) -> Result<String, ScrapeError> {
        let v = self.command(Request::get(self.url("/source"))).await?;
        Ok(v.as_str().unwrap_or_default().to_string())
    }

    async fn quit(&mut self) -> Result<(), ScrapeError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.command(Request::delete(self.session_url.clone()))
            .await
            .map(|_| ())
    }
}

/// Link rule for one browser-rendered site.
#[derive(Debug, Clone, Copy)]
struct SiteRule {
    family: &'static str,
    links: &'static str,
}

const SITES: &[SiteRule] = &[
    SiteRule {
        family: "ijcai",
        links: r#"div.paper_wrapper > div.details > a[href^="https://www.ijcai.org/proceedings"]"#,
    },
    SiteRule {
        family: "kdd",
        links: "a.item-title",
    },
];

const DEFAULT_SITE: SiteRule = SiteRule {
    family: "default",
    links: r#"a[href*="paper"], a[href*="article"], a[href*="abs"]"#,
};

fn site_rule(family: &str) -> SiteRule {
    SITES
        .iter()
        .copied()
        .find(|s| s.family.eq_ignore_ascii_case(family))
        .unwrap_or(DEFAULT_SITE)
}

#[derive(Debug)]
pub struct BrowserScraper<'a> {
    config: TaskConfig,
    ctx: &'a AppContext,
}

impl<'a> BrowserScraper<'a> {
    pub fn new(config: TaskConfig, ctx: &'a AppContext) -> Self {
        Self { config, ctx }
    }

    /// Render the listing and collect title/link pairs.
    ///
    /// # Errors
    ///
    /// [`ScrapeError::BrowserLaunch`] when no browser could be started.
    /// Failures after launch are logged and yield an empty result.
    ///
    /// # Panics
    ///
    /// A panic during extraction is re-raised after the session is released.
    #[instrument(level = "info", skip_all, fields(task = %self.config.name))]
    pub async fn scrape(&self) -> Result<Vec<Paper>, ScrapeError> {
        let url = self
            .config
            .url
            .as_deref()
            .ok_or(ScrapeError::MissingConfig("url"))?;
        let family = self.config.parser_family.as_deref().unwrap_or_default();
        let rule = site_rule(family);

        let mut session = self.ctx.browser.launch().await.inspect_err(|e| {
            error!(error = %e, "Failed to start browser session");
        })?;
        info!(%url, family = rule.family, "Browser session acquired");

        let outcome = AssertUnwindSafe(self.collect(session.as_mut(), url, rule))
            .catch_unwind()
            .await;

        if let Err(e) = session.quit().await {
            warn!(error = %e, "Browser session did not shut down cleanly");
        } else {
            debug!("Browser session released");
        }

        match outcome {
            Ok(Ok(papers)) => Ok(papers),
            Ok(Err(e)) => {
                error!(%url, error = %e, "Browser scrape failed");
                Ok(Vec::new())
            }
            Err(panic) => resume_unwind(panic),
        }
    }

    async fn collect(
        &self,
        session: &mut dyn BrowserSession,
        url: &str,
        rule: SiteRule,
    ) -> Result<Vec<Paper>, ScrapeError> {
        session.navigate(url).await?;
        let settle = Duration::from_secs(self.ctx.settings.browser.settle_secs);
        if !settle.is_zero() {
            debug!(?settle, "Waiting for dynamic content");
            sleep(settle).await;
        }

        let elements = session.find_elements(rule.links).await?;
        if elements.is_empty() {
            warn!(%url, selector = rule.links, "No paper links matched");
            self.dump_page(session, rule.family).await;
            return Ok(Vec::new());
        }
        info!(count = elements.len(), "Found potential paper links");

        let elements = apply_limit(elements, self.config.limit, &self.config.name);
        let base = Url::parse(url).ok();
        let year = self.config.year_label();

        let mut papers = Vec::with_capacity(elements.len());
        for (i, element) in elements.iter().enumerate() {
            let link = match session.read_link(element).await {
                Ok(link) => link,
                Err(e) => {
                    debug!(element = %element.0, error = %e, "Could not read link; dropping item");
                    continue;
                }
            };
            let Some(href) = link.href else {
                continue;
            };
            let absolute = match &base {
                Some(b) => match super::resolve_url(b, &href) {
                    Some(u) => u,
                    None => continue,
                },
                None => href,
            };
            papers.push(
                Paper::builder(absolute)
                    .id(format!("{}_{}_{}", rule.family, year, i))
                    .title(Some(collapse_whitespace(&link.text)))
                    .build(),
            );
        }
        Ok(papers)
    }

    async fn dump_page(&self, session: &mut dyn BrowserSession, family: &str) {
        let Some(dir) = self.ctx.settings.browser.dump_dir.as_deref() else {
            return;
        };
        let source = match session.page_source().await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "Could not read page source for dump");
                return;
            }
        };
        let path = Path::new(dir).join(format!("_browser_dump_{family}.html"));
        let written = async {
            tokio::fs::create_dir_all(dir).await?;
            tokio::fs::write(&path, source).await
        }
        .await;
        match written {
            Ok(()) => info!(path = %path.display(), "Dumped page source for inspection"),
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to dump page source"),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted browser with acquisition, teardown and read counters.

    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Copy, Default, PartialEq)]
    pub enum FakeMode {
        #[default]
        Normal,
        FailLaunch,
        FailNavigate,
        PanicOnFind,
    }

    #[derive(Debug, Default)]
    pub struct FakeLauncher {
        pub acquired: Arc<AtomicUsize>,
        pub released: Arc<AtomicUsize>,
        pub reads: Arc<AtomicUsize>,
        pub mode: FakeMode,
        pub links: Vec<LinkElement>,
        pub source: String,
    }

    impl FakeLauncher {
        pub fn with_mode(mode: FakeMode) -> Self {
            Self {
                mode,
                ..Self::default()
            }
        }

        pub fn with_links(links: Vec<LinkElement>) -> Self {
            Self {
                links,
                ..Self::default()
            }
        }

        pub fn acquired(&self) -> usize {
            self.acquired.load(Ordering::SeqCst)
        }

        pub fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }

        /// Elements whose link was read.
        pub fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    struct FakeSession {
        released: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        mode: FakeMode,
        links: Vec<LinkElement>,
        source: String,
    }

    #[async_trait]
    impl BrowserLauncher for FakeLauncher {
        async fn launch(&self) -> Result<Box<dyn BrowserSession>, ScrapeError> {
            if self.mode == FakeMode::FailLaunch {
                return Err(ScrapeError::BrowserLaunch("no chrome binary".into()));
            }
            self.acquired.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakeSession {
                released: self.released.clone(),
                reads: self.reads.clone(),
                mode: self.mode,
                links: self.links.clone(),
                source: self.source.clone(),
            }))
        }
    }

    #[async_trait]
    impl BrowserSession for FakeSession {
        async fn navigate(&mut self, _url: &str) -> Result<(), ScrapeError> {
            match self.mode {
                FakeMode::FailNavigate => Err(ScrapeError::WebDriver("net::ERR_TIMED_OUT".into())),
                _ => Ok(()),
            }
        }

        async fn find_elements(&mut self, _css: &str) -> Result<Vec<ElementHandle>, ScrapeError> {
            if self.mode == FakeMode::PanicOnFind {
                panic!("renderer crashed");
            }
            Ok((0..self.links.len())
                .map(|i| ElementHandle(i.to_string()))
                .collect())
        }

        async fn read_link(&mut self, element: &ElementHandle) -> Result<LinkElement, ScrapeError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            element
                .0
                .parse::<usize>()
                .ok()
                .and_then(|i| self.links.get(i).cloned())
                .ok_or_else(|| ScrapeError::WebDriver("stale element reference".into()))
        }

        async fn page_source(&mut self) -> Result<String, ScrapeError> {
            Ok(self.source.clone())
        }

        async fn quit(&mut self) -> Result<(), ScrapeError> {
            self.released.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
