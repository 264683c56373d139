//! Process-wide application context.
//!
//! Built once in `main` and passed by reference to the runner and to every
//! strategy. Holds the shared HTTP client, the worker pool, the browser
//! launcher and the settings block from the config file.

use crate::config::Settings;
use crate::error::TransportError;
use crate::network::{HttpClient, ReqwestTransport, Transport};
use crate::pool::WorkerPool;
use crate::scrapers::browser::{BrowserLauncher, WebDriverLauncher};
use std::fmt;
use std::sync::Arc;

pub struct AppContext {
    pub http: HttpClient,
    pub pool: WorkerPool,
    pub browser: Arc<dyn BrowserLauncher>,
    pub settings: Settings,
}

impl AppContext {
    /// Wire the production transport and WebDriver launcher from `settings`.
    pub fn from_settings(settings: Settings) -> Result<Self, TransportError> {
        let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new()?);
        let http = HttpClient::new(transport.clone(), settings.network.retry_policy());
        let browser = Arc::new(WebDriverLauncher::new(
            &settings.browser.webdriver_url,
            transport,
        ));
        Ok(Self::with_parts(http, browser, settings))
    }

    pub fn with_parts(
        http: HttpClient,
        browser: Arc<dyn BrowserLauncher>,
        settings: Settings,
    ) -> Self {
        Self {
            pool: WorkerPool::new(settings.max_workers_cap),
            http,
            browser,
            settings,
        }
    }
}

impl fmt::Debug for AppContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppContext")
            .field("http", &self.http)
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}
