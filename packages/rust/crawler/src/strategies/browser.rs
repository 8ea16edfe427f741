//! Script-executing fetch through headless Chromium (chromiumoxide).
//!
//! Browsers are launched lazily, one per proxy (Chromium takes its proxy at
//! launch), and reused for every page of the crawl until [`shutdown`].
//!
//! [`shutdown`]: FetchStrategy::shutdown

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig as ChromeConfig};
use chromiumoxide::cdp::browser_protocol::network::SetUserAgentOverrideParams;
use chromiumoxide::error::CdpError;
use chromiumoxide::Page;
use futures::StreamExt;
use rand::Rng;
use sitecorpus_shared::{BrowserConfig, FailureReason, PageResult, StrategyKind};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::FetchStrategy;
use crate::extract::extract_metadata;
use crate::identity::Identity;

const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Common desktop window sizes; each browser session draws one.
const VIEWPORTS: [(u32, u32); 4] = [(1920, 1080), (1366, 768), (1440, 900), (1536, 864)];

/// Chromium network errors caused by the proxy rather than the site.
const PROXY_ERRORS: [&str; 3] = [
    "ERR_PROXY_CONNECTION_FAILED",
    "ERR_TUNNEL_CONNECTION_FAILED",
    "ERR_PROXY_AUTH",
];

/// Poll interval while waiting for `document.readyState`.
const READY_POLL: Duration = Duration::from_millis(100);

/// A running Chromium and the task draining its CDP event stream.
struct BrowserSession {
    browser: Browser,
    handler: JoinHandle<()>,
}

#[derive(Default)]
struct SessionPool {
    sessions: HashMap<Option<String>, BrowserSession>,
    /// Proxies whose launch failed; not retried within the crawl.
    failed: HashMap<Option<String>, FailureReason>,
}

/// Renders pages in headless Chromium before extracting the DOM.
pub struct HeadlessBrowserStrategy {
    config: BrowserConfig,
    pool: Mutex<SessionPool>,
}

impl HeadlessBrowserStrategy {
    pub fn new(config: BrowserConfig) -> Self {
        Self {
            config,
            pool: Mutex::new(SessionPool::default()),
        }
    }

    fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.config.navigation_timeout_secs)
    }

    /// Open a blank page on the browser for `proxy`, launching it if needed.
    async fn open_page(&self, proxy: Option<&str>) -> Result<Page, FailureReason> {
        let key = proxy.map(str::to_string);
        let mut pool = self.pool.lock().await;

        if let Some(reason) = pool.failed.get(&key) {
            return Err(reason.clone());
        }

        if !pool.sessions.contains_key(&key) {
            match self.launch(proxy).await {
                Ok(session) => {
                    pool.sessions.insert(key.clone(), session);
                }
                Err(message) => {
                    let reason = match proxy {
                        Some(_) => FailureReason::Proxy(message),
                        None => FailureReason::Render(message),
                    };
                    pool.failed.insert(key, reason.clone());
                    return Err(reason);
                }
            }
        }

        let session = pool
            .sessions
            .get(&key)
            .ok_or_else(|| FailureReason::Render("browser session vanished".into()))?;
        session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| FailureReason::Render(format!("failed to open page: {e}")))
    }

    async fn launch(&self, proxy: Option<&str>) -> Result<BrowserSession, String> {
        let (width, height) = pick_viewport();
        let mut builder = ChromeConfig::builder()
            .request_timeout(self.navigation_timeout())
            .window_size(width, height)
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-notifications")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--mute-audio");

        if let Some(executable) = &self.config.executable {
            builder = builder.chrome_executable(executable);
        }
        if let Some(proxy) = proxy {
            builder = builder.arg(format!("--proxy-server={proxy}"));
        }

        let chrome_config = builder
            .build()
            .map_err(|e| format!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(chrome_config)
            .await
            .map_err(|e| format!("failed to launch browser: {e}"))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "browser handler event error");
                }
            }
        });

        info!(proxy = proxy.unwrap_or("direct"), width, height, "headless browser launched");
        Ok(BrowserSession { browser, handler })
    }

    async fn render(&self, url: &Url, identity: &Identity) -> Result<PageResult, FailureReason> {
        let page = self.open_page(identity.proxy.as_deref()).await?;

        let outcome = self.render_on(&page, url, identity).await;
        if let Err(e) = page.close().await {
            debug!(error = %e, "failed to close page");
        }
        let html = outcome?;

        if html.trim().is_empty() {
            return Err(FailureReason::Render("rendered document is empty".into()));
        }

        let meta = extract_metadata(&html, url);
        Ok(PageResult::succeeded(url.clone(), StrategyKind::HeadlessBrowser, html)
            .with_title(meta.title)
            .with_description(meta.description)
            .with_links(meta.links))
    }

    async fn render_on(&self, page: &Page, url: &Url, identity: &Identity) -> Result<String, FailureReason> {
        page.execute(SetUserAgentOverrideParams {
            user_agent: identity.user_agent.clone(),
            accept_language: Some(ACCEPT_LANGUAGE.into()),
            platform: None,
            user_agent_metadata: None,
        })
        .await
        .map_err(|e| render_error(e, identity))?;

        let navigation = async {
            page.goto(url.as_str()).await?;
            page.wait_for_navigation().await?;
            Ok::<(), CdpError>(())
        };
        match tokio::time::timeout(self.navigation_timeout(), navigation).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(render_error(e, identity)),
            Err(_) => {
                return Err(FailureReason::Render(format!(
                    "navigation timed out after {}s",
                    self.config.navigation_timeout_secs
                )));
            }
        }

        self.wait_for_idle(page).await;
        page.content().await.map_err(|e| render_error(e, identity))
    }

    /// Wait for `document.readyState == "complete"`, bounded by `idle_wait_ms`.
    async fn wait_for_idle(&self, page: &Page) {
        let budget = Duration::from_millis(self.config.idle_wait_ms);
        let start = Instant::now();

        while start.elapsed() < budget {
            let ready = page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|r| r.into_value::<String>().ok());
            if ready.as_deref() == Some("complete") {
                // Settle time for late XHR-driven rendering
                let remaining = budget.saturating_sub(start.elapsed());
                tokio::time::sleep(remaining.min(Duration::from_millis(250))).await;
                return;
            }
            tokio::time::sleep(READY_POLL).await;
        }
        debug!("page never reached readyState=complete, extracting anyway");
    }
}

fn render_error(e: CdpError, identity: &Identity) -> FailureReason {
    classify_render_error(e.to_string(), identity.proxy.is_some())
}

fn classify_render_error(message: String, proxied: bool) -> FailureReason {
    if proxied && PROXY_ERRORS.iter().any(|code| message.contains(code)) {
        FailureReason::Proxy(message)
    } else {
        FailureReason::Render(message)
    }
}

fn pick_viewport() -> (u32, u32) {
    VIEWPORTS[rand::rng().random_range(0..VIEWPORTS.len())]
}

#[async_trait]
impl FetchStrategy for HeadlessBrowserStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::HeadlessBrowser
    }

    #[instrument(skip_all, fields(url = %url, strategy = "headless-browser"))]
    async fn fetch(&self, url: &Url, identity: &Identity) -> PageResult {
        match self.render(url, identity).await {
            Ok(page) => page,
            Err(reason) => {
                debug!(%reason, "browser render failed");
                PageResult::failed(url.clone(), StrategyKind::HeadlessBrowser, reason)
            }
        }
    }

    async fn shutdown(&self) {
        let mut pool = self.pool.lock().await;
        for (_, mut session) in pool.sessions.drain() {
            if let Err(e) = session.browser.close().await {
                warn!(error = %e, "failed to close browser");
            }
            session.handler.abort();
        }
        pool.failed.clear();
    }
}
