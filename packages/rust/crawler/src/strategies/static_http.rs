//! Plain GET without script execution.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, Proxy};
use sitecorpus_shared::{FailureReason, PageResult, StaticHttpConfig, StrategyKind};
use tracing::{debug, instrument};
use url::Url;

use super::FetchStrategy;
use crate::extract::{extract_metadata, looks_like_html};
use crate::identity::Identity;

/// Maximum number of redirects to follow per page.
const MAX_REDIRECTS: usize = 5;

/// Browser-like headers sent with every request.
fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
    );
    headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
    headers.insert(header::UPGRADE_INSECURE_REQUESTS, HeaderValue::from_static("1"));
    headers
}

/// Fetches raw markup with reqwest; one pooled client per proxy.
pub struct StaticHttpStrategy {
    timeout: Duration,
    clients: Mutex<HashMap<Option<String>, Client>>,
}

impl StaticHttpStrategy {
    pub fn new(config: &StaticHttpConfig) -> Self {
        Self {
            timeout: Duration::from_secs(config.timeout_secs),
            clients: Mutex::new(HashMap::new()),
        }
    }

    fn client_for(&self, proxy: Option<&str>) -> Result<Client, FailureReason> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let key = proxy.map(str::to_string);
        if let Some(client) = clients.get(&key) {
            return Ok(client.clone());
        }

        let mut builder = Client::builder()
            .default_headers(browser_headers())
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(self.timeout);
        if let Some(proxy) = proxy {
            let proxy = Proxy::all(proxy)
                .map_err(|e| FailureReason::Proxy(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }
        let client = builder
            .build()
            .map_err(|e| FailureReason::Fetch(format!("failed to build HTTP client: {e}")))?;

        clients.insert(key, client.clone());
        Ok(client)
    }

    async fn fetch_inner(&self, url: &Url, identity: &Identity) -> Result<PageResult, FailureReason> {
        let client = self.client_for(identity.proxy.as_deref())?;

        let response = client
            .get(url.as_str())
            .header(header::USER_AGENT, identity.user_agent.as_str())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FailureReason::Fetch(format!("timed out after {}s", self.timeout.as_secs()))
                } else if e.is_connect() && identity.proxy.is_some() {
                    FailureReason::Proxy(e.to_string())
                } else {
                    FailureReason::Fetch(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FailureReason::Fetch(format!("HTTP {status}")));
        }

        if let Some(content_type) = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            let ct = content_type.to_ascii_lowercase();
            if !(ct.contains("html") || ct.contains("text/plain") || ct.contains("xml")) {
                return Err(FailureReason::Fetch(format!(
                    "unsupported content type {content_type}"
                )));
            }
        }

        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| FailureReason::Fetch(format!("body read failed: {e}")))?;

        if !looks_like_html(&body) {
            return Err(FailureReason::Fetch("response is not parseable HTML".into()));
        }

        let meta = extract_metadata(&body, &final_url);
        debug!(%url, bytes = body.len(), links = meta.links.len(), "static fetch ok");

        Ok(PageResult::succeeded(url.clone(), StrategyKind::StaticHttp, body)
            .with_title(meta.title)
            .with_description(meta.description)
            .with_links(meta.links))
    }
}

#[async_trait]
impl FetchStrategy for StaticHttpStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StaticHttp
    }

    #[instrument(skip_all, fields(url = %url, strategy = "static-http"))]
    async fn fetch(&self, url: &Url, identity: &Identity) -> PageResult {
        match self.fetch_inner(url, identity).await {
            Ok(page) => page,
            Err(reason) => {
                debug!(%reason, "static fetch failed");
                PageResult::failed(url.clone(), StrategyKind::StaticHttp, reason)
            }
        }
    }
}
