//! Hosted extraction service (Firecrawl-compatible `/v1/scrape`).
//!
//! The request declares a JSON output schema (company name, description,
//! content) alongside Markdown. Markdown becomes the page body; the schema
//! fields fill in title and description when page metadata lacks them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::json;
use sitecorpus_shared::{
    ContentFormat, FailureReason, PageResult, PremiumConfig, Result, SiteCorpusError, StrategyKind,
};
use tracing::{debug, instrument};
use url::Url;

use super::FetchStrategy;
use crate::extract::markdown_links;
use crate::identity::Identity;

// Request/Response types for the scrape API

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest<'a> {
    url: &'a str,
    formats: [&'static str; 2],
    only_main_content: bool,
    json_options: JsonOptions,
    headers: HashMap<&'static str, &'a str>,
    timeout: u64,
}

#[derive(Serialize)]
struct JsonOptions {
    schema: serde_json::Value,
}

#[derive(Deserialize)]
struct ScrapeResponse {
    success: bool,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    data: Option<ScrapeData>,
}

#[derive(Deserialize)]
struct ScrapeData {
    #[serde(default)]
    markdown: Option<String>,
    #[serde(default)]
    json: Option<CompanyExtract>,
    #[serde(default)]
    metadata: Option<ScrapeMetadata>,
}

#[derive(Deserialize, Default)]
struct CompanyExtract {
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ScrapeMetadata {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

/// Declared output schema sent with every request.
fn company_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "company_name": { "type": "string" },
            "description": { "type": "string" },
            "content": { "type": "string" }
        },
        "required": ["company_name", "description", "content"]
    })
}

/// Delegates extraction to the hosted API.
pub struct PremiumApiStrategy {
    client: Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl PremiumApiStrategy {
    pub fn new(config: &PremiumConfig, api_key: impl Into<String>) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SiteCorpusError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            timeout,
        })
    }

    async fn scrape(&self, url: &Url, identity: &Identity) -> std::result::Result<PageResult, FailureReason> {
        // The service fetches from its own network; only the agent is forwarded.
        let request = ScrapeRequest {
            url: url.as_str(),
            formats: ["markdown", "json"],
            only_main_content: false,
            json_options: JsonOptions {
                schema: company_schema(),
            },
            headers: HashMap::from([("User-Agent", identity.user_agent.as_str())]),
            timeout: self.timeout.as_millis() as u64,
        };

        let response = self
            .client
            .post(format!("{}/v1/scrape", self.endpoint))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    FailureReason::Remote(format!("timed out after {}s", self.timeout.as_secs()))
                } else {
                    FailureReason::Remote(e.to_string())
                }
            })?;

        let status = response.status();
        if matches!(status, StatusCode::PAYMENT_REQUIRED | StatusCode::TOO_MANY_REQUESTS) {
            return Err(FailureReason::QuotaExceeded(format!("HTTP {status}")));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let snippet: String = text.chars().take(200).collect();
            return Err(FailureReason::Remote(format!("HTTP {status}: {snippet}")));
        }

        let body: ScrapeResponse = response
            .json()
            .await
            .map_err(|e| FailureReason::Remote(format!("invalid response: {e}")))?;

        if !body.success {
            return Err(FailureReason::Remote(
                body.error.unwrap_or_else(|| "scrape reported failure".into()),
            ));
        }
        let data = body
            .data
            .ok_or_else(|| FailureReason::Remote("response has no data".into()))?;

        let extract = data.json.unwrap_or_default();
        let content = data
            .markdown
            .filter(|m| !m.trim().is_empty())
            .or(extract.content.filter(|c| !c.trim().is_empty()))
            .ok_or_else(|| FailureReason::Remote("empty extraction".into()))?;

        let (meta_title, meta_description) = data
            .metadata
            .map(|m| (m.title, m.description))
            .unwrap_or_default();
        let links = markdown_links(&content, url);

        Ok(
            PageResult::succeeded(url.clone(), StrategyKind::PremiumApi, content)
                .with_format(ContentFormat::Markdown)
                .with_title(meta_title.or(extract.company_name))
                .with_description(extract.description.or(meta_description))
                .with_links(links),
        )
    }
}

#[async_trait]
impl FetchStrategy for PremiumApiStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::PremiumApi
    }

    #[instrument(skip_all, fields(url = %url, strategy = "premium-api"))]
    async fn fetch(&self, url: &Url, identity: &Identity) -> PageResult {
        match self.scrape(url, identity).await {
            Ok(page) => page,
            Err(reason) => {
                debug!(%reason, "premium scrape failed");
                PageResult::failed(url.clone(), StrategyKind::PremiumApi, reason)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn strategy_for(server: &MockServer) -> PremiumApiStrategy {
        let config = PremiumConfig {
            api_key_env: "UNUSED".into(),
            endpoint: server.uri(),
            timeout_secs: 5,
        };
        PremiumApiStrategy::new(&config, "test-key").unwrap()
    }

    fn target() -> Url {
        Url::parse("https://acme.example/").unwrap()
    }

    #[tokio::test]
    async fn successful_scrape_uses_markdown_and_schema_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/scrape"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "url": "https://acme.example/",
                "formats": ["markdown", "json"]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "data": {
                    "markdown": "# Acme\n\nWe fix pipes. See [services](/services).",
                    "json": {
                        "company_name": "Acme Plumbing",
                        "description": "Plumbers in Springfield",
                        "content": "We fix pipes."
                    },
                    "metadata": { "title": null }
                }
            })))
            .mount(&server)
            .await;

        let page = strategy_for(&server).fetch(&target(), &Identity::direct()).await;

        assert!(page.success, "{:?}", page.failure);
        assert_eq!(page.content_format, ContentFormat::Markdown);
        assert_eq!(page.title.as_deref(), Some("Acme Plumbing"));
        assert_eq!(page.description.as_deref(), Some("Plumbers in Springfield"));
        assert!(page.raw_content.starts_with("# Acme"));
        assert_eq!(page.links[0].as_str(), "https://acme.example/services");
    }

    #[tokio::test]
    async fn payment_required_is_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(402))
            .mount(&server)
            .await;

        let page = strategy_for(&server).fetch(&target(), &Identity::direct()).await;
        assert!(!page.success);
        assert!(matches!(page.failure, Some(FailureReason::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn rate_limit_is_quota_exceeded() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let page = strategy_for(&server).fetch(&target(), &Identity::direct()).await;
        assert!(matches!(page.failure, Some(FailureReason::QuotaExceeded(_))));
    }

    #[tokio::test]
    async fn server_error_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream exploded"))
            .mount(&server)
            .await;

        let page = strategy_for(&server).fetch(&target(), &Identity::direct()).await;
        match page.failure {
            Some(FailureReason::Remote(msg)) => assert!(msg.contains("upstream exploded")),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unsuccessful_body_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "error": "blocked by target"
            })))
            .mount(&server)
            .await;

        let page = strategy_for(&server).fetch(&target(), &Identity::direct()).await;
        assert_eq!(
            page.failure,
            Some(FailureReason::Remote("blocked by target".into()))
        );
    }
}
