use anyhow::{Context, Result};
use common::NewsApiConfig;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::{GatewayError, NewsGateway, ParamSet, Payload};

/// NewsAPI v2 client (`/top-headlines` and `/top-headlines/sources`)
pub struct NewsApiGateway {
    base_url: String,
    api_key: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl NewsApiGateway {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(10),
            client: reqwest::Client::new(),
        }
    }

    /// Build from config, reading the API key from the configured env var.
    pub fn from_config(config: &NewsApiConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("NewsAPI key env var '{}' not set", config.api_key_env))?;
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            base_url: config.api_url.clone(),
            api_key,
            timeout: Duration::from_secs(config.timeout_seconds),
            client,
        })
    }

    fn endpoint(&self, path: &str, params: &ParamSet) -> Result<Url, GatewayError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url.trim_end_matches('/'), path))?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params.iter());
        }
        Ok(url)
    }

    async fn get(&self, path: &str, params: &ParamSet) -> Result<Payload, GatewayError> {
        let url = self.endpoint(path, params)?;
        debug!(%url, "newsapi request");

        let response = tokio::time::timeout(
            self.timeout,
            self.client.get(url).header("X-Api-Key", &self.api_key).send(),
        )
        .await
        .map_err(|_| GatewayError::Timeout(self.timeout))??;

        let status = response.status();
        let body = response.text().await?;
        let parsed: Option<Value> = serde_json::from_str(&body).ok();

        // NewsAPI reports failures as {"status": "error", "code": ..., "message": ...}
        if let Some(err) = parsed.as_ref().and_then(api_error) {
            return Err(err);
        }
        if !status.is_success() {
            return Err(GatewayError::Status {
                status: status.as_u16(),
                body,
            });
        }
        parsed.ok_or_else(|| GatewayError::Decode("response body is not JSON".to_string()))
    }
}

fn api_error(body: &Value) -> Option<GatewayError> {
    if body.get("status").and_then(Value::as_str) != Some("error") {
        return None;
    }
    let field = |name: &str| body.get(name).and_then(Value::as_str).unwrap_or("unknown").to_string();
    Some(GatewayError::Api {
        code: field("code"),
        message: field("message"),
    })
}

#[async_trait::async_trait]
impl NewsGateway for NewsApiGateway {
    async fn fetch_headlines(&self, params: &ParamSet) -> Result<Payload, GatewayError> {
        self.get("top-headlines", params).await
    }

    async fn fetch_sources(&self, params: &ParamSet) -> Result<Payload, GatewayError> {
        self.get("top-headlines/sources", params).await
    }
}
