use std::collections::BTreeMap;
use std::time::Duration;

use common::protocol::Domain;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Upstream response body, stored in the cache and written to result files as-is.
pub type Payload = Value;

/// Core trait for upstream news providers
#[async_trait::async_trait]
pub trait NewsGateway: Send + Sync {
    /// Top headlines matching the filters
    async fn fetch_headlines(&self, params: &ParamSet) -> Result<Payload, GatewayError>;

    /// Source catalog matching the filters
    async fn fetch_sources(&self, params: &ParamSet) -> Result<Payload, GatewayError>;

    async fn fetch(&self, domain: Domain, params: &ParamSet) -> Result<Payload, GatewayError> {
        match domain {
            Domain::Headlines => self.fetch_headlines(params).await,
            Domain::Sources => self.fetch_sources(params).await,
        }
    }
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("upstream request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("upstream request timed out after {0:?}")]
    Timeout(Duration),
    #[error("{code}: {message}")]
    Api { code: String, message: String },
    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("invalid upstream response: {0}")]
    Decode(String),
    #[error("invalid upstream url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

/// Filter arguments for one upstream call, ordered by name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ParamSet(BTreeMap<String, String>);

impl ParamSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// JSON object text with names in lexicographic order, e.g. `{"category":"sports"}`.
    pub fn canonical(&self) -> String {
        let object: serde_json::Map<String, Value> = self
            .0
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        Value::Object(object).to_string()
    }
}

pub mod newsapi;
