use std::fmt::Display;
use std::sync::Arc;

use common::protocol::{
    is_supported_category, is_supported_country, is_supported_language, Domain, HeadlinesQuery, SourcesQuery,
    SubCommand, DEFAULT_COUNTRY, ERROR_PREFIX,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::cache::{cache_key, CacheStore};
use crate::error::{RouteError, ValidationError};
use crate::gateway::{GatewayError, NewsGateway, ParamSet, Payload};
use crate::persist::ResponsePersister;

/// A fully read request: the filter mode plus its value, if the mode takes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub sub: SubCommand,
    pub param: Option<String>,
}

impl Request {
    pub fn new(sub: SubCommand, param: Option<String>) -> Self {
        Self { sub, param }
    }

    pub fn domain(&self) -> Domain {
        self.sub.domain()
    }
}

/// Format a failure for the wire.
pub fn error_reply(err: impl Display) -> String {
    format!("{}{}", ERROR_PREFIX, err)
}

/// Validates requests and serves them from the cache or the gateway,
/// persisting every answer to a result file.
pub struct CommandRouter {
    cache: Arc<CacheStore>,
    gateway: Arc<dyn NewsGateway>,
    persister: ResponsePersister,
}

impl CommandRouter {
    pub fn new(cache: Arc<CacheStore>, gateway: Arc<dyn NewsGateway>, persister: ResponsePersister) -> Self {
        Self {
            cache,
            gateway,
            persister,
        }
    }

    /// Turn a request into upstream filters, rejecting values outside the catalogs.
    pub fn build_params(request: &Request) -> Result<ParamSet, ValidationError> {
        let value = || {
            request
                .param
                .clone()
                .ok_or(ValidationError::MissingParameter(request.sub.as_wire()))
        };
        let category = || -> Result<ParamSet, ValidationError> {
            let v = value()?;
            if is_supported_category(&v) {
                Ok(ParamSet::new().with("category", v))
            } else {
                Err(ValidationError::UnsupportedCategory(v))
            }
        };
        let country = || -> Result<ParamSet, ValidationError> {
            let v = value()?;
            if is_supported_country(&v) {
                Ok(ParamSet::new().with("country", v))
            } else {
                Err(ValidationError::UnsupportedCountry(v))
            }
        };

        match request.sub {
            SubCommand::Headlines(HeadlinesQuery::Keywords) => Ok(ParamSet::new().with("q", value()?)),
            SubCommand::Headlines(HeadlinesQuery::Category) => category(),
            SubCommand::Headlines(HeadlinesQuery::Country) => country(),
            SubCommand::Headlines(HeadlinesQuery::Latest) => Ok(ParamSet::new().with("country", DEFAULT_COUNTRY)),
            SubCommand::Sources(SourcesQuery::Category) => category(),
            SubCommand::Sources(SourcesQuery::Country) => country(),
            SubCommand::Sources(SourcesQuery::Language) => {
                let v = value()?;
                if is_supported_language(&v) {
                    Ok(ParamSet::new().with("language", v))
                } else {
                    Err(ValidationError::UnsupportedLanguage(v))
                }
            }
            SubCommand::Sources(SourcesQuery::All) => Ok(ParamSet::new()),
        }
    }

    /// Cached payload for the filters, fetching upstream on a miss.
    /// Never fails: an upstream error becomes an empty envelope of the right shape.
    pub async fn fetch(&self, domain: Domain, params: &ParamSet) -> Payload {
        let key = cache_key(domain, params);
        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "cache hit");
            return hit;
        }

        let _fetching = self.cache.lock_key(&key).await;
        // Another connection may have filled it while we waited.
        if let Some(hit) = self.cache.get(&key) {
            debug!(%key, "cache filled while waiting");
            return hit;
        }

        debug!(%key, "cache miss, fetching upstream");
        match self.gateway.fetch(domain, params).await.and_then(|p| normalize(domain, p)) {
            Ok(payload) => {
                self.cache.set(key, payload.clone());
                payload
            }
            Err(e) => {
                warn!(domain = domain.as_str(), %e, "upstream fetch failed");
                error_envelope(domain, &e)
            }
        }
    }

    pub async fn route(&self, client: &str, request: &Request) -> Result<String, RouteError> {
        let params = Self::build_params(request)?;
        let payload = self.fetch(request.domain(), &params).await;
        let name = self.persister.persist(client, request.sub.request_kind(), &payload).await?;
        info!(client, kind = request.sub.request_kind(), file = %name, "request served");
        Ok(name)
    }

    /// Like `route`, but always yields the line to send back: a file name or an `error_` reply.
    pub async fn respond(&self, client: &str, request: &Request) -> String {
        match self.route(client, request).await {
            Ok(name) => name,
            Err(e) => {
                warn!(client, %e, "request rejected");
                error_reply(e)
            }
        }
    }
}

/// Successful bodies must be JSON objects carrying the domain's list key.
fn normalize(domain: Domain, mut payload: Payload) -> Result<Payload, GatewayError> {
    let Some(object) = payload.as_object_mut() else {
        return Err(GatewayError::Decode("expected a JSON object".to_string()));
    };
    object
        .entry(domain.payload_key())
        .or_insert_with(|| Value::Array(Vec::new()));
    Ok(payload)
}

fn error_envelope(domain: Domain, err: &GatewayError) -> Payload {
    json!({
        "status": "error",
        "message": err.to_string(),
        domain.payload_key(): [],
    })
}
