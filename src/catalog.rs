//! Read access to the catalog API.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::Value;

use crate::config::ApiConfig;
use crate::domain::EntityType;
use crate::error::GatewayError;
use crate::query::ApiQuery;
use crate::store::TokenSource;

pub trait CatalogClient: Send + Sync {
    /// `GET /{entityPlural}`: raw rows in server order.
    fn fetch(&self, entity_type: EntityType, query: &ApiQuery) -> Result<Vec<Value>, GatewayError>;
    /// `GET /{entityPlural}/count`.
    fn count(&self, entity_type: EntityType, query: &ApiQuery) -> Result<u64, GatewayError>;
    /// `GET /{entityPlural}/findone`.
    fn find_one(&self, entity_type: EntityType, query: &ApiQuery) -> Result<Value, GatewayError>;
}

#[derive(Clone)]
pub struct CatalogHttpClient {
    client: Client,
    base_url: String,
    token: Arc<dyn TokenSource>,
    retries: usize,
}

impl CatalogHttpClient {
    pub fn new(config: &ApiConfig, token: Arc<dyn TokenSource>) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dgw/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GatewayError::CatalogHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| GatewayError::CatalogHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.api_url.clone(),
            token,
            retries: config.retries,
        })
    }

    fn url(&self, entity_type: EntityType, suffix: &str) -> String {
        format!("{}/{}{}", self.base_url, entity_type.plural(), suffix)
    }

    fn get(&self, url: &str, query: &ApiQuery) -> Result<Response, GatewayError> {
        let params = query.to_params();
        tracing::debug!(url, params = ?params, "catalog request");
        let response = self.send_with_retries(|| {
            let request = self.client.get(url).query(&params);
            match self.token.token() {
                Some(token) => request.bearer_auth(token),
                None => request,
            }
        })?;
        Self::handle_status(response)
    }

    fn handle_status(response: Response) -> Result<Response, GatewayError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "catalog request failed".to_string());
        Err(GatewayError::CatalogStatus { status, message })
    }

    fn send_with_retries<F>(&self, mut make_req: F) -> Result<Response, GatewayError>
    where
        F: FnMut() -> RequestBuilder,
    {
        retry_with_backoff(
            self.retries,
            Duration::from_millis(BASE_DELAY_MS),
            || make_req().send(),
            |outcome| match outcome {
                Ok(response) => is_retryable_status(response.status().as_u16()),
                Err(err) => is_retryable_error(err),
            },
        )
        .map_err(|err| GatewayError::CatalogHttp(err.to_string()))
    }
}

const BASE_DELAY_MS: u64 = 200;

/// Runs `attempt` up to `retries + 1` times, sleeping `base_delay * n` before the n-th retry.
/// The last outcome is returned whether or not it was retryable.
pub(crate) fn retry_with_backoff<T, E>(
    retries: usize,
    base_delay: Duration,
    mut attempt: impl FnMut() -> Result<T, E>,
    should_retry: impl Fn(&Result<T, E>) -> bool,
) -> Result<T, E> {
    let mut made = 0usize;
    loop {
        let outcome = attempt();
        if made >= retries || !should_retry(&outcome) {
            return outcome;
        }
        made += 1;
        tracing::warn!(attempt = made, retries, "retrying catalog request");
        thread::sleep(base_delay * made as u32);
    }
}

impl CatalogClient for CatalogHttpClient {
    fn fetch(&self, entity_type: EntityType, query: &ApiQuery) -> Result<Vec<Value>, GatewayError> {
        let response = self.get(&self.url(entity_type, ""), query)?;
        response
            .json()
            .map_err(|err| GatewayError::MalformedResponse(err.to_string()))
    }

    fn count(&self, entity_type: EntityType, query: &ApiQuery) -> Result<u64, GatewayError> {
        let response = self.get(&self.url(entity_type, "/count"), &query.for_count())?;
        let value: Value = response
            .json()
            .map_err(|err| GatewayError::MalformedResponse(err.to_string()))?;
        value
            .as_u64()
            .ok_or_else(|| GatewayError::MalformedResponse(format!("count was {value}")))
    }

    fn find_one(&self, entity_type: EntityType, query: &ApiQuery) -> Result<Value, GatewayError> {
        let response = self.get(&self.url(entity_type, "/findone"), query)?;
        response
            .json()
            .map_err(|err| GatewayError::MalformedResponse(err.to_string()))
    }
}

pub(crate) fn is_retryable_status(status: u16) -> bool {
    matches!(status, 429 | 500 | 502 | 503 | 504)
}

pub(crate) fn is_retryable_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}
