//! Cart, submission and download-listing endpoints of the download API.

use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

use crate::config::ApiConfig;
use crate::domain::{CartEntityType, CartItem, Download, DownloadCart};
use crate::error::GatewayError;
use crate::store::TokenSource;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub file_name: String,
    pub transport: String,
    pub email: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    #[serde(default)]
    pub facility_name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub cart_items: Vec<CartItem>,
    #[serde(default)]
    pub download_id: Option<i64>,
}

impl SubmitResponse {
    /// A usable identifier is present, positive, and not the `-1` sentinel.
    pub fn download_id(&self) -> Option<u64> {
        self.download_id
            .filter(|id| *id > 0)
            .and_then(|id| u64::try_from(id).ok())
    }
}

/// The cart/download service, scoped to one facility and one user session.
pub trait DownloadClient: Send + Sync {
    fn cart(&self) -> Result<DownloadCart, GatewayError>;
    fn add_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError>;
    fn remove_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError>;
    fn clear_cart(&self) -> Result<DownloadCart, GatewayError>;
    fn submit_cart(&self, request: &SubmitRequest) -> Result<SubmitResponse, GatewayError>;
    fn downloads(&self) -> Result<Vec<Download>, GatewayError>;
    fn download(&self, download_id: u64) -> Result<Option<Download>, GatewayError>;
    fn set_download_deleted(&self, download_id: u64, deleted: bool) -> Result<(), GatewayError>;
    fn size(&self, entity_type: CartEntityType, entity_id: u64) -> Result<u64, GatewayError>;
}

#[derive(Clone)]
pub struct DownloadHttpClient {
    client: Client,
    base_url: String,
    facility_name: String,
    token: Arc<dyn TokenSource>,
}

impl DownloadHttpClient {
    pub fn new(config: &ApiConfig, token: Arc<dyn TokenSource>) -> Result<Self, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("dgw/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| GatewayError::DownloadHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| GatewayError::DownloadHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: config.download_api_url.clone(),
            facility_name: config.facility_name.clone(),
            token,
        })
    }

    fn session_id(&self) -> String {
        self.token.token().unwrap_or_default()
    }

    fn cart_url(&self, suffix: &str) -> String {
        format!("{}/user/cart/{}{}", self.base_url, self.facility_name, suffix)
    }

    fn handle_status(response: Response) -> Result<Response, GatewayError> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response
            .text()
            .unwrap_or_else(|_| "download API request failed".to_string());
        Err(GatewayError::DownloadStatus { status, message })
    }

    fn send(request: reqwest::blocking::RequestBuilder) -> Result<Response, GatewayError> {
        let response = request
            .send()
            .map_err(|err| GatewayError::DownloadHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn json<T: serde::de::DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
        response
            .json()
            .map_err(|err| GatewayError::MalformedResponse(err.to_string()))
    }

    fn query_downloads(&self, query_offset: &str) -> Result<Vec<Download>, GatewayError> {
        let url = format!("{}/user/downloads", self.base_url);
        let response = Self::send(self.client.get(&url).query(&[
            ("sessionId", self.session_id().as_str()),
            ("facilityName", self.facility_name.as_str()),
            ("queryOffset", query_offset),
        ]))?;
        Self::json(response)
    }
}

/// `"investigation 1, investigation 2"`, the cart API's item list form.
pub fn cart_items_param(entity_type: CartEntityType, ids: &[u64]) -> String {
    ids.iter()
        .map(|id| format!("{entity_type} {id}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl DownloadClient for DownloadHttpClient {
    fn cart(&self) -> Result<DownloadCart, GatewayError> {
        let response = Self::send(
            self.client
                .get(self.cart_url(""))
                .query(&[("sessionId", self.session_id())]),
        )?;
        Self::json(response)
    }

    fn add_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        let items = cart_items_param(entity_type, ids);
        let response = Self::send(
            self.client
                .post(self.cart_url("/cartItems"))
                .form(&[("sessionId", self.session_id()), ("items", items)]),
        )?;
        Self::json(response)
    }

    fn remove_cart_items(
        &self,
        entity_type: CartEntityType,
        ids: &[u64],
    ) -> Result<DownloadCart, GatewayError> {
        let items = cart_items_param(entity_type, ids);
        let response = Self::send(
            self.client
                .delete(self.cart_url("/cartItems"))
                .query(&[("sessionId", self.session_id()), ("items", items)]),
        )?;
        Self::json(response)
    }

    fn clear_cart(&self) -> Result<DownloadCart, GatewayError> {
        let response = Self::send(
            self.client
                .delete(self.cart_url("/cartItems"))
                .query(&[("sessionId", self.session_id()), ("items", "*".to_string())]),
        )?;
        Self::json(response)
    }

    fn submit_cart(&self, request: &SubmitRequest) -> Result<SubmitResponse, GatewayError> {
        let response = Self::send(self.client.post(self.cart_url("/submit")).form(&[
            ("sessionId", self.session_id()),
            ("fileName", request.file_name.clone()),
            ("transport", request.transport.clone()),
            ("email", request.email.clone()),
            ("zipType", "ZIP".to_string()),
        ]))?;
        Self::json(response)
    }

    fn downloads(&self) -> Result<Vec<Download>, GatewayError> {
        self.query_downloads(&format!(
            "where download.facilityName = '{}' and download.isDeleted = false",
            self.facility_name
        ))
    }

    fn download(&self, download_id: u64) -> Result<Option<Download>, GatewayError> {
        let downloads = self.query_downloads(&format!("where download.id = {download_id}"))?;
        Ok(downloads.into_iter().next())
    }

    fn set_download_deleted(&self, download_id: u64, deleted: bool) -> Result<(), GatewayError> {
        let url = format!("{}/user/download/{download_id}/isDeleted", self.base_url);
        Self::send(self.client.put(&url).form(&[
            ("facilityName", self.facility_name.clone()),
            ("sessionId", self.session_id()),
            ("value", deleted.to_string()),
        ]))?;
        Ok(())
    }

    fn size(&self, entity_type: CartEntityType, entity_id: u64) -> Result<u64, GatewayError> {
        let url = format!("{}/user/getSize", self.base_url);
        let response = Self::send(self.client.get(&url).query(&[
            ("sessionId", self.session_id()),
            ("facilityName", self.facility_name.clone()),
            ("entityType", entity_type.to_string()),
            ("entityId", entity_id.to_string()),
        ]))?;
        let value: serde_json::Value = Self::json(response)?;
        value
            .as_u64()
            .ok_or_else(|| GatewayError::MalformedResponse(format!("size was {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn items_param_format() {
        assert_eq!(
            cart_items_param(CartEntityType::Dataset, &[1, 2]),
            "dataset 1, dataset 2"
        );
    }

    #[test]
    fn sentinel_download_id_is_unusable() {
        let response = SubmitResponse {
            download_id: Some(-1),
            ..SubmitResponse::default()
        };
        assert_eq!(response.download_id(), None);
        let response = SubmitResponse {
            download_id: Some(0),
            ..SubmitResponse::default()
        };
        assert_eq!(response.download_id(), None);
    }
}
