//! HTTP implementations of the CC service traits
//!
//! Talks to the Concurrent gateway API. The gateway wraps every response in
//! a `{status, content}` envelope.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{AssociationService, CcAssociation, CcMessage, EntityService, MessageService};
use crate::error::AppError;

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    #[serde(default)]
    #[allow(dead_code)]
    status: String,
    content: T,
}

/// Client for the CC gateway API.
#[derive(Clone)]
pub struct CcGateway {
    http: Arc<reqwest::Client>,
    base_url: String,
}

impl CcGateway {
    pub fn new(http: Arc<reqwest::Client>, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        context: &str,
    ) -> Result<T, AppError> {
        let status = response.status();
        if !status.is_success() {
            return Err(AppError::Federation(format!(
                "{} failed: HTTP {}",
                context, status
            )));
        }
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            AppError::Federation(format!("{} returned invalid JSON: {}", context, e))
        })?;
        Ok(envelope.content)
    }
}

#[async_trait]
impl MessageService for CcGateway {
    async fn get(&self, id: &str) -> Result<CcMessage, AppError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/messages/{}", id)))
            .send()
            .await?;
        Self::decode(response, "message get").await
    }

    async fn post(
        &self,
        payload: String,
        signature: String,
        streams: Vec<String>,
    ) -> Result<CcMessage, AppError> {
        let response = self
            .http
            .post(self.url("/api/v1/messages"))
            .json(&serde_json::json!({
                "signedObject": payload,
                "signature": signature,
                "streams": streams,
            }))
            .send()
            .await?;
        Self::decode(response, "message post").await
    }

    async fn delete(&self, id: &str) -> Result<CcMessage, AppError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/messages/{}", id)))
            .send()
            .await?;
        Self::decode(response, "message delete").await
    }

    async fn total(&self) -> Result<i64, AppError> {
        let response = self
            .http
            .get(self.url("/api/v1/messages/total"))
            .send()
            .await?;
        Self::decode(response, "message total").await
    }
}

#[async_trait]
impl AssociationService for CcGateway {
    async fn get(&self, id: &str) -> Result<CcAssociation, AppError> {
        let response = self
            .http
            .get(self.url(&format!("/api/v1/associations/{}", id)))
            .send()
            .await?;
        Self::decode(response, "association get").await
    }

    async fn post(
        &self,
        payload: String,
        signature: String,
        streams: Vec<String>,
        target_type: &str,
    ) -> Result<CcAssociation, AppError> {
        let response = self
            .http
            .post(self.url("/api/v1/associations"))
            .json(&serde_json::json!({
                "signedObject": payload,
                "signature": signature,
                "streams": streams,
                "targetType": target_type,
            }))
            .send()
            .await?;
        Self::decode(response, "association post").await
    }

    async fn delete(&self, id: &str) -> Result<CcAssociation, AppError> {
        let response = self
            .http
            .delete(self.url(&format!("/api/v1/associations/{}", id)))
            .send()
            .await?;
        Self::decode(response, "association delete").await
    }
}

#[async_trait]
impl EntityService for CcGateway {
    async fn total(&self) -> Result<i64, AppError> {
        let response = self
            .http
            .get(self.url("/api/v1/entities/total"))
            .send()
            .await?;
        Self::decode(response, "entity total").await
    }
}
