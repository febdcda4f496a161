//! Concurrent service collaborators
//!
//! The CC message, association, and entity services are external to the
//! bridge and reached over the gateway API; they are modeled as traits so
//! the core can be exercised against in-process fakes. This module also
//! owns the proxy identity that signs every CC object the bridge
//! synthesizes from remote activity.

mod bus;
mod gateway;
mod proxy;

pub use bus::{RedisBus, StreamBus};
pub use gateway::CcGateway;
pub use proxy::{ProxySigner, ccid_from_checksum_address};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Concurrent schema URIs the bridge understands.
pub mod schema {
    pub mod message {
        pub const NOTE: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/messages/note/0.0.1.json";
        pub const REPLY: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/messages/reply/0.0.1.json";
        pub const REROUTE: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/messages/reroute/0.0.1.json";
    }

    pub mod association {
        pub const LIKE: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/associations/like/0.0.1.json";
        pub const EMOJI: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/associations/emoji/0.0.1.json";
        pub const REPLY: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/associations/reply/0.0.1.json";
        pub const REROUTE: &str =
            "https://raw.githubusercontent.com/totegamma/concurrent-schemas/master/associations/reroute/0.0.1.json";
    }
}

/// A typed CC payload: schema-tagged JSON signed by its author.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedObject {
    pub signer: String,
    #[serde(rename = "type")]
    pub object_type: String,
    pub schema: String,
    pub body: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    pub signed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

/// A CC message as returned by the message service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CcMessage {
    pub id: String,
    #[serde(default)]
    pub author: String,
    /// Serialized SignedObject
    #[serde(default)]
    pub payload: String,
}

/// A CC association as returned by the association service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CcAssociation {
    pub id: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub schema: String,
    #[serde(default)]
    pub target_id: String,
    #[serde(default)]
    pub target_type: String,
    /// Serialized SignedObject
    #[serde(default)]
    pub payload: String,
}

/// A CC stream event as delivered over the pub/sub bus.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamEvent {
    #[serde(default)]
    pub body: serde_json::Value,
}

impl StreamEvent {
    pub fn body_id(&self) -> Option<&str> {
        self.body.get("id").and_then(|v| v.as_str())
    }

    pub fn body_author(&self) -> Option<&str> {
        self.body.get("author").and_then(|v| v.as_str())
    }
}

/// The CC message service.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn get(&self, id: &str) -> Result<CcMessage, AppError>;
    async fn post(
        &self,
        payload: String,
        signature: String,
        streams: Vec<String>,
    ) -> Result<CcMessage, AppError>;
    async fn delete(&self, id: &str) -> Result<CcMessage, AppError>;
    async fn total(&self) -> Result<i64, AppError>;
}

/// The CC association service.
#[async_trait]
pub trait AssociationService: Send + Sync {
    async fn get(&self, id: &str) -> Result<CcAssociation, AppError>;
    async fn post(
        &self,
        payload: String,
        signature: String,
        streams: Vec<String>,
        target_type: &str,
    ) -> Result<CcAssociation, AppError>;
    async fn delete(&self, id: &str) -> Result<CcAssociation, AppError>;
}

/// The CC entity service (usage statistics only).
#[async_trait]
pub trait EntityService: Send + Sync {
    async fn total(&self) -> Result<i64, AppError>;
}
