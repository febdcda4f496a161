//! Common test utilities for E2E tests
//!
//! Spins up the bridge against in-process fakes: a temp-file SQLite
//! database, fake CC services, an in-memory stream bus, and a stub remote
//! ActivityPub server that records everything delivered to it.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tempfile::TempDir;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use ccbridge::AppState;
use ccbridge::config;
use ccbridge::data::Database;
use ccbridge::error::AppError;
use ccbridge::federation::ApClient;
use ccbridge::services::{
    AssociationService, CcAssociation, CcMessage, EntityService, MessageService, ProxySigner,
    SignedObject, StreamBus, schema,
};

pub const TEST_FQDN: &str = "cc.test.example";
pub const PROXY_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

// =============================================================================
// Fake CC services
// =============================================================================

#[derive(Default)]
pub struct FakeMessageService {
    pub store: Mutex<HashMap<String, CcMessage>>,
    pub posted: Mutex<Vec<CcMessage>>,
    pub deleted: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeMessageService {
    pub fn insert(&self, message: CcMessage) {
        self.store
            .lock()
            .unwrap()
            .insert(message.id.clone(), message);
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageService for FakeMessageService {
    async fn get(&self, id: &str) -> Result<CcMessage, AppError> {
        self.store
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::Federation("message not found".to_string()))
    }

    async fn post(
        &self,
        payload: String,
        _signature: String,
        _streams: Vec<String>,
    ) -> Result<CcMessage, AppError> {
        let id = format!("CCMSG-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let message = CcMessage {
            id: id.clone(),
            author: "".to_string(),
            payload,
        };
        self.store
            .lock()
            .unwrap()
            .insert(id.clone(), message.clone());
        self.posted.lock().unwrap().push(message.clone());
        Ok(message)
    }

    async fn delete(&self, id: &str) -> Result<CcMessage, AppError> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.store
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| AppError::Federation("message not found".to_string()))
    }

    async fn total(&self) -> Result<i64, AppError> {
        Ok(self.store.lock().unwrap().len() as i64)
    }
}

#[derive(Default)]
pub struct FakeAssociationService {
    pub store: Mutex<HashMap<String, CcAssociation>>,
    pub posted: Mutex<Vec<CcAssociation>>,
    pub deleted: Mutex<Vec<String>>,
    counter: AtomicUsize,
}

impl FakeAssociationService {
    pub fn insert(&self, association: CcAssociation) {
        self.store
            .lock()
            .unwrap()
            .insert(association.id.clone(), association);
    }

    pub fn posted_count(&self) -> usize {
        self.posted.lock().unwrap().len()
    }
}

#[async_trait]
impl AssociationService for FakeAssociationService {
    async fn get(&self, id: &str) -> Result<CcAssociation, AppError> {
        self.store
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::Federation("association not found".to_string()))
    }

    async fn post(
        &self,
        payload: String,
        _signature: String,
        _streams: Vec<String>,
        target_type: &str,
    ) -> Result<CcAssociation, AppError> {
        let id = format!("CCASSOC-{}", self.counter.fetch_add(1, Ordering::SeqCst) + 1);
        let signed: SignedObject = serde_json::from_str(&payload)
            .map_err(|_| AppError::Validation("invalid payload".to_string()))?;
        let association = CcAssociation {
            id: id.clone(),
            author: signed.signer.clone(),
            schema: signed.schema.clone(),
            target_id: signed.target.clone().unwrap_or_default(),
            target_type: target_type.to_string(),
            payload,
        };
        self.store
            .lock()
            .unwrap()
            .insert(id.clone(), association.clone());
        self.posted.lock().unwrap().push(association.clone());
        Ok(association)
    }

    async fn delete(&self, id: &str) -> Result<CcAssociation, AppError> {
        self.deleted.lock().unwrap().push(id.to_string());
        self.store
            .lock()
            .unwrap()
            .remove(id)
            .ok_or_else(|| AppError::Federation("association not found".to_string()))
    }
}

pub struct FakeEntityService;

#[async_trait]
impl EntityService for FakeEntityService {
    async fn total(&self) -> Result<i64, AppError> {
        Ok(1)
    }
}

// =============================================================================
// In-memory stream bus
// =============================================================================

/// In-process replacement for the Redis bus. Each subscription gets its own
/// channel; publishing fans the payload to every subscriber of the stream.
#[derive(Default)]
pub struct MemoryBus {
    subscribers: Mutex<HashMap<String, Vec<mpsc::UnboundedSender<String>>>>,
}

impl MemoryBus {
    pub fn publish(&self, channel: &str, payload: &str) {
        let mut subscribers = self.subscribers.lock().unwrap();
        if let Some(senders) = subscribers.get_mut(channel) {
            senders.retain(|sender| sender.send(payload.to_string()).is_ok());
        }
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.subscribers
            .lock()
            .unwrap()
            .get(channel)
            .map(|senders| senders.len())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StreamBus for MemoryBus {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, AppError> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(channel.to_string())
            .or_default()
            .push(tx);

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|payload| (payload, rx))
        })
        .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), AppError> {
        Ok(())
    }
}

// =============================================================================
// Stub remote ActivityPub server
// =============================================================================

/// One request recorded by the stub remote server.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: serde_json::Value,
}

/// A fake Mastodon-ish server: serves actor documents and records inbox
/// deliveries.
pub struct RemoteServer {
    pub base_url: String,
    pub inbox: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl RemoteServer {
    pub async fn start() -> Self {
        use axum::extract::Path;
        use axum::http::HeaderMap;
        use axum::routing::{get, post};

        let inbox: Arc<Mutex<Vec<RecordedRequest>>> = Arc::new(Mutex::new(Vec::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let actor_base = base_url.clone();
        let recorded = inbox.clone();

        let app = axum::Router::new()
            .route(
                "/users/:name",
                get(move |Path(name): Path<String>| {
                    let base = actor_base.clone();
                    async move {
                        axum::Json(serde_json::json!({
                            "@context": "https://www.w3.org/ns/activitystreams",
                            "type": "Person",
                            "id": format!("{}/users/{}", base, name),
                            "preferredUsername": name,
                            "name": format!("Remote {}", name),
                            "summary": "remote test actor",
                            "inbox": format!("{}/inbox", base),
                            "url": format!("{}/@{}", base, name),
                            "icon": {
                                "type": "Image",
                                "url": format!("{}/avatars/{}.png", base, name)
                            }
                        }))
                    }
                }),
            )
            .route(
                "/inbox",
                post(move |headers: HeaderMap, body: axum::body::Bytes| {
                    let recorded = recorded.clone();
                    async move {
                        let header_map = headers
                            .iter()
                            .map(|(name, value)| {
                                (
                                    name.as_str().to_string(),
                                    value.to_str().unwrap_or("").to_string(),
                                )
                            })
                            .collect();
                        recorded.lock().unwrap().push(RecordedRequest {
                            path: "/inbox".to_string(),
                            headers: header_map,
                            body: serde_json::from_slice(&body)
                                .unwrap_or(serde_json::Value::Null),
                        });
                        "accepted"
                    }
                }),
            );

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, inbox }
    }

    pub fn actor_url(&self, name: &str) -> String {
        format!("{}/users/{}", self.base_url, name)
    }

    pub fn inbox_url(&self) -> String {
        format!("{}/inbox", self.base_url)
    }

    pub fn deliveries(&self) -> Vec<RecordedRequest> {
        self.inbox.lock().unwrap().clone()
    }

    /// Wait until at least `count` deliveries have landed.
    pub async fn wait_for_deliveries(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.inbox.lock().unwrap().len() >= count {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

// =============================================================================
// Test server
// =============================================================================

pub struct TestServer {
    pub addr: String,
    pub state: AppState,
    pub messages: Arc<FakeMessageService>,
    pub associations: Arc<FakeAssociationService>,
    pub bus: Arc<MemoryBus>,
    pub client: reqwest::Client,
    pub _temp_dir: TempDir,
}

pub fn test_config(tick_seconds: u64) -> config::AppConfig {
    config::AppConfig {
        server: config::ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            fqdn: TEST_FQDN.to_string(),
        },
        database: config::DatabaseConfig {
            path: "unused".into(),
        },
        redis: config::RedisConfig {
            url: "redis://127.0.0.1:6379".to_string(),
        },
        concurrent: config::ConcurrentConfig {
            api_url: "http://127.0.0.1:1".to_string(),
        },
        proxy: config::ProxyConfig {
            private_key: PROXY_KEY.to_string(),
            notification_stream: "proxy-notifications".to_string(),
        },
        cache: config::CacheConfig { person_ttl: 1800 },
        worker: config::WorkerConfig { tick_seconds },
        logging: config::LoggingConfig {
            level: "info".to_string(),
            format: "pretty".to_string(),
        },
    }
}

impl TestServer {
    pub async fn new() -> Self {
        Self::with_tick(10).await
    }

    pub async fn with_tick(tick_seconds: u64) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let db = Arc::new(
            Database::connect(&temp_dir.path().join("test.db"))
                .await
                .unwrap(),
        );

        let http_client = Arc::new(
            reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap(),
        );

        let messages = Arc::new(FakeMessageService::default());
        let associations = Arc::new(FakeAssociationService::default());
        let bus = Arc::new(MemoryBus::default());

        let config = test_config(tick_seconds);

        let state = AppState {
            config: Arc::new(config),
            db,
            ap: Arc::new(ApClient::new(
                http_client.clone(),
                TEST_FQDN.to_string(),
                Duration::from_secs(1800),
            )),
            message: messages.clone(),
            association: associations.clone(),
            entity: Arc::new(FakeEntityService),
            proxy: Arc::new(ProxySigner::from_hex(PROXY_KEY).unwrap()),
            bus: bus.clone(),
            http_client,
        };

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = format!("http://{}", listener.local_addr().unwrap());

        let app = ccbridge::build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();

        Self {
            addr,
            state,
            messages,
            associations,
            bus,
            client,
            _temp_dir: temp_dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.addr, path)
    }

    /// Create a bridge entity with a working RSA keypair.
    pub async fn create_entity(&self, id: &str, ccid: &str) -> ccbridge::data::ApEntity {
        let (private_key, public_key) = ccbridge::federation::generate_rsa_keypair().unwrap();
        let entity = ccbridge::data::ApEntity {
            id: id.to_string(),
            ccid: ccid.to_string(),
            public_key,
            private_key,
            home_stream: format!("home-{}", id),
            notification_stream: format!("notify-{}", id),
            follow_stream: format!("follow-{}", id),
        };
        self.state.db.create_entity(&entity).await.unwrap();
        entity
    }

    /// Insert a CC note message into the fake message store.
    pub fn insert_note_message(&self, id: &str, author_ccid: &str, body: &str) {
        let signed = SignedObject {
            signer: author_ccid.to_string(),
            object_type: "Message".to_string(),
            schema: schema::message::NOTE.to_string(),
            body: serde_json::json!({ "body": body }),
            meta: None,
            signed_at: chrono::Utc::now(),
            target: None,
            variant: None,
        };
        self.messages.insert(CcMessage {
            id: id.to_string(),
            author: author_ccid.to_string(),
            payload: serde_json::to_string(&signed).unwrap(),
        });
    }

    /// POST an activity to an inbox path and return the response.
    pub async fn deliver(&self, path: &str, activity: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .header("Content-Type", "application/activity+json")
            .json(&activity)
            .send()
            .await
            .unwrap()
    }
}

/// Issue a CC JWT for tests, signed with a fresh secp256k1 key.
pub fn issue_test_jwt() -> (String, String) {
    use alloy_for_tests::*;

    let signer = PrivateKeySigner::random();
    let ccid = format!(
        "CC{}",
        signer
            .address()
            .to_checksum(None)
            .strip_prefix("0x")
            .unwrap()
    );

    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"ECRECOVER","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(
        serde_json::json!({
            "iss": ccid,
            "sub": "CONCURRENT_API",
            "exp": (chrono::Utc::now().timestamp() + 600).to_string(),
        })
        .to_string(),
    );
    let signing_input = format!("{}.{}", header, payload);
    let digest = keccak256(signing_input.as_bytes());
    let signature = signer.sign_hash_sync(&digest).unwrap();
    let token = format!(
        "{}.{}",
        signing_input,
        URL_SAFE_NO_PAD.encode(signature.as_bytes())
    );

    (token, ccid)
}

mod alloy_for_tests {
    pub use alloy::primitives::keccak256;
    pub use alloy::signers::SignerSync;
    pub use alloy::signers::local::PrivateKeySigner;
    pub use base64::Engine;
    pub use base64::engine::general_purpose::URL_SAFE_NO_PAD;
}
