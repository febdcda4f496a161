//! CC stream bus
//!
//! CC publishes stream events over Redis pub/sub. Each fan-out worker holds
//! its own subscription; subscriptions are never shared between workers.

use async_trait::async_trait;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;

use crate::error::AppError;

/// A pub/sub source of CC stream events.
#[async_trait]
pub trait StreamBus: Send + Sync {
    /// Open a dedicated subscription to one channel. The returned stream
    /// yields raw event payloads in delivery order.
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, AppError>;

    /// Liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), AppError>;
}

/// Redis-backed stream bus.
pub struct RedisBus {
    client: redis::Client,
}

impl RedisBus {
    pub fn new(url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(url)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl StreamBus for RedisBus {
    async fn subscribe(&self, channel: &str) -> Result<BoxStream<'static, String>, AppError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel).await?;

        let stream = pubsub
            .into_on_message()
            .filter_map(|message| async move {
                match message.get_payload::<String>() {
                    Ok(payload) => Some(payload),
                    Err(error) => {
                        tracing::warn!(%error, "Dropping undecodable stream payload");
                        None
                    }
                }
            })
            .boxed();

        Ok(stream)
    }

    async fn ping(&self) -> Result<(), AppError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}
