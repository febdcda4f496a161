//! Fan-out workers
//!
//! A supervisor tick reconciles one long-lived worker per follower
//! relationship. Each worker owns its own pub/sub subscription to the
//! publisher's home stream and translates CC events into signed AP
//! deliveries. A second, static worker watches the proxy notification
//! stream and converts CC associations into Likes, replies, and boosts.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use super::Translator;
use crate::data::{ApEntity, ApFollower};
use crate::error::AppError;
use crate::federation::types::{AS_CONTEXT, ApObject, Create, Icon, Note, PUBLIC, Tag};
use crate::metrics::{FANOUT_DELIVERIES_TOTAL, FANOUT_WORKERS_ACTIVE};
use crate::services::{SignedObject, StreamEvent, schema};

/// Bound on the follower-set read each supervisor tick.
const FOLLOWER_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Run the fan-out supervisor.
///
/// Every tick: read the follower set, start a worker for each follower not
/// yet owned, cancel workers whose follower row is gone. The supervisor
/// itself never exits.
pub async fn run_fanout_supervisor(state: crate::AppState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.worker.tick_seconds));
    let mut workers: HashMap<String, CancellationToken> = HashMap::new();

    loop {
        interval.tick().await;

        let followers = match tokio::time::timeout(
            FOLLOWER_POLL_TIMEOUT,
            state.db.get_all_followers(),
        )
        .await
        {
            Ok(Ok(followers)) => followers,
            Ok(Err(error)) => {
                tracing::error!(%error, "Failed to read follower set");
                continue;
            }
            Err(_) => {
                tracing::error!("Timed out reading follower set");
                continue;
            }
        };

        for follower in &followers {
            if !workers.contains_key(&follower.id) {
                tracing::info!(worker = %follower.id, "Starting fan-out worker");
                let token = CancellationToken::new();
                workers.insert(follower.id.clone(), token.clone());
                tokio::spawn(run_follower_worker(
                    state.clone(),
                    follower.clone(),
                    token,
                ));
            }
        }

        let live: HashSet<&str> = followers.iter().map(|f| f.id.as_str()).collect();
        workers.retain(|id, token| {
            if live.contains(id.as_str()) {
                true
            } else {
                tracing::info!(worker = %id, "Cancelling fan-out worker");
                token.cancel();
                false
            }
        });

        FANOUT_WORKERS_ACTIVE.set(workers.len() as i64);
    }
}

/// One worker per follower: subscribe to the publisher's home stream and
/// deliver every own-authored event to the follower's inbox.
///
/// Errors inside the loop are logged and the loop continues, so a single
/// bad event never kills a worker. Cancellation is observed before each
/// receive.
async fn run_follower_worker(
    state: crate::AppState,
    follower: ApFollower,
    cancel: CancellationToken,
) {
    let entity = match state.db.get_entity_by_id(&follower.publisher_user_id).await {
        Ok(Some(entity)) => entity,
        Ok(None) => {
            tracing::warn!(worker = %follower.id, "Publisher entity missing; worker exiting");
            return;
        }
        Err(error) => {
            tracing::error!(worker = %follower.id, %error, "Failed to load publisher entity");
            return;
        }
    };

    if entity.home_stream.is_empty() {
        return;
    }

    let mut stream = match state.bus.subscribe(&entity.home_stream).await {
        Ok(stream) => stream,
        Err(error) => {
            tracing::error!(worker = %follower.id, %error, "Failed to subscribe home stream");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!(worker = %follower.id, "Worker done");
                return;
            }
            payload = stream.next() => {
                let Some(payload) = payload else {
                    tracing::warn!(worker = %follower.id, "Home stream subscription ended");
                    return;
                };
                match deliver_stream_event(&state, &follower, &entity, &payload).await {
                    Ok(delivered) => {
                        if delivered {
                            FANOUT_DELIVERIES_TOTAL.with_label_values(&["success"]).inc();
                        }
                    }
                    Err(error) => {
                        FANOUT_DELIVERIES_TOTAL.with_label_values(&["error"]).inc();
                        tracing::warn!(worker = %follower.id, %error, "Delivery failed");
                    }
                }
            }
        }
    }
}

/// Translate one home-stream event and POST it to the follower's inbox.
///
/// Returns false when the event was skipped (foreign author, unparsable).
async fn deliver_stream_event(
    state: &crate::AppState,
    follower: &ApFollower,
    entity: &ApEntity,
    payload: &str,
) -> Result<bool, AppError> {
    let event: StreamEvent = serde_json::from_str(payload)
        .map_err(|e| AppError::Validation(format!("invalid stream event: {}", e)))?;

    let Some(message_id) = event.body_id() else {
        tracing::warn!("Stream event body has no id");
        return Ok(false);
    };
    let Some(author) = event.body_author() else {
        tracing::warn!("Stream event body has no author");
        return Ok(false);
    };

    // Boosts and replies from others land in the home stream too; only the
    // publisher's own messages federate.
    if author != entity.ccid {
        return Ok(false);
    }

    let translator = Translator::new(
        state.db.clone(),
        state.message.clone(),
        state.proxy.clone(),
        state.config.server.fqdn.clone(),
    );
    let note = translator.message_to_note(message_id).await?;

    let fqdn = &state.config.server.fqdn;
    let actor = format!("https://{}/ap/acct/{}", fqdn, follower.publisher_user_id);

    if note.note_type == "Announce" {
        let announce = ApObject {
            context: Some(serde_json::json!([AS_CONTEXT])),
            object_type: "Announce".to_string(),
            id: format!("https://{}/ap/note/{}/activity", fqdn, message_id),
            actor,
            object: serde_json::Value::String(note.object),
            to: vec![PUBLIC.to_string()],
            ..Default::default()
        };
        state
            .ap
            .post_to_inbox(&follower.subscriber_inbox, &announce, entity)
            .await?;
    } else {
        let create = Create {
            context: serde_json::json!([AS_CONTEXT]),
            create_type: "Create".to_string(),
            id: format!("https://{}/ap/note/{}/activity", fqdn, message_id),
            actor,
            to: vec![PUBLIC.to_string()],
            object: note,
        };
        state
            .ap
            .post_to_inbox(&follower.subscriber_inbox, &create, entity)
            .await?;
    }

    Ok(true)
}

/// Run the association worker.
///
/// Subscribes to the proxy notification stream and converts CC associations
/// on AP-originated messages into outbound Likes, replies, and boosts. The
/// subscription is re-established if it drops.
pub async fn run_association_worker(state: crate::AppState) {
    loop {
        let mut stream = match state
            .bus
            .subscribe(&state.config.proxy.notification_stream)
            .await
        {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(%error, "Failed to subscribe notification stream");
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        while let Some(payload) = stream.next().await {
            if let Err(error) = handle_association_event(&state, &payload).await {
                tracing::warn!(%error, "Association event failed");
            }
        }

        tracing::warn!("Notification stream subscription ended; resubscribing");
    }
}

async fn handle_association_event(
    state: &crate::AppState,
    payload: &str,
) -> Result<(), AppError> {
    let event: StreamEvent = serde_json::from_str(payload)
        .map_err(|e| AppError::Validation(format!("invalid stream event: {}", e)))?;

    let Some(association_id) = event.body_id() else {
        return Ok(());
    };

    let association = state.association.get(association_id).await?;
    if association.target_type != "messages" {
        return Ok(());
    }

    let Some(author) = state.db.get_entity_by_ccid(&association.author).await? else {
        tracing::debug!(author = %association.author, "Association author is not bridged");
        return Ok(());
    };

    let signed: SignedObject = serde_json::from_str(&association.payload)
        .map_err(|_| AppError::Validation("invalid association payload".to_string()))?;
    let Some(body) = signed.body.as_object() else {
        return Ok(());
    };

    let target = state.message.get(&association.target_id).await?;
    let target_signed: SignedObject = serde_json::from_str(&target.payload)
        .map_err(|_| AppError::Validation("invalid message payload".to_string()))?;

    // Associations on non-AP messages are not bridge business.
    let Some(meta) = target_signed.meta.as_ref().and_then(|m| m.as_object()) else {
        return Ok(());
    };
    let Some(reference) = meta.get("apObjectRef").and_then(|v| v.as_str()) else {
        return Ok(());
    };
    let Some(destination) = meta.get("apPublisherInbox").and_then(|v| v.as_str()) else {
        return Ok(());
    };

    let fqdn = &state.config.server.fqdn;
    let actor = format!("https://{}/ap/acct/{}", fqdn, author.id);

    match signed.schema.as_str() {
        schema::association::LIKE | schema::association::EMOJI => {
            let shortcode = body
                .get("shortcode")
                .and_then(|v| v.as_str())
                .map(|code| format!(":{}:", code))
                .unwrap_or_else(|| "⭐".to_string());

            let tag = body
                .get("imageUrl")
                .and_then(|v| v.as_str())
                .map(|image_url| {
                    vec![Tag {
                        tag_type: "Emoji".to_string(),
                        id: image_url.to_string(),
                        name: shortcode.clone(),
                        icon: Some(Icon {
                            icon_type: "Image".to_string(),
                            media_type: "image/png".to_string(),
                            url: image_url.to_string(),
                        }),
                    }]
                })
                .unwrap_or_default();

            let like = ApObject {
                context: Some(serde_json::json!([AS_CONTEXT])),
                object_type: "Like".to_string(),
                id: format!("https://{}/ap/likes/{}", fqdn, association.id),
                actor,
                content: shortcode,
                tag,
                object: serde_json::Value::String(reference.to_string()),
                ..Default::default()
            };

            state.ap.post_to_inbox(destination, &like, &author).await
        }
        schema::association::REPLY => {
            let Some(message_id) = body.get("messageId").and_then(|v| v.as_str()) else {
                return Ok(());
            };

            let reply = state.message.get(message_id).await?;
            let reply_signed: SignedObject = serde_json::from_str(&reply.payload)
                .map_err(|_| AppError::Validation("invalid message payload".to_string()))?;
            let Some(content) = reply_signed
                .body
                .get("body")
                .and_then(|v| v.as_str())
                .filter(|content| !content.is_empty())
            else {
                return Ok(());
            };

            let create = Create {
                context: serde_json::json!([AS_CONTEXT]),
                create_type: "Create".to_string(),
                id: format!("https://{}/ap/note/{}/activity", fqdn, message_id),
                actor: actor.clone(),
                to: Vec::new(),
                object: Note {
                    note_type: "Note".to_string(),
                    id: format!("https://{}/ap/note/{}", fqdn, message_id),
                    attributed_to: actor,
                    content: content.to_string(),
                    in_reply_to: reference.to_string(),
                    to: vec![PUBLIC.to_string()],
                    ..Default::default()
                },
            };

            state.ap.post_to_inbox(destination, &create, &author).await
        }
        schema::association::REROUTE => {
            let Some(message_id) = body.get("messageId").and_then(|v| v.as_str()) else {
                return Ok(());
            };

            let source = state.message.get(message_id).await?;
            let source_signed: SignedObject = serde_json::from_str(&source.payload)
                .map_err(|_| AppError::Validation("invalid message payload".to_string()))?;
            let content = source_signed
                .body
                .get("body")
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            if content.is_empty() {
                let announce = ApObject {
                    context: Some(serde_json::json!([AS_CONTEXT])),
                    object_type: "Announce".to_string(),
                    id: format!("https://{}/ap/note/{}", fqdn, message_id),
                    actor,
                    object: serde_json::Value::String(reference.to_string()),
                    ..Default::default()
                };
                state
                    .ap
                    .post_to_inbox(destination, &announce, &author)
                    .await
            } else {
                let create = Create {
                    context: serde_json::json!([AS_CONTEXT]),
                    create_type: "Create".to_string(),
                    id: format!("https://{}/ap/note/{}/activity", fqdn, message_id),
                    actor: actor.clone(),
                    to: Vec::new(),
                    object: Note {
                        note_type: "Note".to_string(),
                        id: format!("https://{}/ap/note/{}", fqdn, message_id),
                        attributed_to: actor,
                        content: content.to_string(),
                        quote_url: reference.to_string(),
                        to: vec![PUBLIC.to_string()],
                        ..Default::default()
                    },
                };
                state.ap.post_to_inbox(destination, &create, &author).await
            }
        }
        _ => Ok(()),
    }
}
