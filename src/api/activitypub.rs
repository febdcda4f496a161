//! ActivityPub endpoints
//!
//! - Actor and note documents (content negotiated)
//! - Personal and shared inboxes
//! - NodeInfo 2.0

use axum::body::Bytes;
use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::AppState;
use crate::bridge::{Dispatcher, Translator};
use crate::error::AppError;
use crate::federation::types::{
    AS_CONTEXT, ApObject, Icon, Key, NodeInfo, NodeInfoMetadata, NodeInfoSoftware, NodeInfoUsage,
    NodeInfoUsers, Person, PersonEndpoints,
};
use crate::metrics::ACTIVITIES_RECEIVED_TOTAL;

/// Web UI the non-AP world is redirected to.
const WORLD_URL: &str = "https://concurrent.world";

/// Create ActivityPub router
pub fn activitypub_router() -> Router<AppState> {
    Router::new()
        .route("/ap/acct/:id", get(actor))
        .route("/ap/acct/:id/inbox", post(entity_inbox))
        .route("/ap/acct/:id/outbox", post(outbox))
        .route("/ap/inbox", post(shared_inbox))
        .route("/ap/note/:id", get(note))
        .route("/ap/nodeinfo/2.0", get(nodeinfo))
}

/// True when the Accept header asks for an AP document.
fn accepts_activity_json(headers: &HeaderMap) -> bool {
    let Some(accept) = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    accept
        .split(',')
        .filter_map(|item| item.split(';').next())
        .map(str::trim)
        .any(|media_type| {
            media_type == "application/activity+json" || media_type == "application/ld+json"
        })
}

fn activity_json<T: serde::Serialize>(value: T) -> Response {
    (
        [(header::CONTENT_TYPE, "application/activity+json")],
        axum::Json(value),
    )
        .into_response()
}

fn found_redirect(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// GET /ap/acct/:id
///
/// Returns the entity's actor document, or redirects browsers to the
/// Concurrent web UI.
async fn actor(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if id.is_empty() {
        return Err(AppError::Validation("Invalid username".to_string()));
    }

    let entity = state
        .db
        .get_entity_by_id(&id)
        .await?
        .ok_or(AppError::NotFound)?;

    let person = state
        .db
        .get_person_by_id(&id)
        .await?
        .ok_or(AppError::NotFound)?;

    if !accepts_activity_json(&headers) {
        return Ok(found_redirect(format!("{}/entity/{}", WORLD_URL, entity.ccid)));
    }

    let base_url = state.config.server.base_url();
    let actor_url = format!("{}/ap/acct/{}", base_url, id);

    let document = Person {
        context: Some(AS_CONTEXT.into()),
        person_type: "Person".to_string(),
        id: actor_url.clone(),
        inbox: format!("{}/inbox", actor_url),
        outbox: format!("{}/outbox", actor_url),
        shared_inbox: format!("{}/ap/inbox", base_url),
        endpoints: Some(PersonEndpoints {
            shared_inbox: format!("{}/ap/inbox", base_url),
        }),
        preferred_username: id.clone(),
        name: person.name,
        summary: person.summary,
        url: actor_url.clone(),
        icon: Some(Icon {
            icon_type: "Image".to_string(),
            media_type: "image/png".to_string(),
            url: person.icon_url,
        }),
        public_key: Some(Key {
            id: format!("{}#main-key", actor_url),
            key_type: "Key".to_string(),
            owner: actor_url,
            public_key_pem: entity.public_key,
        }),
        ..Default::default()
    };

    Ok(activity_json(document))
}

/// GET /ap/note/:id
///
/// Returns the AP projection of a CC message, or redirects browsers to the
/// Concurrent web UI.
async fn note(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, AppError> {
    if id.is_empty() {
        return Err(AppError::Validation("Invalid noteID".to_string()));
    }

    let message = state
        .message
        .get(&id)
        .await
        .map_err(|_| AppError::NotFound)?;

    if !accepts_activity_json(&headers) {
        return Ok(found_redirect(format!(
            "{}/message/{}@{}",
            WORLD_URL, id, message.author
        )));
    }

    let translator = Translator::new(
        state.db.clone(),
        state.message.clone(),
        state.proxy.clone(),
        state.config.server.fqdn.clone(),
    );
    let note = translator.message_to_note(&id).await?;

    Ok(activity_json(note))
}

/// POST /ap/acct/:id/inbox
async fn entity_inbox(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    inbox(state, Some(id), headers, body).await
}

/// POST /ap/inbox (shared)
async fn shared_inbox(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    inbox(state, None, headers, body).await
}

async fn inbox(
    state: AppState,
    path_entity: Option<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let activity: ApObject = serde_json::from_slice(&body)
        .map_err(|_| AppError::Validation("Invalid request body".to_string()))?;

    if !activity.object_type.is_empty() {
        ACTIVITIES_RECEIVED_TOTAL
            .with_label_values(&[activity.object_type.as_str()])
            .inc();
    }

    verify_inbound_signature(&state, &path_entity, &headers, &body, &activity.actor).await;

    let dispatcher = Dispatcher::new(&state);
    let (status, message) = dispatcher
        .dispatch(activity, path_entity.as_deref())
        .await?;

    Ok((status, message).into_response())
}

/// Opportunistic inbound signature verification.
///
/// The inbox stays tolerant: a failed or unverifiable signature is logged
/// and processing continues, since rejecting ambiguous deliveries only
/// triggers remote retry storms. Deliveries without a Signature header are
/// accepted as-is.
///
/// The keyId must resolve to the activity's claimed actor before the key is
/// fetched; a foreign key proves nothing about this actor, and the fetch
/// itself would hand an attacker a server-side GET.
async fn verify_inbound_signature(
    state: &AppState,
    path_entity: &Option<String>,
    headers: &HeaderMap,
    body: &[u8],
    actor: &str,
) {
    let Some(signature) = headers.get("signature").and_then(|v| v.to_str().ok()) else {
        return;
    };

    let parsed = match crate::federation::parse_signature_header(signature) {
        Ok(parsed) => parsed,
        Err(error) => {
            tracing::warn!(%error, "Unparsable inbound Signature header");
            return;
        }
    };

    match crate::federation::key_id_matches_actor(&parsed.key_id, actor) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!(
                key_id = %parsed.key_id,
                %actor,
                "Inbound Signature keyId does not match activity actor"
            );
            return;
        }
        Err(error) => {
            tracing::warn!(key_id = %parsed.key_id, %error, "Invalid inbound Signature keyId");
            return;
        }
    }

    let public_key_pem =
        match crate::federation::fetch_public_key(&parsed.key_id, state.http_client.as_ref()).await
        {
            Ok(pem) => pem,
            Err(error) => {
                tracing::warn!(key_id = %parsed.key_id, %error, "Failed to fetch signer key");
                return;
            }
        };

    let path = match path_entity {
        Some(id) => format!("/ap/acct/{}/inbox", id),
        None => "/ap/inbox".to_string(),
    };

    if let Err(error) =
        crate::federation::verify_signature("POST", &path, headers, Some(body), &public_key_pem)
    {
        tracing::warn!(key_id = %parsed.key_id, %error, "Inbound signature verification failed");
    }
}

/// POST /ap/acct/:id/outbox
///
/// Accepted and logged; the bridge publishes through fan-out workers, not
/// through client-to-server AP.
async fn outbox(body: Bytes) -> &'static str {
    tracing::debug!(body = %String::from_utf8_lossy(&body), "Outbox delivery ignored");
    "ok"
}

/// GET /ap/nodeinfo/2.0
async fn nodeinfo(State(state): State<AppState>) -> Result<axum::Json<NodeInfo>, AppError> {
    let messages = state.message.total().await?;
    let users = state.entity.total().await?;

    Ok(axum::Json(NodeInfo {
        version: "2.0".to_string(),
        software: NodeInfoSoftware {
            name: "ccbridge".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        protocols: vec!["concurrentsub".to_string(), "activitypub".to_string()],
        open_registrations: false,
        usage: NodeInfoUsage {
            local_posts: messages,
            users: NodeInfoUsers { total: users },
        },
        metadata: NodeInfoMetadata::default(),
    }))
}
