//! Local (authenticated) API
//!
//! Concurrent users manage their bridge presence here: enrollment, profile
//! overlay, remote follows, stats, and note imports. Every route requires a
//! CC JWT; the issuer claim selects the acting entity. Entity and person
//! lookups are public.

use axum::{
    Router,
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::AppState;
use crate::auth::Claims;
use crate::bridge::Translator;
use crate::data::{ApEntity, ApFollow, ApObjectReference, ApPerson};
use crate::error::AppError;
use crate::federation::generate_rsa_keypair;
use crate::federation::types::{AS_CONTEXT, ApObject};

/// Create the local API router
pub fn local_api_router() -> Router<AppState> {
    Router::new()
        .route("/ap/api/entity", post(create_entity))
        .route("/ap/api/entity/:ccid", get(get_entity))
        .route("/ap/api/person", put(update_person))
        .route("/ap/api/person/:id", get(get_person))
        .route("/ap/api/resolve/:id", get(resolve))
        .route("/ap/api/follow/:id", post(follow).delete(unfollow))
        .route("/ap/api/stats", get(stats))
        .route("/ap/api/import", get(import_note))
}

fn envelope<T: serde::Serialize>(content: T) -> Json<Value> {
    Json(json!({ "status": "ok", "content": content }))
}

/// Request body for entity enrollment.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateEntityRequest {
    pub id: String,
    #[serde(default)]
    pub home_stream: String,
    #[serde(default)]
    pub notification_stream: String,
    #[serde(default)]
    pub follow_stream: String,
}

/// POST /ap/api/entity
///
/// Enroll the calling CC user as an AP actor, or update the stream wiring
/// of an existing enrollment. A fresh RSA-2048 keypair is generated on
/// first enrollment only.
async fn create_entity(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<CreateEntityRequest>,
) -> Result<Json<Value>, AppError> {
    if let Some(mut entity) = state.db.get_entity_by_ccid(&claims.issuer).await? {
        entity.home_stream = request.home_stream;
        entity.notification_stream = request.notification_stream;
        entity.follow_stream = request.follow_stream;

        state.db.update_entity(&entity).await?;
        return Ok(envelope(entity));
    }

    if request.id.is_empty() {
        return Err(AppError::Validation("Invalid username".to_string()));
    }

    let (private_key, public_key) = generate_rsa_keypair()?;

    let entity = ApEntity {
        id: request.id,
        ccid: claims.issuer,
        public_key,
        private_key,
        home_stream: request.home_stream,
        notification_stream: request.notification_stream,
        follow_stream: request.follow_stream,
    };
    state.db.create_entity(&entity).await?;

    Ok(envelope(entity))
}

/// GET /ap/api/entity/:ccid
async fn get_entity(
    State(state): State<AppState>,
    Path(ccid): Path<String>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&ccid)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(envelope(entity))
}

/// PUT /ap/api/person
///
/// Upsert the caller's profile overlay. The overlay id always follows the
/// caller's entity, whatever the body claims.
async fn update_person(
    State(state): State<AppState>,
    claims: Claims,
    Json(mut person): Json<ApPerson>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    person.id = entity.id;
    state.db.upsert_person(&person).await?;

    Ok(envelope(person))
}

/// GET /ap/api/person/:id
async fn get_person(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let person = state
        .db
        .get_person_by_id(&id)
        .await?
        .ok_or(AppError::NotFound)?;
    Ok(envelope(person))
}

/// GET /ap/api/resolve/:id
///
/// Resolve `user@domain` to the remote actor document.
async fn resolve(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    let actor_url = state.ap.resolve_actor(&id).await?;
    let person = state.ap.fetch_person(&actor_url, &entity).await?;

    Ok(envelope(person))
}

fn follow_id_for(fqdn: &str, entity_id: &str, target_id: &str) -> String {
    let simple_id = target_id.replace('@', "-").replace('.', "-");
    format!("https://{}/follow/{}/{}", fqdn, entity_id, simple_id)
}

fn normalize_target(id: &str) -> String {
    if id.starts_with('@') {
        id.to_string()
    } else {
        format!("@{}", id)
    }
}

/// POST /ap/api/follow/:id
///
/// Follow a remote actor: deliver a Follow activity and record the pending
/// follow, to be flipped accepted by the inbound Accept.
async fn follow(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    let target_id = normalize_target(&id);

    let target_actor = state
        .ap
        .resolve_actor(&target_id)
        .await
        .map_err(|_| AppError::NotFound)?;
    let target_person = state
        .ap
        .fetch_person(&target_actor, &entity)
        .await
        .map_err(|_| AppError::NotFound)?;

    let follow_id = follow_id_for(&state.config.server.fqdn, &entity.id, &target_id);
    let actor_url = format!("{}/ap/acct/{}", state.config.server.base_url(), entity.id);

    let follow_object = ApObject {
        context: Some(AS_CONTEXT.into()),
        object_type: "Follow".to_string(),
        id: follow_id.clone(),
        actor: actor_url,
        object: Value::String(target_person.id.clone()),
        ..Default::default()
    };

    state
        .ap
        .post_to_inbox(&target_person.inbox, &follow_object, &entity)
        .await?;

    let follow = ApFollow {
        id: follow_id,
        accepted: false,
        publisher_person_url: target_person.id,
        subscriber_user_id: entity.id,
    };
    state.db.save_follow(&follow).await?;

    Ok(envelope(follow))
}

/// DELETE /ap/api/follow/:id
///
/// Undo a follow: deliver Undo{Follow} and drop the local row.
async fn unfollow(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    let target_id = normalize_target(&id);
    let follow_id = follow_id_for(&state.config.server.fqdn, &entity.id, &target_id);

    let target_actor = state
        .ap
        .resolve_actor(&target_id)
        .await
        .map_err(|_| AppError::NotFound)?;
    let target_person = state
        .ap
        .fetch_person(&target_actor, &entity)
        .await
        .map_err(|_| AppError::NotFound)?;

    let actor_url = format!("{}/ap/acct/{}", state.config.server.base_url(), entity.id);

    let follow_object = ApObject {
        context: Some(AS_CONTEXT.into()),
        object_type: "Follow".to_string(),
        id: follow_id.clone(),
        actor: actor_url.clone(),
        object: Value::String(target_person.id.clone()),
        ..Default::default()
    };
    let undo_object = ApObject {
        context: Some(AS_CONTEXT.into()),
        object_type: "Undo".to_string(),
        id: format!("{}/undo", follow_id),
        actor: actor_url,
        object: serde_json::to_value(&follow_object)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("undo serialization: {}", e)))?,
        ..Default::default()
    };

    state
        .ap
        .post_to_inbox(&target_person.inbox, &undo_object, &entity)
        .await?;

    let deleted = state
        .db
        .remove_follow(&follow_id)
        .await?
        .ok_or(AppError::NotFound)?;

    Ok(envelope(deleted))
}

/// GET /ap/api/stats
async fn stats(State(state): State<AppState>, claims: Claims) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    let follows: Vec<String> = state
        .db
        .get_follows(&entity.id)
        .await?
        .into_iter()
        .map(|follow| follow.publisher_person_url)
        .collect();

    let followers: Vec<String> = state
        .db
        .get_followers(&entity.id)
        .await?
        .into_iter()
        .map(|follower| follower.subscriber_person_url)
        .collect();

    Ok(envelope(json!({
        "follows": follows,
        "followers": followers,
    })))
}

#[derive(Debug, Deserialize)]
struct ImportQuery {
    #[serde(default)]
    note: String,
}

/// GET /ap/api/import?note=<url>
///
/// Import a remote note as a CC message. Re-importing an already-known note
/// returns the existing message; a stale cross reference (message gone on
/// the CC side) is dropped and the note imported fresh.
async fn import_note(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<ImportQuery>,
) -> Result<Json<Value>, AppError> {
    let entity = state
        .db
        .get_entity_by_ccid(&claims.issuer)
        .await?
        .ok_or(AppError::NotFound)?;

    if query.note.is_empty() {
        return Err(AppError::Validation("Invalid noteID".to_string()));
    }

    if let Some(existing) = state.db.get_object_reference_by_ap_id(&query.note).await? {
        match state.message.get(&existing.cc_object_id).await {
            Ok(message) => return Ok(envelope(message)),
            Err(error) => {
                tracing::info!(
                    note = %query.note,
                    cc_object = %existing.cc_object_id,
                    %error,
                    "Dropping stale import reference"
                );
                state
                    .db
                    .delete_object_reference(&existing.ap_object_id)
                    .await?;
            }
        }
    }

    let note = state.ap.fetch_note(&query.note, &entity).await?;
    let person = state.ap.fetch_person(&note.attributed_to, &entity).await?;

    let translator = Translator::new(
        state.db.clone(),
        state.message.clone(),
        state.proxy.clone(),
        state.config.server.fqdn.clone(),
    );
    let created = translator.note_to_message(&note, &person, &[]).await?;

    state
        .db
        .update_object_reference(&ApObjectReference {
            ap_object_id: query.note.clone(),
            cc_object_id: created.id.clone(),
        })
        .await?;

    Ok(envelope(created))
}
