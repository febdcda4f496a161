//! Inbox activity dispatcher
//!
//! Dispatches inbound activities on `object.type`. Every branch is
//! idempotent under duplicate delivery: Follow is guarded by the follower
//! tuple constraint, Create/Like by the cross-reference claim, Undo/Delete
//! by lookup-before-delete.
//!
//! Ambiguous or already-applied activities answer 200 with a descriptive
//! body rather than an error status: many remote servers treat any non-2xx
//! as retryable and would otherwise hammer the inbox with activities we
//! deliberately ignore.

use axum::http::StatusCode;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::sync::Arc;

use super::Translator;
use crate::data::{ApFollower, ApObjectReference, Database};
use crate::error::AppError;
use crate::federation::ApClient;
use crate::federation::types::{Accept, ApObject, AS_CONTEXT, Note};
use crate::services::{
    AssociationService, MessageService, ProxySigner, SignedObject, schema,
};

/// The dispatcher's verdict: an HTTP status plus a descriptive body.
pub type Outcome = (StatusCode, String);

/// Processes activities delivered to the inbox endpoints.
pub struct Dispatcher {
    db: Arc<Database>,
    ap: Arc<ApClient>,
    translator: Translator,
    message: Arc<dyn MessageService>,
    association: Arc<dyn AssociationService>,
    proxy: Arc<ProxySigner>,
    fqdn: String,
}

impl Dispatcher {
    pub fn new(state: &crate::AppState) -> Self {
        Self {
            db: state.db.clone(),
            ap: state.ap.clone(),
            translator: Translator::new(
                state.db.clone(),
                state.message.clone(),
                state.proxy.clone(),
                state.config.server.fqdn.clone(),
            ),
            message: state.message.clone(),
            association: state.association.clone(),
            proxy: state.proxy.clone(),
            fqdn: state.config.server.fqdn.clone(),
        }
    }

    fn acct_url(&self, entity_id: &str) -> String {
        format!("https://{}/ap/acct/{}", self.fqdn, entity_id)
    }

    /// Dispatch one activity.
    ///
    /// `path_entity` carries the `:id` path parameter for per-actor inbox
    /// deliveries; the shared inbox passes `None`.
    pub async fn dispatch(
        &self,
        activity: ApObject,
        path_entity: Option<&str>,
    ) -> Result<Outcome, AppError> {
        match activity.object_type.as_str() {
            "Follow" => self.handle_follow(activity, path_entity).await,
            "Like" => self.handle_like(activity).await,
            "Create" => self.handle_create(activity).await,
            "Accept" => self.handle_accept(activity).await,
            "Undo" => self.handle_undo(activity).await,
            "Delete" => self.handle_delete(activity).await,
            _ => {
                tracing::info!(
                    activity = %serde_json::to_string(&activity).unwrap_or_default(),
                    "Unhandled activity type"
                );
                Ok((StatusCode::OK, "OK but not implemented".to_string()))
            }
        }
    }

    async fn handle_follow(
        &self,
        activity: ApObject,
        path_entity: Option<&str>,
    ) -> Result<Outcome, AppError> {
        let entity_id = path_entity
            .filter(|id| !id.is_empty())
            .ok_or_else(|| AppError::Validation("Invalid username".to_string()))?;

        let entity = self
            .db
            .get_entity_by_id(entity_id)
            .await?
            .ok_or(AppError::NotFound)?;

        let requester = self
            .ap
            .fetch_person(&activity.actor, &entity)
            .await
            .map_err(|e| {
                tracing::warn!(actor = %activity.actor, error = %e, "Failed to fetch follow requester");
                e
            })?;

        // Duplicate deliveries are answered without re-sending an Accept;
        // the first delivery already confirmed the relationship.
        if self
            .db
            .get_follower_by_tuple(entity_id, &requester.id)
            .await?
            .is_some()
        {
            return Ok((StatusCode::OK, "follow already exists".to_string()));
        }

        let accept = Accept {
            context: AS_CONTEXT.into(),
            accept_type: "Accept".to_string(),
            id: format!(
                "{}/follows/{}",
                self.acct_url(entity_id),
                utf8_percent_encode(&requester.id, NON_ALPHANUMERIC)
            ),
            actor: self.acct_url(entity_id),
            object: activity.clone(),
        };

        self.ap
            .post_to_inbox(&requester.inbox, &accept, &entity)
            .await?;

        self.db
            .save_follower(&ApFollower {
                id: activity.id.clone(),
                subscriber_person_url: requester.id.clone(),
                publisher_user_id: entity_id.to_string(),
                subscriber_inbox: requester.inbox.clone(),
            })
            .await?;

        Ok((StatusCode::OK, "follow accepted".to_string()))
    }

    async fn handle_like(&self, activity: ApObject) -> Result<Outcome, AppError> {
        let Some(target) = activity.object_str() else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };

        let note_prefix = format!("https://{}/ap/note/", self.fqdn);
        let target_id = target.strip_prefix(&note_prefix).unwrap_or(target);

        let Ok(target_msg) = self.message.get(target_id).await else {
            return Ok((StatusCode::OK, "message not found".to_string()));
        };

        // Claim the like id before any side effect; a duplicate delivery
        // fails here and stops.
        if self
            .db
            .create_object_reference(&ApObjectReference {
                ap_object_id: activity.id.clone(),
                cc_object_id: "".to_string(),
            })
            .await
            .is_err()
        {
            return Ok((StatusCode::OK, "like already exists".to_string()));
        }

        let Some(entity) = self.db.get_entity_by_ccid(&target_msg.author).await? else {
            return Ok((StatusCode::OK, "entity not found".to_string()));
        };

        let Ok(person) = self.ap.fetch_person(&activity.actor, &entity).await else {
            return Ok((StatusCode::OK, "failed to fetch actor".to_string()));
        };

        let profile_override = serde_json::json!({
            "username": person.display_name(),
            "avatar": person.icon_url(),
            "description": person.summary,
            "link": activity.actor,
        });

        let emoji_tag = activity
            .tag
            .first()
            .filter(|tag| tag.name.starts_with(':'));

        let signed = match emoji_tag {
            None => SignedObject {
                signer: self.proxy.ccid.clone(),
                object_type: "Association".to_string(),
                schema: schema::association::LIKE.to_string(),
                body: serde_json::json!({ "profileOverride": profile_override }),
                meta: Some(serde_json::json!({ "apActor": activity.actor })),
                signed_at: chrono::Utc::now(),
                target: Some(target_id.to_string()),
                variant: None,
            },
            Some(tag) => {
                let image_url = tag.icon.as_ref().map(|i| i.url.clone()).unwrap_or_default();
                SignedObject {
                    signer: self.proxy.ccid.clone(),
                    object_type: "Association".to_string(),
                    schema: schema::association::EMOJI.to_string(),
                    body: serde_json::json!({
                        "shortcode": tag.name,
                        "imageUrl": image_url,
                        "profileOverride": profile_override,
                    }),
                    meta: Some(serde_json::json!({ "apActor": activity.actor })),
                    signed_at: chrono::Utc::now(),
                    target: Some(target_id.to_string()),
                    variant: Some(image_url),
                }
            }
        };

        let payload = serde_json::to_string(&signed)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("payload serialization: {}", e)))?;
        let signature = self.proxy.sign(payload.as_bytes())?;

        let created = match self
            .association
            .post(payload, signature, vec![], "messages")
            .await
        {
            Ok(created) => created,
            Err(error) => {
                tracing::error!(%error, "Failed to post like association");
                return Ok((StatusCode::OK, "failed to post association".to_string()));
            }
        };

        self.db
            .update_object_reference(&ApObjectReference {
                ap_object_id: activity.id.clone(),
                cc_object_id: created.id,
            })
            .await?;

        Ok((StatusCode::OK, "like accepted".to_string()))
    }

    async fn handle_create(&self, activity: ApObject) -> Result<Outcome, AppError> {
        let Some(create_object) = activity.object_map() else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };
        let Some(create_type) = create_object.get("type").and_then(|v| v.as_str()) else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };
        let Some(create_id) = create_object.get("id").and_then(|v| v.as_str()) else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };

        if create_type != "Note" {
            tracing::info!(create_type, "Unhandled create object");
            return Ok((StatusCode::OK, "OK but not implemented".to_string()));
        }

        if self
            .db
            .get_object_reference_by_ap_id(create_id)
            .await?
            .is_some()
        {
            return Ok((StatusCode::OK, "note already exists".to_string()));
        }

        if self
            .db
            .create_object_reference(&ApObjectReference {
                ap_object_id: create_id.to_string(),
                cc_object_id: "".to_string(),
            })
            .await
            .is_err()
        {
            return Ok((StatusCode::OK, "note already exists".to_string()));
        }

        let follows = self.db.get_follows_by_publisher(&activity.actor).await?;

        // The first follower's entity signs the actor fetch so signer
        // selection is deterministic across deliveries.
        let mut representative = None;
        let mut dest_streams = Vec::new();
        for follow in &follows {
            match self.db.get_entity_by_id(&follow.subscriber_user_id).await? {
                Some(entity) => {
                    if representative.is_none() {
                        representative = Some(entity.clone());
                    }
                    dest_streams.push(entity.follow_stream);
                }
                None => {
                    tracing::warn!(
                        subscriber = %follow.subscriber_user_id,
                        "Follow references unknown entity"
                    );
                }
            }
        }

        let Some(representative) = representative else {
            return Ok((StatusCode::OK, "No followers".to_string()));
        };

        let person = match self.ap.fetch_person(&activity.actor, &representative).await {
            Ok(person) => person,
            Err(error) => {
                tracing::warn!(actor = %activity.actor, %error, "Failed to fetch note author");
                self.db.delete_object_reference(create_id).await?;
                return Ok((StatusCode::OK, "failed to fetch actor".to_string()));
            }
        };

        let note: Note = activity
            .project()
            .map_err(|e| AppError::Validation(format!("Invalid note object: {}", e)))?;

        let created = match self
            .translator
            .note_to_message(&note, &person, &dest_streams)
            .await
        {
            Ok(created) => created,
            Err(error) => {
                tracing::warn!(%error, note = %create_id, "Inbound note rejected");
                // Release the claim so a corrected redelivery can land.
                self.db.delete_object_reference(create_id).await?;
                return Ok((StatusCode::OK, format!("note rejected: {}", error)));
            }
        };

        self.db
            .update_object_reference(&ApObjectReference {
                ap_object_id: create_id.to_string(),
                cc_object_id: created.id,
            })
            .await?;

        Ok((StatusCode::OK, "note accepted".to_string()))
    }

    async fn handle_accept(&self, activity: ApObject) -> Result<Outcome, AppError> {
        let Some(accept_object) = activity.object_map() else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };
        let Some(accept_type) = accept_object.get("type").and_then(|v| v.as_str()) else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };

        if accept_type != "Follow" {
            tracing::info!(accept_type, "Unhandled accept object");
            return Ok((StatusCode::OK, "OK but not implemented".to_string()));
        }

        let Some(follow_id) = accept_object.get("id").and_then(|v| v.as_str()) else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };

        let mut follow = self
            .db
            .get_follow_by_id(follow_id)
            .await?
            .ok_or(AppError::NotFound)?;

        follow.accepted = true;
        self.db.update_follow(&follow).await?;

        Ok((StatusCode::OK, "follow accepted".to_string()))
    }

    async fn handle_undo(&self, activity: ApObject) -> Result<Outcome, AppError> {
        let Some(undo_object) = activity.object_map() else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };
        let Some(undo_type) = undo_object.get("type").and_then(|v| v.as_str()) else {
            return Err(AppError::Validation("Invalid request body".to_string()));
        };

        match undo_type {
            "Follow" => {
                let Some(remote) = undo_object.get("actor").and_then(|v| v.as_str()) else {
                    return Err(AppError::Validation("Invalid request body".to_string()));
                };
                let Some(local_url) = undo_object.get("object").and_then(|v| v.as_str()) else {
                    return Err(AppError::Validation("Invalid request body".to_string()));
                };

                let acct_prefix = format!("https://{}/ap/acct/", self.fqdn);
                let local = local_url.strip_prefix(&acct_prefix).unwrap_or(local_url);

                if self
                    .db
                    .get_follower_by_tuple(local, remote)
                    .await?
                    .is_none()
                {
                    return Ok((StatusCode::OK, "follow already undoed".to_string()));
                }

                if let Err(error) = self.db.remove_follower(local, remote).await {
                    tracing::error!(%error, "Failed to remove follower");
                }

                Ok((StatusCode::OK, "OK".to_string()))
            }
            "Like" => {
                let Some(like_id) = undo_object.get("id").and_then(|v| v.as_str()) else {
                    return Ok((StatusCode::OK, "Invalid request body".to_string()));
                };

                let Some(reference) = self.db.get_object_reference_by_ap_id(like_id).await? else {
                    return Ok((StatusCode::OK, "like not found".to_string()));
                };

                self.association
                    .delete(&reference.cc_object_id)
                    .await
                    .map_err(|e| {
                        AppError::Federation(format!("association delete failed: {}", e))
                    })?;

                self.db
                    .delete_object_reference(&reference.ap_object_id)
                    .await?;

                Ok((StatusCode::OK, "like undoed".to_string()))
            }
            _ => {
                tracing::info!(undo_type, "Unhandled undo object");
                Ok((StatusCode::OK, "OK but not implemented".to_string()))
            }
        }
    }

    async fn handle_delete(&self, activity: ApObject) -> Result<Outcome, AppError> {
        let Some(delete_object) = activity.object_map() else {
            return Ok((StatusCode::OK, "Invalid request body".to_string()));
        };
        let Some(delete_id) = delete_object.get("id").and_then(|v| v.as_str()) else {
            return Ok((StatusCode::OK, "Invalid request body".to_string()));
        };

        let Some(reference) = self.db.get_object_reference_by_ap_id(delete_id).await? else {
            return Ok((StatusCode::OK, "already deleted".to_string()));
        };

        self.message
            .delete(&reference.cc_object_id)
            .await
            .map_err(|e| AppError::Federation(format!("message delete failed: {}", e)))?;

        self.db
            .delete_object_reference(&reference.ap_object_id)
            .await?;

        Ok((StatusCode::OK, "Deleted".to_string()))
    }
}
