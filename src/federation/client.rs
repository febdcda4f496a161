//! Signed ActivityPub client
//!
//! All authenticated traffic to remote AP servers goes through this module:
//! WebFinger resolution, actor and note fetches, and inbox deliveries. Every
//! request except WebFinger is signed with the acting entity's RSA key.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;

use super::person_cache::PersonCache;
use super::signature::sign_request;
use super::types::{Note, Person, WebFinger};
use crate::data::ApEntity;
use crate::error::AppError;
use crate::metrics::{
    ACTIVITIES_SENT_TOTAL, FEDERATION_REQUEST_DURATION_SECONDS, FEDERATION_REQUESTS_TOTAL,
};

/// Signed AP client bound to the bridge's public FQDN.
pub struct ApClient {
    http: Arc<reqwest::Client>,
    fqdn: String,
    person_cache: PersonCache,
}

impl ApClient {
    pub fn new(http: Arc<reqwest::Client>, fqdn: String, person_ttl: Duration) -> Self {
        Self {
            http,
            fqdn,
            person_cache: PersonCache::new(Some(person_ttl)),
        }
    }

    /// The key id for an entity: `https://<fqdn>/ap/acct/<id>#main-key`.
    fn key_id(&self, entity: &ApEntity) -> String {
        format!("https://{}/ap/acct/{}#main-key", self.fqdn, entity.id)
    }

    /// Resolve `@user@domain` (or `user@domain`) to an actor URL via
    /// WebFinger. The lookup itself is unsigned.
    pub async fn resolve_actor(&self, id: &str) -> Result<String, AppError> {
        let id = id.strip_prefix('@').unwrap_or(id);

        let mut split = id.split('@');
        let (Some(user), Some(domain), None) = (split.next(), split.next(), split.next()) else {
            return Err(AppError::Validation(
                "id must be in user@domain format".to_string(),
            ));
        };
        if user.is_empty() || domain.is_empty() {
            return Err(AppError::Validation(
                "id must be in user@domain format".to_string(),
            ));
        }

        let target = format!(
            "https://{}/.well-known/webfinger?resource=acct:{}",
            domain, id
        );

        let response = self
            .http
            .get(&target)
            .header("Accept", "application/jrd+json")
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("WebFinger request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "WebFinger request failed: HTTP {}",
                response.status()
            )));
        }

        let webfinger: WebFinger = response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("Invalid WebFinger response: {}", e)))?;

        webfinger
            .links
            .iter()
            .find(|link| link.rel == "self" && !link.href.is_empty())
            .map(|link| link.href.clone())
            .ok_or_else(|| AppError::Federation("no ap link found".to_string()))
    }

    /// Signed GET returning a typed document.
    async fn signed_get<T: DeserializeOwned>(
        &self,
        url: &str,
        entity: &ApEntity,
    ) -> Result<T, AppError> {
        let headers = sign_request("GET", url, None, &entity.private_key, &self.key_id(entity))?;

        let response = self
            .http
            .get(url)
            .header("Accept", "application/activity+json")
            .header("Date", headers.date)
            .header("Signature", headers.signature)
            .send()
            .await
            .map_err(|e| AppError::Federation(format!("GET {} failed: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(AppError::Federation(format!(
                "GET {} failed: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Federation(format!("GET {} returned invalid JSON: {}", url, e)))
    }

    /// Fetch a remote actor, consulting the process-local cache first.
    ///
    /// Cache population failures are impossible by construction; fetch and
    /// parse failures surface as transport errors.
    pub async fn fetch_person(
        &self,
        actor_url: &str,
        entity: &ApEntity,
    ) -> Result<Person, AppError> {
        if let Some(person) = self.person_cache.get(actor_url).await {
            return Ok(person);
        }

        let person: Person = self.signed_get(actor_url, entity).await?;
        self.person_cache.insert(actor_url, person.clone()).await;
        Ok(person)
    }

    /// Fetch a remote note. Uncached; note imports are one-shot.
    pub async fn fetch_note(&self, note_url: &str, entity: &ApEntity) -> Result<Note, AppError> {
        self.signed_get(note_url, entity).await
    }

    /// Sign and POST an activity to a remote inbox.
    ///
    /// The body is serialized once and the same bytes are used for the
    /// digest and the wire; any signing error is fatal to the request.
    pub async fn post_to_inbox<T: serde::Serialize>(
        &self,
        inbox: &str,
        activity: &T,
        entity: &ApEntity,
    ) -> Result<(), AppError> {
        let body = serde_json::to_vec(activity)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("activity serialization: {}", e)))?;

        let activity_type = serde_json::from_slice::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("type").and_then(|t| t.as_str()).map(String::from))
            .unwrap_or_else(|| "unknown".to_string());

        let _timer = FEDERATION_REQUEST_DURATION_SECONDS
            .with_label_values(&["outbound"])
            .start_timer();

        let headers = sign_request(
            "POST",
            inbox,
            Some(&body),
            &entity.private_key,
            &self.key_id(entity),
        )?;

        let mut request = self
            .http
            .post(inbox)
            .header("Content-Type", "application/activity+json")
            .header("Date", headers.date)
            .header("Signature", headers.signature);
        if let Some(digest) = headers.digest {
            request = request.header("Digest", digest);
        }

        let response = request.body(body).send().await.map_err(|e| {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["outbound", "error"])
                .inc();
            AppError::Federation(format!("POST {} failed: {}", inbox, e))
        })?;

        let status = response.status();
        let response_body = response.text().await.unwrap_or_default();
        tracing::debug!(%inbox, %status, body = %response_body, "Delivered activity");

        if !status.is_success() {
            FEDERATION_REQUESTS_TOTAL
                .with_label_values(&["outbound", "rejected"])
                .inc();
            return Err(AppError::Federation(format!(
                "POST {} rejected: HTTP {}",
                inbox, status
            )));
        }

        FEDERATION_REQUESTS_TOTAL
            .with_label_values(&["outbound", "success"])
            .inc();
        ACTIVITIES_SENT_TOTAL
            .with_label_values(&[activity_type.as_str()])
            .inc();

        Ok(())
    }
}
