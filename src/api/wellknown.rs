//! Well-known endpoints
//!
//! - /.well-known/webfinger
//! - /.well-known/nodeinfo

use axum::{
    Router,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;

use crate::AppState;
use crate::error::AppError;
use crate::federation::types::{WebFinger, WebFingerLink, WellKnown, WellKnownLink};

/// Create well-known router
pub fn wellknown_router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/webfinger", get(webfinger))
        .route("/.well-known/nodeinfo", get(nodeinfo_links))
}

/// WebFinger query parameters
#[derive(Debug, Deserialize)]
struct WebFingerQuery {
    #[serde(default)]
    resource: String,
}

/// GET /.well-known/webfinger?resource=acct:user@domain
///
/// Resolves local bridge entities only; any other domain is malformed
/// input, not a miss.
async fn webfinger(
    State(state): State<AppState>,
    Query(query): Query<WebFingerQuery>,
) -> Result<Response, AppError> {
    let Some((resource_type, id)) = query.resource.split_once(':') else {
        return Err(AppError::Validation("Invalid resource".to_string()));
    };
    if resource_type != "acct" {
        return Err(AppError::Validation("Invalid resource".to_string()));
    }

    let mut split = id.split('@');
    let (Some(username), Some(domain), None) = (split.next(), split.next(), split.next()) else {
        return Err(AppError::Validation("Invalid resource".to_string()));
    };
    if domain != state.config.server.fqdn {
        return Err(AppError::Validation("Invalid resource".to_string()));
    }

    if state.db.get_entity_by_id(username).await?.is_none() {
        return Err(AppError::NotFound);
    }

    let response = WebFinger {
        subject: query.resource.clone(),
        links: vec![WebFingerLink {
            rel: "self".to_string(),
            link_type: "application/activity+json".to_string(),
            href: format!("{}/ap/acct/{}", state.config.server.base_url(), username),
        }],
    };

    Ok((
        [(header::CONTENT_TYPE, "application/jrd+json")],
        axum::Json(response),
    )
        .into_response())
}

/// GET /.well-known/nodeinfo
async fn nodeinfo_links(State(state): State<AppState>) -> axum::Json<WellKnown> {
    axum::Json(WellKnown {
        links: vec![WellKnownLink {
            rel: "http://nodeinfo.diaspora.software/ns/schema/2.0".to_string(),
            href: format!("{}/ap/nodeinfo/2.0", state.config.server.base_url()),
        }],
    })
}
