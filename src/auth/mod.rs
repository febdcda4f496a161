//! CC JWT authentication
//!
//! The local API is restricted to Concurrent users. CC tokens are JWTs
//! signed with the user's secp256k1 key; the issuer is the user's CCID, so
//! verification recovers the signer address from the token signature and
//! requires it to match the issuer.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Deserializer, Serialize};

use alloy::primitives::{Signature, U256, keccak256};

use crate::error::AppError;
use crate::services::ccid_from_checksum_address;

/// CC JWT claims.
///
/// CC encodes every claim as a string on the wire; numeric `exp`/`iat`
/// from other issuers are tolerated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    #[serde(rename = "iss")]
    pub issuer: String,
    #[serde(rename = "sub", default, deserialize_with = "string_or_number")]
    pub subject: String,
    #[serde(rename = "aud", default, deserialize_with = "string_or_number")]
    pub audience: String,
    #[serde(rename = "exp", default, deserialize_with = "string_or_number")]
    pub expires_at: String,
    #[serde(rename = "jti", default, deserialize_with = "string_or_number")]
    pub jwt_id: String,
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        serde_json::Value::Number(n) => n.to_string(),
        _ => String::new(),
    })
}

/// Verify a CC JWT and return its claims.
///
/// Checks structure, expiry, and that the secp256k1 signature over
/// `header.payload` recovers to the issuer CCID.
pub fn verify_token(token: &str) -> Result<Claims, AppError> {
    let mut segments = token.split('.');
    let (Some(header), Some(payload), Some(signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(AppError::Unauthorized);
    };

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| AppError::Unauthorized)?;
    let claims: Claims =
        serde_json::from_slice(&payload_bytes).map_err(|_| AppError::Unauthorized)?;

    if let Ok(expires_at) = claims.expires_at.parse::<i64>() {
        if expires_at < chrono::Utc::now().timestamp() {
            return Err(AppError::Unauthorized);
        }
    }

    let signature_bytes = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| AppError::Unauthorized)?;

    let signing_input = format!("{}.{}", header, payload);
    let digest = keccak256(signing_input.as_bytes());

    let candidates = signature_candidates(&signature_bytes)?;
    let issuer_matches = candidates.into_iter().any(|candidate| {
        candidate
            .recover_address_from_prehash(&digest)
            .map(|address| {
                ccid_from_checksum_address(&address.to_checksum(None))
                    .eq_ignore_ascii_case(&claims.issuer)
            })
            .unwrap_or(false)
    });

    if !issuer_matches {
        return Err(AppError::Unauthorized);
    }

    Ok(claims)
}

/// A 65-byte signature carries its own recovery id; a 64-byte signature is
/// tried with both parities.
fn signature_candidates(bytes: &[u8]) -> Result<Vec<Signature>, AppError> {
    match bytes.len() {
        65 => Signature::try_from(bytes)
            .map(|signature| vec![signature])
            .map_err(|_| AppError::Unauthorized),
        64 => {
            let r = U256::from_be_slice(&bytes[..32]);
            let s = U256::from_be_slice(&bytes[32..]);
            Ok(vec![
                Signature::new(r, s, false),
                Signature::new(r, s, true),
            ])
        }
        _ => Err(AppError::Unauthorized),
    }
}

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Claims {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(http::header::AUTHORIZATION)
            .ok_or(AppError::Unauthorized)?
            .to_str()
            .map_err(|_| AppError::Unauthorized)?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or(AppError::Unauthorized)?;

        verify_token(token)
    }
}
