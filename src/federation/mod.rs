//! ActivityPub federation module
//!
//! Handles:
//! - AP wire types
//! - HTTP signatures (draft-cavage)
//! - Signed remote client (WebFinger, actor/note fetch, inbox delivery)
//! - Person caching

mod client;
mod person_cache;
mod signature;
pub mod types;

pub use client::ApClient;
pub use person_cache::PersonCache;
pub use signature::{
    SignatureHeaders, fetch_public_key, generate_digest, generate_rsa_keypair,
    key_id_matches_actor, parse_signature_header, sign_request, verify_signature,
};
