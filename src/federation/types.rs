//! ActivityPub wire types
//!
//! Only the slice of the ActivityStreams vocabulary the bridge actually
//! exchanges. Every field is lossy-tolerant on input (defaults) and omitted
//! on output when empty, mirroring how Mastodon-compatible servers emit
//! these documents.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The ActivityStreams context string.
pub const AS_CONTEXT: &str = "https://www.w3.org/ns/activitystreams";

/// The public addressing collection.
pub const PUBLIC: &str = "https://www.w3.org/ns/activitystreams#Public";

fn is_empty(s: &String) -> bool {
    s.is_empty()
}

/// A generic inbound activity.
///
/// `object` is sometimes a bare id string, sometimes a nested object; it is
/// kept as raw JSON and accessed through the extractors below. After type
/// discrimination, re-marshal into a typed projection with [`ApObject::project`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApObject {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub object_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub actor: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub object: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<Attachment>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,
}

impl ApObject {
    /// The object field as a bare id string.
    pub fn object_str(&self) -> Option<&str> {
        self.object.as_str()
    }

    /// The object field as a nested object.
    pub fn object_map(&self) -> Option<&serde_json::Map<String, Value>> {
        self.object.as_object()
    }

    /// Re-marshal the nested object into a typed projection.
    pub fn project<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.object.clone())
    }
}

/// An ActivityPub actor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Person {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub person_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub inbox: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub outbox: String,
    #[serde(rename = "sharedInbox", default, skip_serializing_if = "is_empty")]
    pub shared_inbox: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<PersonEndpoints>,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub followers: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub following: String,
    #[serde(
        rename = "preferredUsername",
        default,
        skip_serializing_if = "is_empty"
    )]
    pub preferred_username: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub summary: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
    #[serde(rename = "publicKey", default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Key>,
}

impl Person {
    /// Display name, falling back to the preferred username.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.preferred_username
        } else {
            &self.name
        }
    }

    /// Icon URL if the actor carries one.
    pub fn icon_url(&self) -> &str {
        self.icon.as_ref().map(|i| i.url.as_str()).unwrap_or("")
    }

    /// Profile page URL, falling back to the actor id.
    pub fn profile_url(&self) -> &str {
        if self.url.is_empty() { &self.id } else { &self.url }
    }
}

/// The endpoints field of an actor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonEndpoints {
    #[serde(rename = "sharedInbox", default, skip_serializing_if = "is_empty")]
    pub shared_inbox: String,
}

/// The publicKey field of an actor document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Key {
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub key_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub owner: String,
    #[serde(rename = "publicKeyPem", default, skip_serializing_if = "is_empty")]
    pub public_key_pem: String,
}

/// An image reference (actor icons, emoji icons).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Icon {
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub icon_type: String,
    #[serde(rename = "mediaType", default, skip_serializing_if = "is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub url: String,
}

/// A hashtag/emoji/mention tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tag {
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub tag_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<Icon>,
}

/// A media attachment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Attachment {
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub attachment_type: String,
    #[serde(rename = "mediaType", default, skip_serializing_if = "is_empty")]
    pub media_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub url: String,
}

/// The AP object representing a post.
///
/// Also doubles as the Announce projection the translator produces for a
/// bodiless reroute: `note_type == "Announce"` with `object` set to the
/// boosted reference.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Note {
    #[serde(rename = "@context", default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub note_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub id: String,
    #[serde(rename = "attributedTo", default, skip_serializing_if = "is_empty")]
    pub attributed_to: String,
    #[serde(rename = "inReplyTo", default, skip_serializing_if = "is_empty")]
    pub in_reply_to: String,
    #[serde(rename = "quoteUrl", default, skip_serializing_if = "is_empty")]
    pub quote_url: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub content: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub published: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tag: Vec<Tag>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<Attachment>,
    /// Boosted object reference when this is an Announce
    #[serde(default, skip_serializing_if = "is_empty")]
    pub object: String,
}

/// An Accept activity echoing the inbound Follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Accept {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub accept_type: String,
    pub id: String,
    pub actor: String,
    pub object: ApObject,
}

/// A Create activity wrapping an outbound Note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Create {
    #[serde(rename = "@context")]
    pub context: Value,
    #[serde(rename = "type")]
    pub create_type: String,
    pub id: String,
    pub actor: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub to: Vec<String>,
    pub object: Note,
}

// =============================================================================
// Discovery documents
// =============================================================================

/// WebFinger JRD response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFinger {
    pub subject: String,
    pub links: Vec<WebFingerLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebFingerLink {
    pub rel: String,
    #[serde(rename = "type", default, skip_serializing_if = "is_empty")]
    pub link_type: String,
    #[serde(default, skip_serializing_if = "is_empty")]
    pub href: String,
}

/// /.well-known/nodeinfo response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnown {
    pub links: Vec<WellKnownLink>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WellKnownLink {
    pub rel: String,
    pub href: String,
}

/// NodeInfo 2.0 document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub version: String,
    pub software: NodeInfoSoftware,
    pub protocols: Vec<String>,
    #[serde(rename = "openRegistrations")]
    pub open_registrations: bool,
    pub usage: NodeInfoUsage,
    pub metadata: NodeInfoMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfoSoftware {
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfoUsage {
    #[serde(rename = "localPosts")]
    pub local_posts: i64,
    pub users: NodeInfoUsers,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfoUsers {
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NodeInfoMetadata {
    #[serde(rename = "nodeName", default, skip_serializing_if = "is_empty")]
    pub node_name: String,
    #[serde(
        rename = "nodeDescription",
        default,
        skip_serializing_if = "is_empty"
    )]
    pub node_description: String,
}
