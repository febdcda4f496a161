//! Translation between CC signed objects and AP documents
//!
//! CC messages are schema-tagged markdown; AP notes are HTML-ish text with
//! attachment and tag arrays. Image markdown becomes `Document` attachments
//! on the way out and is re-appended as markdown on the way in; custom
//! emoji travel as AP `Emoji` tags.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use lazy_static::lazy_static;
use regex::Regex;

use crate::data::Database;
use crate::error::AppError;
use crate::federation::types::{AS_CONTEXT, Attachment, Icon, Note, PUBLIC, Person, Tag};
use crate::services::{CcMessage, MessageService, ProxySigner, SignedObject, schema};

lazy_static! {
    static ref IMAGE_PATTERN: Regex =
        Regex::new(r"!\[[^\]]*\]\(([^)]*)\)").expect("image pattern compiles");
}

/// Maximum accepted content length for an inbound note.
const MAX_NOTE_LENGTH: usize = 4096;

/// Converts CC messages to AP notes and back.
#[derive(Clone)]
pub struct Translator {
    db: Arc<Database>,
    message: Arc<dyn MessageService>,
    proxy: Arc<ProxySigner>,
    fqdn: String,
}

impl Translator {
    pub fn new(
        db: Arc<Database>,
        message: Arc<dyn MessageService>,
        proxy: Arc<ProxySigner>,
        fqdn: String,
    ) -> Self {
        Self {
            db,
            message,
            proxy,
            fqdn,
        }
    }

    fn note_url(&self, message_id: &str) -> String {
        format!("https://{}/ap/note/{}", self.fqdn, message_id)
    }

    fn acct_url(&self, entity_id: &str) -> String {
        format!("https://{}/ap/acct/{}", self.fqdn, entity_id)
    }

    /// Resolve a referenced CC message to its AP object reference.
    ///
    /// Messages imported from AP carry the original id in `meta.apObjectRef`;
    /// native CC messages get a fabricated local note URL.
    async fn resolve_reference(&self, source_id: &str) -> Result<String, AppError> {
        let source = self
            .message
            .get(source_id)
            .await
            .map_err(|_| AppError::Federation("message not found".to_string()))?;

        let signed: SignedObject = serde_json::from_str(&source.payload)
            .map_err(|_| AppError::Validation("invalid payload".to_string()))?;

        let reference = signed
            .meta
            .as_ref()
            .and_then(|meta| meta.get("apObjectRef"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| self.note_url(source_id));

        Ok(reference)
    }

    /// Convert a CC message into its AP projection.
    ///
    /// The result is a `Note` for note/reply/quote schemas and an `Announce`
    /// projection (with `object` set to the boosted reference) for a
    /// bodiless reroute.
    pub async fn message_to_note(&self, message_id: &str) -> Result<Note, AppError> {
        let msg = self
            .message
            .get(message_id)
            .await
            .map_err(|_| AppError::Federation("message not found".to_string()))?;

        let entity = self
            .db
            .get_entity_by_ccid(&msg.author)
            .await?
            .ok_or_else(|| AppError::Federation("entity not found".to_string()))?;

        let signed: SignedObject = serde_json::from_str(&msg.payload)
            .map_err(|_| AppError::Validation("invalid payload".to_string()))?;

        let body = signed
            .body
            .as_object()
            .ok_or_else(|| AppError::Validation("invalid body".to_string()))?;

        let raw_text = body
            .get("body")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AppError::Validation("invalid body".to_string()))?;

        let images: Vec<String> = IMAGE_PATTERN
            .captures_iter(raw_text)
            .map(|capture| capture[1].to_string())
            .collect();
        let text = IMAGE_PATTERN.replace_all(raw_text, "").to_string();

        let mut emojis = Vec::new();
        if let Some(emoji_map) = body.get("emojis").and_then(|v| v.as_object()) {
            for (name, value) in emoji_map {
                let Some(image_url) = value.get("imageURL").and_then(|v| v.as_str()) else {
                    continue;
                };
                emojis.push(Tag {
                    tag_type: "Emoji".to_string(),
                    id: image_url.to_string(),
                    name: format!(":{}:", name),
                    icon: Some(Icon {
                        icon_type: "Image".to_string(),
                        media_type: "image/png".to_string(),
                        url: image_url.to_string(),
                    }),
                });
            }
        }

        let attachments: Vec<Attachment> = images
            .into_iter()
            .map(|url| Attachment {
                attachment_type: "Document".to_string(),
                media_type: "image/png".to_string(),
                url,
            })
            .collect();

        match signed.schema.as_str() {
            schema::message::NOTE => Ok(Note {
                context: Some(AS_CONTEXT.into()),
                note_type: "Note".to_string(),
                id: self.note_url(&msg.id),
                attributed_to: self.acct_url(&entity.id),
                content: text,
                published: signed
                    .signed_at
                    .to_rfc3339_opts(SecondsFormat::Secs, true),
                to: vec![PUBLIC.to_string()],
                tag: emojis,
                attachment: attachments,
                ..Default::default()
            }),
            schema::message::REPLY => {
                let source_id = body
                    .get("replyToMessageId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AppError::Validation("invalid body".to_string()))?;
                let reference = self.resolve_reference(source_id).await?;

                Ok(Note {
                    context: Some(AS_CONTEXT.into()),
                    note_type: "Note".to_string(),
                    id: self.note_url(&msg.id),
                    attributed_to: self.acct_url(&entity.id),
                    content: text,
                    in_reply_to: reference,
                    to: vec![PUBLIC.to_string()],
                    ..Default::default()
                })
            }
            schema::message::REROUTE => {
                let source_id = body
                    .get("rerouteMessageId")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| AppError::Validation("invalid body".to_string()))?;
                let reference = self.resolve_reference(source_id).await?;

                if text.is_empty() {
                    return Ok(Note {
                        context: Some(AS_CONTEXT.into()),
                        note_type: "Announce".to_string(),
                        id: self.note_url(&msg.id),
                        object: reference,
                        ..Default::default()
                    });
                }

                Ok(Note {
                    context: Some(AS_CONTEXT.into()),
                    note_type: "Note".to_string(),
                    id: self.note_url(&msg.id),
                    attributed_to: self.acct_url(&entity.id),
                    content: text,
                    quote_url: reference,
                    to: vec![PUBLIC.to_string()],
                    ..Default::default()
                })
            }
            _ => Err(AppError::Validation("invalid schema".to_string())),
        }
    }

    /// Convert an AP note into a CC message and post it to the given
    /// destination streams.
    ///
    /// The message is signed by the proxy identity; the remote author
    /// survives as a profile override plus `meta.apActor`.
    pub async fn note_to_message(
        &self,
        note: &Note,
        person: &Person,
        dest_streams: &[String],
    ) -> Result<CcMessage, AppError> {
        let mut content = note.content.clone();
        for attachment in &note.attachment {
            if attachment.attachment_type == "Document" {
                content.push_str(&format!("\n\n![image]({})", attachment.url));
            }
        }

        let mut emojis = BTreeMap::new();
        for tag in &note.tag {
            if tag.tag_type == "Emoji" {
                let name = tag.name.trim_matches(':').to_string();
                let image_url = tag.icon.as_ref().map(|i| i.url.clone()).unwrap_or_default();
                emojis.insert(name, serde_json::json!({ "imageURL": image_url }));
            }
        }

        if content.is_empty() {
            return Err(AppError::Unprocessable("empty note".to_string()));
        }
        if content.len() > MAX_NOTE_LENGTH {
            return Err(AppError::Unprocessable("note too long".to_string()));
        }

        let date = DateTime::parse_from_rfc3339(&note.published)
            .map(|parsed| parsed.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now());

        let signed = SignedObject {
            signer: self.proxy.ccid.clone(),
            object_type: "Message".to_string(),
            schema: schema::message::NOTE.to_string(),
            body: serde_json::json!({
                "body": content,
                "profileOverride": {
                    "username": person.display_name(),
                    "avatar": person.icon_url(),
                    "description": person.summary,
                    "link": person.profile_url(),
                },
                "emojis": emojis,
            }),
            meta: Some(serde_json::json!({
                "apActor": person.profile_url(),
                "apObjectRef": note.id,
                "apPublisherInbox": person.inbox,
            })),
            signed_at: date,
            target: None,
            variant: None,
        };

        let payload = serde_json::to_string(&signed)
            .map_err(|e| AppError::Internal(anyhow::anyhow!("payload serialization: {}", e)))?;
        let signature = self.proxy.sign(payload.as_bytes())?;

        self.message
            .post(payload, signature, dest_streams.to_vec())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeMessages {
        messages: Mutex<HashMap<String, CcMessage>>,
        posted: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeMessages {
        fn new() -> Self {
            Self {
                messages: Mutex::new(HashMap::new()),
                posted: Mutex::new(Vec::new()),
            }
        }

        fn insert(&self, message: CcMessage) {
            self.messages
                .lock()
                .unwrap()
                .insert(message.id.clone(), message);
        }

        fn posted_count(&self) -> usize {
            self.posted.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl MessageService for FakeMessages {
        async fn get(&self, id: &str) -> Result<CcMessage, AppError> {
            self.messages
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::Federation("message not found".to_string()))
        }

        async fn post(
            &self,
            payload: String,
            _signature: String,
            streams: Vec<String>,
        ) -> Result<CcMessage, AppError> {
            self.posted.lock().unwrap().push((payload.clone(), streams));
            Ok(CcMessage {
                id: "CCMSG-NEW".to_string(),
                author: "".to_string(),
                payload,
            })
        }

        async fn delete(&self, _id: &str) -> Result<CcMessage, AppError> {
            Err(AppError::NotFound)
        }

        async fn total(&self) -> Result<i64, AppError> {
            Ok(0)
        }
    }

    const AUTHOR_CCID: &str = "CC0101010101010101010101010101010101010101";

    async fn test_translator() -> (Translator, Arc<FakeMessages>, Arc<Database>) {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Arc::new(
            Database::connect(&dir.path().join("test.db"))
                .await
                .expect("connect"),
        );
        std::mem::forget(dir);

        db.create_entity(&crate::data::ApEntity {
            id: "alice".to_string(),
            ccid: AUTHOR_CCID.to_string(),
            public_key: "".to_string(),
            private_key: "".to_string(),
            home_stream: "home".to_string(),
            notification_stream: "notify".to_string(),
            follow_stream: "follow".to_string(),
        })
        .await
        .expect("entity");

        let messages = Arc::new(FakeMessages::new());
        let proxy = Arc::new(
            ProxySigner::from_hex(
                "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef",
            )
            .expect("proxy key"),
        );

        let translator = Translator::new(
            db.clone(),
            messages.clone(),
            proxy,
            "cc.example.com".to_string(),
        );
        (translator, messages, db)
    }

    fn cc_note(id: &str, schema_uri: &str, body: serde_json::Value) -> CcMessage {
        let signed = SignedObject {
            signer: AUTHOR_CCID.to_string(),
            object_type: "Message".to_string(),
            schema: schema_uri.to_string(),
            body,
            meta: None,
            signed_at: "2024-06-01T12:00:00Z".parse().unwrap(),
            target: None,
            variant: None,
        };
        CcMessage {
            id: id.to_string(),
            author: AUTHOR_CCID.to_string(),
            payload: serde_json::to_string(&signed).unwrap(),
        }
    }

    #[tokio::test]
    async fn image_markdown_becomes_document_attachment() {
        let (translator, messages, _db) = test_translator().await;
        messages.insert(cc_note(
            "MSG1",
            schema::message::NOTE,
            serde_json::json!({"body": "hello ![](https://x/y.png)"}),
        ));

        let note = translator.message_to_note("MSG1").await.expect("converts");
        assert_eq!(note.note_type, "Note");
        assert_eq!(note.content, "hello ");
        assert_eq!(note.attachment.len(), 1);
        assert_eq!(note.attachment[0].attachment_type, "Document");
        assert_eq!(note.attachment[0].url, "https://x/y.png");
        assert_eq!(note.id, "https://cc.example.com/ap/note/MSG1");
        assert_eq!(note.published, "2024-06-01T12:00:00Z");
    }

    #[tokio::test]
    async fn attachment_round_trips_back_to_markdown() {
        let (translator, messages, _db) = test_translator().await;

        let note = Note {
            note_type: "Note".to_string(),
            id: "https://remote.example/notes/1".to_string(),
            content: "hello".to_string(),
            attachment: vec![Attachment {
                attachment_type: "Document".to_string(),
                media_type: "image/png".to_string(),
                url: "https://x/y.png".to_string(),
            }],
            published: "2024-06-01T12:00:00.000Z".to_string(),
            ..Default::default()
        };
        let person = Person {
            id: "https://remote.example/users/bob".to_string(),
            inbox: "https://remote.example/users/bob/inbox".to_string(),
            preferred_username: "bob".to_string(),
            ..Default::default()
        };

        translator
            .note_to_message(&note, &person, &["stream1".to_string()])
            .await
            .expect("converts");

        let posted = messages.posted.lock().unwrap();
        assert_eq!(posted.len(), 1);
        let signed: SignedObject = serde_json::from_str(&posted[0].0).unwrap();
        let content = signed.body["body"].as_str().unwrap();
        assert!(content.contains("![image](https://x/y.png)"));
        assert_eq!(
            signed.meta.as_ref().unwrap()["apObjectRef"],
            "https://remote.example/notes/1"
        );
        assert_eq!(
            signed.meta.as_ref().unwrap()["apPublisherInbox"],
            "https://remote.example/users/bob/inbox"
        );
    }

    #[tokio::test]
    async fn emoji_tags_flatten_into_emoji_map_and_back() {
        let (translator, messages, _db) = test_translator().await;
        messages.insert(cc_note(
            "MSG1",
            schema::message::NOTE,
            serde_json::json!({
                "body": "hi",
                "emojis": {"wave": {"imageURL": "https://x/wave.png"}}
            }),
        ));

        let note = translator.message_to_note("MSG1").await.expect("converts");
        assert_eq!(note.tag.len(), 1);
        assert_eq!(note.tag[0].tag_type, "Emoji");
        assert_eq!(note.tag[0].name, ":wave:");
        assert_eq!(note.tag[0].icon.as_ref().unwrap().url, "https://x/wave.png");

        let person = Person::default();
        translator
            .note_to_message(&note, &person, &[])
            .await
            .expect("converts back");

        let posted = messages.posted.lock().unwrap();
        let signed: SignedObject = serde_json::from_str(&posted[0].0).unwrap();
        assert_eq!(
            signed.body["emojis"]["wave"]["imageURL"],
            "https://x/wave.png"
        );
    }

    #[tokio::test]
    async fn bodiless_reroute_becomes_announce() {
        let (translator, messages, _db) = test_translator().await;
        messages.insert(cc_note(
            "SRC",
            schema::message::NOTE,
            serde_json::json!({"body": "original"}),
        ));
        messages.insert(cc_note(
            "MSG1",
            schema::message::REROUTE,
            serde_json::json!({"body": "", "rerouteMessageId": "SRC"}),
        ));

        let note = translator.message_to_note("MSG1").await.expect("converts");
        assert_eq!(note.note_type, "Announce");
        assert_eq!(note.object, "https://cc.example.com/ap/note/SRC");
    }

    #[tokio::test]
    async fn quoting_reroute_becomes_note_with_quote_url() {
        let (translator, messages, _db) = test_translator().await;
        messages.insert(cc_note(
            "SRC",
            schema::message::NOTE,
            serde_json::json!({"body": "original"}),
        ));
        messages.insert(cc_note(
            "MSG1",
            schema::message::REROUTE,
            serde_json::json!({"body": "check this out", "rerouteMessageId": "SRC"}),
        ));

        let note = translator.message_to_note("MSG1").await.expect("converts");
        assert_eq!(note.note_type, "Note");
        assert_eq!(note.quote_url, "https://cc.example.com/ap/note/SRC");
        assert_eq!(note.content, "check this out");
    }

    #[tokio::test]
    async fn reply_prefers_original_ap_reference() {
        let (translator, messages, _db) = test_translator().await;

        let mut imported = cc_note(
            "SRC",
            schema::message::NOTE,
            serde_json::json!({"body": "remote post"}),
        );
        let mut signed: SignedObject = serde_json::from_str(&imported.payload).unwrap();
        signed.meta = Some(serde_json::json!({
            "apObjectRef": "https://remote.example/notes/99"
        }));
        imported.payload = serde_json::to_string(&signed).unwrap();
        messages.insert(imported);

        messages.insert(cc_note(
            "MSG1",
            schema::message::REPLY,
            serde_json::json!({"body": "replying", "replyToMessageId": "SRC"}),
        ));

        let note = translator.message_to_note("MSG1").await.expect("converts");
        assert_eq!(note.in_reply_to, "https://remote.example/notes/99");
    }

    #[tokio::test]
    async fn empty_and_oversized_notes_are_rejected_before_posting() {
        let (translator, messages, _db) = test_translator().await;
        let person = Person::default();

        let empty = Note::default();
        let error = translator
            .note_to_message(&empty, &person, &[])
            .await
            .expect_err("empty note must fail");
        assert!(matches!(
            error,
            AppError::Unprocessable(message) if message == "empty note"
        ));

        let oversized = Note {
            content: "x".repeat(MAX_NOTE_LENGTH + 1),
            ..Default::default()
        };
        let error = translator
            .note_to_message(&oversized, &person, &[])
            .await
            .expect_err("oversized note must fail");
        assert!(matches!(
            error,
            AppError::Unprocessable(message) if message == "note too long"
        ));

        assert_eq!(messages.posted_count(), 0);
    }

    #[tokio::test]
    async fn unparseable_published_falls_back_to_now() {
        let (translator, messages, _db) = test_translator().await;
        let note = Note {
            content: "hi".to_string(),
            published: "not-a-date".to_string(),
            ..Default::default()
        };

        translator
            .note_to_message(&note, &Person::default(), &[])
            .await
            .expect("converts");

        let posted = messages.posted.lock().unwrap();
        let signed: SignedObject = serde_json::from_str(&posted[0].0).unwrap();
        let age = Utc::now() - signed.signed_at;
        assert!(age.num_seconds().abs() < 60);
    }
}
