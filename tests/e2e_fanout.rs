//! E2E tests for the fan-out supervisor and association worker

mod common;

use common::{RemoteServer, TestServer};
use serde_json::json;
use std::time::Duration;

use ccbridge::bridge::worker;
use ccbridge::data::ApFollower;
use ccbridge::services::{CcAssociation, CcMessage, SignedObject, schema};

const ALICE_CCID: &str = "CC0000000000000000000000000000000000000001";

async fn insert_follower(server: &TestServer, remote: &RemoteServer, id: &str) {
    server
        .state
        .db
        .save_follower(&ApFollower {
            id: id.to_string(),
            subscriber_person_url: remote.actor_url("bob"),
            publisher_user_id: "alice".to_string(),
            subscriber_inbox: remote.inbox_url(),
        })
        .await
        .unwrap();
}

async fn wait_for_subscribers(server: &TestServer, channel: &str, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if server.bus.subscriber_count(channel) > 0 {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn stream_event(message_id: &str, author: &str) -> String {
    json!({"body": {"id": message_id, "author": author}}).to_string()
}

#[tokio::test]
async fn follower_worker_delivers_own_posts_and_stops_after_unfollow() {
    let server = TestServer::with_tick(1).await;
    let remote = RemoteServer::start().await;
    server.create_entity("alice", ALICE_CCID).await;
    insert_follower(&server, &remote, "https://remote.example/follows/1").await;

    tokio::spawn(worker::run_fanout_supervisor(server.state.clone()));

    // The supervisor's first tick starts the worker, which subscribes to
    // alice's home stream.
    assert!(wait_for_subscribers(&server, "home-alice", Duration::from_secs(5)).await);

    server.insert_note_message("MSG1", ALICE_CCID, "hello followers");
    server
        .bus
        .publish("home-alice", &stream_event("MSG1", ALICE_CCID));

    assert!(remote.wait_for_deliveries(1, Duration::from_secs(5)).await);
    let delivery = &remote.deliveries()[0];
    assert_eq!(delivery.body["type"], "Create");
    assert_eq!(delivery.body["object"]["type"], "Note");
    assert_eq!(delivery.body["object"]["content"], "hello followers");
    assert!(delivery.headers.contains_key("signature"));

    // Events authored by someone else are skipped.
    server.insert_note_message("MSG2", "CCsomeoneelse", "not alice");
    server
        .bus
        .publish("home-alice", &stream_event("MSG2", "CCsomeoneelse"));
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(remote.deliveries().len(), 1);

    // Unfollow: the worker stops within one supervisor tick and no further
    // deliveries are made.
    server
        .state
        .db
        .remove_follower("alice", &remote.actor_url("bob"))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;

    server.insert_note_message("MSG3", ALICE_CCID, "after unfollow");
    server
        .bus
        .publish("home-alice", &stream_event("MSG3", ALICE_CCID));
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert_eq!(remote.deliveries().len(), 1);
}

#[tokio::test]
async fn bodiless_reroute_fans_out_as_announce() {
    let server = TestServer::with_tick(1).await;
    let remote = RemoteServer::start().await;
    server.create_entity("alice", ALICE_CCID).await;
    insert_follower(&server, &remote, "https://remote.example/follows/1").await;

    tokio::spawn(worker::run_fanout_supervisor(server.state.clone()));
    assert!(wait_for_subscribers(&server, "home-alice", Duration::from_secs(5)).await);

    server.insert_note_message("SRC", ALICE_CCID, "the original");
    let reroute = SignedObject {
        signer: ALICE_CCID.to_string(),
        object_type: "Message".to_string(),
        schema: schema::message::REROUTE.to_string(),
        body: json!({"body": "", "rerouteMessageId": "SRC"}),
        meta: None,
        signed_at: chrono::Utc::now(),
        target: None,
        variant: None,
    };
    server.messages.insert(CcMessage {
        id: "BOOST".to_string(),
        author: ALICE_CCID.to_string(),
        payload: serde_json::to_string(&reroute).unwrap(),
    });

    server
        .bus
        .publish("home-alice", &stream_event("BOOST", ALICE_CCID));

    assert!(remote.wait_for_deliveries(1, Duration::from_secs(5)).await);
    let delivery = &remote.deliveries()[0];
    assert_eq!(delivery.body["type"], "Announce");
    assert_eq!(
        delivery.body["object"].as_str().unwrap(),
        format!("https://{}/ap/note/SRC", common::TEST_FQDN)
    );
}

fn ap_sourced_message(id: &str, reference: &str, inbox: &str) -> CcMessage {
    let signed = SignedObject {
        signer: "CCproxy".to_string(),
        object_type: "Message".to_string(),
        schema: schema::message::NOTE.to_string(),
        body: json!({"body": "imported note"}),
        meta: Some(json!({
            "apActor": "https://remote.example/users/bob",
            "apObjectRef": reference,
            "apPublisherInbox": inbox,
        })),
        signed_at: chrono::Utc::now(),
        target: None,
        variant: None,
    };
    CcMessage {
        id: id.to_string(),
        author: "CCproxy".to_string(),
        payload: serde_json::to_string(&signed).unwrap(),
    }
}

#[tokio::test]
async fn association_worker_translates_likes() {
    let server = TestServer::with_tick(1).await;
    let remote = RemoteServer::start().await;
    server.create_entity("alice", ALICE_CCID).await;

    // A remote note previously imported into CC.
    let reference = format!("{}/notes/42", remote.base_url);
    server
        .messages
        .insert(ap_sourced_message("TARGET", &reference, &remote.inbox_url()));

    // alice liked it on the CC side.
    let like = SignedObject {
        signer: ALICE_CCID.to_string(),
        object_type: "Association".to_string(),
        schema: schema::association::LIKE.to_string(),
        body: json!({}),
        meta: None,
        signed_at: chrono::Utc::now(),
        target: Some("TARGET".to_string()),
        variant: None,
    };
    server.associations.insert(CcAssociation {
        id: "ASSOC1".to_string(),
        author: ALICE_CCID.to_string(),
        schema: schema::association::LIKE.to_string(),
        target_id: "TARGET".to_string(),
        target_type: "messages".to_string(),
        payload: serde_json::to_string(&like).unwrap(),
    });

    tokio::spawn(worker::run_association_worker(server.state.clone()));
    assert!(
        wait_for_subscribers(&server, "proxy-notifications", Duration::from_secs(5)).await
    );

    server.bus.publish(
        "proxy-notifications",
        &json!({"body": {"id": "ASSOC1"}}).to_string(),
    );

    assert!(remote.wait_for_deliveries(1, Duration::from_secs(5)).await);
    let delivery = &remote.deliveries()[0];
    assert_eq!(delivery.body["type"], "Like");
    assert_eq!(delivery.body["object"].as_str().unwrap(), reference);
    assert_eq!(delivery.body["content"], "⭐");
    assert_eq!(
        delivery.body["id"].as_str().unwrap(),
        format!("https://{}/ap/likes/ASSOC1", common::TEST_FQDN)
    );
}

#[tokio::test]
async fn association_worker_skips_non_ap_targets() {
    let server = TestServer::with_tick(1).await;
    let remote = RemoteServer::start().await;
    server.create_entity("alice", ALICE_CCID).await;

    // A native CC message with no AP metadata.
    server.insert_note_message("NATIVE", ALICE_CCID, "local only");

    let like = SignedObject {
        signer: ALICE_CCID.to_string(),
        object_type: "Association".to_string(),
        schema: schema::association::LIKE.to_string(),
        body: json!({}),
        meta: None,
        signed_at: chrono::Utc::now(),
        target: Some("NATIVE".to_string()),
        variant: None,
    };
    server.associations.insert(CcAssociation {
        id: "ASSOC2".to_string(),
        author: ALICE_CCID.to_string(),
        schema: schema::association::LIKE.to_string(),
        target_id: "NATIVE".to_string(),
        target_type: "messages".to_string(),
        payload: serde_json::to_string(&like).unwrap(),
    });

    tokio::spawn(worker::run_association_worker(server.state.clone()));
    assert!(
        wait_for_subscribers(&server, "proxy-notifications", Duration::from_secs(5)).await
    );

    server.bus.publish(
        "proxy-notifications",
        &json!({"body": {"id": "ASSOC2"}}).to_string(),
    );
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert!(remote.deliveries().is_empty());
}
