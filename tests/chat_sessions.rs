use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cipherchat::api::client::ApiClient;
use cipherchat::api::models::{Group, GroupId};
use cipherchat::chat::{GroupChat, PrivateChat};
use cipherchat::codec::{self, CipherKey};
use cipherchat::realtime::RealtimeChannel;
use cipherchat::transcript::{display_zone, DEFAULT_UTC_OFFSET_MINUTES};

mod common;
use common::{next_frame, setup_logging, start_socket_server};

fn key() -> CipherKey {
    CipherKey::new("session-pass")
}

fn now() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-19T10:00:00Z").unwrap().with_timezone(&Utc)
}

/// Payload of a `42["name", payload]` frame.
fn event_payload(frame: &str, name: &str) -> Value {
    let body = frame.strip_prefix("42").expect("not an event frame");
    let items: Vec<Value> = serde_json::from_str(body).unwrap();
    assert_eq!(items[0], name);
    items[1].clone()
}

#[tokio::test]
async fn private_chat_opens_and_sends() {
    setup_logging();
    let server = MockServer::start().await;
    let hello = codec::encrypt("hello alice", &key());
    Mock::given(method("GET"))
        .and(path("/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "sender": "bob", "receiver": "alice", "conversation": [
                { "from": "bob", "to": "alice", "text": hello, "timestamp": "2025-03-19T09:00:00.000Z" }
            ]}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{ "contact": "bob", "name": "Bob B" }])))
        .mount(&server)
        .await;

    let (socket_url, mut frames) = start_socket_server(vec![r#"42["onlineUsers",["bob"]]"#]).await;
    let api = ApiClient::new(&server.uri()).unwrap();
    let realtime = RealtimeChannel::new(&socket_url).unwrap();
    let mut events = realtime.subscribe();

    let zone = display_zone(DEFAULT_UTC_OFFSET_MINUTES);
    let mut chat = PrivateChat::new("alice", "bob", None, key(), zone);
    chat.open(&api, &realtime, now()).await.unwrap();

    assert_eq!(next_frame(&mut frames).await, r#"42["registerUser","alice"]"#);
    assert_eq!(chat.peer_name(), "Bob B");
    assert_eq!(chat.transcript().len(), 1);
    assert_eq!(chat.transcript().messages()[0].body(), "hello alice");

    let presence = events.recv().await.unwrap();
    assert!(chat.handle_event(&presence));
    assert!(chat.is_peer_online());

    assert!(chat.send(&api, &realtime, "   ", None).await.unwrap().is_none());
    let sent = chat.send(&api, &realtime, " hi bob ", None).await.unwrap().unwrap();
    let wire = event_payload(&next_frame(&mut frames).await, "privateMessage");
    assert_eq!(wire["from"], "alice");
    assert_eq!(wire["to"], "bob");
    assert_eq!(wire["timestamp"], sent.timestamp.as_str());
    assert_eq!(codec::decrypt(wire["text"].as_str().unwrap(), &key()), "hi bob");
    // The local copy only arrives with the echo.
    assert_eq!(chat.transcript().len(), 1);
}

#[tokio::test]
async fn group_chat_sends_optimistically_and_persists() {
    setup_logging();
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/group-messages/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/group-info/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "members": ["alice", "bob"] })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/contacts/alice"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "contact": "bob", "name": "Bob B" },
            { "contact": "carol", "name": "Carol" }
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/group-messages"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({ "error": "db down" })))
        .expect(2)
        .mount(&server)
        .await;

    let (socket_url, mut frames) = start_socket_server(Vec::new()).await;
    let api = ApiClient::new(&server.uri()).unwrap();
    let realtime = RealtimeChannel::new(&socket_url).unwrap();

    let group = Group { id: GroupId::from(7), name: "Team".into(), admin: "alice".into() };
    let zone = display_zone(DEFAULT_UTC_OFFSET_MINUTES);
    let mut chat = GroupChat::new("alice", group, key(), zone);
    chat.open(&api, &realtime, now()).await.unwrap();

    assert_eq!(next_frame(&mut frames).await, r#"42["joinGroup",7]"#);
    assert_eq!(chat.members(), ["alice".to_string(), "bob".to_string()]);
    assert_eq!(chat.display_name("bob"), "Bob B");
    let candidates: Vec<&str> = chat.candidate_members().iter().map(|c| c.contact.as_str()).collect();
    assert_eq!(candidates, vec!["carol"]);

    // A failed persist does not fail the send.
    assert!(chat.send(&api, &realtime, "morning all", None, now()).await.unwrap());
    let wire = event_payload(&next_frame(&mut frames).await, "groupMessage");
    assert_eq!(wire["groupId"], 7);
    assert_eq!(wire["timestamp"], "2025-03-19 15:30:00");
    assert_eq!(codec::decrypt(wire["text"].as_str().unwrap(), &key()), "morning all");

    // Same second, same timestamp: both stay visible.
    assert!(chat.send(&api, &realtime, "coffee?", None, now()).await.unwrap());
    let wire = event_payload(&next_frame(&mut frames).await, "groupMessage");
    assert_eq!(wire["timestamp"], "2025-03-19 15:30:00");

    let bodies: Vec<&str> = chat.transcript().messages().iter().map(|m| m.body()).collect();
    assert_eq!(bodies, vec!["morning all", "coffee?"]);
}
