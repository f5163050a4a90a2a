use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;

use cipherchat::api::events::{InboundEvent, OutboundEvent};
use cipherchat::api::models::GroupId;
use cipherchat::realtime::RealtimeChannel;

mod common;
use common::{next_frame, setup_logging, start_socket_server};

async fn recv(events: &mut broadcast::Receiver<InboundEvent>) -> InboundEvent {
    tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for an event")
        .expect("event channel closed")
}

#[tokio::test]
async fn emits_events_and_fans_out_pushes() {
    setup_logging();
    let (url, mut frames) = start_socket_server(vec![
        r#"42["onlineUsers",["alice","bob"]]"#,
        "2",
        r#"42["receivePrivateMessage",{"from":"bob","to":"alice","text":"c","timestamp":"2025-03-19T10:00:00Z"}]"#,
        r#"42["somethingElse",1]"#,
        r#"42["newMessage"]"#,
    ])
    .await;

    let channel = RealtimeChannel::new(&url).unwrap();
    let mut events = channel.subscribe();
    assert!(!channel.is_connected().await);

    channel.emit(OutboundEvent::RegisterUser("alice".into())).await.unwrap();
    assert!(channel.is_connected().await);
    assert_eq!(next_frame(&mut frames).await, r#"42["registerUser","alice"]"#);

    assert_eq!(
        recv(&mut events).await,
        InboundEvent::OnlineUsers(vec!["alice".into(), "bob".into()])
    );
    assert_eq!(next_frame(&mut frames).await, "3");
    match recv(&mut events).await {
        InboundEvent::PrivateMessage(msg) => {
            assert_eq!(msg.from, "bob");
            assert_eq!(msg.body(), "c");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(recv(&mut events).await, InboundEvent::NewMessage);

    channel.emit(OutboundEvent::JoinGroup(GroupId::from(7))).await.unwrap();
    assert_eq!(next_frame(&mut frames).await, r#"42["joinGroup",7]"#);

    channel.close().await.unwrap();
    assert_eq!(next_frame(&mut frames).await, "41");
    assert!(!channel.is_connected().await);
}

#[tokio::test]
async fn connect_fails_without_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = RealtimeChannel::new(&format!("http://{addr}")).unwrap();
    assert!(channel.emit(OutboundEvent::RegisterUser("x".into())).await.is_err());
    assert!(!channel.is_connected().await);
}
