//! Shared helpers for the integration tests: logging and a one-connection
//! Socket.IO server.

#![allow(dead_code)]

use std::sync::Once;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use log::LevelFilter;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message as WsMessage;

static INIT_LOGGER: Once = Once::new();

pub fn setup_logging() {
    INIT_LOGGER.call_once(|| {
        let _ = env_logger::Builder::new()
            .filter_level(LevelFilter::Debug)
            .is_test(true)
            .try_init();
    });
}

/// Accept one websocket, run the Engine.IO open and namespace connect, then
/// forward every text frame the client sends to the returned receiver.
/// `push` frames are written right after the client's first event.
pub async fn start_socket_server(push: Vec<&'static str>) -> (String, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        ws.send(WsMessage::Text(
            r#"0{"sid":"s1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#.into(),
        ))
        .await
        .unwrap();

        let connect = ws.next().await.unwrap().unwrap().into_text().unwrap();
        assert_eq!(connect, "40");
        ws.send(WsMessage::Text(r#"40{"sid":"n1"}"#.into())).await.unwrap();

        let mut pushed = false;
        while let Some(Ok(frame)) = ws.next().await {
            let WsMessage::Text(text) = frame else { continue };
            let _ = tx.send(text);
            if !pushed {
                pushed = true;
                for out in &push {
                    ws.send(WsMessage::Text((*out).into())).await.unwrap();
                }
            }
        }
    });

    (format!("http://{addr}"), rx)
}

pub async fn next_frame(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for a frame")
        .expect("server went away")
}
