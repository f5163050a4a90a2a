//! The realtime channel to the chat server.
//!
//! A [`RealtimeChannel`] is an ordinary owned value: views that need live
//! events receive it (usually behind an `Arc`), it connects on first use and
//! it is torn down by [`RealtimeChannel::close`] or by dropping it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, trace, warn};
use tokio::net::TcpStream;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::api::events::{InboundEvent, OutboundEvent, Packet};
use crate::error::{ClientError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsWriter = SplitSink<WsStream, WsMessage>;
type WsReader = SplitStream<WsStream>;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const EVENT_BUFFER: usize = 256;

struct Connection {
    writer: Arc<Mutex<WsWriter>>,
    alive: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

pub struct RealtimeChannel {
    endpoint: Url,
    conn: Mutex<Option<Connection>>,
    events: broadcast::Sender<InboundEvent>,
}

/// Socket.IO websocket endpoint for a server base URL.
///
/// `http(s)` becomes `ws(s)`; a bare host gets the `/socket.io/` path.
pub fn socket_endpoint(server_url: &str) -> Result<Url> {
    let mut url = Url::parse(&crate::utils::normalize_url(server_url))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => return Err(ClientError::Config(format!("unsupported realtime scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| ClientError::Config(format!("cannot use {scheme} for {server_url}")))?;
    if url.path().is_empty() || url.path() == "/" {
        url.set_path("/socket.io/");
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

impl RealtimeChannel {
    /// Create an unconnected channel for the given server.
    pub fn new(server_url: &str) -> Result<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Ok(Self {
            endpoint: socket_endpoint(server_url)?,
            conn: Mutex::new(None),
            events,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Receive every inbound event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundEvent> {
        self.events.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.conn
            .lock()
            .await
            .as_ref()
            .is_some_and(|c| c.alive.load(Ordering::SeqCst))
    }

    /// Connect if not already connected. Re-dials when the previous
    /// connection has dropped.
    pub async fn connect(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if guard.as_ref().is_some_and(|c| c.alive.load(Ordering::SeqCst)) {
            return Ok(());
        }
        if let Some(stale) = guard.take() {
            stale.reader.abort();
        }
        *guard = Some(self.dial().await?);
        Ok(())
    }

    async fn dial(&self) -> Result<Connection> {
        let (ws, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(self.endpoint.as_str()))
            .await
            .map_err(|_| ClientError::Realtime("connect timed out".into()))??;
        let (mut writer, mut reader) = ws.split();

        let handshake = tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            match expect_packet(&mut reader).await? {
                Packet::Open(h) => Ok(h),
                other => Err(ClientError::Realtime(format!("expected open packet, got {other:?}"))),
            }
        })
        .await
        .map_err(|_| ClientError::Realtime("no open packet from server".into()))??;
        debug!("engine session {} (ping every {}ms)", handshake.sid, handshake.ping_interval);

        writer.send(WsMessage::Text(Packet::Connect(None).encode())).await?;
        tokio::time::timeout(HANDSHAKE_TIMEOUT, async {
            loop {
                match expect_packet(&mut reader).await? {
                    Packet::Connect(_) => return Ok(()),
                    Packet::Ping => writer.send(WsMessage::Text(Packet::Pong.encode())).await?,
                    Packet::ConnectError(reason) => {
                        return Err(ClientError::Realtime(format!("connect refused: {reason}")))
                    }
                    other => trace!("skipping {other:?} during handshake"),
                }
            }
        })
        .await
        .map_err(|_| ClientError::Realtime("namespace connect timed out".into()))??;
        info!("realtime channel connected to {}", self.endpoint);

        let writer = Arc::new(Mutex::new(writer));
        let alive = Arc::new(AtomicBool::new(true));
        let reader = tokio::spawn(reader_loop(
            reader,
            Arc::clone(&writer),
            self.events.clone(),
            Arc::clone(&alive),
        ));
        Ok(Connection { writer, alive, reader })
    }

    /// Send an event, connecting first if needed.
    pub async fn emit(&self, event: OutboundEvent) -> Result<()> {
        self.connect().await?;
        let frame = event.to_packet()?.encode();
        let writer = {
            let guard = self.conn.lock().await;
            let conn = guard
                .as_ref()
                .ok_or_else(|| ClientError::Realtime("not connected".into()))?;
            Arc::clone(&conn.writer)
        };
        debug!("emit {}", event.name());
        writer.lock().await.send(WsMessage::Text(frame)).await?;
        Ok(())
    }

    /// Disconnect and stop the reader. The channel may be reconnected later.
    pub async fn close(&self) -> Result<()> {
        let Some(conn) = self.conn.lock().await.take() else {
            return Ok(());
        };
        conn.alive.store(false, Ordering::SeqCst);
        let mut writer = conn.writer.lock().await;
        let sent = writer.send(WsMessage::Text(Packet::Disconnect.encode())).await;
        let _ = writer.close().await;
        conn.reader.abort();
        info!("realtime channel closed");
        sent.map_err(ClientError::from)
    }
}

impl Drop for RealtimeChannel {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.get_mut().take() {
            conn.reader.abort();
        }
    }
}

/// Feed subscribed events to `on_event` until `stop` fires, its sender is
/// dropped, or the channel goes away. Returns as soon as `stop` resolves,
/// without waiting for another event.
pub async fn follow<F>(mut events: broadcast::Receiver<InboundEvent>, mut stop: oneshot::Receiver<()>, mut on_event: F)
where
    F: FnMut(InboundEvent),
{
    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            next = events.recv() => match next {
                Ok(event) => on_event(event),
                Err(RecvError::Lagged(n)) => warn!("missed {n} realtime events"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    trace!("stopped following realtime events");
}

/// Next Socket.IO packet, skipping non-text frames. `None` once the socket
/// is closed.
async fn next_packet(reader: &mut WsReader) -> Result<Option<Packet>> {
    loop {
        match reader.next().await {
            Some(Ok(WsMessage::Text(text))) => return Packet::decode(&text).map(Some),
            Some(Ok(WsMessage::Close(_))) | None => return Ok(None),
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn expect_packet(reader: &mut WsReader) -> Result<Packet> {
    next_packet(reader)
        .await?
        .ok_or_else(|| ClientError::Realtime("connection closed during handshake".into()))
}

async fn reader_loop(
    mut reader: WsReader,
    writer: Arc<Mutex<WsWriter>>,
    events: broadcast::Sender<InboundEvent>,
    alive: Arc<AtomicBool>,
) {
    loop {
        let packet = match next_packet(&mut reader).await {
            Ok(Some(p)) => p,
            Ok(None) => {
                debug!("realtime socket closed");
                break;
            }
            Err(ClientError::WebSocket(e)) => {
                warn!("realtime read failed: {e}");
                break;
            }
            Err(e) => {
                warn!("skipping bad frame: {e}");
                continue;
            }
        };
        match packet {
            Packet::Ping => {
                if let Err(e) = writer.lock().await.send(WsMessage::Text(Packet::Pong.encode())).await {
                    warn!("failed to answer ping: {e}");
                    break;
                }
            }
            Packet::Event { name, args } => match InboundEvent::from_event(&name, &args) {
                Ok(Some(event)) => {
                    trace!("inbound {name}");
                    let _ = events.send(event);
                }
                Ok(None) => debug!("ignoring unknown event {name}"),
                Err(e) => warn!("dropping malformed {name} event: {e}"),
            },
            Packet::Disconnect | Packet::Close => {
                info!("server closed the realtime session");
                break;
            }
            other => trace!("ignoring {other:?}"),
        }
    }
    alive.store(false, Ordering::SeqCst);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_socket_endpoints() {
        let url = socket_endpoint("http://10.0.0.2:8000").unwrap();
        assert_eq!(url.as_str(), "ws://10.0.0.2:8000/socket.io/?EIO=4&transport=websocket");
        let url = socket_endpoint("chat.example.com").unwrap();
        assert_eq!(url.as_str(), "wss://chat.example.com/socket.io/?EIO=4&transport=websocket");
        assert!(socket_endpoint("ftp://example.com").is_err());
    }

    #[tokio::test]
    async fn follow_returns_on_stop_without_further_events() {
        let (tx, rx) = broadcast::channel(8);
        let (stop_tx, stop_rx) = oneshot::channel();
        let mut seen = Vec::new();
        let task = async {
            follow(rx, stop_rx, |e| seen.push(e)).await;
        };
        let driver = async {
            tx.send(InboundEvent::NewMessage).unwrap();
            tokio::task::yield_now().await;
            stop_tx.send(()).unwrap();
        };
        tokio::time::timeout(Duration::from_secs(1), async { tokio::join!(task, driver) })
            .await
            .expect("follow kept waiting after stop");
        assert_eq!(seen, vec![InboundEvent::NewMessage]);
        // The sender is still alive, so only the stop signal ended the loop.
        assert_eq!(tx.receiver_count(), 0);
    }

    #[tokio::test]
    async fn follow_returns_when_stop_sender_is_dropped() {
        let (_tx, rx) = broadcast::channel::<InboundEvent>(8);
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        drop(stop_tx);
        tokio::time::timeout(Duration::from_secs(1), follow(rx, stop_rx, |_| {}))
            .await
            .expect("follow kept waiting after its window went away");
    }
}
