use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use log::{debug, warn};

use crate::api::client::ApiClient;
use crate::api::events::{InboundEvent, OutboundEvent};
use crate::api::models::{Attachment, Identifier, Message};
use crate::codec::{self, CipherKey};
use crate::error::Result;
use crate::realtime::RealtimeChannel;
use crate::transcript::{decode_message, flatten_private, Transcript};

/// One-to-one conversation with `peer`.
#[derive(Debug, Clone)]
pub struct PrivateChat {
    me: Identifier,
    peer: Identifier,
    peer_name: String,
    online: bool,
    transcript: Transcript,
    key: CipherKey,
    zone: FixedOffset,
}

impl PrivateChat {
    pub fn new(me: impl Into<Identifier>, peer: impl Into<Identifier>, name: Option<String>, key: CipherKey, zone: FixedOffset) -> Self {
        let peer = peer.into();
        Self {
            me: me.into(),
            peer_name: name.filter(|n| !n.is_empty()).unwrap_or_else(|| peer.clone()),
            peer,
            online: false,
            transcript: Transcript::new(),
            key,
            zone,
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn peer_name(&self) -> &str {
        &self.peer_name
    }

    pub fn is_peer_online(&self) -> bool {
        self.online
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn zone(&self) -> &FixedOffset {
        &self.zone
    }

    /// Register on the realtime channel and load history and the contact name.
    pub async fn open(&mut self, api: &ApiClient, realtime: &RealtimeChannel, now: DateTime<Utc>) -> Result<()> {
        if let Err(e) = realtime.emit(OutboundEvent::RegisterUser(self.me.clone())).await {
            warn!("could not register on the realtime channel: {e}");
        }
        let history = Self::fetch_history(api, &self.me, &self.peer, &self.key, &self.zone, now).await?;
        self.apply_history(history);
        match Self::fetch_peer_name(api, &self.me, &self.peer).await {
            Ok(name) => self.apply_peer_name(name),
            Err(e) => warn!("could not resolve contact name: {e}"),
        }
        Ok(())
    }

    pub async fn fetch_history(
        api: &ApiClient,
        me: &str,
        peer: &str,
        key: &CipherKey,
        zone: &FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let buckets = api.conversations().await?;
        Ok(flatten_private(&buckets, me, peer, now, zone, key))
    }

    pub fn apply_history(&mut self, history: Vec<Message>) {
        debug!("loaded {} messages with {}", history.len(), self.peer);
        self.transcript.replace(history);
    }

    pub async fn fetch_peer_name(api: &ApiClient, me: &str, peer: &str) -> Result<Option<String>> {
        let contacts = api.contacts(me).await?;
        Ok(contacts
            .into_iter()
            .find(|c| c.contact == peer)
            .map(|c| c.name)
            .filter(|n| !n.is_empty()))
    }

    pub fn apply_peer_name(&mut self, name: Option<String>) {
        if let Some(name) = name {
            self.peer_name = name;
        }
    }

    fn is_ours(&self, msg: &Message) -> bool {
        let to = msg.to.as_deref().unwrap_or_default();
        (msg.from == self.peer && to == self.me) || (msg.from == self.me && to == self.peer)
    }

    /// Apply a realtime event. Returns whether the view needs a redraw.
    pub fn handle_event(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::PrivateMessage(msg) if self.is_ours(msg) => {
                self.transcript.insert(decode_message(msg.clone(), &self.key))
            }
            InboundEvent::OnlineUsers(users) => {
                let online = users.iter().any(|u| *u == self.peer);
                let changed = online != self.online;
                self.online = online;
                changed
            }
            _ => false,
        }
    }

    pub fn composer(&self) -> PrivateComposer {
        PrivateComposer { me: self.me.clone(), peer: self.peer.clone(), key: self.key.clone() }
    }

    /// Send a message. The local copy arrives with the server's echo.
    pub async fn send(
        &self,
        api: &ApiClient,
        realtime: &RealtimeChannel,
        text: &str,
        attachment: Option<&Attachment>,
    ) -> Result<Option<Message>> {
        self.composer().send(api, realtime, text, attachment, Utc::now()).await
    }
}

/// Everything needed to send into one private conversation, detached from
/// the view state so it can run on another task.
#[derive(Debug, Clone)]
pub struct PrivateComposer {
    me: Identifier,
    peer: Identifier,
    key: CipherKey,
}

impl PrivateComposer {
    /// Wire form of a message: encrypted trimmed text, ISO-8601 timestamp.
    /// `None` when there is nothing to send.
    pub fn compose(&self, text: &str, attachment_url: Option<String>, now: DateTime<Utc>) -> Option<Message> {
        let text = text.trim();
        if text.is_empty() && attachment_url.is_none() {
            return None;
        }
        Some(Message {
            from: self.me.clone(),
            to: Some(self.peer.clone()),
            group_id: None,
            text: Some(codec::encrypt(text, &self.key)),
            attachment_url,
            timestamp: now.to_rfc3339_opts(SecondsFormat::Millis, true),
        })
    }

    /// Upload the attachment (if any), then emit the encrypted message.
    /// Returns the wire message, or `None` if there was nothing to send.
    pub async fn send(
        &self,
        api: &ApiClient,
        realtime: &RealtimeChannel,
        text: &str,
        attachment: Option<&Attachment>,
        now: DateTime<Utc>,
    ) -> Result<Option<Message>> {
        if text.trim().is_empty() && attachment.is_none() {
            return Ok(None);
        }
        let url = match attachment {
            Some(file) => Some(api.upload(file).await?),
            None => None,
        };
        let Some(msg) = self.compose(text, url, now) else {
            return Ok(None);
        };
        realtime.emit(OutboundEvent::PrivateMessage(msg.clone())).await?;
        Ok(Some(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{display_zone, DEFAULT_UTC_OFFSET_MINUTES};

    fn chat() -> PrivateChat {
        PrivateChat::new("me", "peer", None, CipherKey::new("k"), display_zone(DEFAULT_UTC_OFFSET_MINUTES))
    }

    fn wire(from: &str, to: &str, text: &str, ts: &str) -> Message {
        Message {
            from: from.into(),
            to: Some(to.into()),
            group_id: None,
            text: Some(codec::encrypt(text, &CipherKey::new("k"))),
            attachment_url: None,
            timestamp: ts.into(),
        }
    }

    #[test]
    fn name_defaults_to_identifier() {
        assert_eq!(chat().peer_name(), "peer");
        let mut c = chat();
        c.apply_peer_name(Some("Peer Person".into()));
        assert_eq!(c.peer_name(), "Peer Person");
    }

    #[test]
    fn applies_only_relevant_messages_once() {
        let mut c = chat();
        let incoming = InboundEvent::PrivateMessage(wire("peer", "me", "hi", "2025-03-19T10:00:00.000Z"));
        assert!(c.handle_event(&incoming));
        assert!(!c.handle_event(&incoming));
        assert!(!c.handle_event(&InboundEvent::PrivateMessage(wire("stranger", "me", "x", "t"))));
        assert!(!c.handle_event(&InboundEvent::PrivateMessage(wire("me", "other", "x", "t"))));
        assert_eq!(c.transcript().len(), 1);
        assert_eq!(c.transcript().messages()[0].body(), "hi");
    }

    #[test]
    fn tracks_peer_presence() {
        let mut c = chat();
        assert!(c.handle_event(&InboundEvent::OnlineUsers(vec!["peer".into()])));
        assert!(c.is_peer_online());
        assert!(c.handle_event(&InboundEvent::OnlineUsers(vec![])));
        assert!(!c.is_peer_online());
    }

    #[test]
    fn composes_encrypted_messages() {
        let composer = chat().composer();
        let now = DateTime::parse_from_rfc3339("2025-03-19T10:00:00Z").unwrap().with_timezone(&Utc);
        assert!(composer.compose("   ", None, now).is_none());
        let msg = composer.compose("  hello ", None, now).unwrap();
        assert_eq!(msg.timestamp, "2025-03-19T10:00:00.000Z");
        assert_eq!(codec::decrypt(msg.text.as_deref().unwrap(), &CipherKey::new("k")), "hello");
        let file_only = composer.compose("", Some("http://f/x.png".into()), now).unwrap();
        assert!(file_only.has_content());
    }
}
