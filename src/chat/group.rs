use chrono::{DateTime, FixedOffset, Utc};
use log::{debug, error, warn};

use crate::api::client::ApiClient;
use crate::api::events::{InboundEvent, OutboundEvent};
use crate::api::models::{Attachment, Contact, Group, GroupId, Identifier, Message};
use crate::codec::{self, CipherKey};
use crate::error::{ClientError, Result};
use crate::realtime::RealtimeChannel;
use crate::transcript::{decode_message, filter_recent, recent_window, Transcript};

/// Timestamp layout group messages are stamped with, in the display zone.
pub const GROUP_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// State behind the group chat screen.
#[derive(Debug, Clone)]
pub struct GroupChat {
    me: Identifier,
    group: Group,
    members: Vec<Identifier>,
    contacts: Vec<Contact>,
    transcript: Transcript,
    key: CipherKey,
    zone: FixedOffset,
}

impl GroupChat {
    pub fn new(me: impl Into<Identifier>, group: Group, key: CipherKey, zone: FixedOffset) -> Self {
        Self {
            me: me.into(),
            group,
            members: Vec::new(),
            contacts: Vec::new(),
            transcript: Transcript::new(),
            key,
            zone,
        }
    }

    pub fn group(&self) -> &Group {
        &self.group
    }

    pub fn members(&self) -> &[Identifier] {
        &self.members
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn zone(&self) -> &FixedOffset {
        &self.zone
    }

    /// Join the group room and load history, members and contacts.
    pub async fn open(&mut self, api: &ApiClient, realtime: &RealtimeChannel, now: DateTime<Utc>) -> Result<()> {
        if let Err(e) = realtime.emit(OutboundEvent::JoinGroup(self.group.id.clone())).await {
            warn!("could not join group {}: {e}", self.group.id);
        }
        let history = Self::fetch_history(api, &self.group.id, &self.key, &self.zone, now).await?;
        self.apply_history(history);
        match Self::fetch_members(api, &self.group.id).await {
            Ok(members) => self.apply_members(members),
            Err(e) => warn!("could not fetch members: {e}"),
        }
        match api.contacts(&self.me).await {
            Ok(contacts) => self.apply_contacts(contacts),
            Err(e) => warn!("could not fetch contacts: {e}"),
        }
        Ok(())
    }

    pub async fn fetch_history(
        api: &ApiClient,
        id: &GroupId,
        key: &CipherKey,
        zone: &FixedOffset,
        now: DateTime<Utc>,
    ) -> Result<Vec<Message>> {
        let rows = api.group_messages(id).await?;
        Ok(filter_recent(rows, now, recent_window(), zone)
            .into_iter()
            .map(|m| decode_message(m, key))
            .collect())
    }

    pub fn apply_history(&mut self, history: Vec<Message>) {
        debug!("loaded {} messages for group {}", history.len(), self.group.id);
        self.transcript.replace(history);
    }

    pub async fn fetch_members(api: &ApiClient, id: &GroupId) -> Result<Vec<Identifier>> {
        Ok(api.group_info(id).await?.member_list())
    }

    pub fn apply_members(&mut self, members: Vec<Identifier>) {
        self.members = members;
    }

    pub fn apply_contacts(&mut self, contacts: Vec<Contact>) {
        self.contacts = contacts;
    }

    /// Contact name for an identifier, or the identifier itself.
    pub fn display_name<'a>(&'a self, who: &'a str) -> &'a str {
        self.contacts
            .iter()
            .find(|c| c.contact == who)
            .map(|c| c.name.as_str())
            .unwrap_or(who)
    }

    /// Contacts that could still be added to the group.
    pub fn candidate_members(&self) -> Vec<&Contact> {
        self.contacts
            .iter()
            .filter(|c| !c.contact.is_empty() && !self.members.contains(&c.contact))
            .collect()
    }

    /// Apply a realtime event. Returns whether the view needs a redraw.
    pub fn handle_event(&mut self, event: &InboundEvent) -> bool {
        match event {
            InboundEvent::GroupMessage(msg) if msg.group_id.as_ref() == Some(&self.group.id) => {
                self.transcript.insert(decode_message(msg.clone(), &self.key))
            }
            _ => false,
        }
    }

    pub async fn submit_member(api: &ApiClient, id: &GroupId, member: &str) -> Result<()> {
        let member = member.trim();
        if member.is_empty() {
            return Err(ClientError::validation("Please select a member."));
        }
        let resp = api.add_group_member(id, member).await?;
        if resp.success {
            Ok(())
        } else {
            Err(ClientError::validation(resp.message.unwrap_or_else(|| "Failed to add member".into())))
        }
    }

    pub async fn add_member(&mut self, api: &ApiClient, member: &str) -> Result<()> {
        Self::submit_member(api, &self.group.id, member).await?;
        let members = Self::fetch_members(api, &self.group.id).await?;
        self.apply_members(members);
        Ok(())
    }

    pub fn composer(&self) -> GroupComposer {
        GroupComposer {
            me: self.me.clone(),
            group_id: self.group.id.clone(),
            key: self.key.clone(),
            zone: self.zone,
        }
    }

    /// Show a message we just sent without waiting for the echo. Two sends
    /// within the same second share a timestamp, so this never de-duplicates.
    pub fn insert_local(&mut self, outgoing: &Outgoing) {
        self.transcript.push(outgoing.local.clone());
    }

    /// Emit, show immediately, then persist. A failed persist is only logged.
    pub async fn send(
        &mut self,
        api: &ApiClient,
        realtime: &RealtimeChannel,
        text: &str,
        attachment: Option<&Attachment>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let composer = self.composer();
        let Some(outgoing) = composer.dispatch(api, realtime, text, attachment, now).await? else {
            return Ok(false);
        };
        self.insert_local(&outgoing);
        GroupComposer::persist(api, &outgoing.wire).await;
        Ok(true)
    }
}

/// A group message on its way out: the encrypted form that goes over the
/// wire and the plaintext copy shown locally.
#[derive(Debug, Clone)]
pub struct Outgoing {
    pub wire: Message,
    pub local: Message,
}

/// Everything needed to send into one group, detached from the view state.
#[derive(Debug, Clone)]
pub struct GroupComposer {
    me: Identifier,
    group_id: GroupId,
    key: CipherKey,
    zone: FixedOffset,
}

impl GroupComposer {
    pub fn compose(&self, text: &str, attachment_url: Option<String>, now: DateTime<Utc>) -> Option<Outgoing> {
        if text.trim().is_empty() && attachment_url.is_none() {
            return None;
        }
        let wire = Message {
            from: self.me.clone(),
            to: None,
            group_id: Some(self.group_id.clone()),
            text: Some(codec::encrypt(text, &self.key)),
            attachment_url,
            timestamp: now.with_timezone(&self.zone).format(GROUP_TIMESTAMP_FORMAT).to_string(),
        };
        let local = Message { text: Some(text.to_string()), ..wire.clone() };
        Some(Outgoing { wire, local })
    }

    /// Upload the attachment (if any) and emit the encrypted message.
    pub async fn dispatch(
        &self,
        api: &ApiClient,
        realtime: &RealtimeChannel,
        text: &str,
        attachment: Option<&Attachment>,
        now: DateTime<Utc>,
    ) -> Result<Option<Outgoing>> {
        if text.trim().is_empty() && attachment.is_none() {
            return Ok(None);
        }
        let url = match attachment {
            Some(file) => Some(api.upload(file).await?),
            None => None,
        };
        let Some(outgoing) = self.compose(text, url, now) else {
            return Ok(None);
        };
        realtime.emit(OutboundEvent::GroupMessage(outgoing.wire.clone())).await?;
        Ok(Some(outgoing))
    }

    /// Store the message on the backend.
    pub async fn persist(api: &ApiClient, wire: &Message) {
        if let Err(e) = api.post_group_message(wire).await {
            error!("failed to save group message: {e}");
        }
    }
}
