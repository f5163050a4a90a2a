use std::collections::HashSet;

use log::{debug, warn};

use crate::api::client::ApiClient;
use crate::api::events::InboundEvent;
use crate::api::models::{Contact, Group, Identifier};
use crate::error::{ClientError, Result};
use crate::storage::Cache;
use crate::transcript::unknown_senders;

/// What one round of fetches returned.
#[derive(Debug, Clone, Default)]
pub struct ContactSnapshot {
    pub contacts: Vec<Contact>,
    pub groups: Vec<Group>,
    pub unknown_senders: Vec<Identifier>,
}

/// Follow-up work an inbound event asks of the contact list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Followup {
    None,
    RefreshUnknownSenders,
}

/// State behind the contact list screen.
#[derive(Debug, Clone)]
pub struct ContactList {
    me: Identifier,
    contacts: Vec<Contact>,
    groups: Vec<Group>,
    unknown: Vec<Identifier>,
    online: HashSet<Identifier>,
    filter: String,
}

impl ContactList {
    pub fn new(me: impl Into<Identifier>) -> Self {
        Self {
            me: me.into(),
            contacts: Vec::new(),
            groups: Vec::new(),
            unknown: Vec::new(),
            online: HashSet::new(),
            filter: String::new(),
        }
    }

    pub fn me(&self) -> &str {
        &self.me
    }

    pub fn contacts(&self) -> &[Contact] {
        &self.contacts
    }

    pub fn groups(&self) -> &[Group] {
        &self.groups
    }

    pub fn unknown_senders(&self) -> &[Identifier] {
        &self.unknown
    }

    pub fn is_online(&self, who: &str) -> bool {
        self.online.contains(who)
    }

    /// Contacts whose name contains the search text, ignoring case.
    pub fn visible_contacts(&self) -> Vec<&Contact> {
        let needle = self.filter.to_lowercase();
        self.contacts
            .iter()
            .filter(|c| c.name.to_lowercase().contains(&needle))
            .collect()
    }

    pub fn search(&mut self, text: &str) -> Vec<&Contact> {
        self.filter = text.to_string();
        self.visible_contacts()
    }

    /// Show the last cached lists while the network catches up.
    pub fn load_cached(&mut self, cache: &Cache) -> Result<()> {
        self.contacts = cache.contacts(&self.me)?;
        self.groups = cache.groups(&self.me)?;
        Ok(())
    }

    pub fn store_in(&self, cache: &mut Cache) -> Result<()> {
        cache.replace_contacts(&self.me, &self.contacts)?;
        cache.replace_groups(&self.me, &self.groups)
    }

    /// Fetch contacts, groups and unknown senders. Only the contact fetch is
    /// required; the others fall back to empty lists.
    pub async fn fetch(api: &ApiClient, me: &str) -> Result<ContactSnapshot> {
        let contacts = api.contacts(me).await?;
        let groups = api.groups(me).await.unwrap_or_else(|e| {
            warn!("could not fetch groups: {e}");
            Vec::new()
        });
        let unknown = match api.conversations().await {
            Ok(buckets) => unknown_senders(&buckets, me, &contacts),
            Err(e) => {
                warn!("could not fetch conversations: {e}");
                Vec::new()
            }
        };
        Ok(ContactSnapshot { contacts, groups, unknown_senders: unknown })
    }

    /// Re-derive unknown senders only (after a `newMessage` ping).
    pub async fn fetch_unknown_senders(api: &ApiClient, me: &str) -> Result<Vec<Identifier>> {
        let buckets = api.conversations().await?;
        let contacts = api.contacts(me).await?;
        Ok(unknown_senders(&buckets, me, &contacts))
    }

    pub fn apply(&mut self, snapshot: ContactSnapshot) {
        debug!(
            "contact list: {} contacts, {} groups, {} unknown",
            snapshot.contacts.len(),
            snapshot.groups.len(),
            snapshot.unknown_senders.len()
        );
        self.contacts = snapshot.contacts;
        self.groups = snapshot.groups;
        self.unknown = snapshot.unknown_senders;
    }

    pub fn apply_unknown_senders(&mut self, unknown: Vec<Identifier>) {
        self.unknown = unknown;
    }

    pub async fn refresh(&mut self, api: &ApiClient) -> Result<()> {
        let snapshot = Self::fetch(api, &self.me).await?;
        self.apply(snapshot);
        Ok(())
    }

    pub fn handle_event(&mut self, event: &InboundEvent) -> Followup {
        match event {
            InboundEvent::OnlineUsers(users) => {
                self.online = users.iter().cloned().collect();
                Followup::None
            }
            InboundEvent::NewMessage => Followup::RefreshUnknownSenders,
            _ => Followup::None,
        }
    }

    /// Check a new contact before sending it; returns the trimmed pair.
    pub fn validate_contact(&self, contact: &str, name: &str) -> Result<(String, String)> {
        let contact = contact.trim();
        let name = name.trim();
        if contact.is_empty() || name.is_empty() {
            return Err(ClientError::validation("Both name and contact are required."));
        }
        if self.contacts.iter().any(|c| c.contact == contact) {
            return Err(ClientError::validation("Contact already exists."));
        }
        Ok((contact.to_string(), name.to_string()))
    }

    pub async fn submit_contact(api: &ApiClient, me: &str, contact: &str, name: &str) -> Result<()> {
        let resp = api.add_contact(me, contact, name).await?;
        if resp.success || resp.message.as_deref() == Some("Already added") {
            Ok(())
        } else {
            Err(ClientError::validation(resp.error.unwrap_or_else(|| "Something went wrong".into())))
        }
    }

    pub async fn add_contact(&mut self, api: &ApiClient, contact: &str, name: &str) -> Result<()> {
        let (contact, name) = self.validate_contact(contact, name)?;
        Self::submit_contact(api, &self.me, &contact, &name).await?;
        self.refresh(api).await
    }

    pub async fn delete_contact(&mut self, api: &ApiClient, contact: &str) -> Result<()> {
        api.delete_contact(&self.me, contact).await?;
        self.refresh(api).await
    }

    /// Drop the conversation with someone who is not a contact.
    pub async fn delete_conversation(&mut self, api: &ApiClient, other: &str) -> Result<()> {
        api.delete_conversation(&self.me, other).await?;
        let unknown = Self::fetch_unknown_senders(api, &self.me).await?;
        self.apply_unknown_senders(unknown);
        Ok(())
    }

    pub fn validate_group_name(name: &str) -> Result<String> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::validation("Enter group name"));
        }
        Ok(name.to_string())
    }

    pub async fn submit_group(api: &ApiClient, me: &str, name: &str) -> Result<()> {
        let resp = api.create_group(name, me).await?;
        if resp.success {
            Ok(())
        } else {
            Err(ClientError::validation(resp.message.unwrap_or_else(|| "Failed to create group".into())))
        }
    }

    pub async fn create_group(&mut self, api: &ApiClient, name: &str) -> Result<()> {
        let name = Self::validate_group_name(name)?;
        Self::submit_group(api, &self.me, &name).await?;
        self.groups = api.groups(&self.me).await?;
        Ok(())
    }
}
