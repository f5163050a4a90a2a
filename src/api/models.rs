use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Primary key of a user: a phone number or an email address.
pub type Identifier = String;

/// Group id as the backend hands it out: sometimes a number, sometimes a
/// numeric string.
#[derive(Debug, Clone, Eq)]
pub struct GroupId(String);

impl GroupId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into().trim().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn numeric(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl PartialEq for GroupId {
    fn eq(&self, other: &Self) -> bool {
        match (self.numeric(), other.numeric()) {
            (Some(a), Some(b)) => a == b,
            _ => self.0 == other.0,
        }
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<i64> for GroupId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<&str> for GroupId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl Serialize for GroupId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.numeric() {
            Some(n) => serializer.serialize_i64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

impl<'de> Deserialize<'de> for GroupId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(i64),
            Float(f64),
            Text(String),
        }
        Ok(match Raw::deserialize(deserializer)? {
            Raw::Int(n) => GroupId::from(n),
            Raw::Float(f) => GroupId(f.to_string()),
            Raw::Text(s) => GroupId::new(s),
        })
    }
}

/// A chat message as stored by the backend and carried over the realtime
/// channel. `text` holds ciphertext on the wire and plaintext once a
/// controller has decoded it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    #[serde(alias = "sender")]
    pub from: Identifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<Identifier>,
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment_url: Option<String>,
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Whether there is anything to render: some text or an attachment.
    pub fn has_content(&self) -> bool {
        self.text.as_deref().is_some_and(|t| !t.is_empty()) || self.attachment_url.is_some()
    }

    pub fn body(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }
}

/// Backend grouping of private messages by (sender, receiver).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationBucket {
    #[serde(default)]
    pub sender: Identifier,
    #[serde(default)]
    pub receiver: Identifier,
    #[serde(default)]
    pub conversation: Vec<Message>,
}

impl ConversationBucket {
    pub fn involves(&self, who: &str) -> bool {
        self.sender == who || self.receiver == who
    }

    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.sender == a && self.receiver == b) || (self.sender == b && self.receiver == a)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Identifier>,
    pub contact: Identifier,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    pub id: GroupId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub admin: Identifier,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupInfo {
    #[serde(default)]
    pub members: Vec<Option<Identifier>>,
}

impl GroupInfo {
    /// Members with null and blank entries dropped.
    pub fn member_list(&self) -> Vec<Identifier> {
        self.members
            .iter()
            .flatten()
            .filter(|m| !m.trim().is_empty())
            .cloned()
            .collect()
    }
}

/// The signed-in user as remembered between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct User {
    pub name: String,
    pub identifier: Identifier,
}

#[derive(Debug, Serialize)]
pub struct LoginRequest<'a> {
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct RegisterRequest<'a> {
    pub name: &'a str,
    pub identifier: &'a str,
    pub password: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegisterResponse {
    pub token: String,
}

/// Generic `{success, message, error}` answer of the mutation endpoints.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadResponse {
    pub url: String,
}

/// A file picked by the user, ready for `/upload`.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub file_name: String,
    pub mime: Option<String>,
    pub bytes: Vec<u8>,
}
