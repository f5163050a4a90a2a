use log::{debug, warn};
use reqwest::multipart::{Form, Part};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use url::Url;

use crate::api::models::{
    ActionResponse, Attachment, Contact, ConversationBucket, Group, GroupId, GroupInfo,
    LoginRequest, LoginResponse, Message, RegisterRequest, RegisterResponse, UploadResponse,
};
use crate::error::{ClientError, Result};
use crate::utils::normalize_url;

/// REST client for the chat backend.
#[derive(Debug, Clone)]
pub struct ApiClient {
    pub http: HttpClient,
    base: Url,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_http(HttpClient::new(), base_url)
    }

    pub fn with_http(http: HttpClient, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(&normalize_url(base_url))?;
        if base.cannot_be_a_base() {
            return Err(ClientError::Config(format!("{base_url} cannot be used as a base url")));
        }
        // Joined paths are appended, so keep exactly one trailing slash.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self { http, base, token: None })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token;
    }

    /// `base` + percent-encoded path segments.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| ClientError::Config("base url cannot take a path".into()))?;
            path.pop_if_empty();
            path.extend(segments);
        }
        Ok(url)
    }

    fn with_auth(&self, mut req: RequestBuilder) -> RequestBuilder {
        if let Some(t) = &self.token {
            req = req.header("Authorization", format!("Bearer {}", t));
        }
        req
    }

    async fn get<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<T> {
        let url = self.endpoint(segments)?;
        debug!("GET {url}");
        let resp = self.with_auth(self.http.get(url)).send().await?;
        read_json(resp).await
    }

    async fn post<B: Serialize + ?Sized, T: DeserializeOwned>(&self, segments: &[&str], body: &B) -> Result<T> {
        let url = self.endpoint(segments)?;
        debug!("POST {url}");
        let resp = self.with_auth(self.http.post(url)).json(body).send().await?;
        read_json(resp).await
    }

    /// POST to a mutation endpoint whose body may be empty or loosely shaped.
    async fn action<B: Serialize + ?Sized>(&self, segments: &[&str], body: &B) -> Result<ActionResponse> {
        let url = self.endpoint(segments)?;
        debug!("POST {url}");
        let resp = self.with_auth(self.http.post(url)).json(body).send().await?;
        let status = resp.status();
        let text = resp.text().await?;
        if !status.is_success() {
            return Err(status_error(status.as_u16(), &text));
        }
        Ok(serde_json::from_str(&text).unwrap_or(ActionResponse { success: true, ..Default::default() }))
    }

    async fn get_list<T: DeserializeOwned>(&self, segments: &[&str]) -> Result<Vec<T>> {
        let value: Value = self.get(segments).await?;
        Ok(list_of(value))
    }

    // Auth

    pub async fn login(&self, identifier: &str, password: &str) -> Result<LoginResponse> {
        self.post(&["api", "auth", "login"], &LoginRequest { identifier, password }).await
    }

    pub async fn register(&self, name: &str, identifier: &str, password: &str) -> Result<RegisterResponse> {
        self.post(&["api", "auth", "register"], &RegisterRequest { name, identifier, password }).await
    }

    // Contacts

    pub async fn contacts(&self, owner: &str) -> Result<Vec<Contact>> {
        self.get_list(&["contacts", owner]).await
    }

    pub async fn add_contact(&self, owner: &str, contact: &str, name: &str) -> Result<ActionResponse> {
        self.action(&["add-contact"], &json!({ "owner": owner, "contact": contact, "name": name })).await
    }

    pub async fn delete_contact(&self, owner: &str, contact: &str) -> Result<ActionResponse> {
        self.action(&["delete-contact"], &json!({ "owner": owner, "contact": contact })).await
    }

    // Private messages

    pub async fn conversations(&self) -> Result<Vec<ConversationBucket>> {
        self.get_list(&["messages"]).await
    }

    pub async fn delete_conversation(&self, user1: &str, user2: &str) -> Result<ActionResponse> {
        self.action(&["delete-conversation"], &json!({ "user1": user1, "user2": user2 })).await
    }

    // Groups

    pub async fn groups(&self, user: &str) -> Result<Vec<Group>> {
        self.get_list(&["groups", user]).await
    }

    pub async fn create_group(&self, name: &str, admin: &str) -> Result<ActionResponse> {
        self.action(&["create-group"], &json!({ "name": name, "admin": admin })).await
    }

    pub async fn group_info(&self, id: &GroupId) -> Result<GroupInfo> {
        let value: Value = self.get(&["group-info", id.as_str()]).await?;
        Ok(serde_json::from_value(value).unwrap_or_default())
    }

    pub async fn add_group_member(&self, group_id: &GroupId, member: &str) -> Result<ActionResponse> {
        self.action(&["add-group-member"], &json!({ "groupId": group_id, "member": member })).await
    }

    pub async fn group_messages(&self, id: &GroupId) -> Result<Vec<Message>> {
        self.get_list(&["group-messages", id.as_str()]).await
    }

    pub async fn post_group_message(&self, msg: &Message) -> Result<ActionResponse> {
        self.action(&["group-messages"], msg).await
    }

    // Files

    /// Upload an attachment and return the URL the backend stored it under.
    pub async fn upload(&self, file: &Attachment) -> Result<String> {
        let mut part = Part::bytes(file.bytes.clone()).file_name(file.file_name.clone());
        if let Some(mime) = &file.mime {
            part = part.mime_str(mime)?;
        }
        let url = self.endpoint(&["upload"])?;
        debug!("POST {url} ({} bytes)", file.bytes.len());
        let resp = self
            .with_auth(self.http.post(url))
            .multipart(Form::new().part("file", part))
            .send()
            .await?;
        let uploaded: UploadResponse = read_json(resp).await?;
        Ok(uploaded.url)
    }
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    let text = resp.text().await?;
    if !status.is_success() {
        return Err(status_error(status.as_u16(), &text));
    }
    serde_json::from_str(&text).map_err(|e| ClientError::Decode(e.to_string()))
}

fn status_error(status: u16, body: &str) -> ClientError {
    let message = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| format!("HTTP {status}"));
    ClientError::Status { status, message }
}

/// Items of a JSON array; anything else is treated as an empty list and
/// malformed items are skipped.
fn list_of<T: DeserializeOwned>(value: Value) -> Vec<T> {
    let Value::Array(items) = value else {
        warn!("expected a list, got {}", kind_of(&value));
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value(item) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("skipping malformed item: {e}");
                None
            }
        })
        .collect()
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoints_encode_identifiers() {
        let api = ApiClient::new("http://localhost:8000").unwrap();
        assert_eq!(
            api.endpoint(&["contacts", "a b@example.com"]).unwrap().as_str(),
            "http://localhost:8000/contacts/a%20b@example.com"
        );
        let api = ApiClient::new("http://localhost:8000/chat/").unwrap();
        assert_eq!(
            api.endpoint(&["api", "auth", "login"]).unwrap().as_str(),
            "http://localhost:8000/chat/api/auth/login"
        );
    }

    #[test]
    fn status_errors_prefer_backend_text() {
        match status_error(401, r#"{"error":"Invalid credentials"}"#) {
            ClientError::Status { status, message } => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid credentials");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(status_error(500, "oops").to_string(), "HTTP 500: HTTP 500");
    }

    #[test]
    fn non_arrays_become_empty_lists() {
        let none: Vec<Contact> = list_of(json!({"error": "boom"}));
        assert!(none.is_empty());
        let some: Vec<Contact> = list_of(json!([{"contact": "a", "name": "A"}, {"bogus": true}]));
        assert_eq!(some.len(), 1);
    }
}
