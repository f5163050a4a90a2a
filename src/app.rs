use std::fs;
use std::path::{Path, PathBuf};

use chrono::FixedOffset;
use directories::ProjectDirs;
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::api::models::User;
use crate::codec::CipherKey;
use crate::error::{ClientError, Result};
use crate::transcript::{display_zone, DEFAULT_UTC_OFFSET_MINUTES};

/// Environment variable that overrides the configured passphrase.
pub const PASSPHRASE_ENV: &str = "CIPHERCHAT_PASSPHRASE";

/// Screens a controller may send the user to next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Login,
    ContactList,
}

fn default_offset() -> i32 {
    DEFAULT_UTC_OFFSET_MINUTES
}

/// Client configuration plus the signed-in session, persisted as TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppState {
    #[serde(default)]
    pub base_url: String,
    /// Realtime server, when it differs from `base_url`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cipher_passphrase: Option<String>,
    #[serde(default = "default_offset")]
    pub utc_offset_minutes: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// File this state was loaded from and is persisted back to.
    #[serde(skip)]
    path: Option<PathBuf>,
}

impl Default for AppState {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            socket_url: None,
            cipher_passphrase: None,
            utc_offset_minutes: DEFAULT_UTC_OFFSET_MINUTES,
            token: None,
            user: None,
            path: None,
        }
    }
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "CipherChat")?;
        Some(proj.config_dir().join("cipherchat.toml"))
    }

    /// Load from the default location. A missing or unreadable file yields
    /// defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::new(),
        }
    }

    pub fn load_from(path: &Path) -> Self {
        let mut state = match fs::read_to_string(path) {
            Ok(text) => toml::from_str::<AppState>(&text).unwrap_or_else(|e| {
                warn!("ignoring unreadable config {}: {e}", path.display());
                Self::new()
            }),
            Err(e) => {
                debug!("no config at {}: {e}", path.display());
                Self::new()
            }
        };
        state.path = Some(path.to_path_buf());
        state
    }

    /// Write back to the file this state came from, or the default location.
    pub fn save(&self) -> Result<()> {
        let path = self
            .path
            .clone()
            .or_else(Self::config_path)
            .ok_or_else(|| ClientError::Config("no config directory".into()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self).map_err(|e| ClientError::Config(e.to_string()))?;
        fs::write(path, toml)?;
        Ok(())
    }

    pub fn is_signed_in(&self) -> bool {
        self.token.is_some() && self.user.is_some()
    }

    pub fn sign_in(&mut self, token: String, user: User) {
        self.token = Some(token);
        self.user = Some(user);
    }

    pub fn sign_out(&mut self) {
        self.token = None;
        self.user = None;
    }

    /// Realtime server address, falling back to the REST base URL.
    pub fn socket_server(&self) -> &str {
        self.socket_url
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(&self.base_url)
    }

    /// Message passphrase from the environment or the config file.
    pub fn cipher_key(&self) -> Result<CipherKey> {
        std::env::var(PASSPHRASE_ENV)
            .ok()
            .or_else(|| self.cipher_passphrase.clone())
            .filter(|p| !p.is_empty())
            .map(CipherKey::new)
            .ok_or_else(|| {
                ClientError::Config(format!(
                    "no message passphrase; set cipher_passphrase or {PASSPHRASE_ENV}"
                ))
            })
    }

    pub fn zone(&self) -> FixedOffset {
        display_zone(self.utc_offset_minutes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cipherchat.toml");
        let mut st = AppState::new();
        st.base_url = "http://localhost:8000".into();
        st.cipher_passphrase = Some("pass".into());
        st.sign_in("t".into(), User { name: "Alice".into(), identifier: "alice@example.com".into() });
        st.save_to(&path).unwrap();

        let mut back = AppState::load_from(&path);
        assert_eq!(back.base_url, "http://localhost:8000");
        assert_eq!(back.token.as_deref(), Some("t"));
        assert_eq!(back.user.as_ref().map(|u| u.name.as_str()), Some("Alice"));
        assert_eq!(back.utc_offset_minutes, DEFAULT_UTC_OFFSET_MINUTES);
        assert!(back.is_signed_in());

        back.sign_out();
        back.save().unwrap();
        assert!(!AppState::load_from(&path).is_signed_in());
    }

    #[test]
    fn tolerates_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = AppState::load_from(&dir.path().join("nope.toml"));
        assert!(missing.base_url.is_empty());
        let bad = dir.path().join("bad.toml");
        fs::write(&bad, "base_url = [").unwrap();
        assert!(!AppState::load_from(&bad).is_signed_in());
    }

    #[test]
    fn socket_server_falls_back_to_base() {
        let mut st = AppState::new();
        st.base_url = "http://a".into();
        assert_eq!(st.socket_server(), "http://a");
        st.socket_url = Some("http://b".into());
        assert_eq!(st.socket_server(), "http://b");
    }

    #[test]
    fn sign_out_clears_session() {
        let mut st = AppState::new();
        st.sign_in("t".into(), User::default());
        st.sign_out();
        assert!(!st.is_signed_in());
    }
}
