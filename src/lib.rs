//! Encrypted chat client for a REST + Socket.IO backend.
//!
//! The library holds everything but the widgets: the REST client, the
//! realtime channel, message encryption and transcript assembly, per-screen
//! controllers, the persisted session and a small snapshot cache. The GTK
//! front-end lives behind the `gui` feature.

pub mod api;
pub mod app;
pub mod auth;
pub mod chat;
pub mod codec;
pub mod error;
pub mod realtime;
pub mod storage;
pub mod transcript;
pub mod utils;

pub use error::{ClientError, Result};
