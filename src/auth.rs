//! Sign-in and sign-up.

use log::{info, warn};

use crate::api::client::ApiClient;
use crate::api::events::OutboundEvent;
use crate::api::models::User;
use crate::app::{AppState, Route};
use crate::error::{ClientError, Result};
use crate::realtime::RealtimeChannel;

/// Log in, remember the session and announce the user on the realtime
/// channel. Sends the caller to the contact list.
pub async fn login(
    api: &mut ApiClient,
    state: &mut AppState,
    realtime: Option<&RealtimeChannel>,
    identifier: &str,
    password: &str,
) -> Result<Route> {
    let identifier = identifier.trim();
    let password = password.trim();
    if identifier.is_empty() || password.is_empty() {
        return Err(ClientError::validation("Please enter phone/email and password"));
    }

    let resp = api.login(identifier, password).await?;
    api.set_token(Some(resp.token.clone()));
    state.sign_in(resp.token, User { name: resp.name, identifier: identifier.to_string() });
    state.save()?;
    info!("signed in as {identifier}");

    if let Some(channel) = realtime {
        if let Err(e) = channel.emit(OutboundEvent::RegisterUser(identifier.to_string())).await {
            warn!("could not register on the realtime channel: {e}");
        }
    }
    Ok(Route::ContactList)
}

/// Create an account and remember it. Sends the caller back to the login
/// screen.
pub async fn register(
    api: &ApiClient,
    state: &mut AppState,
    name: &str,
    identifier: &str,
    password: &str,
) -> Result<Route> {
    if name.trim().is_empty() || identifier.trim().is_empty() || password.is_empty() {
        return Err(ClientError::validation("Please fill all fields"));
    }

    let resp = api.register(name, identifier, password).await?;
    state.sign_in(resp.token, User { name: name.to_string(), identifier: identifier.to_string() });
    state.save()?;
    info!("registered {identifier}");
    Ok(Route::Login)
}

/// Forget the session and drop the realtime connection.
pub async fn logout(
    api: &mut ApiClient,
    state: &mut AppState,
    realtime: Option<&RealtimeChannel>,
) -> Result<Route> {
    api.set_token(None);
    state.sign_out();
    state.save()?;
    if let Some(channel) = realtime {
        if let Err(e) = channel.close().await {
            warn!("realtime close failed: {e}");
        }
    }
    Ok(Route::Login)
}
