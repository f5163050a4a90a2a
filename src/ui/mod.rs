pub mod chat_view;
pub mod chat_window;
pub mod contact_list;
pub mod login;

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use adw::prelude::*;
use adw::Application;
use gtk4 as gtk;
use log::error;
use tokio::sync::oneshot;

use cipherchat::api::client::ApiClient;
use cipherchat::api::events::InboundEvent;
use cipherchat::app::AppState;
use cipherchat::realtime::{follow, RealtimeChannel};
use cipherchat::Result;

/// What every signed-in window shares: the persisted state, a REST client
/// carrying the token and the realtime channel.
#[derive(Clone)]
pub struct Session {
    pub state: Rc<RefCell<AppState>>,
    pub api: ApiClient,
    pub realtime: Arc<RealtimeChannel>,
}

impl Session {
    pub fn new(state: AppState) -> Result<Self> {
        let mut api = ApiClient::new(&state.base_url)?;
        api.set_token(state.token.clone());
        let realtime = Arc::new(RealtimeChannel::new(state.socket_server())?);
        Ok(Self::from_parts(state, api, realtime))
    }

    pub fn from_parts(state: AppState, api: ApiClient, realtime: Arc<RealtimeChannel>) -> Self {
        Self { state: Rc::new(RefCell::new(state)), api, realtime }
    }

    /// Identifier of the signed-in user.
    pub fn me(&self) -> String {
        self.state
            .borrow()
            .user
            .as_ref()
            .map(|u| u.identifier.clone())
            .unwrap_or_default()
    }
}

pub fn build_ui(app: &Application) {
    let state = AppState::load();
    if state.is_signed_in() && !state.base_url.is_empty() {
        match Session::new(state) {
            Ok(session) => contact_list::show_contact_list(app, session),
            Err(e) => {
                error!("stored session unusable: {e}");
                login::show_login_window(app);
            }
        }
    } else {
        login::show_login_window(app);
    }
}

pub fn toast(overlay: &adw::ToastOverlay, text: &str) {
    overlay.add_toast(adw::Toast::new(text));
}

/// Feed realtime events to `on_event` on the main loop until `window` closes.
pub fn follow_events<W, F>(realtime: &RealtimeChannel, window: &W, on_event: F)
where
    W: IsA<gtk::Window>,
    F: FnMut(InboundEvent) + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel();
    let stop_tx = Cell::new(Some(stop_tx));
    window.connect_close_request(move |_| {
        if let Some(tx) = stop_tx.take() {
            let _ = tx.send(());
        }
        glib::Propagation::Proceed
    });
    glib::MainContext::default().spawn_local(follow(realtime.subscribe(), stop_rx, on_event));
}

/// Vertical box with the usual 12px margins.
pub fn padded_box(spacing: i32) -> gtk::Box {
    let b = gtk::Box::new(gtk::Orientation::Vertical, spacing);
    b.set_margin_top(12);
    b.set_margin_bottom(12);
    b.set_margin_start(12);
    b.set_margin_end(12);
    b
}

pub fn clear_list(list: &gtk::ListBox) {
    while let Some(child) = list.first_child() {
        list.remove(&child);
    }
}
