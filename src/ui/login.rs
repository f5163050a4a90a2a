use std::rc::Rc;
use std::sync::Arc;

use adw::prelude::*;
use adw::Application;
use gtk4 as gtk;
use log::{info, warn};

use cipherchat::api::client::ApiClient;
use cipherchat::app::{AppState, Route};
use cipherchat::auth;
use cipherchat::realtime::RealtimeChannel;
use cipherchat::utils::{normalize_url, run_async_to_main};

use crate::ui::{contact_list, toast, Session};

struct Form {
    window: adw::ApplicationWindow,
    overlay: adw::ToastOverlay,
    root: gtk::Box,
    server_entry: gtk::Entry,
}

/// Window chrome shared by the sign-in and sign-up screens.
fn form_window(app: &Application, title: &str, heading: &str) -> Form {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title(title)
        .default_width(420)
        .default_height(320)
        .resizable(false)
        .build();

    let overlay = adw::ToastOverlay::new();
    let root = gtk::Box::new(gtk::Orientation::Vertical, 12);
    root.set_margin_top(24);
    root.set_margin_bottom(24);
    root.set_margin_start(24);
    root.set_margin_end(24);

    let label = gtk::Label::new(Some(heading));
    label.add_css_class("title-2");
    label.set_halign(gtk::Align::Start);
    root.append(&label);

    let server_entry = gtk::Entry::new();
    server_entry.set_placeholder_text(Some("Server URL (e.g. https://chat.example.com)"));
    server_entry.set_hexpand(true);
    server_entry.set_text(&AppState::load().base_url);
    root.append(&server_entry);

    overlay.set_child(Some(&root));
    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    header.set_title_widget(Some(&gtk::Label::new(Some("CipherChat"))));
    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));

    Form { window, overlay, root, server_entry }
}

/// Load the saved state, pointed at the server typed into the form.
fn state_for(server: &str) -> Result<(AppState, ApiClient), String> {
    let url = normalize_url(server);
    if url.is_empty() {
        return Err("Please enter the server URL".into());
    }
    let mut state = AppState::load();
    state.base_url = url;
    let api = ApiClient::new(&state.base_url).map_err(|e| e.to_string())?;
    Ok((state, api))
}

pub fn show_login_window(app: &Application) {
    let form = form_window(app, "CipherChat Login", "Sign in");

    let id_entry = gtk::Entry::new();
    id_entry.set_placeholder_text(Some("Phone or email"));
    let pass_entry = gtk::PasswordEntry::new();
    pass_entry.set_placeholder_text(Some("Password"));
    pass_entry.set_show_peek_icon(true);
    form.root.append(&id_entry);
    form.root.append(&pass_entry);

    let status = gtk::Label::new(None);
    status.add_css_class("dim-label");
    status.set_halign(gtk::Align::Start);
    form.root.append(&status);

    let buttons = gtk::Box::new(gtk::Orientation::Horizontal, 8);
    buttons.set_halign(gtk::Align::End);
    let register_btn = gtk::Button::with_label("Create account");
    register_btn.add_css_class("flat");
    let login_btn = gtk::Button::with_label("Sign in");
    login_btn.add_css_class("suggested-action");
    buttons.append(&register_btn);
    buttons.append(&login_btn);
    form.root.append(&buttons);

    let on_login = {
        let app = app.clone();
        let window = form.window.clone();
        let overlay = form.overlay.clone();
        let server_entry = form.server_entry.clone();
        let id_entry = id_entry.clone();
        let pass_entry = pass_entry.clone();
        let login_btn = login_btn.clone();
        move || {
            let (mut state, mut api) = match state_for(&server_entry.text()) {
                Ok(parts) => parts,
                Err(msg) => return toast(&overlay, &msg),
            };
            let realtime = match RealtimeChannel::new(state.socket_server()) {
                Ok(ch) => Arc::new(ch),
                Err(e) => return toast(&overlay, &e.to_string()),
            };
            let identifier = id_entry.text().to_string();
            let password = pass_entry.text().to_string();

            status.set_label("Signing in…");
            login_btn.set_sensitive(false);

            let channel = realtime.clone();
            let app = app.clone();
            let window = window.clone();
            let overlay = overlay.clone();
            let status = status.clone();
            let login_btn = login_btn.clone();
            run_async_to_main(
                async move {
                    let res = auth::login(&mut api, &mut state, Some(&channel), &identifier, &password).await;
                    (res, api, state)
                },
                move |(res, api, state)| {
                    login_btn.set_sensitive(true);
                    status.set_label("");
                    match res {
                        Ok(Route::ContactList) => {
                            contact_list::show_contact_list(&app, Session::from_parts(state, api, realtime));
                            window.close();
                        }
                        Ok(other) => warn!("unexpected route after login: {other:?}"),
                        Err(e) => toast(&overlay, &e.to_string()),
                    }
                },
            );
        }
    };

    let on_login: Rc<dyn Fn()> = Rc::new(on_login);
    {
        let on_login = on_login.clone();
        login_btn.connect_clicked(move |_| (on_login)());
    }
    {
        let on_login = on_login.clone();
        id_entry.connect_activate(move |_| (on_login)());
    }
    {
        let on_login = on_login.clone();
        pass_entry.connect_activate(move |_| (on_login)());
    }
    {
        let app = app.clone();
        let window = form.window.clone();
        register_btn.connect_clicked(move |_| {
            show_register_window(&app);
            window.close();
        });
    }

    form.window.present();
}

pub fn show_register_window(app: &Application) {
    let form = form_window(app, "CipherChat Sign Up", "Create account");

    let name_entry = gtk::Entry::new();
    name_entry.set_placeholder_text(Some("Name"));
    let id_entry = gtk::Entry::new();
    id_entry.set_placeholder_text(Some("Phone or email"));
    let pass_entry = gtk::PasswordEntry::new();
    pass_entry.set_placeholder_text(Some("Password"));
    form.root.append(&name_entry);
    form.root.append(&id_entry);
    form.root.append(&pass_entry);

    let buttons = gtk::Box::new(gtk::Orientation::Horizontal, 8);
    buttons.set_halign(gtk::Align::End);
    let back_btn = gtk::Button::with_label("Back to sign in");
    back_btn.add_css_class("flat");
    let submit_btn = gtk::Button::with_label("Sign up");
    submit_btn.add_css_class("suggested-action");
    buttons.append(&back_btn);
    buttons.append(&submit_btn);
    form.root.append(&buttons);

    let on_submit = {
        let app = app.clone();
        let window = form.window.clone();
        let overlay = form.overlay.clone();
        let server_entry = form.server_entry.clone();
        let submit_btn = submit_btn.clone();
        move || {
            let (mut state, api) = match state_for(&server_entry.text()) {
                Ok(parts) => parts,
                Err(msg) => return toast(&overlay, &msg),
            };
            let name = name_entry.text().to_string();
            let identifier = id_entry.text().to_string();
            let password = pass_entry.text().to_string();
            submit_btn.set_sensitive(false);

            let app = app.clone();
            let window = window.clone();
            let overlay = overlay.clone();
            let submit_btn = submit_btn.clone();
            run_async_to_main(
                async move { auth::register(&api, &mut state, &name, &identifier, &password).await },
                move |res| {
                    submit_btn.set_sensitive(true);
                    match res {
                        Ok(_) => {
                            info!("account created");
                            show_login_window(&app);
                            window.close();
                        }
                        Err(e) => toast(&overlay, &e.to_string()),
                    }
                },
            );
        }
    };
    submit_btn.connect_clicked(move |_| on_submit());
    {
        let app = app.clone();
        let window = form.window.clone();
        back_btn.connect_clicked(move |_| {
            show_login_window(&app);
            window.close();
        });
    }

    form.window.present();
}
