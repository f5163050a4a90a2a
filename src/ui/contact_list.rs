use std::cell::RefCell;
use std::rc::Rc;

use adw::prelude::*;
use adw::Application;
use gtk4 as gtk;
use log::warn;

use cipherchat::api::events::OutboundEvent;
use cipherchat::api::models::{Contact, Group};
use cipherchat::auth;
use cipherchat::chat::contacts::Followup;
use cipherchat::chat::ContactList;
use cipherchat::storage::Cache;
use cipherchat::utils::{initials, run_async_to_main};

use crate::ui::{chat_window, clear_list, follow_events, login, padded_box, toast, Session};

struct ContactListView {
    app: Application,
    window: adw::ApplicationWindow,
    overlay: adw::ToastOverlay,
    session: Session,
    model: RefCell<ContactList>,
    cache: RefCell<Option<Cache>>,
    contacts_list: gtk::ListBox,
    groups_list: gtk::ListBox,
    unknown_list: gtk::ListBox,
    unknown_heading: gtk::Label,
    shown_contacts: RefCell<Vec<Contact>>,
    shown_groups: RefCell<Vec<Group>>,
    shown_unknown: RefCell<Vec<String>>,
}

fn section(title: &str) -> (gtk::Label, gtk::ListBox) {
    let label = gtk::Label::new(Some(title));
    label.add_css_class("heading");
    label.set_halign(gtk::Align::Start);
    label.set_margin_top(12);
    let list = gtk::ListBox::new();
    list.add_css_class("boxed-list");
    list.set_selection_mode(gtk::SelectionMode::None);
    (label, list)
}

fn row_with(title: &str, subtitle: Option<&str>) -> (gtk::ListBoxRow, gtk::Box) {
    let row = gtk::ListBoxRow::new();
    let hbox = gtk::Box::new(gtk::Orientation::Horizontal, 8);
    hbox.set_margin_top(8);
    hbox.set_margin_bottom(8);
    hbox.set_margin_start(8);
    hbox.set_margin_end(8);

    let avatar = gtk::Label::new(Some(&initials(title)));
    avatar.add_css_class("title-4");
    avatar.set_width_chars(3);
    hbox.append(&avatar);

    let text = gtk::Box::new(gtk::Orientation::Vertical, 0);
    text.set_hexpand(true);
    let name = gtk::Label::new(Some(title));
    name.set_halign(gtk::Align::Start);
    text.append(&name);
    if let Some(sub) = subtitle {
        let sub_lbl = gtk::Label::new(Some(sub));
        sub_lbl.add_css_class("dim-label");
        sub_lbl.add_css_class("caption");
        sub_lbl.set_halign(gtk::Align::Start);
        text.append(&sub_lbl);
    }
    hbox.append(&text);
    row.set_child(Some(&hbox));
    (row, hbox)
}

fn flat_icon(icon: &str, tooltip: &str) -> gtk::Button {
    let btn = gtk::Button::from_icon_name(icon);
    btn.add_css_class("flat");
    btn.set_tooltip_text(Some(tooltip));
    btn
}

impl ContactListView {
    fn me(&self) -> String {
        self.model.borrow().me().to_string()
    }

    fn render(self: &Rc<Self>) {
        let model = self.model.borrow();

        clear_list(&self.contacts_list);
        let contacts: Vec<Contact> = model.visible_contacts().into_iter().cloned().collect();
        for c in &contacts {
            let status = if model.is_online(&c.contact) { "online" } else { c.contact.as_str() };
            let (row, hbox) = row_with(&c.name, Some(status));
            let remove = flat_icon("user-trash-symbolic", "Remove contact");
            {
                let this = self.clone();
                let who = c.contact.clone();
                remove.connect_clicked(move |_| this.delete_contact(who.clone()));
            }
            hbox.append(&remove);
            self.contacts_list.append(&row);
        }
        *self.shown_contacts.borrow_mut() = contacts;

        clear_list(&self.groups_list);
        let groups = model.groups().to_vec();
        for g in &groups {
            let admin = format!("admin: {}", g.admin);
            let (row, _) = row_with(&g.name, Some(&admin));
            self.groups_list.append(&row);
        }
        *self.shown_groups.borrow_mut() = groups;

        clear_list(&self.unknown_list);
        let unknown = model.unknown_senders().to_vec();
        self.unknown_heading.set_visible(!unknown.is_empty());
        self.unknown_list.set_visible(!unknown.is_empty());
        for who in &unknown {
            let (row, hbox) = row_with(who, Some("Not in your contacts"));
            let add = flat_icon("contact-new-symbolic", "Add to contacts");
            {
                let this = self.clone();
                let who = who.clone();
                add.connect_clicked(move |_| this.show_add_contact_dialog(Some(&who)));
            }
            let delete = flat_icon("user-trash-symbolic", "Delete conversation");
            {
                let this = self.clone();
                let who = who.clone();
                delete.connect_clicked(move |_| this.delete_conversation(who.clone()));
            }
            hbox.append(&add);
            hbox.append(&delete);
            self.unknown_list.append(&row);
        }
        *self.shown_unknown.borrow_mut() = unknown;
    }

    fn store_snapshot(&self) {
        if let Some(cache) = self.cache.borrow_mut().as_mut() {
            if let Err(e) = self.model.borrow().store_in(cache) {
                warn!("could not cache contact list: {e}");
            }
        }
    }

    fn reload(self: &Rc<Self>) {
        let api = self.session.api.clone();
        let me = self.me();
        let this = self.clone();
        run_async_to_main(
            async move { ContactList::fetch(&api, &me).await },
            move |res| match res {
                Ok(snapshot) => {
                    this.model.borrow_mut().apply(snapshot);
                    this.store_snapshot();
                    this.render();
                }
                Err(e) => toast(&this.overlay, &format!("Failed to load contacts: {e}")),
            },
        );
    }

    fn reload_unknown(self: &Rc<Self>) {
        let api = self.session.api.clone();
        let me = self.me();
        let this = self.clone();
        run_async_to_main(
            async move { ContactList::fetch_unknown_senders(&api, &me).await },
            move |res| match res {
                Ok(unknown) => {
                    this.model.borrow_mut().apply_unknown_senders(unknown);
                    this.render();
                }
                Err(e) => warn!("could not refresh unknown senders: {e}"),
            },
        );
    }

    fn delete_contact(self: &Rc<Self>, who: String) {
        let api = self.session.api.clone();
        let me = self.me();
        let this = self.clone();
        run_async_to_main(
            async move { api.delete_contact(&me, &who).await },
            move |res| match res {
                Ok(_) => this.reload(),
                Err(e) => toast(&this.overlay, &e.to_string()),
            },
        );
    }

    fn delete_conversation(self: &Rc<Self>, who: String) {
        let api = self.session.api.clone();
        let me = self.me();
        let this = self.clone();
        run_async_to_main(
            async move {
                api.delete_conversation(&me, &who).await?;
                ContactList::fetch_unknown_senders(&api, &me).await
            },
            move |res| match res {
                Ok(unknown) => {
                    this.model.borrow_mut().apply_unknown_senders(unknown);
                    this.render();
                }
                Err(e) => toast(&this.overlay, &e.to_string()),
            },
        );
    }

    fn open_private(&self, peer: &str, name: Option<String>) {
        if let Err(e) = chat_window::show_private_chat(&self.app, &self.session, peer, name) {
            toast(&self.overlay, &e.to_string());
        }
    }

    fn open_group(&self, group: Group) {
        if let Err(e) = chat_window::show_group_chat(&self.app, &self.session, group) {
            toast(&self.overlay, &e.to_string());
        }
    }

    fn show_add_contact_dialog(self: &Rc<Self>, prefill: Option<&str>) {
        let dialog = gtk::Dialog::builder()
            .title("Add Contact")
            .transient_for(&self.window)
            .modal(true)
            .build();
        let content = padded_box(12);
        let name_entry = gtk::Entry::new();
        name_entry.set_placeholder_text(Some("Name"));
        let contact_entry = gtk::Entry::new();
        contact_entry.set_placeholder_text(Some("Phone or email"));
        if let Some(who) = prefill {
            contact_entry.set_text(who);
        }
        content.append(&name_entry);
        content.append(&contact_entry);
        dialog.set_child(Some(&content));
        let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
        let ok_btn = dialog.add_button("Add", gtk::ResponseType::Ok);
        ok_btn.add_css_class("suggested-action");
        dialog.set_default_response(gtk::ResponseType::Ok);

        let this = self.clone();
        dialog.connect_response(move |dlg, resp| {
            if resp == gtk::ResponseType::Ok {
                let checked = this
                    .model
                    .borrow()
                    .validate_contact(&contact_entry.text(), &name_entry.text());
                let (contact, name) = match checked {
                    Ok(pair) => pair,
                    Err(e) => return toast(&this.overlay, &e.to_string()),
                };
                let api = this.session.api.clone();
                let me = this.me();
                let this = this.clone();
                run_async_to_main(
                    async move { ContactList::submit_contact(&api, &me, &contact, &name).await },
                    move |res| match res {
                        Ok(()) => {
                            toast(&this.overlay, "Contact added");
                            this.reload();
                        }
                        Err(e) => toast(&this.overlay, &e.to_string()),
                    },
                );
            }
            dlg.close();
        });
        dialog.present();
    }

    fn show_create_group_dialog(self: &Rc<Self>) {
        let dialog = gtk::Dialog::builder()
            .title("Create Group")
            .transient_for(&self.window)
            .modal(true)
            .build();
        let content = padded_box(12);
        let name_entry = gtk::Entry::new();
        name_entry.set_placeholder_text(Some("Group name"));
        content.append(&name_entry);
        dialog.set_child(Some(&content));
        let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
        let ok_btn = dialog.add_button("Create", gtk::ResponseType::Ok);
        ok_btn.add_css_class("suggested-action");
        dialog.set_default_response(gtk::ResponseType::Ok);

        let this = self.clone();
        dialog.connect_response(move |dlg, resp| {
            if resp == gtk::ResponseType::Ok {
                let name = match ContactList::validate_group_name(&name_entry.text()) {
                    Ok(name) => name,
                    Err(e) => return toast(&this.overlay, &e.to_string()),
                };
                let api = this.session.api.clone();
                let me = this.me();
                let this = this.clone();
                run_async_to_main(
                    async move { ContactList::submit_group(&api, &me, &name).await },
                    move |res| match res {
                        Ok(()) => this.reload(),
                        Err(e) => toast(&this.overlay, &e.to_string()),
                    },
                );
            }
            dlg.close();
        });
        dialog.present();
    }

    fn logout(self: &Rc<Self>) {
        let mut api = self.session.api.clone();
        let mut state = self.session.state.borrow().clone();
        let realtime = self.session.realtime.clone();
        let this = self.clone();
        run_async_to_main(
            async move { auth::logout(&mut api, &mut state, Some(&realtime)).await.map(|_| state) },
            move |res| match res {
                Ok(state) => {
                    *this.session.state.borrow_mut() = state;
                    login::show_login_window(&this.app);
                    this.window.close();
                }
                Err(e) => toast(&this.overlay, &format!("Failed to sign out: {e}")),
            },
        );
    }
}

pub fn show_contact_list(app: &Application, session: Session) {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title("CipherChat")
        .default_width(460)
        .default_height(720)
        .build();
    let overlay = adw::ToastOverlay::new();

    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let header = adw::HeaderBar::new();
    let user_name = session
        .state
        .borrow()
        .user
        .as_ref()
        .map(|u| u.name.clone())
        .unwrap_or_else(|| "CipherChat".to_string());
    header.set_title_widget(Some(&gtk::Label::new(Some(&user_name))));
    let add_btn = flat_icon("contact-new-symbolic", "Add contact");
    let group_btn = flat_icon("system-users-symbolic", "Create group");
    let logout_btn = gtk::Button::with_label("Log Out");
    header.pack_start(&add_btn);
    header.pack_start(&group_btn);
    header.pack_end(&logout_btn);
    container.append(&header);

    let root = padded_box(6);
    let search = gtk::SearchEntry::new();
    search.set_placeholder_text(Some("Search contacts"));
    root.append(&search);

    let (contacts_heading, contacts_list) = section("Contacts");
    let (groups_heading, groups_list) = section("Groups");
    let (unknown_heading, unknown_list) = section("Message requests");
    root.append(&contacts_heading);
    root.append(&contacts_list);
    root.append(&groups_heading);
    root.append(&groups_list);
    root.append(&unknown_heading);
    root.append(&unknown_list);

    let scroller = gtk::ScrolledWindow::builder().vexpand(true).build();
    scroller.set_child(Some(&root));
    overlay.set_child(Some(&scroller));
    container.append(&overlay);
    window.set_content(Some(&container));

    let me = session.me();
    let mut model = ContactList::new(me.clone());
    let cache = match Cache::open_default() {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("contact cache unavailable: {e}");
            None
        }
    };
    if let Some(cache) = &cache {
        if let Err(e) = model.load_cached(cache) {
            warn!("could not read cached contacts: {e}");
        }
    }

    let view = Rc::new(ContactListView {
        app: app.clone(),
        window: window.clone(),
        overlay,
        session,
        model: RefCell::new(model),
        cache: RefCell::new(cache),
        contacts_list,
        groups_list,
        unknown_list,
        unknown_heading,
        shown_contacts: RefCell::new(Vec::new()),
        shown_groups: RefCell::new(Vec::new()),
        shown_unknown: RefCell::new(Vec::new()),
    });
    view.render();
    view.reload();

    {
        let realtime = view.session.realtime.clone();
        run_async_to_main(
            async move { realtime.emit(OutboundEvent::RegisterUser(me)).await },
            |res| {
                if let Err(e) = res {
                    warn!("could not register on the realtime channel: {e}");
                }
            },
        );
    }

    {
        let this = view.clone();
        follow_events(&view.session.realtime, &window, move |event| {
            let followup = this.model.borrow_mut().handle_event(&event);
            match followup {
                Followup::RefreshUnknownSenders => this.reload_unknown(),
                Followup::None => this.render(),
            }
        });
    }

    {
        let this = view.clone();
        search.connect_search_changed(move |entry| {
            this.model.borrow_mut().search(&entry.text());
            this.render();
        });
    }
    {
        let this = view.clone();
        view.contacts_list.connect_row_activated(move |_, row| {
            let picked = this.shown_contacts.borrow().get(row.index() as usize).cloned();
            if let Some(c) = picked {
                this.open_private(&c.contact, Some(c.name));
            }
        });
    }
    {
        let this = view.clone();
        view.groups_list.connect_row_activated(move |_, row| {
            let picked = this.shown_groups.borrow().get(row.index() as usize).cloned();
            if let Some(g) = picked {
                this.open_group(g);
            }
        });
    }
    {
        let this = view.clone();
        view.unknown_list.connect_row_activated(move |_, row| {
            let picked = this.shown_unknown.borrow().get(row.index() as usize).cloned();
            if let Some(who) = picked {
                this.open_private(&who, None);
            }
        });
    }
    {
        let this = view.clone();
        add_btn.connect_clicked(move |_| this.show_add_contact_dialog(None));
    }
    {
        let this = view.clone();
        group_btn.connect_clicked(move |_| this.show_create_group_dialog());
    }
    {
        let this = view.clone();
        logout_btn.connect_clicked(move |_| this.logout());
    }

    window.present();
}
