use std::cell::RefCell;
use std::rc::Rc;

use adw::prelude::*;
use adw::Application;
use chrono::Utc;
use gtk4 as gtk;
use log::warn;

use cipherchat::api::client::ApiClient;
use cipherchat::api::events::OutboundEvent;
use cipherchat::api::models::{Contact, Group};
use cipherchat::chat::group::GroupComposer;
use cipherchat::chat::{GroupChat, PrivateChat};
use cipherchat::utils::{run_async_to_main, spawn_async};
use cipherchat::Result;

use crate::ui::chat_view::{Composer, TranscriptView};
use crate::ui::{follow_events, padded_box, toast, Session};

struct Frame {
    window: adw::ApplicationWindow,
    overlay: adw::ToastOverlay,
    header: adw::HeaderBar,
    subtitle: gtk::Label,
    transcript: TranscriptView,
    composer: Rc<Composer>,
}

fn chat_frame(app: &Application, title: &str) -> Frame {
    let window = adw::ApplicationWindow::builder()
        .application(app)
        .title(title)
        .default_width(560)
        .default_height(680)
        .build();
    let overlay = adw::ToastOverlay::new();

    let header = adw::HeaderBar::new();
    let titles = gtk::Box::new(gtk::Orientation::Vertical, 0);
    let name = gtk::Label::new(Some(title));
    name.add_css_class("heading");
    let subtitle = gtk::Label::new(None);
    subtitle.add_css_class("dim-label");
    subtitle.add_css_class("caption");
    titles.append(&name);
    titles.append(&subtitle);
    header.set_title_widget(Some(&titles));

    let transcript = TranscriptView::new();
    let composer = Composer::new();
    let body = gtk::Box::new(gtk::Orientation::Vertical, 0);
    body.append(&transcript.widget());
    body.append(&composer.widget());
    overlay.set_child(Some(&body));

    let container = gtk::Box::new(gtk::Orientation::Vertical, 0);
    container.append(&header);
    container.append(&overlay);
    window.set_content(Some(&container));

    Frame { window, overlay, header, subtitle, transcript, composer }
}

fn presence_text(online: bool) -> &'static str {
    if online {
        "online"
    } else {
        "offline"
    }
}

pub fn show_private_chat(app: &Application, session: &Session, peer: &str, name: Option<String>) -> Result<()> {
    let (key, zone) = {
        let st = session.state.borrow();
        (st.cipher_key()?, st.zone())
    };
    let me = session.me();
    let chat = Rc::new(RefCell::new(PrivateChat::new(me.clone(), peer, name, key.clone(), zone)));
    let frame = Rc::new(chat_frame(app, chat.borrow().peer_name()));
    frame.subtitle.set_label(presence_text(false));

    let redraw: Rc<dyn Fn()> = {
        let chat = chat.clone();
        let frame = frame.clone();
        let me = me.clone();
        Rc::new(move || {
            let chat = chat.borrow();
            frame.transcript.render(&chat.transcript().by_date(chat.zone()), &me, chat.zone(), None);
            frame.subtitle.set_label(presence_text(chat.is_peer_online()));
            frame.window.set_title(Some(chat.peer_name()));
        })
    };

    {
        let api = session.api.clone();
        let realtime = session.realtime.clone();
        let peer = peer.to_string();
        let me = me.clone();
        let chat = chat.clone();
        let overlay = frame.overlay.clone();
        let redraw = redraw.clone();
        run_async_to_main(
            async move {
                if let Err(e) = realtime.emit(OutboundEvent::RegisterUser(me.clone())).await {
                    warn!("could not register on the realtime channel: {e}");
                }
                let history = PrivateChat::fetch_history(&api, &me, &peer, &key, &zone, Utc::now()).await;
                let name = PrivateChat::fetch_peer_name(&api, &me, &peer).await;
                (history, name)
            },
            move |(history, name)| {
                match history {
                    Ok(history) => chat.borrow_mut().apply_history(history),
                    Err(e) => toast(&overlay, &format!("Failed to load messages: {e}")),
                }
                match name {
                    Ok(name) => chat.borrow_mut().apply_peer_name(name),
                    Err(e) => warn!("could not resolve contact name: {e}"),
                }
                redraw();
            },
        );
    }

    {
        let chat = chat.clone();
        let redraw = redraw.clone();
        follow_events(&session.realtime, &frame.window, move |event| {
            let changed = chat.borrow_mut().handle_event(&event);
            if changed {
                redraw();
            }
        });
    }

    {
        let api = session.api.clone();
        let realtime = session.realtime.clone();
        let chat = chat.clone();
        let overlay = frame.overlay.clone();
        frame.composer.connect_send(&frame.window, move |text, file| {
            let composer = chat.borrow().composer();
            let api = api.clone();
            let realtime = realtime.clone();
            let overlay = overlay.clone();
            run_async_to_main(
                async move { composer.send(&api, &realtime, &text, file.as_ref(), Utc::now()).await },
                move |res| {
                    if let Err(e) = res {
                        toast(&overlay, &format!("Message not sent: {e}"));
                    }
                },
            );
        });
    }

    frame.window.present();
    Ok(())
}

pub fn show_group_chat(app: &Application, session: &Session, group: Group) -> Result<()> {
    let (key, zone) = {
        let st = session.state.borrow();
        (st.cipher_key()?, st.zone())
    };
    let me = session.me();
    let id = group.id.clone();
    let chat = Rc::new(RefCell::new(GroupChat::new(me.clone(), group, key.clone(), zone)));
    let frame = Rc::new(chat_frame(app, &chat.borrow().group().name));

    let add_btn = gtk::Button::with_label("Add Member");
    frame.header.pack_end(&add_btn);

    let redraw: Rc<dyn Fn()> = {
        let chat = chat.clone();
        let frame = frame.clone();
        let me = me.clone();
        Rc::new(move || {
            let chat = chat.borrow();
            let names = |who: &str| chat.display_name(who).to_string();
            let names: &dyn Fn(&str) -> String = &names;
            frame
                .transcript
                .render(&chat.transcript().by_date(chat.zone()), &me, chat.zone(), Some(names));
            let members: Vec<&str> = chat.members().iter().map(|m| chat.display_name(m)).collect();
            frame.subtitle.set_label(&members.join(", "));
        })
    };

    {
        let api = session.api.clone();
        let realtime = session.realtime.clone();
        let me = me.clone();
        let id = id.clone();
        let chat = chat.clone();
        let overlay = frame.overlay.clone();
        let redraw = redraw.clone();
        run_async_to_main(
            async move {
                if let Err(e) = realtime.emit(OutboundEvent::JoinGroup(id.clone())).await {
                    warn!("could not join group {id}: {e}");
                }
                let history = GroupChat::fetch_history(&api, &id, &key, &zone, Utc::now()).await;
                let members = GroupChat::fetch_members(&api, &id).await;
                let contacts = api.contacts(&me).await;
                (history, members, contacts)
            },
            move |(history, members, contacts)| {
                {
                    let mut chat = chat.borrow_mut();
                    match history {
                        Ok(history) => chat.apply_history(history),
                        Err(e) => toast(&overlay, &format!("Failed to load messages: {e}")),
                    }
                    match members {
                        Ok(members) => chat.apply_members(members),
                        Err(e) => warn!("could not fetch members: {e}"),
                    }
                    match contacts {
                        Ok(contacts) => chat.apply_contacts(contacts),
                        Err(e) => warn!("could not fetch contacts: {e}"),
                    }
                }
                redraw();
            },
        );
    }

    {
        let chat = chat.clone();
        let redraw = redraw.clone();
        follow_events(&session.realtime, &frame.window, move |event| {
            let changed = chat.borrow_mut().handle_event(&event);
            if changed {
                redraw();
            }
        });
    }

    {
        let api = session.api.clone();
        let realtime = session.realtime.clone();
        let chat = chat.clone();
        let overlay = frame.overlay.clone();
        let redraw = redraw.clone();
        frame.composer.connect_send(&frame.window, move |text, file| {
            let composer = chat.borrow().composer();
            let api = api.clone();
            let realtime = realtime.clone();
            let overlay = overlay.clone();
            let chat = chat.clone();
            let redraw = redraw.clone();
            run_async_to_main(
                {
                    let api = api.clone();
                    async move { composer.dispatch(&api, &realtime, &text, file.as_ref(), Utc::now()).await }
                },
                move |res| match res {
                    Ok(Some(outgoing)) => {
                        chat.borrow_mut().insert_local(&outgoing);
                        redraw();
                        let wire = outgoing.wire;
                        spawn_async(async move { GroupComposer::persist(&api, &wire).await });
                    }
                    Ok(None) => {}
                    Err(e) => toast(&overlay, &format!("Message not sent: {e}")),
                },
            );
        });
    }

    {
        let window = frame.window.clone();
        let overlay = frame.overlay.clone();
        let api = session.api.clone();
        let chat = chat.clone();
        let redraw = redraw.clone();
        add_btn.connect_clicked(move |_| {
            let candidates: Vec<Contact> = chat.borrow().candidate_members().into_iter().cloned().collect();
            show_add_member_dialog(&window, &overlay, &api, &chat, candidates, redraw.clone());
        });
    }

    frame.window.present();
    Ok(())
}

fn show_add_member_dialog(
    window: &adw::ApplicationWindow,
    overlay: &adw::ToastOverlay,
    api: &ApiClient,
    chat: &Rc<RefCell<GroupChat>>,
    candidates: Vec<Contact>,
    redraw: Rc<dyn Fn()>,
) {
    let dialog = gtk::Dialog::builder()
        .title("Add Member")
        .transient_for(window)
        .modal(true)
        .build();
    let content = padded_box(12);
    let info = gtk::Label::new(Some("Choose a contact to add:"));
    info.set_halign(gtk::Align::Start);
    content.append(&info);

    let labels: Vec<String> = candidates.iter().map(|c| format!("{} ({})", c.name, c.contact)).collect();
    let label_refs: Vec<&str> = labels.iter().map(String::as_str).collect();
    let dropdown = gtk::DropDown::from_strings(&label_refs);
    dropdown.set_hexpand(true);
    content.append(&dropdown);

    dialog.set_child(Some(&content));
    let _ = dialog.add_button("Cancel", gtk::ResponseType::Cancel);
    let ok_btn = dialog.add_button("Add", gtk::ResponseType::Ok);
    ok_btn.add_css_class("suggested-action");
    dialog.set_default_response(gtk::ResponseType::Ok);

    let overlay = overlay.clone();
    let api = api.clone();
    let chat = chat.clone();
    dialog.connect_response(move |dlg, resp| {
        if resp == gtk::ResponseType::Ok {
            let member = candidates
                .get(dropdown.selected() as usize)
                .map(|c| c.contact.clone())
                .unwrap_or_default();
            let id = chat.borrow().group().id.clone();
            let api = api.clone();
            let overlay = overlay.clone();
            let chat = chat.clone();
            let redraw = redraw.clone();
            run_async_to_main(
                async move {
                    GroupChat::submit_member(&api, &id, &member).await?;
                    GroupChat::fetch_members(&api, &id).await
                },
                move |res| match res {
                    Ok(members) => {
                        chat.borrow_mut().apply_members(members);
                        redraw();
                        toast(&overlay, "Member added");
                    }
                    Err(e) => toast(&overlay, &e.to_string()),
                },
            );
        }
        dlg.close();
    });
    dialog.present();
}
