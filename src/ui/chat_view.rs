use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use chrono::FixedOffset;
use gtk4 as gtk;
use gtk4::prelude::*;
use log::warn;

use cipherchat::api::models::{Attachment, Message};
use cipherchat::transcript::{parse_timestamp, DateBucket};

/// Scrollable message list with a header per calendar day.
pub struct TranscriptView {
    scroller: gtk::ScrolledWindow,
    messages_box: gtk::Box,
}

impl TranscriptView {
    pub fn new() -> Self {
        let scroller = gtk::ScrolledWindow::builder()
            .vexpand(true)
            .hexpand(true)
            .build();
        let messages_box = gtk::Box::new(gtk::Orientation::Vertical, 6);
        messages_box.set_margin_start(8);
        messages_box.set_margin_end(8);
        scroller.set_child(Some(&messages_box));
        Self { scroller, messages_box }
    }

    pub fn widget(&self) -> gtk::Widget {
        self.scroller.clone().upcast()
    }

    /// Redraw everything. `sender_name` is only consulted for messages that
    /// are not ours; pass `None` to hide sender names.
    pub fn render(
        &self,
        buckets: &[DateBucket],
        me: &str,
        zone: &FixedOffset,
        sender_name: Option<&dyn Fn(&str) -> String>,
    ) {
        while let Some(child) = self.messages_box.first_child() {
            self.messages_box.remove(&child);
        }
        for bucket in buckets {
            let header = gtk::Label::new(Some(&bucket.label));
            header.add_css_class("dim-label");
            header.add_css_class("caption-heading");
            header.set_margin_top(8);
            self.messages_box.append(&header);
            for msg in &bucket.messages {
                let mine = msg.from == me;
                let name = match sender_name {
                    Some(f) if !mine => Some(f(&msg.from)),
                    _ => None,
                };
                self.messages_box.append(&bubble(msg, mine, name.as_deref(), zone));
            }
        }
        let adj = self.scroller.vadjustment();
        glib::idle_add_local_once(move || adj.set_value(adj.upper()));
    }
}

fn bubble(msg: &Message, mine: bool, sender: Option<&str>, zone: &FixedOffset) -> gtk::Box {
    let b = gtk::Box::new(gtk::Orientation::Vertical, 2);
    b.set_halign(if mine { gtk::Align::End } else { gtk::Align::Start });
    b.add_css_class("card");
    b.set_margin_top(2);
    b.set_margin_bottom(2);

    if let Some(name) = sender {
        let lbl = gtk::Label::new(Some(name));
        lbl.add_css_class("caption-heading");
        lbl.set_halign(gtk::Align::Start);
        lbl.set_margin_start(8);
        lbl.set_margin_top(4);
        b.append(&lbl);
    }
    if !msg.body().is_empty() {
        let text = gtk::Label::new(Some(msg.body()));
        text.set_wrap(true);
        text.set_xalign(0.0);
        text.set_selectable(true);
        text.set_margin_start(8);
        text.set_margin_end(8);
        text.set_margin_top(4);
        b.append(&text);
    }
    if let Some(url) = &msg.attachment_url {
        let link = gtk::LinkButton::with_label(url, "Attachment");
        link.set_halign(gtk::Align::Start);
        b.append(&link);
    }
    let time = parse_timestamp(&msg.timestamp, zone)
        .map(|ts| ts.with_timezone(zone).format("%H:%M").to_string())
        .unwrap_or_default();
    let stamp = gtk::Label::new(Some(&time));
    stamp.add_css_class("dim-label");
    stamp.add_css_class("caption");
    stamp.set_halign(gtk::Align::End);
    stamp.set_margin_end(8);
    stamp.set_margin_bottom(4);
    b.append(&stamp);
    b
}

/// Input row: attach button, text entry, send button.
pub struct Composer {
    root: gtk::Box,
    entry: gtk::Entry,
    send_btn: gtk::Button,
    attach_btn: gtk::Button,
    pending_label: gtk::Label,
    pending: RefCell<Option<Attachment>>,
    chooser: RefCell<Option<gtk::FileChooserNative>>,
}

impl Composer {
    pub fn new() -> Rc<Self> {
        let root = gtk::Box::new(gtk::Orientation::Vertical, 4);
        root.set_margin_top(8);
        root.set_margin_bottom(8);
        root.set_margin_start(8);
        root.set_margin_end(8);

        let pending_label = gtk::Label::new(None);
        pending_label.add_css_class("dim-label");
        pending_label.set_halign(gtk::Align::Start);
        pending_label.set_visible(false);
        root.append(&pending_label);

        let input_row = gtk::Box::new(gtk::Orientation::Horizontal, 6);
        let attach_btn = gtk::Button::from_icon_name("mail-attachment-symbolic");
        attach_btn.set_tooltip_text(Some("Attach a file"));
        let entry = gtk::Entry::new();
        entry.set_hexpand(true);
        entry.set_placeholder_text(Some("Type a message…"));
        let send_btn = gtk::Button::with_label("Send");
        send_btn.add_css_class("suggested-action");
        input_row.append(&attach_btn);
        input_row.append(&entry);
        input_row.append(&send_btn);
        root.append(&input_row);

        Rc::new(Self {
            root,
            entry,
            send_btn,
            attach_btn,
            pending_label,
            pending: RefCell::new(None),
            chooser: RefCell::new(None),
        })
    }

    pub fn widget(&self) -> gtk::Widget {
        self.root.clone().upcast()
    }

    fn set_pending(&self, file: Option<Attachment>) {
        match &file {
            Some(f) => {
                self.pending_label.set_label(&format!("Attached: {}", f.file_name));
                self.pending_label.set_visible(true);
            }
            None => self.pending_label.set_visible(false),
        }
        *self.pending.borrow_mut() = file;
    }

    /// Wire the buttons. `on_send` gets the raw text and the picked file; the
    /// input is cleared afterwards. Nothing fires for an empty input.
    pub fn connect_send<W, F>(self: &Rc<Self>, parent: &W, on_send: F)
    where
        W: IsA<gtk::Window>,
        F: Fn(String, Option<Attachment>) + 'static,
    {
        let send: Rc<dyn Fn()> = {
            let this = self.clone();
            Rc::new(move || {
                let text = this.entry.text().to_string();
                let file = this.pending.borrow_mut().take();
                if text.trim().is_empty() && file.is_none() {
                    return;
                }
                this.entry.set_text("");
                this.set_pending(None);
                on_send(text, file);
            })
        };
        {
            let send = send.clone();
            self.send_btn.connect_clicked(move |_| (send)());
        }
        {
            let send = send.clone();
            self.entry.connect_activate(move |_| (send)());
        }

        let this = self.clone();
        let parent = parent.clone().upcast::<gtk::Window>();
        self.attach_btn.connect_clicked(move |_| this.pick_file(&parent));
    }

    fn pick_file(self: &Rc<Self>, parent: &gtk::Window) {
        let chooser = gtk::FileChooserNative::new(
            Some("Attach a file"),
            Some(parent),
            gtk::FileChooserAction::Open,
            Some("Attach"),
            Some("Cancel"),
        );
        let this = self.clone();
        chooser.connect_response(move |dlg, resp| {
            if resp == gtk::ResponseType::Accept {
                if let Some(path) = dlg.file().and_then(|f| f.path()) {
                    match read_attachment(&path) {
                        Ok(file) => this.set_pending(Some(file)),
                        Err(e) => warn!("could not read {}: {e}", path.display()),
                    }
                }
            }
            this.chooser.borrow_mut().take();
        });
        chooser.show();
        *self.chooser.borrow_mut() = Some(chooser);
    }
}

fn read_attachment(path: &Path) -> std::io::Result<Attachment> {
    let bytes = std::fs::read(path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "upload".to_string());
    Ok(Attachment { mime: mime_for(path).map(str::to_string), file_name, bytes })
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    Some(match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "mp4" => "video/mp4",
        _ => return None,
    })
}
