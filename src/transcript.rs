//! Client-side reconstruction of conversations from backend records.
//!
//! Everything here is a pure function of its inputs; "now" and the display
//! zone are passed in so views and tests agree on the same clock.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, Offset, TimeZone, Utc};
use log::trace;

use crate::api::models::{Contact, ConversationBucket, Identifier, Message};
use crate::codec::{self, CipherKey};

/// How far back a freshly opened chat reaches.
pub const RECENT_WINDOW_DAYS: i64 = 15;

/// Offset the group chat writes its naive timestamps in (UTC+05:30).
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 330;

pub const INVALID_DATE_LABEL: &str = "Invalid Date";

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y, %H:%M:%S",
];

pub fn recent_window() -> Duration {
    Duration::days(RECENT_WINDOW_DAYS)
}

/// Fixed display zone from a minute offset. Out-of-range offsets fall back
/// to UTC.
pub fn display_zone(offset_minutes: i32) -> FixedOffset {
    FixedOffset::east_opt(offset_minutes.saturating_mul(60)).unwrap_or(Utc.fix())
}

/// Parse a stored timestamp. Offsets are honoured when present; naive
/// timestamps are read in `zone`.
pub fn parse_timestamp(raw: &str, zone: &FixedOffset) -> Option<DateTime<FixedOffset>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt);
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return zone.from_local_datetime(&naive).single();
        }
    }
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return zone.from_local_datetime(&day.and_hms_opt(0, 0, 0)?).single();
    }
    trace!("unparseable timestamp {raw:?}");
    None
}

/// Calendar label used for date headers, e.g. `5 Mar 2025`.
pub fn date_label(date: NaiveDate) -> String {
    date.format("%-d %b %Y").to_string()
}

/// Drop messages older than `now - window`. A message exactly `window` old is
/// kept; messages without a readable timestamp are dropped.
pub fn filter_recent(
    messages: Vec<Message>,
    now: DateTime<Utc>,
    window: Duration,
    zone: &FixedOffset,
) -> Vec<Message> {
    let cutoff = now - window;
    messages
        .into_iter()
        .filter(|m| parse_timestamp(&m.timestamp, zone).is_some_and(|ts| ts >= cutoff))
        .collect()
}

/// Messages sharing one calendar day.
#[derive(Debug, Clone, PartialEq)]
pub struct DateBucket {
    /// `None` collects messages whose timestamp could not be read.
    pub date: Option<NaiveDate>,
    pub label: String,
    pub messages: Vec<Message>,
}

/// Bucket messages by calendar date in `zone`.
///
/// Buckets appear in order of first occurrence and keep the input order
/// inside; nothing is sorted.
pub fn group_by_date(messages: &[Message], zone: &FixedOffset) -> Vec<DateBucket> {
    let mut buckets: Vec<DateBucket> = Vec::new();
    let mut index: HashMap<Option<NaiveDate>, usize> = HashMap::new();
    for msg in messages {
        let date = parse_timestamp(&msg.timestamp, zone).map(|ts| ts.with_timezone(zone).date_naive());
        let slot = *index.entry(date).or_insert_with(|| {
            buckets.push(DateBucket {
                date,
                label: date.map(date_label).unwrap_or_else(|| INVALID_DATE_LABEL.to_string()),
                messages: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[slot].messages.push(msg.clone());
    }
    buckets
}

/// Replace the ciphertext body with its plaintext. Missing bodies become
/// empty text.
pub fn decode_message(mut msg: Message, key: &CipherKey) -> Message {
    msg.text = Some(codec::decrypt_opt(msg.text.as_deref(), key));
    msg
}

/// The recent, decrypted transcript between `me` and `peer` out of the
/// backend's conversation buckets.
pub fn flatten_private(
    buckets: &[ConversationBucket],
    me: &str,
    peer: &str,
    now: DateTime<Utc>,
    zone: &FixedOffset,
    key: &CipherKey,
) -> Vec<Message> {
    let flat: Vec<Message> = buckets
        .iter()
        .filter(|b| b.is_between(me, peer))
        .flat_map(|b| b.conversation.iter().cloned())
        .map(|mut m| {
            if m.to.is_none() {
                m.to = Some(if m.from == me { peer } else { me }.to_string());
            }
            m
        })
        .collect();
    filter_recent(flat, now, recent_window(), zone)
        .into_iter()
        .map(|m| decode_message(m, key))
        .collect()
}

/// People who wrote to `me` but are not in the contact list, first seen first.
pub fn unknown_senders(buckets: &[ConversationBucket], me: &str, contacts: &[Contact]) -> Vec<Identifier> {
    let known: HashSet<&str> = contacts.iter().map(|c| c.contact.as_str()).collect();
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for msg in buckets.iter().filter(|b| b.involves(me)).flat_map(|b| &b.conversation) {
        if msg.from != me && !known.contains(msg.from.as_str()) && seen.insert(msg.from.clone()) {
            out.push(msg.from.clone());
        }
    }
    out
}

/// The in-memory message list of one open conversation.
///
/// Only ever appended to or replaced wholesale. An inbound message whose
/// sender and timestamp are already present is ignored, so a local optimistic
/// copy and its realtime echo render once. Local copies go through [`push`]
/// and are never dropped.
///
/// [`push`]: Transcript::push
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn contains(&self, from: &str, timestamp: &str) -> bool {
        self.messages.iter().any(|m| m.from == from && m.timestamp == timestamp)
    }

    /// Append `msg` unless it is a duplicate. Returns whether it was added.
    pub fn insert(&mut self, msg: Message) -> bool {
        if self.contains(&msg.from, &msg.timestamp) {
            trace!("dropping duplicate message from {} at {}", msg.from, msg.timestamp);
            return false;
        }
        self.messages.push(msg);
        true
    }

    /// Append `msg` unconditionally.
    pub fn push(&mut self, msg: Message) {
        self.messages.push(msg);
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn by_date(&self, zone: &FixedOffset) -> Vec<DateBucket> {
        group_by_date(&self.messages, zone)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(from: &str, to: &str, text: &str, ts: &str) -> Message {
        Message {
            from: from.into(),
            to: Some(to.into()),
            group_id: None,
            text: Some(text.into()),
            attachment_url: None,
            timestamp: ts.into(),
        }
    }

    fn ist() -> FixedOffset {
        display_zone(DEFAULT_UTC_OFFSET_MINUTES)
    }

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-20T12:00:00Z").unwrap().with_timezone(&Utc)
    }

    #[test]
    fn parses_supported_shapes() {
        let z = ist();
        let iso = parse_timestamp("2025-03-05T10:00:00.000Z", &z).unwrap();
        let naive = parse_timestamp("2025-03-05 15:30:00", &z).unwrap();
        assert_eq!(iso, naive);
        assert!(parse_timestamp("3/5/2025, 15:30:00", &z).is_some());
        assert!(parse_timestamp("2025-03-05", &z).is_some());
        assert!(parse_timestamp("", &z).is_none());
        assert!(parse_timestamp("yesterday-ish", &z).is_none());
    }

    #[test]
    fn window_boundary_is_inclusive() {
        let z = ist();
        let exactly = msg("a", "b", "edge", "2025-03-05T12:00:00Z");
        let older = msg("a", "b", "old", "2025-03-05T11:59:59Z");
        let fresh = msg("a", "b", "new", "2025-03-19T08:00:00Z");
        let junk = msg("a", "b", "junk", "not a date");
        let kept = filter_recent(vec![older, exactly.clone(), junk, fresh.clone()], now(), recent_window(), &z);
        assert_eq!(kept, vec![exactly, fresh]);
    }

    #[test]
    fn groups_by_day_in_input_order() {
        let z = ist();
        let msgs = vec![
            msg("a", "b", "1", "2025-03-04T10:00:00Z"),
            msg("b", "a", "2", "2025-03-05T09:00:00Z"),
            msg("a", "b", "3", "2025-03-04T20:00:00Z"), // 01:30 on the 5th in IST
            msg("a", "b", "4", "2025-03-04T11:00:00Z"),
            msg("a", "b", "5", "garbage"),
        ];
        let buckets = group_by_date(&msgs, &z);
        let labels: Vec<&str> = buckets.iter().map(|b| b.label.as_str()).collect();
        assert_eq!(labels, vec!["4 Mar 2025", "5 Mar 2025", INVALID_DATE_LABEL]);
        let texts = |i: usize| buckets[i].messages.iter().map(|m| m.body().to_string()).collect::<Vec<_>>();
        assert_eq!(texts(0), vec!["1", "4"]);
        assert_eq!(texts(1), vec!["2", "3"]);
        assert_eq!(texts(2), vec!["5"]);
    }

    #[test]
    fn transcript_suppresses_duplicates() {
        let mut t = Transcript::new();
        let m = msg("alice", "bob", "hi", "2025-03-19 10:00:00");
        assert!(t.insert(m.clone()));
        assert!(!t.insert(m.clone()));
        let mut echo = m.clone();
        echo.text = Some("ciphertext differs".into());
        assert!(!t.insert(echo));
        assert!(t.insert(msg("bob", "alice", "hi", "2025-03-19 10:00:00")));
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn push_keeps_same_second_messages() {
        let mut t = Transcript::new();
        t.push(msg("alice", "bob", "one", "2025-03-19 10:00:00"));
        t.push(msg("alice", "bob", "two", "2025-03-19 10:00:00"));
        assert!(!t.insert(msg("alice", "bob", "echo", "2025-03-19 10:00:00")));
        let texts: Vec<&str> = t.messages().iter().map(|m| m.body()).collect();
        assert_eq!(texts, vec!["one", "two"]);
    }

    #[test]
    fn flattens_pair_and_decrypts() {
        let key = CipherKey::new("k");
        let enc = |s: &str| codec::encrypt(s, &key);
        let buckets = vec![
            ConversationBucket {
                sender: "me".into(),
                receiver: "peer".into(),
                conversation: vec![
                    msg("me", "peer", &enc("hello"), "2025-03-18T10:00:00Z"),
                    msg("me", "peer", &enc("ancient"), "2025-01-01T10:00:00Z"),
                ],
            },
            ConversationBucket {
                sender: "peer".into(),
                receiver: "me".into(),
                conversation: vec![Message { to: None, ..msg("peer", "me", "legacy plain", "2025-03-18T11:00:00Z") }],
            },
            ConversationBucket {
                sender: "other".into(),
                receiver: "me".into(),
                conversation: vec![msg("other", "me", &enc("nope"), "2025-03-18T12:00:00Z")],
            },
        ];
        let out = flatten_private(&buckets, "me", "peer", now(), &ist(), &key);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].body(), "hello");
        assert_eq!(out[1].body(), "");
        assert_eq!(out[1].to.as_deref(), Some("me"));
    }

    #[test]
    fn finds_unknown_senders() {
        let buckets = vec![
            ConversationBucket {
                sender: "stranger".into(),
                receiver: "me".into(),
                conversation: vec![msg("stranger", "me", "x", ""), msg("me", "stranger", "y", ""), msg("stranger", "me", "z", "")],
            },
            ConversationBucket {
                sender: "friend".into(),
                receiver: "me".into(),
                conversation: vec![msg("friend", "me", "x", "")],
            },
            ConversationBucket {
                sender: "x".into(),
                receiver: "y".into(),
                conversation: vec![msg("x", "y", "x", "")],
            },
        ];
        let contacts = vec![Contact { owner: None, contact: "friend".into(), name: "Friend".into() }];
        assert_eq!(unknown_senders(&buckets, "me", &contacts), vec!["stranger".to_string()]);
    }
}
