//! Realtime events and the Socket.IO text framing they travel in.
//!
//! Only the default namespace and text frames are spoken. A frame is an
//! Engine.IO packet type digit, optionally followed by a Socket.IO packet
//! type digit and a JSON payload, e.g. `42["joinGroup",7]`.

use serde::Deserialize;
use serde_json::Value;

use crate::api::models::{GroupId, Identifier, Message};
use crate::error::{ClientError, Result};

/// Engine.IO open handshake, sent by the server as the first frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub ping_interval: u64,
    #[serde(default)]
    pub ping_timeout: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, args: Vec<Value> },
    ConnectError(Value),
    /// Anything else (upgrade/noop/binary/ack packets). Ignored.
    Other(String),
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Open(h) => format!(
                "0{}",
                serde_json::json!({ "sid": h.sid, "pingInterval": h.ping_interval, "pingTimeout": h.ping_timeout })
            ),
            Packet::Close => "1".into(),
            Packet::Ping => "2".into(),
            Packet::Pong => "3".into(),
            Packet::Connect(None) => "40".into(),
            Packet::Connect(Some(v)) => format!("40{v}"),
            Packet::Disconnect => "41".into(),
            Packet::Event { name, args } => {
                let mut arr = Vec::with_capacity(args.len() + 1);
                arr.push(Value::String(name.clone()));
                arr.extend(args.iter().cloned());
                format!("42{}", Value::Array(arr))
            }
            Packet::ConnectError(v) => format!("44{v}"),
            Packet::Other(raw) => raw.clone(),
        }
    }

    pub fn decode(frame: &str) -> Result<Packet> {
        let mut chars = frame.chars();
        let engine = chars
            .next()
            .ok_or_else(|| ClientError::Realtime("empty frame".into()))?;
        let rest = chars.as_str();
        match engine {
            '0' => serde_json::from_str(rest)
                .map(Packet::Open)
                .map_err(|e| ClientError::Realtime(format!("bad open packet: {e}"))),
            '1' => Ok(Packet::Close),
            '2' => Ok(Packet::Ping),
            '3' => Ok(Packet::Pong),
            '4' => decode_socket(rest),
            _ => Ok(Packet::Other(frame.to_string())),
        }
    }
}

fn decode_socket(body: &str) -> Result<Packet> {
    let mut chars = body.chars();
    let kind = chars
        .next()
        .ok_or_else(|| ClientError::Realtime("empty socket packet".into()))?;
    let payload = chars.as_str();
    let json = |s: &str| -> Result<Value> {
        serde_json::from_str(s).map_err(|e| ClientError::Realtime(format!("bad payload: {e}")))
    };
    match kind {
        '0' if payload.is_empty() => Ok(Packet::Connect(None)),
        '0' => Ok(Packet::Connect(Some(json(payload)?))),
        '1' => Ok(Packet::Disconnect),
        '2' => {
            // An ack id may sit between the type and the array.
            let start = payload
                .find('[')
                .ok_or_else(|| ClientError::Realtime("event without arguments".into()))?;
            let mut items = match json(&payload[start..])? {
                Value::Array(items) => items,
                other => return Err(ClientError::Realtime(format!("event payload is not an array: {other}"))),
            };
            if items.is_empty() {
                return Err(ClientError::Realtime("event without a name".into()));
            }
            let name = match items.remove(0) {
                Value::String(name) => name,
                other => return Err(ClientError::Realtime(format!("event name is not a string: {other}"))),
            };
            Ok(Packet::Event { name, args: items })
        }
        '4' => Ok(Packet::ConnectError(json(payload).unwrap_or(Value::Null))),
        _ => Ok(Packet::Other(format!("4{body}"))),
    }
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    RegisterUser(Identifier),
    PrivateMessage(Message),
    GroupMessage(Message),
    JoinGroup(GroupId),
}

impl OutboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            OutboundEvent::RegisterUser(_) => "registerUser",
            OutboundEvent::PrivateMessage(_) => "privateMessage",
            OutboundEvent::GroupMessage(_) => "groupMessage",
            OutboundEvent::JoinGroup(_) => "joinGroup",
        }
    }

    pub fn to_packet(&self) -> Result<Packet> {
        let arg = match self {
            OutboundEvent::RegisterUser(id) => Value::String(id.clone()),
            OutboundEvent::PrivateMessage(m) | OutboundEvent::GroupMessage(m) => {
                serde_json::to_value(m).map_err(|e| ClientError::Decode(e.to_string()))?
            }
            OutboundEvent::JoinGroup(id) => {
                serde_json::to_value(id).map_err(|e| ClientError::Decode(e.to_string()))?
            }
        };
        Ok(Packet::Event { name: self.name().to_string(), args: vec![arg] })
    }
}

/// Events the server pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    PrivateMessage(Message),
    GroupMessage(Message),
    OnlineUsers(Vec<Identifier>),
    NewMessage,
}

impl InboundEvent {
    /// Map a named event to a typed one. Unknown names give `Ok(None)`.
    pub fn from_event(name: &str, args: &[Value]) -> Result<Option<InboundEvent>> {
        let first = || args.first().cloned().unwrap_or(Value::Null);
        let parse_msg = |v: Value| {
            serde_json::from_value::<Message>(v)
                .map_err(|e| ClientError::Decode(format!("{name}: {e}")))
        };
        let event = match name {
            "receivePrivateMessage" => InboundEvent::PrivateMessage(parse_msg(first())?),
            "receiveGroupMessage" => InboundEvent::GroupMessage(parse_msg(first())?),
            "onlineUsers" => {
                let users = match first() {
                    Value::Array(items) => items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                InboundEvent::OnlineUsers(users)
            }
            "newMessage" => InboundEvent::NewMessage,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_engine_and_socket_frames() {
        let open = Packet::decode(r#"0{"sid":"abc","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#).unwrap();
        assert_eq!(
            open,
            Packet::Open(Handshake { sid: "abc".into(), ping_interval: 25000, ping_timeout: 20000 })
        );
        assert_eq!(Packet::decode("2").unwrap(), Packet::Ping);
        assert_eq!(Packet::decode("40").unwrap(), Packet::Connect(None));
        assert_eq!(Packet::decode(r#"40{"sid":"x"}"#).unwrap(), Packet::Connect(Some(json!({"sid":"x"}))));
        assert_eq!(Packet::decode("41").unwrap(), Packet::Disconnect);
        assert_eq!(
            Packet::decode(r#"4212["onlineUsers",["a","b"]]"#).unwrap(),
            Packet::Event { name: "onlineUsers".into(), args: vec![json!(["a", "b"])] }
        );
        assert!(Packet::decode("").is_err());
        assert!(Packet::decode("42{}").is_err());
        assert!(matches!(Packet::decode("6").unwrap(), Packet::Other(_)));
    }

    #[test]
    fn encodes_outbound_events() {
        let p = OutboundEvent::RegisterUser("alice@example.com".into()).to_packet().unwrap();
        assert_eq!(p.encode(), r#"42["registerUser","alice@example.com"]"#);
        let p = OutboundEvent::JoinGroup(GroupId::from(7)).to_packet().unwrap();
        assert_eq!(p.encode(), r#"42["joinGroup",7]"#);
        assert_eq!(Packet::Pong.encode(), "3");
        assert_eq!(Packet::Connect(None).encode(), "40");
    }

    #[test]
    fn maps_inbound_events() {
        let msg = json!({"from":"bob","to":"alice","text":"c","attachment_url":null,"timestamp":"t"});
        match InboundEvent::from_event("receivePrivateMessage", &[msg]).unwrap() {
            Some(InboundEvent::PrivateMessage(m)) => assert_eq!(m.from, "bob"),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            InboundEvent::from_event("onlineUsers", &[json!(["a", 1, "b"])]).unwrap(),
            Some(InboundEvent::OnlineUsers(vec!["a".into(), "b".into()]))
        );
        assert_eq!(InboundEvent::from_event("newMessage", &[]).unwrap(), Some(InboundEvent::NewMessage));
        assert_eq!(InboundEvent::from_event("typing", &[]).unwrap(), None);
        assert!(InboundEvent::from_event("receiveGroupMessage", &[json!(5)]).is_err());
    }
}
