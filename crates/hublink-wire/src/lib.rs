// JSON wire format and naming helpers for the hublink module broker.
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Control method local name a module handles to install relay entries.
pub const REGISTER_HANDLERS_METHOD: &str = "registerAPIHandlers";
/// Control method local name a module handles to remove relay entries.
pub const DEREGISTER_HANDLERS_METHOD: &str = "deregisterAPIHandlers";
/// Hub event local name announcing a peer module connect.
pub const MODULE_CONNECT_EVENT: &str = "moduleconnect";
/// Hub event local name announcing a peer module disconnect.
pub const MODULE_DISCONNECT_EVENT: &str = "moduledisconnect";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("malformed name: {0:?}")]
    MalformedName(String),
}

/// Message discriminator carried in the `type` field.
///
/// Control kinds are a closed set; everything else is a method FQN.
///
/// ```
/// use hublink_wire::MessageKind;
///
/// assert_eq!(MessageKind::from("ping"), MessageKind::Ping);
/// assert_eq!(
///     MessageKind::from("acme.sum.add"),
///     MessageKind::Method("acme.sum.add".to_string())
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageKind {
    Ping,
    Response,
    Event,
    Subscribe,
    Unsubscribe,
    Method(String),
}

impl MessageKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Response => "response",
            Self::Event => "event",
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Method(fqn) => fqn,
        }
    }
}

impl From<&str> for MessageKind {
    fn from(value: &str) -> Self {
        match value {
            "ping" => Self::Ping,
            "response" => Self::Response,
            "event" => Self::Event,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            other => Self::Method(other.to_string()),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for MessageKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Self::from(value.as_str()))
    }
}

/// One broker message; a single UTF-8 JSON object per transport frame.
///
/// Absent fields are omitted on the wire. The set of fields and their JSON
/// names are shared with the hub and every peer module.
///
/// ```
/// use hublink_wire::{Message, MessageKind};
///
/// let mut message = Message::new(MessageKind::Method("acme.sum.add".into()));
/// message.data = Some(vec![3.into(), 5.into()]);
/// let encoded = message.encode().expect("encode");
/// let decoded = Message::decode(&encoded).expect("decode");
/// assert_eq!(decoded, message);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_module_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instigator_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Vec<serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub excluded_clients: Option<Vec<String>>,
}

impl Message {
    pub fn new(kind: MessageKind) -> Self {
        Self {
            kind,
            id: None,
            time: None,
            module_name: None,
            target_module_name: None,
            request_id: None,
            instigator_id: None,
            event_name: None,
            data: None,
            success: None,
            timeout: None,
            excluded_clients: None,
        }
    }

    /// Build an outbound method invocation for `<module>.<method>`.
    pub fn method(module: &str, method: &str, data: Vec<serde_json::Value>) -> Self {
        let mut message = Self::new(MessageKind::Method(format!("{module}.{method}")));
        message.target_module_name = Some(module.to_string());
        message.data = Some(data);
        message
    }

    /// Build a fire-and-forget event carrying `event_name` (a full FQN).
    pub fn event(event_name: &str, data: Vec<serde_json::Value>) -> Self {
        let mut message = Self::new(MessageKind::Event);
        message.event_name = Some(event_name.to_string());
        message.data = Some(data);
        message
    }

    /// Build a subscribe/unsubscribe control message for `event_name`,
    /// targeted at the module owning the event.
    pub fn subscription(subscribe: bool, event_name: &str) -> Result<Self> {
        let (module, _) = target_module(event_name)?;
        let kind = if subscribe {
            MessageKind::Subscribe
        } else {
            MessageKind::Unsubscribe
        };
        let mut message = Self::new(kind);
        message.event_name = Some(event_name.to_string());
        message.target_module_name = Some(module.to_string());
        Ok(message)
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(Error::Encode)
    }

    pub fn decode(input: &str) -> Result<Self> {
        serde_json::from_str(input).map_err(Error::Decode)
    }
}

/// Generate a fresh opaque message id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

/// Wall-clock milliseconds since the Unix epoch, for the `time` field.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// Split an event or method FQN into `(target module, local name)`.
///
/// Routing recovers the module from the first two segments, so the local
/// name may itself contain dots.
///
/// ```
/// use hublink_wire::target_module;
///
/// let (module, local) = target_module("acme.sum.add").expect("split");
/// assert_eq!((module, local), ("acme.sum", "add"));
/// ```
pub fn target_module(fqn: &str) -> Result<(&str, &str)> {
    let first = fqn.find('.').ok_or_else(|| Error::MalformedName(fqn.to_string()))?;
    let rest = &fqn[first + 1..];
    let second = rest
        .find('.')
        .ok_or_else(|| Error::MalformedName(fqn.to_string()))?;
    let module = &fqn[..first + 1 + second];
    let local = &rest[second + 1..];
    if module.split('.').any(str::is_empty) || local.is_empty() {
        return Err(Error::MalformedName(fqn.to_string()));
    }
    Ok((module, local))
}

/// Split a dotted name at its last dot into `(prefix, local name)`.
pub fn split_local(name: &str) -> Result<(&str, &str)> {
    let dot = name
        .rfind('.')
        .ok_or_else(|| Error::MalformedName(name.to_string()))?;
    let (prefix, local) = (&name[..dot], &name[dot + 1..]);
    if prefix.is_empty() || local.is_empty() {
        return Err(Error::MalformedName(name.to_string()));
    }
    Ok((prefix, local))
}

/// True when `name` is a well-formed `vendor.module` pair.
pub fn is_module_name(name: &str) -> bool {
    let mut segments = name.split('.');
    matches!(
        (segments.next(), segments.next(), segments.next()),
        (Some(vendor), Some(module), None) if !vendor.is_empty() && !module.is_empty()
    )
}
