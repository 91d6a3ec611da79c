use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the segments of a bus path (`"<node-id>/<property-id>"`).
pub const PATH_SEPARATOR: char = '/';

/// Which side of the bus a module sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleKind {
    /// Bridges bus traffic to and from an external system (e.g. a broker client).
    Communication,
    /// Exposes hardware or logical state as Nodes and Properties.
    Interface,
}

impl fmt::Display for ModuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModuleKind::Communication => write!(f, "communication"),
            ModuleKind::Interface => write!(f, "interface"),
        }
    }
}

/// Data type tag carried by a [`Property`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Enum,
    Color,
}

/// One controllable or observable attribute of a [`Node`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub datatype: DataType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// Allowed values or range, e.g. `"ON,OFF"` or `"0:100"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default)]
    pub settable: bool,
    /// Name of the owning module's callback invoked for subscribe traffic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback: Option<String>,
}

impl Property {
    /// A read-only property with no unit, format or callback.
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            unit: None,
            format: None,
            settable: false,
            callback: None,
        }
    }

    /// Mark the property settable and route subscribe traffic to `callback`.
    pub fn settable(mut self, callback: impl Into<String>) -> Self {
        self.settable = true;
        self.callback = Some(callback.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }
}

/// Addressable unit of state owned by exactly one interface module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    pub name: String,
    /// Id of the owning module. Stamped by the loader when the node is registered.
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub properties: HashMap<String, Property>,
}

impl Node {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            module: String::new(),
            properties: HashMap::new(),
        }
    }

    /// Add (or replace) the property `id`.
    pub fn with_property(mut self, id: impl Into<String>, property: Property) -> Self {
        self.properties.insert(id.into(), property);
        self
    }

    pub fn property(&self, id: &str) -> Option<&Property> {
        self.properties.get(id)
    }
}

/// Interface module → router → every communication module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishMessage {
    /// `"<node-id>/<property-id>"`, no leading or trailing separator.
    pub path: String,
    pub content: String,
    #[serde(default)]
    pub retained: bool,
    #[serde(default)]
    pub qos: u8,
}

impl PublishMessage {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: trim_path(&path.into()),
            content: content.into(),
            retained: false,
            qos: 0,
        }
    }

    pub fn retained(mut self) -> Self {
        self.retained = true;
        self
    }

    pub fn with_qos(mut self, qos: u8) -> Self {
        self.qos = qos;
        self
    }
}

/// Communication module → router → exactly one interface module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeMessage {
    pub path: String,
    pub content: String,
    /// Stamped by the router from the target [`Property::callback`].
    #[serde(default)]
    pub callback: Option<String>,
}

impl SubscribeMessage {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: trim_path(&path.into()),
            content: content.into(),
            callback: None,
        }
    }
}

/// Any message travelling over a bus queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "message")]
pub enum BusMessage {
    Publish(PublishMessage),
    Subscribe(SubscribeMessage),
    /// Asks the receiving loop to terminate at its next opportunity.
    PoisonPill,
}

impl BusMessage {
    /// Short label used in log fields.
    pub fn label(&self) -> &'static str {
        match self {
            BusMessage::Publish(_) => "publish",
            BusMessage::Subscribe(_) => "subscribe",
            BusMessage::PoisonPill => "poison-pill",
        }
    }
}

impl From<PublishMessage> for BusMessage {
    fn from(message: PublishMessage) -> Self {
        BusMessage::Publish(message)
    }
}

impl From<SubscribeMessage> for BusMessage {
    fn from(message: SubscribeMessage) -> Self {
        BusMessage::Subscribe(message)
    }
}

/// Split `path` into `(node_id, property_id)`, ignoring any trailing segments
/// (such as a `/set` verb). Returns `None` for fewer than two segments.
pub fn split_path(path: &str) -> Option<(&str, &str)> {
    let mut segments = path.split(PATH_SEPARATOR);
    let node = segments.next().filter(|s| !s.is_empty())?;
    let property = segments.next().filter(|s| !s.is_empty())?;
    Some((node, property))
}

fn trim_path(path: &str) -> String {
    path.trim_matches(PATH_SEPARATOR).to_string()
}

/// Failure raised by a module hook (`load`, `start`, `stop`, `transmit`,
/// `dispatch`). Always handled at the supervisor boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    #[error("{0}")]
    Failed(String),

    #[error("Unknown callback: {0}")]
    UnknownCallback(String),

    #[error("Invalid payload for {path}: {details}")]
    InvalidPayload { path: String, details: String },

    #[error("Module panicked: {0}")]
    Panicked(String),
}

impl ModuleError {
    pub fn failed(details: impl Into<String>) -> Self {
        ModuleError::Failed(details.into())
    }
}

/// System-level error spanning configuration, loading and queue plumbing.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Unknown module: {0}")]
    UnknownModule(String),

    #[error("Module '{module}' failed validation: {reason}")]
    Validation { module: String, reason: String },

    #[error("Node '{0}' is already registered")]
    DuplicateNode(String),

    #[error("Module id '{0}' is already in use")]
    DuplicateModule(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Channel error: {0}")]
    Channel(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
