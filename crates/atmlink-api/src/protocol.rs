//! Wire protocol spoken by the simulation server.
//!
//! Every text frame is a JSON envelope `{ "event": <name>, "data": <payload> }`.
//! Inbound frames are decoded in two steps: the envelope first, then the
//! payload according to the event name. Unknown event names are surfaced as
//! [`InboundMessage::Unknown`] so callers can log them without failing.
//!
//! Payload structs are deliberately lenient: every field has a default, since
//! the server omits fields freely and sends `{}` for "nothing yet".

use std::collections::BTreeMap;

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Error;

// ── Envelope ─────────────────────────────────────────────────────────

/// Raw envelope around every frame, in both directions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireFrame {
    pub event: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

// ── Inbound messages ─────────────────────────────────────────────────

/// A decoded server → client message.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Full snapshot sent once after the transport connects.
    InitialData(Box<InitialData>),
    /// Simulation clock tick.
    SimInfo(SimInfo),
    /// Positions and attributes of all tracked aircraft.
    Traffic(TrafficData),
    /// Simulation context topology (nodes, servers, active node).
    NodeInfo(NodeInfo),
    /// Polygon geometry in one of the three accepted layouts.
    Poly(GeometryPayload),
    /// Polyline geometry in one of the three accepted layouts.
    Polyline(GeometryPayload),
    /// Server-side view of the simulation link.
    ConnectionStatus(ConnectionStatus),
    /// The server lost its simulation engine.
    ServerDisconnected(ServerDisconnected),
    /// The simulation was reset; context-scoped state is stale.
    Reset(ResetNotice),
    /// Catalogue of stack commands the simulation understands.
    CommandCatalog(CommandCatalog),
    /// Console output from the simulation.
    Echo(EchoMessage),
    /// Acknowledgement of a `command` the client sent.
    CommandResult(CommandResult),
    /// Keep-alive cadence requested by the server.
    HeartbeatConfig(HeartbeatConfig),
    /// Reply to a client keep-alive.
    HeartbeatAck,
    /// Flight plan of one aircraft in the active context.
    RouteData(RouteData),
    /// The server could not resume this client's session.
    SessionError(SessionError),
    /// Any event name this client does not understand.
    Unknown { event: String },
}

impl InboundMessage {
    /// Wire name of the event this message was decoded from.
    pub fn event_name(&self) -> &str {
        match self {
            Self::InitialData(_) => "initial_data",
            Self::SimInfo(_) => "siminfo",
            Self::Traffic(_) => "acdata",
            Self::NodeInfo(_) => "node_info",
            Self::Poly(_) => "poly",
            Self::Polyline(_) => "polyline",
            Self::ConnectionStatus(_) => "connection_status",
            Self::ServerDisconnected(_) => "server_disconnected",
            Self::Reset(_) => "reset",
            Self::CommandCatalog(_) => "cmddict",
            Self::Echo(_) => "echo",
            Self::CommandResult(_) => "command_result",
            Self::HeartbeatConfig(_) => "heartbeat_config",
            Self::HeartbeatAck => "heartbeat_ack",
            Self::RouteData(_) => "routedata",
            Self::SessionError(_) => "session_error",
            Self::Unknown { event } => event,
        }
    }

    /// Decode a text frame.
    pub fn from_text(text: &str) -> Result<Self, Error> {
        let frame: WireFrame = serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })?;
        Self::from_frame(frame)
    }

    /// Decode the payload of an already-parsed envelope.
    pub fn from_frame(frame: WireFrame) -> Result<Self, Error> {
        let WireFrame { event, data } = frame;
        let message = match event.as_str() {
            "initial_data" => Self::InitialData(Box::new(payload(&event, data)?)),
            "siminfo" => Self::SimInfo(payload(&event, data)?),
            "acdata" => Self::Traffic(payload(&event, data)?),
            "node_info" => Self::NodeInfo(payload(&event, data)?),
            "poly" => Self::Poly(GeometryPayload::from_value(data)),
            "polyline" => Self::Polyline(GeometryPayload::from_value(data)),
            "connection_status" => Self::ConnectionStatus(payload(&event, data)?),
            "server_disconnected" => Self::ServerDisconnected(payload(&event, data)?),
            "reset" => Self::Reset(payload(&event, data)?),
            "cmddict" => Self::CommandCatalog(payload(&event, data)?),
            "echo" => Self::Echo(payload(&event, data)?),
            "command_result" => Self::CommandResult(payload(&event, data)?),
            "heartbeat_config" => Self::HeartbeatConfig(payload(&event, data)?),
            "heartbeat_ack" => Self::HeartbeatAck,
            "routedata" => Self::RouteData(payload(&event, data)?),
            "session_error" => Self::SessionError(payload(&event, data)?),
            _ => Self::Unknown { event },
        };
        Ok(message)
    }
}

/// Decode a payload, treating `null` as an empty object so that
/// all-default payload structs still decode.
fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T, Error> {
    let data = if data.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        data
    };
    serde_json::from_value(data.clone()).map_err(|e| Error::Deserialization {
        message: format!("{event}: {e}"),
        body: data.to_string(),
    })
}

/// `null`, `{}` and a missing field all mean "absent".
fn non_empty<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(deserializer)?;
    match &value {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        _ => serde_json::from_value(value).map(Some).map_err(D::Error::custom),
    }
}

// ── Payloads ─────────────────────────────────────────────────────────

/// Bundle sent on connect so a fresh client can render immediately.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InitialData {
    #[serde(deserialize_with = "non_empty")]
    pub traffic_data: Option<TrafficData>,
    #[serde(deserialize_with = "non_empty")]
    pub sim_data: Option<SimInfo>,
    #[serde(deserialize_with = "non_empty")]
    pub echo_data: Option<EchoMessage>,
    #[serde(deserialize_with = "non_empty")]
    pub poly_data: Option<GeometryPayload>,
    #[serde(deserialize_with = "non_empty")]
    pub polyline_data: Option<GeometryPayload>,
    #[serde(deserialize_with = "non_empty")]
    pub cmddict: Option<BTreeMap<String, Value>>,
    #[serde(deserialize_with = "non_empty")]
    pub connection_status: Option<ConnectionStatus>,
    #[serde(deserialize_with = "non_empty")]
    pub node_info: Option<NodeInfo>,
    pub timestamp: Option<f64>,
}

/// Simulation clock and scenario state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimInfo {
    /// Speed-up factor relative to wall-clock time.
    pub speed: f64,
    /// Simulation time step in seconds.
    pub simdt: f64,
    /// Elapsed simulation time in seconds.
    pub simt: f64,
    /// Simulated UTC wall-clock, preformatted by the server.
    pub simutc: String,
    /// Number of aircraft in the simulation.
    pub ntraf: u32,
    /// Engine state code (init / hold / operate / end).
    pub state: i32,
    pub scenname: String,
    /// Context that produced this tick.
    pub sender_id: Option<String>,
}

/// Struct-of-arrays aircraft batch. All per-aircraft arrays are indexed
/// in parallel by position in `id`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficData {
    pub id: Vec<String>,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    /// Altitude in metres.
    pub alt: Vec<f64>,
    /// True airspeed in m/s.
    pub tas: Vec<f64>,
    /// Track in degrees.
    pub trk: Vec<f64>,
    /// Vertical speed in m/s.
    pub vs: Vec<f64>,
    pub actype: Vec<String>,
    pub inconf: Vec<bool>,
    pub tcpamax: Vec<f64>,
    pub nconf_cur: u32,
    pub nconf_tot: u32,
    pub nlos_cur: u32,
    pub nlos_tot: u32,
}

impl TrafficData {
    pub fn len(&self) -> usize {
        self.id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_empty()
    }
}

/// One simulation node as tracked by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeEntry {
    pub node_id: String,
    pub node_num: u32,
    pub server_id: String,
    /// Scenario name, or `"init"` before one is loaded.
    pub status: String,
    /// Simulation time formatted `HH:MM:SS`.
    pub time: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerEntry {
    pub server_id: String,
}

/// Topology of simulation contexts and which one is active.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeInfo {
    pub nodes: BTreeMap<String, NodeEntry>,
    pub servers: BTreeMap<String, ServerEntry>,
    pub active_node: Option<String>,
    pub total_nodes: u32,
}

impl NodeInfo {
    /// Whether this message proves a simulation context exists at all.
    pub fn has_contexts(&self) -> bool {
        self.active_node.is_some() || self.total_nodes > 0 || !self.nodes.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub server_ip: Option<String>,
    pub timestamp: Option<f64>,
    pub last_update: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDisconnected {
    pub timestamp: Option<f64>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResetNotice {
    pub reason: Option<String>,
    pub timestamp: Option<f64>,
}

/// Command name → help text (or argument spec; shape varies by engine).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandCatalog {
    pub cmddict: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EchoMessage {
    pub text: String,
    /// Severity: 0 = normal, higher is worse.
    pub flags: i32,
    pub timestamp: Option<f64>,
    pub sender: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandResult {
    pub success: bool,
    pub command: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Interval in seconds.
    pub interval: f64,
}

/// Route of one aircraft. Waypoint arrays are indexed in parallel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteData {
    pub acid: String,
    /// Index of the active waypoint, `-1` when none is active.
    pub iactwp: i64,
    pub aclat: f64,
    pub aclon: f64,
    pub wplat: Vec<f64>,
    pub wplon: Vec<f64>,
    /// Waypoint altitude in metres, negative when unconstrained.
    pub wpalt: Vec<f64>,
    /// Waypoint speed in m/s, negative when unconstrained.
    pub wpspd: Vec<f64>,
    pub wpname: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionError {
    pub message: String,
}

// ── Geometry ─────────────────────────────────────────────────────────

/// Geometry payloads arrive in one of three layouts. Entries are kept as raw
/// JSON so that one malformed entry never fails the whole message; callers
/// validate each entry on its own.
#[derive(Debug, Clone, PartialEq)]
pub enum GeometryPayload {
    /// `{ "polys": { name: shape, ... } }`, a complete set for the active context.
    Dict(BTreeMap<String, Value>),
    /// A bare shape object.
    Single(Value),
    /// An array of shape objects.
    List(Vec<Value>),
}

impl GeometryPayload {
    /// Classify a raw payload. An empty object and `null` are an empty `Dict`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => Self::Dict(BTreeMap::new()),
            Value::Array(items) => Self::List(items),
            Value::Object(mut map) => {
                if map.is_empty() {
                    return Self::Dict(BTreeMap::new());
                }
                match map.remove("polys") {
                    Some(Value::Object(polys)) => Self::Dict(polys.into_iter().collect()),
                    Some(Value::Null) => Self::Dict(BTreeMap::new()),
                    Some(other) => {
                        map.insert("polys".into(), other);
                        Self::Single(Value::Object(map))
                    }
                    None => Self::Single(Value::Object(map)),
                }
            }
            other => Self::Single(other),
        }
    }

    /// Number of candidate entries, valid or not.
    pub fn len(&self) -> usize {
        match self {
            Self::Dict(map) => map.len(),
            Self::Single(_) => 1,
            Self::List(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'de> Deserialize<'de> for GeometryPayload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(Self::from_value)
    }
}

/// A single shape as the server describes it. Coordinate fields stay as raw
/// JSON; validation decides whether they are usable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawShape {
    pub name: String,
    /// `"POLY"`, `"POLYALT"` or `"LINE"` when the engine tags it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shape: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lat: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lon: Option<Value>,
    /// Flat `[lat1, lon1, lat2, lon2, ...]` alternative to `lat`/`lon`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub coordinates: Option<Value>,
    /// CSS colour string or `[r, g, b]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<Value>,
    /// `true`/`false`, or a fill colour.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
}

// ── Outbound messages ────────────────────────────────────────────────

/// A client → server message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Free-text stack command, e.g. `"CRE KL204 B744 52 4 90 FL100 250"`.
    Command { command: String },
    /// Switch the server to another simulation context.
    SetActiveNode { node_id: String },
    /// Ask the server to re-send `node_info`.
    GetNodes,
    /// Spawn additional simulation contexts.
    AddNodes {
        count: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_id: Option<String>,
    },
    /// Client keep-alive.
    Heartbeat,
}

impl OutboundMessage {
    /// Encode as a text frame.
    pub fn to_text(&self) -> Result<String, Error> {
        Ok(serde_json::to_string(self)?)
    }
}

// ── Tests ────────────────────────────────────────────────────────────
