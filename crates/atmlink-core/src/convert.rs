// ── Wire-to-domain conversions ──
//
// Bridges raw `atmlink_api::protocol` payloads into `atmlink_core::model`
// types. Parallel arrays are zipped into records, integer codes become
// enums, and missing optional data falls back to defaults.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use atmlink_api::protocol::{EchoMessage, NodeInfo, RawShape, RouteData, SimInfo, TrafficData};

use crate::model::{
    Aircraft, ConflictCounts, ContextNode, ContextTopology, Coordinate, DEFAULT_POLYGON_COLOR,
    DEFAULT_POLYLINE_COLOR, DEFAULT_POLYLINE_WIDTH, EchoLine, EntitySet, Geometry, PolygonStyle,
    Route, Shape, SimState, SimTick, Waypoint,
};

// ── Shape validation ───────────────────────────────────────────────

/// Why a geometry entry was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShapeRejection {
    #[error("entry is not an object")]
    NotAnObject,

    #[error("entry has no name")]
    MissingName,

    #[error("entry does not match the shape layout: {0}")]
    Malformed(String),

    #[error("'{field}' is missing")]
    Missing { field: &'static str },

    #[error("'{field}' is not an array")]
    NotAnArray { field: &'static str },

    #[error("'{field}' contains a non-numeric value")]
    NotNumeric { field: &'static str },

    #[error("coordinate arrays are empty")]
    Empty,

    #[error("lat has {lat} values but lon has {lon}")]
    LengthMismatch { lat: usize, lon: usize },

    #[error("flat coordinate array has odd length {len}")]
    OddFlatLength { len: usize },
}

fn numbers(field: &'static str, value: Option<&Value>) -> Result<Vec<f64>, ShapeRejection> {
    let value = value.ok_or(ShapeRejection::Missing { field })?;
    let items = value.as_array().ok_or(ShapeRejection::NotAnArray { field })?;
    items
        .iter()
        .map(|v| v.as_f64().ok_or(ShapeRejection::NotNumeric { field }))
        .collect()
}

/// Zip `lat[]`/`lon[]` into coordinate pairs.
///
/// A flat `coordinates` array (`[lat1, lon1, lat2, lon2, ...]`) is accepted
/// when `lat` and `lon` are both absent. Both arrays must be non-empty,
/// numeric, and of equal length.
pub fn coordinates_of(raw: &RawShape) -> Result<Vec<Coordinate>, ShapeRejection> {
    if raw.lat.is_none() && raw.lon.is_none() && raw.coordinates.is_some() {
        let flat = numbers("coordinates", raw.coordinates.as_ref())?;
        if flat.is_empty() {
            return Err(ShapeRejection::Empty);
        }
        if flat.len() % 2 != 0 {
            return Err(ShapeRejection::OddFlatLength { len: flat.len() });
        }
        return Ok(flat.chunks_exact(2).map(|pair| [pair[0], pair[1]]).collect());
    }

    let lat = numbers("lat", raw.lat.as_ref())?;
    let lon = numbers("lon", raw.lon.as_ref())?;
    if lat.len() != lon.len() {
        return Err(ShapeRejection::LengthMismatch {
            lat: lat.len(),
            lon: lon.len(),
        });
    }
    if lat.is_empty() {
        return Err(ShapeRejection::Empty);
    }
    Ok(lat.into_iter().zip(lon).map(|(la, lo)| [la, lo]).collect())
}

// ── Colours ────────────────────────────────────────────────────────

/// CSS string, or an `[r, g, b]` array rendered as `#rrggbb`.
fn color_of(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Array(parts) if parts.len() >= 3 => {
            let mut hex = String::from("#");
            for part in parts.iter().take(3) {
                let channel = part.as_f64()?.clamp(0.0, 255.0).round();
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
                hex.push_str(&format!("{:02x}", channel as u8));
            }
            Some(hex)
        }
        _ => None,
    }
}

/// `true` fills with the stroke colour, a colour fills with that colour.
fn fill_of(value: Option<&Value>, stroke: &str) -> Option<String> {
    match value {
        Some(Value::Bool(true)) => Some(stroke.to_owned()),
        Some(other) => color_of(Some(other)),
        None => None,
    }
}

// ── Shapes ─────────────────────────────────────────────────────────

fn coordinates_or_empty(raw: &RawShape, kind: &str) -> Vec<Coordinate> {
    coordinates_of(raw).unwrap_or_else(|reason| {
        warn!(name = %raw.name, kind, %reason, "malformed shape, using empty geometry");
        Vec::new()
    })
}

/// Build a polygon. Malformed coordinates yield an empty geometry.
pub fn polygon_from_wire(raw: &RawShape) -> Shape {
    let coordinates = coordinates_or_empty(raw, "polygon");
    let stroke_color = color_of(raw.color.as_ref()).unwrap_or_else(|| DEFAULT_POLYGON_COLOR.into());
    let fill_color = fill_of(raw.fill.as_ref(), &stroke_color);
    Shape {
        name: raw.name.clone(),
        context_id: None,
        visible: true,
        geometry: Geometry::Polygon {
            coordinates,
            style: PolygonStyle {
                stroke_color,
                fill_color,
            },
        },
    }
}

/// Build a polyline. Malformed coordinates yield an empty geometry.
pub fn polyline_from_wire(raw: &RawShape) -> Shape {
    let coordinates = coordinates_or_empty(raw, "polyline");
    Shape {
        name: raw.name.clone(),
        context_id: None,
        visible: true,
        geometry: Geometry::Polyline {
            coordinates,
            color: color_of(raw.color.as_ref()).unwrap_or_else(|| DEFAULT_POLYLINE_COLOR.into()),
            width: raw
                .width
                .filter(|w| w.is_finite() && *w > 0.0)
                .unwrap_or(DEFAULT_POLYLINE_WIDTH),
        },
    }
}

/// Engine tags that mark a line inside a polygon message.
pub fn is_line_tag(tag: Option<&str>) -> bool {
    tag.is_some_and(|t| t.eq_ignore_ascii_case("LINE"))
}

// ── Simulation ─────────────────────────────────────────────────────

impl From<SimInfo> for SimTick {
    fn from(info: SimInfo) -> Self {
        Self {
            speed: info.speed,
            time_step: info.simdt,
            sim_time: info.simt,
            utc: info.simutc,
            aircraft_count: info.ntraf,
            state: SimState::from(info.state),
            scenario: info.scenname,
            context_id: info.sender_id.filter(|s| !s.is_empty()),
        }
    }
}

impl From<TrafficData> for EntitySet {
    fn from(data: TrafficData) -> Self {
        let at = |values: &[f64], i: usize| values.get(i).copied().unwrap_or_default();
        let aircraft = data
            .id
            .iter()
            .enumerate()
            .map(|(i, id)| Aircraft {
                id: id.clone(),
                lat: at(&data.lat, i),
                lon: at(&data.lon, i),
                altitude: at(&data.alt, i),
                true_airspeed: at(&data.tas, i),
                track: at(&data.trk, i),
                vertical_speed: at(&data.vs, i),
                aircraft_type: data.actype.get(i).filter(|t| !t.is_empty()).cloned(),
                in_conflict: data.inconf.get(i).copied().unwrap_or(false),
            })
            .collect();
        Self {
            aircraft,
            conflicts: ConflictCounts {
                current_conflicts: data.nconf_cur,
                total_conflicts: data.nconf_tot,
                current_losses: data.nlos_cur,
                total_losses: data.nlos_tot,
            },
        }
    }
}

impl From<NodeInfo> for ContextTopology {
    fn from(info: NodeInfo) -> Self {
        let nodes = info
            .nodes
            .into_iter()
            .map(|(key, node)| {
                let id = if node.node_id.is_empty() { key.clone() } else { node.node_id };
                let entry = ContextNode {
                    id,
                    number: node.node_num,
                    server_id: node.server_id,
                    status: node.status,
                    sim_time: node.time,
                };
                (key, entry)
            })
            .collect();
        let servers = info
            .servers
            .into_iter()
            .map(|(key, server)| if server.server_id.is_empty() { key } else { server.server_id })
            .collect();
        Self { nodes, servers }
    }
}

impl From<RouteData> for Route {
    /// Waypoints are zipped from `wplat`/`wplon`; a negative altitude or
    /// speed means "no constraint".
    fn from(data: RouteData) -> Self {
        let constraint = |values: &[f64], i: usize| values.get(i).copied().filter(|v| *v >= 0.0);
        let waypoints: Vec<Waypoint> = data
            .wplat
            .iter()
            .zip(&data.wplon)
            .enumerate()
            .map(|(i, (lat, lon))| Waypoint {
                name: data.wpname.get(i).filter(|n| !n.is_empty()).cloned(),
                position: [*lat, *lon],
                altitude: constraint(&data.wpalt, i),
                speed: constraint(&data.wpspd, i),
            })
            .collect();
        let active_waypoint = usize::try_from(data.iactwp)
            .ok()
            .filter(|i| *i < waypoints.len());
        Self {
            aircraft_id: data.acid,
            position: [data.aclat, data.aclon],
            active_waypoint,
            waypoints,
        }
    }
}

/// Convert epoch seconds (with fraction) to a UTC timestamp.
fn epoch_secs_to_datetime(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    let millis = (secs * 1000.0).round() as i64;
    DateTime::from_timestamp_millis(millis)
}

impl From<EchoMessage> for EchoLine {
    fn from(msg: EchoMessage) -> Self {
        Self {
            text: msg.text,
            flags: msg.flags,
            sender: msg.sender.filter(|s| !s.is_empty()),
            received_at: msg
                .timestamp
                .and_then(epoch_secs_to_datetime)
                .unwrap_or_else(Utc::now),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
