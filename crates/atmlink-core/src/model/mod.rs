// ── Domain model ──
//
// Types the store holds and subscribers receive. Wire payloads from
// atmlink-api are translated into these in `convert`.

mod context;
mod display;
mod shape;
mod sim;

pub use context::{ContextNode, ContextTopology, ServerStatus};
pub use display::{DisplayOptions, ShapeDisplayOptions};
pub use shape::{
    Coordinate, DEFAULT_POLYGON_COLOR, DEFAULT_POLYLINE_COLOR, DEFAULT_POLYLINE_WIDTH, Geometry,
    PolygonStyle, Shape, ShapeKind,
};
pub use sim::{
    Aircraft, CommandOutcome, ConflictCounts, EchoLine, EntitySet, Route, SimState, SimTick,
    Waypoint,
};
