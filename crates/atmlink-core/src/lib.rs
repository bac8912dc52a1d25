// atmlink-core: Connection tracking, reactive state and message routing for atmlink.

pub mod client;
pub mod config;
pub mod connection;
pub mod convert;
pub mod error;
mod listener;
pub mod model;
pub mod notification;
pub mod router;
pub mod session;
pub mod store;
pub mod stream;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::Client;
pub use config::{ClientConfig, DATA_TIMEOUT, INITIAL_CHECK_DELAY};
pub use connection::{
    ConnectionQuality, ConnectionSnapshot, ConnectionTracker, DataKind, SimLinkState,
    TransportState,
};
pub use error::CoreError;
pub use listener::Subscription;
pub use notification::{Notification, NotificationLevel, Notifier};
pub use router::Router;
pub use session::{MemorySessionStore, SessionStore};
pub use store::{AppSnapshot, AppStore, Field, ShapeCollection};
pub use stream::ShapeStream;

// Re-export model types at the crate root for ergonomics.
pub use model::{
    Aircraft, CommandOutcome, ContextNode, ContextTopology, EchoLine, EntitySet, Geometry, Route,
    ServerStatus, Shape, ShapeKind, SimState, SimTick, Waypoint,
};

// Transport configuration consumers need to build a `ClientConfig`.
pub use atmlink_api::ReconnectConfig;
