// atmlink-api: wire protocol and WebSocket transport for air-traffic simulation servers

pub mod error;
pub mod protocol;
pub mod websocket;

pub use error::Error;
pub use protocol::{InboundMessage, OutboundMessage};
pub use websocket::{ReconnectConfig, TransportEvent, WebSocketHandle};
