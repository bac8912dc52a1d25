// ── Core error types ──
//
// User-facing errors from atmlink-core. Consumers never see raw
// WebSocket or JSON failures; the `From<atmlink_api::Error>` impl
// translates transport-layer errors into domain variants.
//
// The tracker, store and router never fail. These errors only surface
// at the edges: connecting, waiting on the transport, configuration.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot connect to simulation server at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Simulation server disconnected")]
    Disconnected,

    #[error("Timed out after {timeout_secs}s waiting for the simulation server")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Simulation context not found: {id}")]
    ContextNotFound { id: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<atmlink_api::Error> for CoreError {
    fn from(err: atmlink_api::Error) -> Self {
        match err {
            atmlink_api::Error::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            atmlink_api::Error::UnsupportedScheme { scheme } => CoreError::Config {
                message: format!("Unsupported URL scheme '{scheme}' (expected ws or wss)"),
            },
            atmlink_api::Error::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason,
            },
            atmlink_api::Error::WebSocketClosed { .. } | atmlink_api::Error::NotConnected => {
                CoreError::Disconnected
            }
            atmlink_api::Error::ReconnectLimit { attempts } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("gave up after {attempts} reconnect attempts"),
            },
            atmlink_api::Error::Deserialization { message, .. } => {
                CoreError::Protocol { message }
            }
            atmlink_api::Error::Serialization(e) => CoreError::Internal(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn websocket_errors_map_to_connection_variants() {
        let err = CoreError::from(atmlink_api::Error::WebSocketConnect("refused".into()));
        assert!(matches!(err, CoreError::ConnectionFailed { ref reason, .. } if reason == "refused"));

        let err = CoreError::from(atmlink_api::Error::WebSocketClosed {
            code: 1006,
            reason: "abnormal".into(),
        });
        assert!(matches!(err, CoreError::Disconnected));
    }

    #[test]
    fn payload_errors_map_to_protocol() {
        let err = CoreError::from(atmlink_api::Error::Deserialization {
            message: "siminfo: invalid type".into(),
            body: "{}".into(),
        });
        assert_eq!(err.to_string(), "Protocol error: siminfo: invalid type");
    }
}
