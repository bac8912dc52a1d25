use thiserror::Error;

/// Top-level error type for the `atmlink-api` crate.
///
/// Covers every failure mode of the wire layer: endpoint parsing, the
/// WebSocket connection itself, and payload (de)serialization.
/// `atmlink-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Endpoint ────────────────────────────────────────────────────
    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The URL parsed but is not a `ws://` or `wss://` endpoint.
    #[error("Unsupported URL scheme '{scheme}' (expected ws or wss)")]
    UnsupportedScheme { scheme: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// Outbound message attempted while the transport is down.
    #[error("Not connected to the simulation server")]
    NotConnected,

    /// Reconnection gave up after the configured number of attempts.
    #[error("Gave up reconnecting after {attempts} attempts")]
    ReconnectLimit { attempts: u32 },

    // ── Data ────────────────────────────────────────────────────────
    /// Inbound frame could not be decoded, with the raw text for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    /// Outbound message could not be encoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } | Self::NotConnected
        )
    }

    /// Returns `true` if the error came from a malformed payload rather
    /// than from the connection.
    pub fn is_protocol(&self) -> bool {
        matches!(self, Self::Deserialization { .. } | Self::Serialization(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(Error::WebSocketConnect("refused".into()).is_transient());
        assert!(Error::NotConnected.is_transient());
        assert!(!Error::ReconnectLimit { attempts: 10 }.is_transient());
        assert!(
            !Error::UnsupportedScheme {
                scheme: "http".into()
            }
            .is_transient()
        );
    }

    #[test]
    fn protocol_classification() {
        let err = Error::Deserialization {
            message: "expected value".into(),
            body: "garbage".into(),
        };
        assert!(err.is_protocol());
        assert!(!Error::NotConnected.is_protocol());
    }
}
