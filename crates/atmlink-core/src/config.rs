// ── Runtime connection configuration ──
//
// These types describe *how* to reach a simulation server. They never
// touch disk; the CLI builds a `ClientConfig` (usually from a profile)
// and hands it in.

use std::time::Duration;

use atmlink_api::ReconnectConfig;
use url::Url;

/// Silence after which the simulation layer is considered gone.
pub const DATA_TIMEOUT: Duration = Duration::from_millis(5000);

/// Grace period before a fresh session reports "never connected".
pub const INITIAL_CHECK_DELAY: Duration = Duration::from_millis(500);

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration for a single simulation server connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// WebSocket endpoint, e.g. `ws://localhost:8082/ws`.
    pub url: Url,
    /// Human-readable server address shown in status output.
    pub server_address: String,
    /// Reconnect policy for the transport.
    pub reconnect: ReconnectConfig,
    /// Client keep-alive cadence. The server may override it at runtime.
    pub heartbeat_interval: Duration,
    /// How long callers wait for the transport before giving up.
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Defaults for everything except the endpoint.
    pub fn new(url: Url) -> Self {
        let server_address = server_address_of(&url);
        Self {
            url,
            server_address,
            reconnect: ReconnectConfig {
                max_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
                ..ReconnectConfig::default()
            },
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }
}

/// `host:port` of a URL, falling back to the full URL.
fn server_address_of(url: &Url) -> String {
    match (url.host_str(), url.port_or_known_default()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_owned(),
        _ => url.to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_url() {
        let config = ClientConfig::new(Url::parse("ws://10.0.0.5:8082/ws").unwrap());
        assert_eq!(config.server_address, "10.0.0.5:8082");
        assert_eq!(config.reconnect.max_attempts, 10);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
    }

    #[test]
    fn known_default_port_is_filled_in() {
        let config = ClientConfig::new(Url::parse("wss://sim.example.org/ws").unwrap());
        assert_eq!(config.server_address, "sim.example.org:443");
    }
}
