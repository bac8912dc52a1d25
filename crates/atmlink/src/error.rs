//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use atmlink_config::ConfigError;
use atmlink_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not connect to simulation server at {url}")]
    #[diagnostic(
        code(atmlink::connection_failed),
        help(
            "Check that the server is running and reachable.\n\
             URL: {url}\n\
             Reason: {reason}"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Simulation server disconnected")]
    #[diagnostic(code(atmlink::disconnected))]
    Disconnected,

    #[error("Could not send {what}: not connected")]
    #[diagnostic(
        code(atmlink::not_sent),
        help("The connection dropped before the message went out. Try again.")
    )]
    NotSent { what: String },

    // ── Timeout ──────────────────────────────────────────────────────
    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(atmlink::timeout),
        help("Increase the timeout with --timeout or check that a simulation is running.")
    )]
    Timeout { seconds: u64 },

    // ── Simulation ───────────────────────────────────────────────────
    #[error("Simulation context '{id}' not found")]
    #[diagnostic(
        code(atmlink::context_not_found),
        help("Run: atmlink contexts to see available contexts")
    )]
    ContextNotFound { id: String },

    #[error("Command failed: {command}")]
    #[diagnostic(code(atmlink::command_failed))]
    CommandFailed { command: String },

    #[error("Protocol error: {message}")]
    #[diagnostic(code(atmlink::protocol))]
    Protocol { message: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(atmlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(atmlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: atmlink config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No server configured")]
    #[diagnostic(
        code(atmlink::no_config),
        help(
            "Pass --url, or create a config with: atmlink config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Configuration file already exists at {path}")]
    #[diagnostic(code(atmlink::config_exists), help("Use --force to overwrite it."))]
    ConfigExists { path: String },

    #[error(transparent)]
    #[diagnostic(code(atmlink::config))]
    Config(Box<ConfigError>),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not encode output: {0}")]
    #[diagnostic(code(atmlink::json))]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    #[diagnostic(code(atmlink::internal))]
    Internal(String),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::Disconnected | Self::NotSent { .. } => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::ContextNotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. }
            | Self::ProfileNotFound { .. }
            | Self::NoConfig { .. }
            | Self::ConfigExists { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Disconnected => CliError::Disconnected,
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::ContextNotFound { id } => CliError::ContextNotFound { id },
            CoreError::Protocol { message } => CliError::Protocol { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::ProfileNotFound { name } => CliError::ProfileNotFound {
                name,
                available: String::new(),
            },
            ConfigError::Io(e) => CliError::Io(e),
            other => CliError::Config(Box::new(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_error_class() {
        let err = CliError::from(CoreError::ConnectionFailed {
            url: "ws://localhost:8082/ws".into(),
            reason: "refused".into(),
        });
        assert_eq!(err.exit_code(), exit_code::CONNECTION);

        let err = CliError::from(CoreError::Timeout { timeout_secs: 3 });
        assert_eq!(err.exit_code(), exit_code::TIMEOUT);
        assert_eq!(err.to_string(), "Timed out after 3s");

        let err = CliError::from(ConfigError::Validation {
            field: "url".into(),
            reason: "bad".into(),
        });
        assert_eq!(err.exit_code(), exit_code::USAGE);

        let err = CliError::CommandFailed {
            command: "CRE".into(),
        };
        assert_eq!(err.exit_code(), exit_code::GENERAL);
    }
}
