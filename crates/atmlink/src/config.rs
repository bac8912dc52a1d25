//! CLI configuration: thin wrapper around `atmlink_config`.
//!
//! Adds the resolution that respects `GlobalOpts` overrides (--url,
//! --profile, --timeout, --session).

use std::sync::Arc;
use std::time::Duration;

use atmlink_config::{Config, FileSessionStore, Profile};
use atmlink_core::{Client, ClientConfig};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub use atmlink_config::{config_path, load_config, save_config_to};

/// Everything a connected command needs.
#[derive(Debug)]
pub struct Resolved {
    pub profile_name: Option<String>,
    pub client: ClientConfig,
}

impl Resolved {
    /// How long to wait for the server.
    pub fn timeout(&self) -> Duration {
        self.client.connect_timeout
    }
}

/// Translate config file + flags into a `ClientConfig`.
///
/// Precedence: `--url` over the profile URL, `--timeout` over the
/// profile/default timeout. A `--url` with no usable profile runs on
/// defaults alone.
pub fn resolve(global: &GlobalOpts, cfg: &Config) -> Result<Resolved, CliError> {
    let (profile_name, mut profile) = match cfg.resolve_profile(global.profile.as_deref()) {
        Ok((name, profile)) => (Some(name), profile.clone()),
        Err(_) if global.profile.is_none() && global.url.is_some() => (None, Profile::default()),
        Err(_) if global.profile.is_none() => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
        Err(_) => {
            return Err(CliError::ProfileNotFound {
                name: global.profile.clone().unwrap_or_default(),
                available: available_profiles(cfg),
            });
        }
    };

    if let Some(url) = &global.url {
        profile.url.clone_from(url);
    }
    if let Some(secs) = global.timeout {
        profile.timeout = Some(secs);
    }

    let client = atmlink_config::profile_to_client_config(&profile, &cfg.defaults)?;
    Ok(Resolved {
        profile_name,
        client,
    })
}

/// Build the client, backed by a session file when `--session` is given.
pub fn build_client(global: &GlobalOpts, config: ClientConfig) -> Result<Client, CliError> {
    let Some(id) = global.session.as_deref() else {
        return Ok(Client::new(config));
    };
    let store = FileSessionStore::for_session(&atmlink_config::session_dir(), id)?;
    tracing::debug!(path = %store.path().display(), "using session file");
    Ok(Client::with_session_store(config, Arc::new(store)))
}

fn available_profiles(cfg: &Config) -> String {
    if cfg.profiles.is_empty() {
        "(none)".into()
    } else {
        cfg.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
    }
}
