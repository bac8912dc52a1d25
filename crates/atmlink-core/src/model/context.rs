// ── Simulation contexts and server status ──

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// One addressable simulation instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextNode {
    pub id: String,
    pub number: u32,
    pub server_id: String,
    /// Scenario name, or `"init"` before a scenario is loaded.
    pub status: String,
    /// Simulation time as `HH:MM:SS`.
    pub sim_time: String,
}

/// All known contexts, keyed by id, plus the servers hosting them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextTopology {
    pub nodes: BTreeMap<String, ContextNode>,
    pub servers: Vec<String>,
}

impl ContextTopology {
    pub fn get(&self, id: &str) -> Option<&ContextNode> {
        self.nodes.get(id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// Lifecycle of the simulation server process, as far as the client knows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Starting,
    Stopping,
}
