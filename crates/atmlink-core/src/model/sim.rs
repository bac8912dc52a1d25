// ── Simulation clock and traffic ──

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Engine run state as reported in the simulation tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SimState {
    #[default]
    Init,
    Hold,
    Operate,
    End,
    Unknown,
}

impl From<i32> for SimState {
    fn from(code: i32) -> Self {
        match code {
            0 => Self::Init,
            1 => Self::Hold,
            2 => Self::Operate,
            3 => Self::End,
            _ => Self::Unknown,
        }
    }
}

/// One simulation clock tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimTick {
    /// Speed-up relative to wall-clock time.
    pub speed: f64,
    /// Step size in seconds.
    pub time_step: f64,
    /// Elapsed simulation time in seconds.
    pub sim_time: f64,
    /// Simulated UTC clock, preformatted by the server.
    pub utc: String,
    pub aircraft_count: u32,
    pub state: SimState,
    pub scenario: String,
    pub context_id: Option<String>,
}

/// A single tracked aircraft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Aircraft {
    pub id: String,
    pub lat: f64,
    pub lon: f64,
    /// Metres.
    pub altitude: f64,
    /// True airspeed, m/s.
    pub true_airspeed: f64,
    /// Degrees.
    pub track: f64,
    /// m/s.
    pub vertical_speed: f64,
    pub aircraft_type: Option<String>,
    pub in_conflict: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictCounts {
    pub current_conflicts: u32,
    pub total_conflicts: u32,
    pub current_losses: u32,
    pub total_losses: u32,
}

/// The latest batch of all tracked aircraft.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub aircraft: Vec<Aircraft>,
    pub conflicts: ConflictCounts,
}

impl EntitySet {
    pub fn get(&self, id: &str) -> Option<&Aircraft> {
        self.aircraft.iter().find(|a| a.id == id)
    }

    pub fn len(&self) -> usize {
        self.aircraft.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aircraft.is_empty()
    }
}

/// A line of simulation console output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EchoLine {
    pub text: String,
    /// 0 = normal; higher is more severe.
    pub flags: i32,
    pub sender: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// The server's verdict on a stack command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub command: String,
    pub success: bool,
    pub received_at: DateTime<Utc>,
}

/// One waypoint on an aircraft route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub name: Option<String>,
    /// `[lat, lon]`.
    pub position: [f64; 2],
    /// Metres; `None` when unconstrained.
    pub altitude: Option<f64>,
    /// m/s; `None` when unconstrained.
    pub speed: Option<f64>,
}

/// Flight plan of a single aircraft.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub aircraft_id: String,
    /// `[lat, lon]` of the aircraft when the route was sent.
    pub position: [f64; 2],
    /// Index into `waypoints` of the leg being flown.
    pub active_waypoint: Option<usize>,
    pub waypoints: Vec<Waypoint>,
}

impl Route {
    pub fn active(&self) -> Option<&Waypoint> {
        self.active_waypoint.and_then(|i| self.waypoints.get(i))
    }
}
