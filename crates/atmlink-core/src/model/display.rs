// ── Display preferences carried through the store ──

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Per-kind shape rendering toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShapeDisplayOptions {
    pub show_polygons: bool,
    pub show_polylines: bool,
    pub fill_polygons: bool,
    pub show_labels: bool,
}

impl Default for ShapeDisplayOptions {
    fn default() -> Self {
        Self {
            show_polygons: true,
            show_polylines: true,
            fill_polygons: true,
            show_labels: false,
        }
    }
}

/// UI configuration (colours, units, visibility toggles). The core stores
/// and hands it back unchanged; its layout belongs to the front end.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayOptions(pub Value);

impl DisplayOptions {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}
