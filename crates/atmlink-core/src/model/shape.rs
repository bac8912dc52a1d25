// ── Named geometric shapes ──

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// A `[lat, lng]` pair in decimal degrees.
pub type Coordinate = [f64; 2];

pub const DEFAULT_POLYGON_COLOR: &str = "#0000ff";
pub const DEFAULT_POLYLINE_COLOR: &str = "#00ff00";
pub const DEFAULT_POLYLINE_WIDTH: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ShapeKind {
    Polygon,
    Polyline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolygonStyle {
    pub stroke_color: String,
    /// `None` draws the outline only.
    pub fill_color: Option<String>,
}

impl Default for PolygonStyle {
    fn default() -> Self {
        Self {
            stroke_color: DEFAULT_POLYGON_COLOR.into(),
            fill_color: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Geometry {
    Polygon {
        coordinates: Vec<Coordinate>,
        style: PolygonStyle,
    },
    Polyline {
        coordinates: Vec<Coordinate>,
        color: String,
        width: f64,
    },
}

impl Geometry {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Self::Polygon { .. } => ShapeKind::Polygon,
            Self::Polyline { .. } => ShapeKind::Polyline,
        }
    }

    pub fn coordinates(&self) -> &[Coordinate] {
        match self {
            Self::Polygon { coordinates, .. } | Self::Polyline { coordinates, .. } => coordinates,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coordinates().is_empty()
    }
}

/// A named overlay, unique by `name` within the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shape {
    pub name: String,
    /// Simulation context that produced the shape, if known.
    pub context_id: Option<String>,
    pub visible: bool,
    pub geometry: Geometry,
}

impl Shape {
    pub fn polygon(name: impl Into<String>, coordinates: Vec<Coordinate>) -> Self {
        Self {
            name: name.into(),
            context_id: None,
            visible: true,
            geometry: Geometry::Polygon {
                coordinates,
                style: PolygonStyle::default(),
            },
        }
    }

    pub fn polyline(name: impl Into<String>, coordinates: Vec<Coordinate>) -> Self {
        Self {
            name: name.into(),
            context_id: None,
            visible: true,
            geometry: Geometry::Polyline {
                coordinates,
                color: DEFAULT_POLYLINE_COLOR.into(),
                width: DEFAULT_POLYLINE_WIDTH,
            },
        }
    }

    pub fn with_context(mut self, context_id: impl Into<String>) -> Self {
        self.context_id = Some(context_id.into());
        self
    }

    pub fn kind(&self) -> ShapeKind {
        self.geometry.kind()
    }
}
