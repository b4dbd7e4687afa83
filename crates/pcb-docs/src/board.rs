//! Read-only query interface over a host board model.
//!
//! The record builder and the pipeline only see boards through these
//! traits. Differences between host versions (how orientation is exposed,
//! which flags exist) are resolved once when the adapter is built, so
//! callers never check capabilities themselves.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Native board units per millimeter.
pub const NM_PER_MM: f64 = 1_000_000.0;

/// Footprint orientation as the host exposes it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Orientation {
    /// Host offers a direct degrees accessor.
    Degrees(f64),
    /// Older hosts report tenths of a degree.
    Tenths(f64),
}

impl Orientation {
    pub fn degrees(self) -> f64 {
        match self {
            Orientation::Degrees(d) => d,
            Orientation::Tenths(t) => t / 10.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Bottom,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Top => "top",
            Side::Bottom => "bottom",
        }
    }

    /// Side of a footprint placed on the given copper layer.
    pub fn from_layer(layer: &str) -> Option<Side> {
        match layer {
            "F.Cu" => Some(Side::Top),
            "B.Cu" => Some(Side::Bottom),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Attributes {
    pub exclude_from_pos_files: bool,
    pub exclude_from_bom: bool,
}

/// Library-qualified footprint identifier, e.g. `Resistor_SMD:R_0402_1005Metric`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FootprintId {
    pub library: String,
    pub name: String,
}

impl FootprintId {
    pub fn parse(s: &str) -> Self {
        match s.split_once(':') {
            Some((library, name)) => Self {
                library: library.to_string(),
                name: name.to_string(),
            },
            None => Self {
                library: String::new(),
                name: s.to_string(),
            },
        }
    }

    pub fn qualified(&self) -> String {
        if self.library.is_empty() {
            self.name.clone()
        } else {
            format!("{}:{}", self.library, self.name)
        }
    }
}

pub trait Footprint {
    fn reference(&self) -> &str;
    fn value(&self) -> &str;
    fn fpid(&self) -> &FootprintId;
    /// Position in native units (nanometers), host axes (Y grows downward).
    fn position(&self) -> (i64, i64);
    fn orientation(&self) -> Orientation;
    fn side(&self) -> Option<Side>;
    fn attributes(&self) -> Attributes;
    /// Text of a named footprint field, if the field exists.
    fn field(&self, name: &str) -> Option<&str>;
}

pub trait Board {
    fn file_path(&self) -> &Path;
    /// Raw design-file text, used for stackup and revision scans.
    fn design_text(&self) -> &str;
    /// Auxiliary (drill/place file) origin in native units.
    fn aux_origin(&self) -> (i64, i64);
    fn footprints(&self) -> Vec<&dyn Footprint>;
    fn is_layer_enabled(&self, layer: &str) -> bool;

    /// File stem of the board, used to name every artifact.
    fn project_name(&self) -> String {
        self.file_path()
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "board".to_string())
    }

    fn project_dir(&self) -> PathBuf {
        self.file_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }
}

/// A footprint snapshot owned by the adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedFootprint {
    pub reference: String,
    pub value: String,
    pub fpid: FootprintId,
    pub position: (i64, i64),
    pub orientation: Orientation,
    pub side: Option<Side>,
    pub attributes: Attributes,
    pub fields: HashMap<String, String>,
}

impl PlacedFootprint {
    pub fn new(reference: &str, fpid: &str) -> Self {
        Self {
            reference: reference.to_string(),
            value: String::new(),
            fpid: FootprintId::parse(fpid),
            position: (0, 0),
            orientation: Orientation::Degrees(0.0),
            side: Some(Side::Top),
            attributes: Attributes::default(),
            fields: HashMap::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: &str) -> Self {
        self.fields.insert(name.to_string(), value.to_string());
        self
    }
}

impl Footprint for PlacedFootprint {
    fn reference(&self) -> &str {
        &self.reference
    }

    fn value(&self) -> &str {
        &self.value
    }

    fn fpid(&self) -> &FootprintId {
        &self.fpid
    }

    fn position(&self) -> (i64, i64) {
        self.position
    }

    fn orientation(&self) -> Orientation {
        self.orientation
    }

    fn side(&self) -> Option<Side> {
        self.side
    }

    fn attributes(&self) -> Attributes {
        self.attributes
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}
