use crate::board::{
    Attributes, Board, Footprint, FootprintId, Orientation, PlacedFootprint, Side, NM_PER_MM,
};
use crate::error::DocsError;
use crate::sexpr::{self, SExpr};
use log::debug;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// A `.kicad_pcb` file loaded into the read-only board interface.
#[derive(Debug, Clone)]
pub struct KicadBoard {
    path: PathBuf,
    text: String,
    aux_origin: (i64, i64),
    layers: HashSet<String>,
    footprints: Vec<PlacedFootprint>,
}

/// Load and parse a KiCad board file.
pub fn load(path: &Path) -> Result<KicadBoard, DocsError> {
    let text = std::fs::read_to_string(path)?;
    from_text(path, text)
}

/// Build a board from design text already in memory.
pub fn from_text(path: &Path, text: String) -> Result<KicadBoard, DocsError> {
    let root = sexpr::parse(&text)?;

    if root.tag() != Some("kicad_pcb") {
        return Err(DocsError::Configuration(format!(
            "{} is not a kicad_pcb file",
            path.display()
        )));
    }

    let layers = parse_layers(&root);
    let aux_origin = root
        .find("setup")
        .and_then(|setup| setup.find("aux_axis_origin"))
        .map(|node| {
            (
                to_nm(node.f64_at(0).unwrap_or(0.0)),
                to_nm(node.f64_at(1).unwrap_or(0.0)),
            )
        })
        .unwrap_or((0, 0));

    // KiCad 6+ writes "footprint", older boards "module"
    let footprints: Vec<PlacedFootprint> = root
        .find_all("footprint")
        .into_iter()
        .chain(root.find_all("module"))
        .map(parse_footprint)
        .collect();

    debug!(
        "loaded {} with {} footprints, {} layers",
        path.display(),
        footprints.len(),
        layers.len()
    );

    Ok(KicadBoard {
        path: path.to_path_buf(),
        text,
        aux_origin,
        layers,
        footprints,
    })
}

fn to_nm(mm: f64) -> i64 {
    (mm * NM_PER_MM).round() as i64
}

// ─── Layer handling ──────────────────────────────────────────────────

fn parse_layers(root: &SExpr) -> HashSet<String> {
    let mut names = HashSet::new();
    if let Some(layers_node) = root.find("layers") {
        for child in layers_node.children() {
            let items = child.items();
            if items.len() >= 3 {
                if let Some(name) = items[1].as_str() {
                    names.insert(name.to_string());
                }
                if let Some(user_name) = items.get(3).and_then(SExpr::as_str) {
                    names.insert(user_name.to_string());
                }
            }
        }
    }
    names
}

fn get_layer_name(node: &SExpr) -> String {
    node.find("layer")
        .and_then(|l| l.atom_at(0))
        .unwrap_or("")
        .to_string()
}

// ─── Footprint parsing ──────────────────────────────────────────────

fn parse_footprint(node: &SExpr) -> PlacedFootprint {
    let at_node = node.find("at");
    let fp_x = at_node.and_then(|n| n.f64_at(0)).unwrap_or(0.0);
    let fp_y = at_node.and_then(|n| n.f64_at(1)).unwrap_or(0.0);
    let fp_angle = at_node.and_then(|n| n.f64_at(2)).unwrap_or(0.0);

    let fp_layer = get_layer_name(node);
    let fpid = FootprintId::parse(node.atom_at(0).unwrap_or(""));

    let mut reference = String::new();
    let mut value = String::new();
    let mut fields: HashMap<String, String> = HashMap::new();
    let mut attributes = Attributes::default();

    for child in node.children() {
        match child.tag() {
            Some("fp_text") => {
                let text_val = child.atom_at(1).unwrap_or("");
                match child.atom_at(0).unwrap_or("") {
                    "reference" => reference = text_val.to_string(),
                    "value" => value = text_val.to_string(),
                    _ => {}
                }
            }
            Some("property") => {
                let prop_name = child.atom_at(0).unwrap_or("");
                let prop_val = child
                    .children()
                    .get(1)
                    .and_then(SExpr::as_text)
                    .unwrap_or_default();
                match prop_name {
                    "Reference" => reference = prop_val,
                    "Value" => value = prop_val,
                    _ => {
                        fields.insert(prop_name.to_string(), prop_val);
                    }
                }
            }
            Some("attr") => {
                for flag in child.children().iter().filter_map(SExpr::as_str) {
                    match flag {
                        "exclude_from_pos_files" => attributes.exclude_from_pos_files = true,
                        "exclude_from_bom" => attributes.exclude_from_bom = true,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    PlacedFootprint {
        reference,
        value,
        fpid,
        position: (to_nm(fp_x), to_nm(fp_y)),
        orientation: Orientation::Degrees(fp_angle),
        side: Side::from_layer(&fp_layer),
        attributes,
        fields,
    }
}

impl Board for KicadBoard {
    fn file_path(&self) -> &Path {
        &self.path
    }

    fn design_text(&self) -> &str {
        &self.text
    }

    fn aux_origin(&self) -> (i64, i64) {
        self.aux_origin
    }

    fn footprints(&self) -> Vec<&dyn Footprint> {
        self.footprints.iter().map(|f| f as &dyn Footprint).collect()
    }

    fn is_layer_enabled(&self, layer: &str) -> bool {
        self.layers.contains(layer)
    }
}
