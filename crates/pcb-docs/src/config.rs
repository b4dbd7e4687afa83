use crate::error::DocsError;
use ini::Ini;
use log::{debug, info, warn};
use std::path::Path;

// ─── Artifact tree layout ──────────────────────────────────────────

pub const CONFIG_FILE_NAME: &str = "docs.config.ini";
pub const ROTATIONS_FILE_NAME: &str = "rotations.cf";
pub const TEMP_DIR: &str = "temp";
pub const LAYER_PLOT_DIR: &str = "temp";
pub const GERBER_DIR: &str = "Gerber";
pub const DRILL_DIR: &str = "Drill";
pub const PLACEMENT_DIR: &str = "Pick Place";
pub const PLACEMENT_FILE: &str = "positions.csv";
pub const BOM_DIR: &str = "BOM";
pub const STACKUP_DIR: &str = "Report Board Stack";
pub const GERBER_ARCHIVE: &str = "gerber.zip";
pub const JOB_FILE: &str = "Job.pdf";
pub const OUTPUT_PREFIX: &str = "production";

// ─── docs.config.ini ───────────────────────────────────────────────

/// Run options read from the `[main]` section of `docs.config.ini`.
#[derive(Debug, Clone, PartialEq)]
pub struct DocsConfig {
    pub scale: f64,
    pub delete_single_page_files: bool,
    pub del_temp_files: bool,
    pub create_svg: bool,
}

impl Default for DocsConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            delete_single_page_files: true,
            del_temp_files: true,
            create_svg: false,
        }
    }
}

impl DocsConfig {
    /// Load the config file if it exists; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, DocsError> {
        if !path.exists() {
            info!("no {} found, using defaults", path.display());
            return Ok(Self::default());
        }
        let ini = Ini::load_from_file(path)?;
        let config = Self::from_ini(&ini);
        debug!("loaded {}: {config:?}", path.display());
        Ok(config)
    }

    pub fn from_ini(ini: &Ini) -> Self {
        let mut config = Self::default();
        let Some(main) = ini.section(Some("main")) else {
            return config;
        };

        if let Some(scale) = main.get("scale") {
            match scale.trim().parse::<f64>() {
                Ok(s) => config.scale = s,
                Err(e) => warn!("invalid plot scale {scale:?}, using 1: {e}"),
            }
        }
        // only the literal "True" enables a flag
        if let Some(v) = main.get("delete_single_page_files") {
            config.delete_single_page_files = v == "True";
        }
        if let Some(v) = main.get("del_temp_files") {
            config.del_temp_files = v == "True";
        }
        if let Some(v) = main.get("create_svg") {
            config.create_svg = v == "True";
        }
        config
    }
}

// ─── Layer table ───────────────────────────────────────────────────

const NAMED_LAYERS: &[(&str, &str, u8)] = &[
    ("F.Cu", "F.Cu", 0),
    ("B.Cu", "B.Cu", 31),
    ("B.Adhesive", "B.Adhes", 32),
    ("F.Adhesive", "F.Adhes", 33),
    ("B.Paste", "B.Paste", 34),
    ("F.Paste", "F.Paste", 35),
    ("B.Silkscreen", "B.SilkS", 36),
    ("F.Silkscreen", "F.SilkS", 37),
    ("B.Mask", "B.Mask", 38),
    ("F.Mask", "F.Mask", 39),
    ("User.Drawings", "Dwgs.User", 40),
    ("User.Comments", "Cmts.User", 41),
    ("User.Eco1", "Eco1.User", 42),
    ("User.Eco2", "Eco2.User", 43),
    ("Edge.Cuts", "Edge.Cuts", 44),
    ("Margin", "Margin", 45),
    ("B.Courtyard", "B.CrtYd", 46),
    ("F.Courtyard", "F.CrtYd", 47),
    ("B.Fab", "B.Fab", 48),
    ("F.Fab", "F.Fab", 49),
];

const LAST_INNER_COPPER: u8 = 30;
const FIRST_USER_LAYER: u8 = 50;
const USER_LAYER_COUNT: u8 = 9;

/// Host layer id for a standard layer name (either naming generation).
pub fn layer_id(name: &str) -> Option<u8> {
    if let Some(&(_, _, id)) = NAMED_LAYERS
        .iter()
        .find(|(long, short, _)| *long == name || *short == name)
    {
        return Some(id);
    }
    if let Some(n) = name
        .strip_prefix("In")
        .and_then(|rest| rest.strip_suffix(".Cu"))
        .and_then(|n| n.parse::<u8>().ok())
    {
        return (1..=LAST_INNER_COPPER).contains(&n).then_some(n);
    }
    name.strip_prefix("User.")
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| (1..=USER_LAYER_COUNT).contains(n))
        .map(|n| FIRST_USER_LAYER + n - 1)
}

pub fn is_copper_layer(id: u8) -> bool {
    id <= 31
}

/// Both accepted spellings of a layer; the board may list either one.
pub fn layer_aliases(name: &str) -> Vec<&str> {
    match NAMED_LAYERS
        .iter()
        .find(|(long, short, _)| *long == name || *short == name)
    {
        Some((long, short, _)) if long != short => vec![*long, *short],
        _ => vec![name],
    }
}

fn resolve_layer(name: &str) -> Result<u8, DocsError> {
    layer_id(name).ok_or_else(|| DocsError::Configuration(format!("unknown layer name '{name}'")))
}

// ─── Plot plan ─────────────────────────────────────────────────────

/// One gerber output: the layer and the description embedded in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct GerberLayer {
    pub name: String,
    pub id: u8,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlotSpec {
    pub name: String,
    pub id: u8,
    /// `#rrggbb`; black layers are used as plotted.
    pub color: String,
    pub is_frame: bool,
    pub is_negative: bool,
}

impl LayerPlotSpec {
    pub fn is_black(&self) -> bool {
        self.color.eq_ignore_ascii_case("#000000")
    }
}

/// A named assembly drawing composed of several colored layer plots.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotTemplate {
    pub name: String,
    pub mirrored: bool,
    pub tented: bool,
    pub frame_layer: Option<String>,
    /// Topmost layer first.
    pub layers: Vec<LayerPlotSpec>,
}

impl PlotTemplate {
    /// Build a template from a comma-separated layer list written topmost
    /// layer first. Layers without a color are plotted black.
    pub fn new(
        name: &str,
        mirrored: bool,
        tented: bool,
        enabled_layers: &str,
        frame_layer: Option<&str>,
        colors: &[(&str, &str)],
        negative: &[&str],
    ) -> Result<Self, DocsError> {
        let mut layers = Vec::new();
        for layer in enabled_layers.split(',').filter(|l| !l.is_empty()) {
            let color = colors
                .iter()
                .find(|(n, _)| *n == layer)
                .map(|(_, c)| c.to_string())
                .unwrap_or_else(|| "#000000".to_string());
            layers.push(LayerPlotSpec {
                name: layer.to_string(),
                id: resolve_layer(layer)?,
                color,
                is_frame: frame_layer == Some(layer),
                is_negative: negative.contains(&layer),
            });
        }
        Ok(Self {
            name: name.to_string(),
            mirrored,
            tented,
            frame_layer: frame_layer.map(str::to_string),
            layers,
        })
    }
}

/// Everything a fabrication house expects, fixed for the whole run.
#[derive(Debug, Clone, PartialEq)]
pub struct FabPreset {
    pub gerber_plan: Vec<GerberLayer>,
    pub templates: Vec<PlotTemplate>,
}

const JLCPCB_GERBERS: &[(&str, &str)] = &[
    ("F.Cu", "Top Layer"),
    ("B.Cu", "Bottom Layer"),
    ("In1.Cu", "Internal plane 1"),
    ("In2.Cu", "Internal plane 2"),
    ("In3.Cu", "Internal plane 3"),
    ("In4.Cu", "Internal plane 4"),
    ("F.SilkS", "Top Silkscreen"),
    ("B.SilkS", "Bottom Silkscreen"),
    ("F.Mask", "Top Soldermask"),
    ("B.Mask", "Bottom Soldermask"),
    ("F.Paste", "Top Paste (Stencil)"),
    ("B.Paste", "Bottom Paste (Stencil)"),
    ("Edge.Cuts", "Board Outline"),
    ("User.Eco1", "User layer"),
    ("User.Eco2", "User layer"),
];

impl FabPreset {
    pub fn jlcpcb() -> Result<Self, DocsError> {
        let gerber_plan = JLCPCB_GERBERS
            .iter()
            .map(|(name, description)| {
                Ok(GerberLayer {
                    name: name.to_string(),
                    id: resolve_layer(name)?,
                    description: description.to_string(),
                })
            })
            .collect::<Result<Vec<_>, DocsError>>()?;

        let top = PlotTemplate::new(
            "Top",
            false,
            false,
            "User.1,F.Fab,F.Paste,F.Mask,Edge.Cuts,F.Silkscreen,User.9",
            Some("User.9"),
            &[
                ("F.Cu", "#F0F0F0"),
                ("F.Paste", "#00CD66"),
                ("F.Mask", "#3FD3F2"),
                ("Edge.Cuts", "#575757"),
            ],
            &[],
        )?;
        let bottom = PlotTemplate::new(
            "Bottom",
            true,
            false,
            "Edge.Cuts,B.Fab,B.Mask,B.Paste,B.Silkscreen,User.9,User.1",
            Some("User.9"),
            &[
                ("B.Cu", "#F0F0F0"),
                ("B.Paste", "#00CD66"),
                ("B.Mask", "#3FD3F2"),
                ("Edge.Cuts", "#575757"),
            ],
            &[],
        )?;

        Ok(Self {
            gerber_plan,
            templates: vec![top, bottom],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = DocsConfig::load(&dir.path().join(CONFIG_FILE_NAME)).unwrap();
        assert_eq!(config, DocsConfig::default());
        assert!(config.delete_single_page_files);
        assert!(!config.create_svg);
    }

    #[test]
    fn test_ini_values() {
        let ini = Ini::load_from_str(
            "[main]\nscale = 1.5\ndelete_single_page_files = False\ndel_temp_files = true\ncreate_svg = True\n",
        )
        .unwrap();
        let config = DocsConfig::from_ini(&ini);
        assert_eq!(config.scale, 1.5);
        assert!(!config.delete_single_page_files);
        // lowercase is not the literal "True"
        assert!(!config.del_temp_files);
        assert!(config.create_svg);
    }

    #[test]
    fn test_bad_scale_falls_back() {
        let ini = Ini::load_from_str("[main]\nscale = big\n").unwrap();
        assert_eq!(DocsConfig::from_ini(&ini).scale, 1.0);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[main]\ncreate_svg = True\n").unwrap();
        let config = DocsConfig::load(&path).unwrap();
        assert!(config.create_svg);
        assert_eq!(config.scale, 1.0);
    }

    #[test]
    fn test_layer_ids() {
        assert_eq!(layer_id("F.Cu"), Some(0));
        assert_eq!(layer_id("In4.Cu"), Some(4));
        assert_eq!(layer_id("B.Cu"), Some(31));
        assert_eq!(layer_id("F.Silkscreen"), Some(37));
        assert_eq!(layer_id("F.SilkS"), Some(37));
        assert_eq!(layer_id("Eco1.User"), Some(42));
        assert_eq!(layer_id("User.1"), Some(50));
        assert_eq!(layer_id("User.9"), Some(58));
        assert_eq!(layer_id("User.10"), None);
        assert_eq!(layer_id("In31.Cu"), None);
        assert_eq!(layer_id("Nope"), None);
        assert!(is_copper_layer(31));
        assert!(!is_copper_layer(37));
        assert_eq!(layer_aliases("F.SilkS"), vec!["F.Silkscreen", "F.SilkS"]);
        assert_eq!(layer_aliases("User.1"), vec!["User.1"]);
    }

    #[test]
    fn test_template_layers_topmost_first() {
        let t = PlotTemplate::new(
            "Top",
            false,
            false,
            "F.Mask,,Edge.Cuts,User.9",
            Some("User.9"),
            &[("F.Mask", "#3FD3F2")],
            &["F.Mask"],
        )
        .unwrap();
        let names: Vec<&str> = t.layers.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, vec!["F.Mask", "Edge.Cuts", "User.9"]);
        assert!(t.layers[2].is_frame);
        assert!(t.layers[2].is_black());
        assert_eq!(t.layers[0].color, "#3FD3F2");
        assert!(t.layers[0].is_negative);
        assert!(!t.layers[1].is_negative);
    }

    #[test]
    fn test_unknown_template_layer() {
        let err = PlotTemplate::new("X", false, false, "F.Nothing", None, &[], &[]).unwrap_err();
        assert!(matches!(err, DocsError::Configuration(msg) if msg.contains("F.Nothing")));
    }

    #[test]
    fn test_jlcpcb_preset() {
        let preset = FabPreset::jlcpcb().unwrap();
        assert_eq!(preset.gerber_plan.len(), 15);
        assert_eq!(preset.templates.len(), 2);
        assert_eq!(preset.templates[0].name, "Top");
        assert!(preset.templates[1].mirrored);
        let top: Vec<&str> = preset.templates[0]
            .layers
            .iter()
            .map(|l| l.name.as_str())
            .collect();
        assert_eq!(
            top,
            vec!["User.1", "F.Fab", "F.Paste", "F.Mask", "Edge.Cuts", "F.Silkscreen", "User.9"]
        );
        assert!(preset.templates[0].layers[6].is_frame);
    }
}
