use crate::error::DocsError;
use crate::sexpr::{self, Number, SExpr};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// One physical layer of the board stackup, in document order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LayerStackEntry {
    #[serde(rename = "Layer")]
    pub index: usize,
    #[serde(rename = "Name")]
    pub name: Option<String>,
    #[serde(rename = "Material")]
    pub material: Option<String>,
    #[serde(rename = "Thickness")]
    pub thickness: Option<Number>,
    #[serde(rename = "Color")]
    pub color: Option<String>,
}

pub const STACKUP_HEADERS: [&str; 5] = ["Layer", "Name", "Material", "Thickness", "Color"];

/// Walk `setup/stackup` and collect its `layer` entries.
///
/// A document without a setup or stackup block yields an empty list. A
/// stackup block with no layers means the physical stackup was never
/// configured, which is reported as a configuration error.
pub fn extract(root: &SExpr) -> Result<Vec<LayerStackEntry>, DocsError> {
    let Some(setup) = root.find("setup") else {
        return Ok(Vec::new());
    };
    let Some(stackup) = setup.find("stackup") else {
        return Ok(Vec::new());
    };

    let layers: Vec<LayerStackEntry> = stackup
        .find_all("layer")
        .into_iter()
        .enumerate()
        .map(|(i, layer)| parse_layer(i + 1, layer))
        .collect();

    if layers.is_empty() {
        return Err(DocsError::Configuration(
            "Configure the PCB stack: the board stackup has no layers".to_string(),
        ));
    }
    Ok(layers)
}

/// Parse design-file text and extract its stackup.
pub fn extract_from_text(text: &str) -> Result<Vec<LayerStackEntry>, DocsError> {
    extract(&sexpr::parse(text)?)
}

fn parse_layer(index: usize, layer: &SExpr) -> LayerStackEntry {
    let mut entry = LayerStackEntry {
        index,
        name: None,
        material: None,
        thickness: None,
        color: None,
    };

    for property in layer.children() {
        let Some(first) = property.children().first() else {
            continue;
        };
        match property.tag() {
            Some("type") if entry.name.is_none() => entry.name = first.as_text(),
            Some("color") if entry.color.is_none() => entry.color = first.as_text(),
            Some("material") if entry.material.is_none() => entry.material = first.as_text(),
            Some("thickness") if entry.thickness.is_none() => {
                entry.thickness = first.as_number()
            }
            _ => {}
        }
    }
    entry
}

/// Document revision from a `property "VERSION" "<rev>"` text field.
pub fn document_revision(text: &str) -> Option<String> {
    static VERSION: OnceLock<Regex> = OnceLock::new();
    let re = VERSION.get_or_init(|| {
        Regex::new(r#"property "VERSION" "([^"]+)""#).expect("static regex")
    });
    text.lines()
        .find_map(|line| re.captures(line))
        .map(|caps| caps[1].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const FOUR_LAYERS: &str = r#"(kicad_pcb (version 20221018)
  (setup
    (stackup
      (layer "F.SilkS" (type "Top Silk Screen") (color "White"))
      (layer "F.Cu" (type "copper") (thickness 0.035))
      (layer "dielectric 1" (type "core") (thickness 1.51) (material "FR4") (epsilon_r 4.5))
      (layer "B.Cu" (type "copper") (thickness 0.035) (type "ignored"))
      (copper_finish "None")
    )
    (pad_to_mask_clearance 0)
  )
)"#;

    #[test]
    fn test_four_layers_in_document_order() {
        let layers = extract_from_text(FOUR_LAYERS).unwrap();
        assert_eq!(layers.len(), 4);
        let indices: Vec<usize> = layers.iter().map(|l| l.index).collect();
        assert_eq!(indices, vec![1, 2, 3, 4]);

        assert_eq!(layers[0].name.as_deref(), Some("Top Silk Screen"));
        assert_eq!(layers[0].color.as_deref(), Some("White"));
        assert_eq!(layers[0].thickness, None);

        assert_eq!(layers[2].material.as_deref(), Some("FR4"));
        assert_eq!(layers[2].thickness, Some(Number::Float(1.51)));

        // first value wins
        assert_eq!(layers[3].name.as_deref(), Some("copper"));
    }

    #[test]
    fn test_empty_stackup_is_configuration_error() {
        let err = extract_from_text("(kicad_pcb (setup (stackup (copper_finish \"None\"))))")
            .unwrap_err();
        assert!(matches!(err, DocsError::Configuration(_)));
    }

    #[test]
    fn test_missing_setup_is_empty() {
        let layers = extract_from_text("(kicad_pcb (version 20221018) (general (thickness 1.6)))")
            .unwrap();
        assert!(layers.is_empty());
    }

    #[test]
    fn test_setup_without_stackup_is_empty() {
        let layers = extract_from_text("(kicad_pcb (setup (pad_to_mask_clearance 0)))").unwrap();
        assert!(layers.is_empty());
    }

    #[test]
    fn test_parse_error_propagates() {
        let err = extract_from_text("(kicad_pcb (setup (stackup)").unwrap_err();
        assert!(matches!(err, DocsError::Structural(_)));
    }

    #[test]
    fn test_document_revision() {
        let text = "(kicad_pcb\n  (property \"VERSION\" \"1.3\")\n)";
        assert_eq!(document_revision(text).as_deref(), Some("1.3"));
        assert_eq!(document_revision("(kicad_pcb)"), None);
        assert_eq!(document_revision("(property \"VERSION\" \"\")"), None);
    }
}
