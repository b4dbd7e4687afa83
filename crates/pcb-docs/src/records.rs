use crate::board::{Board, Footprint, Side, NM_PER_MM};
use crate::error::DocsError;
use crate::rotations::RotationDatabase;
use log::debug;
use regex::Regex;
use serde::{Serialize, Serializer};
use std::collections::HashMap;
use std::sync::OnceLock;

/// Designators containing this marker are kept out of written files.
pub const MASK_MARKER: &str = "**";

const ROTATION_OFFSET_KEYS: &[&str] = &["JLCPCB Rotation Offset", "JlcRotOffset", "JLCRotOffset"];
const POSITION_OFFSET_KEYS: &[&str] = &["JLCPCB Position Offset", "JlcPosOffset", "JLCPosOffset"];
const MFR_PART_NUMBER_KEYS: &[&str] = &["Mfr_Part_Number"];
const MFR_NAME_KEYS: &[&str] = &["Mfr_Name"];
const LCSC_PART_KEYS: &[&str] = &["LCSC_Part", "JLCPCB Part", "LCSC", "JLC", "MPN", "Mpn", "mpn"];
const LINK_KEYS: &[&str] = &["Link"];
const UNIT_PRICE_KEYS: &[&str] = &["Unit price"];

fn serialize_layer<S: Serializer>(side: &Option<Side>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(side.map(|side| side.as_str()).unwrap_or(""))
}

/// One row of the pick-and-place file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacementRecord {
    #[serde(rename = "Designator")]
    pub designator: String,
    #[serde(rename = "Mid X")]
    pub x: f64,
    #[serde(rename = "Mid Y")]
    pub y: f64,
    #[serde(rename = "Rotation")]
    pub rotation: f64,
    #[serde(rename = "Layer", serialize_with = "serialize_layer")]
    pub layer: Option<Side>,
}

/// One row of the bill of materials; rows sharing a part number are merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BomRecord {
    #[serde(rename = "Designator")]
    pub designator: String,
    #[serde(rename = "Footprint")]
    pub footprint: String,
    #[serde(rename = "Value")]
    pub value: String,
    #[serde(rename = "Mfr_Part_Number")]
    pub mfr_part_number: String,
    #[serde(rename = "Mfr_Name")]
    pub mfr_name: String,
    #[serde(rename = "Quantity")]
    pub quantity: u32,
    #[serde(rename = "LCSC_Part")]
    pub lcsc_part: String,
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Unit price")]
    pub unit_price: String,
    #[serde(rename = "Total price")]
    pub total_price: f64,
}

pub trait Masked {
    fn designator(&self) -> &str;

    fn is_masked(&self) -> bool {
        self.designator().contains(MASK_MARKER)
    }
}

impl Masked for PlacementRecord {
    fn designator(&self) -> &str {
        &self.designator
    }
}

impl Masked for BomRecord {
    fn designator(&self) -> &str {
        &self.designator
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Records {
    pub placements: Vec<PlacementRecord>,
    pub bom: Vec<BomRecord>,
}

/// Derives placement and BOM rows from the footprints of a board.
pub struct RecordBuilder<'a> {
    rotations: &'a RotationDatabase,
}

impl<'a> RecordBuilder<'a> {
    pub fn new(rotations: &'a RotationDatabase) -> Self {
        Self { rotations }
    }

    pub fn build(&self, board: &dyn Board) -> Result<Records, DocsError> {
        let mut footprints = board.footprints();
        footprints.sort_by(|a, b| a.reference().cmp(b.reference()));

        let mut placement_counts: HashMap<String, usize> = HashMap::new();
        for fp in &footprints {
            *placement_counts.entry(fp.reference().to_string()).or_default() += 1;
        }
        let mut bom_counts = placement_counts.clone();

        let origin = board.aux_origin();
        let mut records = Records::default();

        for fp in footprints {
            let attributes = fp.attributes();

            if !attributes.exclude_from_pos_files {
                let designator = disambiguate(&mut placement_counts, fp.reference());
                records
                    .placements
                    .push(self.placement(fp, designator, origin)?);
            }

            if !attributes.exclude_from_bom {
                let designator = disambiguate(&mut bom_counts, fp.reference());
                add_to_bom(&mut records.bom, fp, designator);
            }
        }

        debug!(
            "built {} placement rows and {} BOM rows",
            records.placements.len(),
            records.bom.len()
        );
        Ok(records)
    }

    fn placement(
        &self,
        fp: &dyn Footprint,
        designator: String,
        origin: (i64, i64),
    ) -> Result<PlacementRecord, DocsError> {
        let (px, py) = fp.position();
        let mid_x = (px - origin.0) as f64 / NM_PER_MM;
        let mid_y = (py - origin.1) as f64 * -1.0 / NM_PER_MM;

        let offset = match rotation_offset_field(fp)? {
            Some(offset) => offset,
            None => self.rotations.lookup(fp.fpid()),
        };
        let rotation = normalize_degrees(fp.orientation().degrees() + offset);

        // offsets are given in the footprint frame
        let (dx, dy) = position_offset_field(fp)?;
        let (rsin, rcos) = rotation.to_radians().sin_cos();
        let (dx, dy) = (dx * rcos - dy * rsin, dx * rsin + dy * rcos);

        Ok(PlacementRecord {
            designator,
            x: mid_x + dx,
            y: mid_y + dy,
            rotation,
            layer: fp.side(),
        })
    }
}

/// Wrap an angle into `[0, 360)`. `rem_euclid` alone rounds a tiny
/// negative angle up to exactly 360.
fn normalize_degrees(degrees: f64) -> f64 {
    let wrapped = degrees.rem_euclid(360.0);
    if wrapped >= 360.0 {
        0.0
    } else {
        wrapped
    }
}

/// Append the remaining duplicate count to a repeated designator and
/// count it down, so three `R1` become `R1_3`, `R1_2`, `R1`.
fn disambiguate(counts: &mut HashMap<String, usize>, reference: &str) -> String {
    match counts.get_mut(reference) {
        Some(remaining) if *remaining > 1 => {
            let designator = format!("{reference}_{remaining}");
            *remaining -= 1;
            designator
        }
        _ => reference.to_string(),
    }
}

fn add_to_bom(bom: &mut Vec<BomRecord>, fp: &dyn Footprint, designator: String) {
    let mfr_part_number = first_field(fp, MFR_PART_NUMBER_KEYS).to_string();

    if !mfr_part_number.is_empty() {
        if let Some(row) = bom
            .iter_mut()
            .find(|row| row.mfr_part_number == mfr_part_number)
        {
            row.designator.push_str(", ");
            row.designator.push_str(&designator);
            row.quantity += 1;
            row.total_price = f64::from(row.quantity) * to_float(&row.unit_price);
            return;
        }
    }

    let unit_price = first_field(fp, UNIT_PRICE_KEYS).to_string();
    bom.push(BomRecord {
        designator,
        footprint: normalize_footprint_name(&fp.fpid().name),
        value: fp.value().to_string(),
        mfr_part_number,
        mfr_name: first_field(fp, MFR_NAME_KEYS).to_string(),
        quantity: 1,
        lcsc_part: first_field(fp, LCSC_PART_KEYS).to_string(),
        link: first_field(fp, LINK_KEYS).to_string(),
        total_price: to_float(&unit_price),
        unit_price,
    })
}

/// First non-empty field among `keys`, or "" when none is set.
fn first_field<'f>(fp: &'f dyn Footprint, keys: &[&str]) -> &'f str {
    keys.iter()
        .filter_map(|key| fp.field(key))
        .map(str::trim)
        .find(|value| !value.is_empty())
        .unwrap_or("")
}

fn to_float(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

fn rotation_offset_field(fp: &dyn Footprint) -> Result<Option<f64>, DocsError> {
    let raw = first_field(fp, ROTATION_OFFSET_KEYS);
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>().map(Some).map_err(|_| {
        DocsError::Configuration(format!(
            "Rotation offset of {} is not a valid number: {raw:?}",
            fp.reference()
        ))
    })
}

fn position_offset_field(fp: &dyn Footprint) -> Result<(f64, f64), DocsError> {
    let raw = first_field(fp, POSITION_OFFSET_KEYS);
    if raw.is_empty() {
        return Ok((0.0, 0.0));
    }
    let mut parts = raw.split(',').map(|p| p.trim().parse::<f64>());
    match (parts.next(), parts.next()) {
        (Some(Ok(dx)), Some(Ok(dy))) => Ok((dx, dy)),
        _ => Err(DocsError::Configuration(format!(
            "Position offset of {} is not a valid pair of numbers: {raw:?}",
            fp.reference()
        ))),
    }
}

/// Collapse standard discrete footprint names (`R_0603_1608Metric`) to their
/// size code (`0603`); other names pass through untouched.
pub fn normalize_footprint_name(name: &str) -> String {
    static DISCRETE: OnceLock<Regex> = OnceLock::new();
    let re = DISCRETE.get_or_init(|| {
        Regex::new(r"^(\w*_SMD:)?\w{1,4}_(\d+)_\d+Metric.*$").expect("static regex")
    });
    re.replace(name, "$2").into_owned()
}
