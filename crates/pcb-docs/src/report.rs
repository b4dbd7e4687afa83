use crate::error::DocsError;
use crate::records::{BomRecord, Masked, PlacementRecord};
use crate::stackup::{LayerStackEntry, STACKUP_HEADERS};
use log::{debug, info};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use serde::Serialize;
use std::path::Path;

pub const PLACEMENT_HEADERS: [&str; 5] = ["Designator", "Mid X", "Mid Y", "Rotation", "Layer"];
pub const BOM_HEADERS: [&str; 10] = [
    "Designator",
    "Footprint",
    "Value",
    "Mfr_Part_Number",
    "Mfr_Name",
    "Quantity",
    "LCSC_Part",
    "Link",
    "Unit price",
    "Total price",
];

/// Write rows under a fixed header, dropping masked designators.
///
/// Nothing is written when there are no rows at all.
fn write_csv<T: Serialize + Masked>(
    path: &Path,
    headers: &[&str],
    rows: &[T],
) -> Result<bool, DocsError> {
    if rows.is_empty() {
        return Ok(false);
    }
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_path(path)?;
    wtr.write_record(headers)?;
    for row in rows.iter().filter(|row| !row.is_masked()) {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    debug!("wrote {} rows to {}", rows.len(), path.display());
    Ok(true)
}

pub fn write_positions(path: &Path, rows: &[PlacementRecord]) -> Result<bool, DocsError> {
    write_csv(path, &PLACEMENT_HEADERS, rows)
}

pub fn write_bom_csv(path: &Path, rows: &[BomRecord]) -> Result<bool, DocsError> {
    write_csv(path, &BOM_HEADERS, rows)
}

/// Spreadsheet copy of a CSV file with one auto-sized column per field.
pub fn csv_to_xlsx(csv_path: &Path, xlsx_path: &Path, sheet: &str) -> Result<(), DocsError> {
    let mut rdr = csv::Reader::from_path(csv_path)?;
    let headers: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(sheet)?;
    write_header(worksheet, &headers, None)?;

    for (i, record) in rdr.records().enumerate() {
        let record = record?;
        let row = (i + 1) as u32;
        for (col, cell) in record.iter().enumerate() {
            if col >= widths.len() {
                widths.push(0);
            }
            widths[col] = widths[col].max(cell.chars().count());
            write_cell(worksheet, row, col as u16, cell, None)?;
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width as f64)?;
    }

    workbook.save(xlsx_path)?;
    info!("wrote {}", xlsx_path.display());
    Ok(())
}

/// Board stackup report, one row per physical layer.
pub fn write_stackup_xlsx(path: &Path, layers: &[LayerStackEntry]) -> Result<(), DocsError> {
    let format = Format::new().set_font_name("Calibri").set_font_size(18);
    let headers: Vec<String> = STACKUP_HEADERS.iter().map(|h| h.to_string()).collect();
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();

    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    worksheet.set_name("Stackup")?;
    write_header(worksheet, &headers, Some(&format))?;

    for (i, layer) in layers.iter().enumerate() {
        let row = (i + 1) as u32;
        let cells = [
            layer.index.to_string(),
            layer.name.clone().unwrap_or_default(),
            layer.material.clone().unwrap_or_default(),
            layer.thickness.map(|t| t.to_string()).unwrap_or_default(),
            layer.color.clone().unwrap_or_default(),
        ];
        for (col, cell) in cells.iter().enumerate() {
            widths[col] = widths[col].max(cell.chars().count());
            let cell = if cell.is_empty() { " " } else { cell.as_str() };
            write_cell(worksheet, row, col as u16, cell, Some(&format))?;
        }
    }

    for (col, width) in widths.iter().enumerate() {
        worksheet.set_column_width(col as u16, *width as f64 * 1.5)?;
    }

    workbook.save(path)?;
    info!("wrote {}", path.display());
    Ok(())
}

fn write_header(
    worksheet: &mut Worksheet,
    headers: &[String],
    format: Option<&Format>,
) -> Result<(), DocsError> {
    let bold = format.cloned().unwrap_or_default().set_bold();
    for (col, header) in headers.iter().enumerate() {
        worksheet.write_string_with_format(0, col as u16, header, &bold)?;
    }
    Ok(())
}

/// Numeric-looking cells become numbers, empty cells stay blank.
fn write_cell(
    worksheet: &mut Worksheet,
    row: u32,
    col: u16,
    cell: &str,
    format: Option<&Format>,
) -> Result<(), DocsError> {
    if cell.is_empty() {
        return Ok(());
    }
    let number = cell.parse::<f64>().ok().filter(|n| n.is_finite());
    match (number, format) {
        (Some(n), Some(f)) => worksheet.write_number_with_format(row, col, n, f)?,
        (Some(n), None) => worksheet.write_number(row, col, n)?,
        (None, Some(f)) => worksheet.write_string_with_format(row, col, cell, f)?,
        (None, None) => worksheet.write_string(row, col, cell)?,
    };
    Ok(())
}
