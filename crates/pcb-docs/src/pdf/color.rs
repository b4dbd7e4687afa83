use super::first_page;
use crate::error::DocsError;
use log::debug;
use lopdf::Document;
use regex::bytes::{Captures, Regex};
use std::path::Path;
use std::sync::OnceLock;

/// An RGB color with components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

impl Rgb {
    pub const BLACK: Rgb = Rgb {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    /// Parse `#rrggbb` (the leading `#` is optional).
    pub fn from_hex(hex: &str) -> Result<Self, DocsError> {
        let digits = hex.trim().trim_start_matches('#');
        let invalid = || DocsError::Configuration(format!("invalid color '{hex}'"));
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(invalid());
        }
        let channel = |i: usize| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map(|v| f64::from(v) / 255.0)
                .map_err(|_| invalid())
        };
        Ok(Self {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
        })
    }

    pub fn is_black(&self) -> bool {
        *self == Self::BLACK
    }

    /// Components formatted as PDF operands, e.g. `0.2471 0.8275 0.949`.
    fn operands(&self) -> String {
        [self.r, self.g, self.b]
            .iter()
            .map(|c| format_component(*c))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn format_component(value: f64) -> String {
    let s = format!("{value:.4}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    if s.is_empty() || s == "-" {
        "0".to_string()
    } else {
        s.to_string()
    }
}

fn black_color_ops() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?-u)(^|[^0-9.])0(?:\.0*)?\s+0(?:\.0*)?\s+0(?:\.0*)?\s+(RG|rg)\b")
            .expect("static regex")
    })
}

/// Replace every black stroke/fill color operator in a content stream.
/// Returns the new stream and the number of operators replaced.
pub fn recolor_stream(content: &[u8], color: Rgb) -> (Vec<u8>, usize) {
    let operands = color.operands();
    let mut count = 0;
    let out = black_color_ops().replace_all(content, |caps: &Captures| {
        count += 1;
        let mut rep = caps[1].to_vec();
        rep.extend_from_slice(operands.as_bytes());
        rep.push(b' ');
        rep.extend_from_slice(&caps[2]);
        rep
    });
    (out.into_owned(), count)
}

/// Recolor the first content stream of the first page in place.
pub fn recolor_document(doc: &mut Document, color: Rgb) -> Result<usize, DocsError> {
    let page_id = first_page(doc)?;
    let stream_id = *doc
        .get_page_contents(page_id)
        .first()
        .ok_or_else(|| DocsError::Pdf("first page has no content stream".to_string()))?;

    let stream = doc.get_object_mut(stream_id)?.as_stream_mut()?;
    let content = if stream.dict.has(b"Filter") {
        stream.decompressed_content()?
    } else {
        stream.content.clone()
    };
    let (content, count) = recolor_stream(&content, color);
    stream.set_plain_content(content);
    Ok(count)
}

/// Load `input`, turn its black drawing color into `color` and save the
/// result as `output`.
pub fn recolor(input: &Path, output: &Path, color: Rgb) -> Result<(), DocsError> {
    let mut doc = Document::load(input)?;
    let count = recolor_document(&mut doc, color)?;
    doc.compress();
    doc.save(output)?;
    debug!(
        "recolored {count} operators of {} into {}",
        input.display(),
        output.display()
    );
    Ok(())
}
