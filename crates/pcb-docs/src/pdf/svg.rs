use super::{first_page, inherited, media_box, number, resolve, Rgb};
use crate::error::DocsError;
use log::{debug, warn};
use lopdf::content::Content;
use lopdf::{Dictionary, Document, Object, Stream};
use std::fmt::Write as _;
use std::path::Path;

const MAX_FORM_DEPTH: usize = 16;

/// Affine transform `[a b c d e f]` as used by the PDF `cm` operator.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Matrix([f64; 6]);

impl Matrix {
    /// `self` applied first, then `other`.
    fn then(&self, other: &Matrix) -> Matrix {
        let [a, b, c, d, e, f] = self.0;
        let [oa, ob, oc, od, oe, of] = other.0;
        Matrix([
            a * oa + b * oc,
            a * ob + b * od,
            c * oa + d * oc,
            c * ob + d * od,
            e * oa + f * oc + oe,
            e * ob + f * od + of,
        ])
    }

    fn apply(&self, x: f64, y: f64) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        (a * x + c * y + e, b * x + d * y + f)
    }

    fn scale_factor(&self) -> f64 {
        let [a, b, c, d, _, _] = self.0;
        (a * d - b * c).abs().sqrt()
    }

    fn from_operands(operands: &[Object]) -> Option<Matrix> {
        let values: Vec<f64> = operands.iter().filter_map(number).collect();
        let m: [f64; 6] = values.try_into().ok()?;
        Some(Matrix(m))
    }
}

#[derive(Debug, Clone, Copy)]
struct GraphicsState {
    ctm: Matrix,
    stroke: Rgb,
    fill: Rgb,
    line_width: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Paint {
    Stroke,
    Fill { even_odd: bool },
    FillStroke { even_odd: bool },
}

struct Renderer<'a> {
    doc: &'a Document,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
    path: String,
    /// Start of the open subpath and the current point, in SVG space.
    start: Option<(f64, f64)>,
    current: Option<(f64, f64)>,
    out: String,
}

fn hex(c: Rgb) -> String {
    let channel = |v: f64| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    format!("#{:02x}{:02x}{:02x}", channel(c.r), channel(c.g), channel(c.b))
}

fn fmt(v: f64) -> String {
    let s = format!("{v:.3}");
    let s = s.trim_end_matches('0').trim_end_matches('.');
    match s {
        "" | "-" | "-0" => "0".to_string(),
        _ => s.to_string(),
    }
}

fn color_from(operands: &[Object]) -> Option<Rgb> {
    let v: Vec<f64> = operands.iter().filter_map(number).collect();
    match v.as_slice() {
        [gray] => Some(Rgb {
            r: *gray,
            g: *gray,
            b: *gray,
        }),
        [r, g, b] => Some(Rgb {
            r: *r,
            g: *g,
            b: *b,
        }),
        [c, m, y, k] => Some(Rgb {
            r: (1.0 - c) * (1.0 - k),
            g: (1.0 - m) * (1.0 - k),
            b: (1.0 - y) * (1.0 - k),
        }),
        _ => None,
    }
}

fn stream_bytes(stream: &Stream) -> Result<Vec<u8>, DocsError> {
    if stream.dict.has(b"Filter") {
        Ok(stream.decompressed_content()?)
    } else {
        Ok(stream.content.clone())
    }
}

impl<'a> Renderer<'a> {
    fn point(&self, operands: &[Object], at: usize) -> Option<(f64, f64)> {
        let x = number(operands.get(at)?)?;
        let y = number(operands.get(at + 1)?)?;
        Some(self.state.ctm.apply(x, y))
    }

    fn push_point(&mut self, cmd: &str, p: (f64, f64)) {
        let _ = write!(self.path, "{cmd}{} {} ", fmt(p.0), fmt(p.1));
        self.current = Some(p);
    }

    fn paint(&mut self, paint: Paint) {
        let d = std::mem::take(&mut self.path);
        self.start = None;
        self.current = None;
        let d = d.trim_end();
        if d.is_empty() {
            return;
        }
        let width = fmt(self.state.line_width * self.state.ctm.scale_factor());
        let (fill, stroke, even_odd) = match paint {
            Paint::Stroke => ("none".to_string(), Some(hex(self.state.stroke)), false),
            Paint::Fill { even_odd } => (hex(self.state.fill), None, even_odd),
            Paint::FillStroke { even_odd } => {
                (hex(self.state.fill), Some(hex(self.state.stroke)), even_odd)
            }
        };
        let _ = write!(self.out, "<path d=\"{d}\" fill=\"{fill}\"");
        if even_odd {
            self.out.push_str(" fill-rule=\"evenodd\"");
        }
        match stroke {
            Some(stroke) => {
                let _ = write!(
                    self.out,
                    " stroke=\"{stroke}\" stroke-width=\"{width}\" stroke-linecap=\"round\" stroke-linejoin=\"round\""
                );
            }
            None => self.out.push_str(" stroke=\"none\""),
        }
        self.out.push_str("/>\n");
    }

    fn close_path(&mut self) {
        if !self.path.is_empty() {
            self.path.push_str("Z ");
            self.current = self.start;
        }
    }

    fn render(
        &mut self,
        content: &[u8],
        resources: Option<&Dictionary>,
        depth: usize,
    ) -> Result<(), DocsError> {
        let content = Content::decode(content)?;
        for op in &content.operations {
            let args = op.operands.as_slice();
            match op.operator.as_str() {
                "q" => self.stack.push(self.state),
                "Q" => {
                    if let Some(state) = self.stack.pop() {
                        self.state = state;
                    }
                }
                "cm" => {
                    if let Some(m) = Matrix::from_operands(args) {
                        self.state.ctm = m.then(&self.state.ctm);
                    }
                }
                "w" => {
                    if let Some(w) = args.first().and_then(number) {
                        self.state.line_width = w;
                    }
                }
                "RG" | "G" | "K" | "SC" | "SCN" => {
                    if let Some(c) = color_from(args) {
                        self.state.stroke = c;
                    }
                }
                "rg" | "g" | "k" | "sc" | "scn" => {
                    if let Some(c) = color_from(args) {
                        self.state.fill = c;
                    }
                }
                "m" => {
                    if let Some(p) = self.point(args, 0) {
                        self.start = Some(p);
                        self.push_point("M", p);
                    }
                }
                "l" => {
                    if let Some(p) = self.point(args, 0) {
                        self.push_point("L", p);
                    }
                }
                "c" => {
                    if let (Some(p1), Some(p2), Some(p3)) =
                        (self.point(args, 0), self.point(args, 2), self.point(args, 4))
                    {
                        self.push_point("C", p1);
                        self.push_point("", p2);
                        self.push_point("", p3);
                    }
                }
                "v" => {
                    // first control point is the current point
                    if let (Some(p1), Some(p2), Some(p3)) =
                        (self.current, self.point(args, 0), self.point(args, 2))
                    {
                        self.push_point("C", p1);
                        self.push_point("", p2);
                        self.push_point("", p3);
                    }
                }
                "y" => {
                    if let (Some(p1), Some(p3)) = (self.point(args, 0), self.point(args, 2)) {
                        self.push_point("C", p1);
                        self.push_point("", p3);
                        self.push_point("", p3);
                    }
                }
                "re" => {
                    let v: Vec<f64> = args.iter().filter_map(number).collect();
                    if let [x, y, w, h] = v.as_slice() {
                        let corners = [(*x, *y), (x + w, *y), (x + w, y + h), (*x, y + h)];
                        for (i, (cx, cy)) in corners.iter().enumerate() {
                            let p = self.state.ctm.apply(*cx, *cy);
                            if i == 0 {
                                self.start = Some(p);
                            }
                            self.push_point(if i == 0 { "M" } else { "L" }, p);
                        }
                        self.close_path();
                    }
                }
                "h" => self.close_path(),
                "S" => self.paint(Paint::Stroke),
                "s" => {
                    self.close_path();
                    self.paint(Paint::Stroke);
                }
                "f" | "F" => self.paint(Paint::Fill { even_odd: false }),
                "f*" => self.paint(Paint::Fill { even_odd: true }),
                "B" => self.paint(Paint::FillStroke { even_odd: false }),
                "B*" => self.paint(Paint::FillStroke { even_odd: true }),
                "b" | "b*" => {
                    self.close_path();
                    self.paint(Paint::FillStroke {
                        even_odd: op.operator == "b*",
                    });
                }
                "n" => {
                    self.path.clear();
                    self.start = None;
                    self.current = None;
                }
                "Do" => {
                    let name = args.first().and_then(|o| o.as_name().ok());
                    if let (Some(name), Some(resources)) = (name, resources) {
                        self.draw_form(name, resources, depth)?;
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn draw_form(
        &mut self,
        name: &[u8],
        resources: &Dictionary,
        depth: usize,
    ) -> Result<(), DocsError> {
        if depth >= MAX_FORM_DEPTH {
            warn!("form nesting deeper than {MAX_FORM_DEPTH}, skipping");
            return Ok(());
        }
        let doc = self.doc;
        let Some(xobjects) = resources
            .get(b"XObject")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
        else {
            return Ok(());
        };
        let Some(stream) = xobjects
            .get(name)
            .ok()
            .and_then(|o| resolve(doc, o).as_stream().ok())
        else {
            return Ok(());
        };
        if stream.dict.get(b"Subtype").and_then(Object::as_name).ok() != Some(b"Form".as_slice()) {
            return Ok(());
        }

        let saved = self.state;
        if let Some(m) = stream
            .dict
            .get(b"Matrix")
            .ok()
            .and_then(|o| resolve(doc, o).as_array().ok())
            .and_then(|a| Matrix::from_operands(a))
        {
            self.state.ctm = m.then(&self.state.ctm);
        }
        let form_resources = stream
            .dict
            .get(b"Resources")
            .ok()
            .and_then(|o| resolve(doc, o).as_dict().ok())
            .unwrap_or(resources);
        let content = stream_bytes(stream)?;
        self.render(&content, Some(form_resources), depth + 1)?;
        self.state = saved;
        Ok(())
    }
}

/// Render the vector content of the first page as an SVG document.
pub fn render_first_page(doc: &Document) -> Result<String, DocsError> {
    let page_id = first_page(doc)?;
    let [x0, y0, x1, y1] = media_box(doc, page_id)?;
    let (width, height) = (x1 - x0, y1 - y0);

    let resources_obj = inherited(doc, page_id, b"Resources");
    let resources = resources_obj
        .as_ref()
        .and_then(|o| resolve(doc, o).as_dict().ok());
    let content = doc.get_page_content(page_id)?;

    let mut renderer = Renderer {
        doc,
        state: GraphicsState {
            // page space to SVG space: origin top-left, y down
            ctm: Matrix([1.0, 0.0, 0.0, -1.0, -x0, y1]),
            stroke: Rgb::BLACK,
            fill: Rgb::BLACK,
            line_width: 1.0,
        },
        stack: Vec::new(),
        path: String::new(),
        start: None,
        current: None,
        out: String::new(),
    };
    renderer.render(&content, resources, 0)?;

    let mut svg = String::new();
    let _ = writeln!(svg, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>");
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" version=\"1.1\" width=\"{w}pt\" height=\"{h}pt\" viewBox=\"0 0 {w} {h}\">",
        w = fmt(width),
        h = fmt(height)
    );
    svg.push_str(&renderer.out);
    svg.push_str("</svg>\n");
    Ok(svg)
}

/// Write the first page of `pdf` as an SVG file.
pub fn export_svg(pdf: &Path, output: &Path) -> Result<(), DocsError> {
    let doc = Document::load(pdf)?;
    let svg = render_first_page(&doc)?;
    std::fs::write(output, svg)?;
    debug!("exported {} to {}", pdf.display(), output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::pdf::assemble::{merge, MergeLayer};
    use crate::pdf::testing::{layer_document, write_layer_pdf};

    #[test]
    fn test_matrix_composition() {
        let translate = Matrix([1.0, 0.0, 0.0, 1.0, 10.0, 20.0]);
        let scale = Matrix([2.0, 0.0, 0.0, 2.0, 0.0, 0.0]);
        // translate, then scale
        let m = translate.then(&scale);
        assert_eq!(m.apply(1.0, 1.0), (22.0, 42.0));
        let identity = Matrix([1.0, 0.0, 0.0, 1.0, 0.0, 0.0]);
        assert_eq!(identity.then(&scale), scale);
        assert_eq!(scale.scale_factor(), 2.0);
    }

    #[test]
    fn test_stroked_line_flipped() {
        let doc = layer_document("1 0 0 RG 2 w 10 10 m 190 90 l S", 200, 100);
        let svg = render_first_page(&doc).unwrap();
        assert!(svg.contains("viewBox=\"0 0 200 100\""));
        assert!(svg.contains("d=\"M10 90 L190 10\""));
        assert!(svg.contains("stroke=\"#ff0000\""));
        assert!(svg.contains("stroke-width=\"2\""));
        assert!(svg.contains("fill=\"none\""));
    }

    #[test]
    fn test_filled_rectangle() {
        let doc = layer_document("0 0 1 rg 10 20 30 40 re f", 200, 100);
        let svg = render_first_page(&doc).unwrap();
        assert!(svg.contains("d=\"M10 80 L40 80 L40 40 L10 40 Z\""));
        assert!(svg.contains("fill=\"#0000ff\" stroke=\"none\""));
    }

    #[test]
    fn test_nested_forms_are_drawn() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("top.pdf");
        let bottom = dir.path().join("bottom.pdf");
        write_layer_pdf(&top, "1 0 0 RG 0 0 m 10 10 l S");
        write_layer_pdf(&bottom, "0 1 0 RG 0 0 m 20 20 l S");
        let merged = dir.path().join("merged.pdf");
        let layers = [MergeLayer::new(top), MergeLayer::new(bottom)];
        merge(&layers, &merged, &RecordingNotifier::default()).unwrap();

        let out = dir.path().join("merged.svg");
        export_svg(&merged, &out).unwrap();
        let svg = std::fs::read_to_string(&out).unwrap();
        let green = svg.find("#00ff00").unwrap();
        let red = svg.find("#ff0000").unwrap();
        assert!(green < red);
        assert!(svg.contains("M0 100 L20 80"));
    }

    #[test]
    fn test_fmt_trims() {
        assert_eq!(fmt(2.0), "2");
        assert_eq!(fmt(0.5), "0.5");
        assert_eq!(fmt(-0.0001), "0");
        assert_eq!(fmt(12.34567), "12.346");
    }
}
