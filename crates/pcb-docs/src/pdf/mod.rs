//! Post-processing of single-layer plots into assembly drawings.
//!
//! Layer PDFs written by the host plotter are recolored
//! ([`color::recolor`]), stacked onto one page ([`assemble::merge`]),
//! collected into a multi-page job file ([`assemble::concatenate`]) and
//! optionally exported as vector images ([`svg::export_svg`]).

pub mod assemble;
pub mod color;
pub mod svg;

pub use color::Rgb;

use crate::error::DocsError;
use lopdf::{Dictionary, Document, Object, ObjectId};
use std::path::{Path, PathBuf};

/// Page rectangle `[x0, y0, x1, y1]` in points.
pub type Rect = [f64; 4];

pub(crate) fn number(obj: &Object) -> Option<f64> {
    match obj {
        Object::Integer(i) => Some(*i as f64),
        Object::Real(r) => Some(f64::from(*r)),
        _ => None,
    }
}

pub(crate) fn resolve<'a>(doc: &'a Document, obj: &'a Object) -> &'a Object {
    match obj {
        Object::Reference(id) => doc.get_object(*id).unwrap_or(obj),
        _ => obj,
    }
}

pub(crate) fn rect(doc: &Document, obj: &Object) -> Option<Rect> {
    let values = resolve(doc, obj).as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut r = [0.0; 4];
    for (slot, v) in r.iter_mut().zip(values) {
        *slot = number(resolve(doc, v))?;
    }
    Some(r)
}

pub(crate) fn rect_object(r: Rect) -> Object {
    Object::Array(r.iter().map(|v| Object::Real(*v as f32)).collect())
}

/// The `/Type` name of a dictionary, if any.
pub(crate) fn dict_type(dict: &Dictionary) -> Option<&[u8]> {
    dict.get(b"Type").and_then(Object::as_name).ok()
}

pub(crate) fn first_page(doc: &Document) -> Result<ObjectId, DocsError> {
    doc.get_pages()
        .values()
        .next()
        .copied()
        .ok_or_else(|| DocsError::Pdf("document has no pages".to_string()))
}

/// Look up a page attribute, following the `/Parent` chain for
/// inheritable keys such as `/MediaBox` and `/Resources`.
pub(crate) fn inherited(doc: &Document, page_id: ObjectId, key: &[u8]) -> Option<Object> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    for _ in 0..32 {
        if let Ok(value) = dict.get(key) {
            return Some(value.clone());
        }
        let parent = dict.get(b"Parent").and_then(Object::as_reference).ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    }
    None
}

pub(crate) fn media_box(doc: &Document, page_id: ObjectId) -> Result<Rect, DocsError> {
    inherited(doc, page_id, b"MediaBox")
        .and_then(|obj| rect(doc, &obj))
        .ok_or_else(|| DocsError::Pdf("page has no usable MediaBox".to_string()))
}

/// Split a path into the file name and containing folder used in
/// per-artifact error reports.
pub(crate) fn file_context(path: &Path) -> (String, PathBuf) {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
    (file, folder)
}

#[cfg(test)]
pub(crate) mod testing {
    use lopdf::content::Content;
    use lopdf::{dictionary, Document, Object, Stream};
    use std::path::Path;

    /// A one-page document whose single content stream is `ops`.
    pub(crate) fn layer_document(ops: &str, width: i64, height: i64) -> Document {
        let mut doc = Document::with_version("1.5");
        let pages_id = doc.new_object_id();
        let content = Content::decode(ops.as_bytes()).unwrap();
        let content_id = doc.add_object(Stream::new(dictionary! {}, content.encode().unwrap()));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! {},
        });
        doc.objects.insert(
            pages_id,
            Object::Dictionary(dictionary! {
                "Type" => "Pages",
                "Kids" => vec![page_id.into()],
                "Count" => 1,
                "MediaBox" => vec![0.into(), 0.into(), width.into(), height.into()],
            }),
        );
        let catalog_id = doc.add_object(dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        doc.trailer.set("Root", catalog_id);
        doc
    }

    pub(crate) fn write_layer_pdf(path: &Path, ops: &str) {
        let mut doc = layer_document(ops, 200, 100);
        doc.compress();
        doc.save(path).unwrap();
    }

    /// Decoded content of the first page.
    pub(crate) fn page_content(path: &Path) -> String {
        let doc = Document::load(path).unwrap();
        let page = *doc.get_pages().values().next().unwrap();
        String::from_utf8(doc.get_page_content(page).unwrap()).unwrap()
    }

    /// Content of every Form XObject on the first page, in `L{i}` order,
    /// which is the order `merge` draws them.
    pub(crate) fn form_contents(path: &Path) -> Vec<String> {
        let doc = Document::load(path).unwrap();
        let page = *doc.get_pages().values().next().unwrap();
        let resources = doc.get_dictionary(page).unwrap().get(b"Resources").unwrap();
        let xobjects = resources.as_dict().unwrap().get(b"XObject").unwrap().as_dict().unwrap();
        let mut forms: Vec<(usize, Object)> = xobjects
            .iter()
            .map(|(k, v)| {
                let index = String::from_utf8_lossy(&k[1..]).parse().unwrap();
                (index, v.clone())
            })
            .collect();
        forms.sort_by_key(|(index, _)| *index);
        forms
            .into_iter()
            .map(|(_, v)| {
                let stream = doc.get_object(v.as_reference().unwrap()).unwrap().as_stream().unwrap();
                let content = stream.decompressed_content().unwrap_or(stream.content.clone());
                String::from_utf8(content).unwrap()
            })
            .collect()
    }
}
