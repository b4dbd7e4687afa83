use super::{dict_type, file_context, first_page, inherited, media_box, rect_object, Rect};
use crate::error::DocsError;
use crate::notify::Notifier;
use log::{debug, info};
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Document, Object, ObjectId, Stream};
use std::path::{Path, PathBuf};

/// Page transform applied to a layer while merging, for plotters that
/// cannot mirror or scale themselves.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeOptions {
    pub mirror: bool,
    pub scale: f64,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            mirror: false,
            scale: 1.0,
        }
    }
}

/// One single-layer plot to stack.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeLayer {
    pub path: PathBuf,
    pub options: MergeOptions,
}

impl MergeLayer {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            options: MergeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: MergeOptions) -> Self {
        self.options = options;
        self
    }
}

/// A source document renumbered past the output's ids, with its first page.
struct Imported {
    doc: Document,
    page_id: ObjectId,
    media_box: Rect,
    resources: Option<Object>,
}

fn import(out: &Document, path: &Path) -> Result<Imported, DocsError> {
    let mut doc = Document::load(path)?;
    doc.renumber_objects_with(out.max_id + 1);
    let page_id = first_page(&doc)?;
    let media_box = media_box(&doc, page_id)?;
    let resources = inherited(&doc, page_id, b"Resources");
    Ok(Imported {
        doc,
        page_id,
        media_box,
        resources,
    })
}

/// Move the objects of an imported document into `out`, leaving behind
/// its page tree and every object `skip` rejects.
fn absorb(out: &mut Document, src: Document, skip: impl Fn(ObjectId) -> bool) {
    for (id, object) in src.objects {
        let structural = object
            .as_dict()
            .ok()
            .and_then(dict_type)
            .is_some_and(|t| matches!(t, b"Catalog" | b"Pages" | b"Page" | b"Annot"));
        if structural || skip(id) {
            continue;
        }
        out.max_id = out.max_id.max(id.0);
        out.objects.insert(id, object);
    }
}

/// Wrap the first page of `path` into a Form XObject owned by `out`.
fn import_as_form(out: &mut Document, path: &Path) -> Result<(ObjectId, Rect), DocsError> {
    let Imported {
        doc,
        page_id,
        media_box,
        resources,
    } = import(out, path)?;
    let content = doc.get_page_content(page_id)?;
    let content_ids = doc.get_page_contents(page_id);

    absorb(out, doc, |id| content_ids.contains(&id));

    let mut dict = dictionary! {
        "Type" => "XObject",
        "Subtype" => "Form",
        "BBox" => rect_object(media_box),
    };
    if let Some(resources) = resources {
        dict.set("Resources", resources);
    }
    let form_id = out.add_object(Stream::new(dict, content));
    Ok((form_id, media_box))
}

/// Save a document made of the given pages under one fresh page tree.
fn finish(
    mut out: Document,
    pages_id: ObjectId,
    kids: Vec<ObjectId>,
    output: &Path,
) -> Result<(), DocsError> {
    let count = kids.len() as i64;
    out.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids.into_iter().map(Object::from).collect::<Vec<_>>(),
            "Count" => count,
        }),
    );
    let catalog_id = out.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    out.trailer.set("Root", catalog_id);
    out.compress();
    out.save(output)?;
    Ok(())
}

fn layer_transform(base: Rect, options: MergeOptions) -> Vec<Operation> {
    let cx = (base[0] + base[2]) / 2.0;
    let cy = (base[1] + base[3]) / 2.0;
    let real = |v: f64| Object::Real(v as f32);
    let mut ops = Vec::new();
    if (options.scale - 1.0).abs() > f64::EPSILON {
        let s = options.scale;
        ops.push(Operation::new(
            "cm",
            vec![
                real(s),
                real(0.0),
                real(0.0),
                real(s),
                real(cx * (1.0 - s)),
                real(cy * (1.0 - s)),
            ],
        ));
    }
    if options.mirror {
        ops.push(Operation::new(
            "cm",
            vec![
                real(-1.0),
                real(0.0),
                real(0.0),
                real(1.0),
                real(2.0 * cx),
                real(0.0),
            ],
        ));
    }
    ops
}

/// Stack single-page layer plots into one page.
///
/// `layers` lists the topmost layer first. They are inserted in reverse,
/// each drawn over the ones already placed, on a page sized like the
/// bottom-most layer. A layer that cannot be read is reported through
/// `notifier` and left out.
pub fn merge(
    layers: &[MergeLayer],
    output: &Path,
    notifier: &dyn Notifier,
) -> Result<(), DocsError> {
    let mut out = Document::with_version("1.5");
    let pages_id = out.new_object_id();
    let mut xobjects = Dictionary::new();
    let mut operations = Vec::new();
    let mut base: Option<Rect> = None;

    for (i, layer) in layers.iter().rev().enumerate() {
        let (form_id, bbox) = match import_as_form(&mut out, &layer.path) {
            Ok(imported) => imported,
            Err(e) => {
                let (file, folder) = file_context(&layer.path);
                notifier.error(&DocsError::artifact("merge_pdf", file, folder, e));
                continue;
            }
        };
        let page_box = *base.get_or_insert(bbox);
        let name = format!("L{i}");
        xobjects.set(name.clone(), form_id);

        operations.push(Operation::new("q", vec![]));
        operations.extend(layer_transform(page_box, layer.options));
        operations.push(Operation::new("Do", vec![Object::Name(name.into_bytes())]));
        operations.push(Operation::new("Q", vec![]));
    }

    let page_box = base.ok_or_else(|| DocsError::Pdf("no layer could be merged".to_string()))?;
    let content = Content { operations }.encode()?;
    let content_id = out.add_object(Stream::new(dictionary! {}, content));
    let page_id = out.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => rect_object(page_box),
        "Contents" => content_id,
        "Resources" => dictionary! { "XObject" => xobjects },
    });

    finish(out, pages_id, vec![page_id], output)?;
    debug!("merged {} layers into {}", layers.len(), output.display());
    Ok(())
}

/// Detach the first page of an imported document from its page tree and
/// hang it under `pages_id`.
fn reparent_page(imported: &mut Imported, pages_id: ObjectId) -> Result<Object, DocsError> {
    let page = imported
        .doc
        .get_object_mut(imported.page_id)?
        .as_dict_mut()?;
    page.set("Parent", pages_id);
    page.set("MediaBox", rect_object(imported.media_box));
    if let Some(resources) = imported.resources.take() {
        page.set("Resources", resources);
    }
    page.remove(b"Annots");
    Ok(Object::Dictionary(page.clone()))
}

/// Collect the first page of every file, in order, into one document.
///
/// A file that cannot be read is reported through `notifier` and left
/// out; it is an error only when no page remains.
pub fn concatenate(
    files: &[PathBuf],
    output: &Path,
    notifier: &dyn Notifier,
) -> Result<(), DocsError> {
    let mut out = Document::with_version("1.5");
    let pages_id = out.new_object_id();
    let mut kids = Vec::with_capacity(files.len());

    for path in files {
        let page = import(&out, path).and_then(|mut imported| {
            let page = reparent_page(&mut imported, pages_id)?;
            Ok((imported, page))
        });
        let (imported, page) = match page {
            Ok(page) => page,
            Err(e) => {
                let (file, folder) = file_context(path);
                notifier.error(&DocsError::artifact("create_pdf_from_pages", file, folder, e));
                continue;
            }
        };

        let page_id = imported.page_id;
        absorb(&mut out, imported.doc, |_| false);
        out.objects.insert(page_id, page);
        out.max_id = out.max_id.max(page_id.0);
        kids.push(page_id);
    }

    if kids.is_empty() {
        return Err(DocsError::Pdf("no pages to concatenate".to_string()));
    }
    let pages = kids.len();
    finish(out, pages_id, kids, output)?;
    info!("wrote {} with {pages} pages", output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notify::testing::RecordingNotifier;
    use crate::pdf::media_box;
    use crate::pdf::testing::{form_contents, page_content, write_layer_pdf};

    #[test]
    fn test_merge_draws_bottom_layer_first() {
        let dir = tempfile::tempdir().unwrap();
        let top = dir.path().join("top.pdf");
        let bottom = dir.path().join("bottom.pdf");
        write_layer_pdf(&top, "1 0 0 RG 0 0 m 10 10 l S");
        write_layer_pdf(&bottom, "0 0 1 RG 0 0 m 20 20 l S");

        let out = dir.path().join("merged.pdf");
        let notifier = RecordingNotifier::default();
        merge(&[MergeLayer::new(top), MergeLayer::new(bottom)], &out, &notifier).unwrap();

        assert!(notifier.errors().is_empty());
        let forms = form_contents(&out);
        assert_eq!(forms.len(), 2);
        // L0 is the bottom layer, drawn first
        assert!(forms[0].contains("0 0 1 RG"));
        assert!(forms[1].contains("1 0 0 RG"));

        let content = page_content(&out);
        let l0 = content.find("/L0 Do").unwrap();
        let l1 = content.find("/L1 Do").unwrap();
        assert!(l0 < l1);

        let doc = Document::load(&out).unwrap();
        let page = first_page(&doc).unwrap();
        assert_eq!(media_box(&doc, page).unwrap(), [0.0, 0.0, 200.0, 100.0]);
    }

    #[test]
    fn test_merge_skips_unreadable_layer() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        write_layer_pdf(&good, "0 0 m 10 10 l S");
        let missing = dir.path().join("missing.pdf");

        let out = dir.path().join("merged.pdf");
        let notifier = RecordingNotifier::default();
        merge(&[MergeLayer::new(missing), MergeLayer::new(good)], &out, &notifier).unwrap();

        let errors = notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("missing.pdf"));
        assert_eq!(form_contents(&out).len(), 1);
    }

    #[test]
    fn test_merge_nothing_readable() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let result = merge(
            &[MergeLayer::new(dir.path().join("a.pdf"))],
            &dir.path().join("out.pdf"),
            &notifier,
        );
        assert!(matches!(result, Err(DocsError::Pdf(_))));
    }

    #[test]
    fn test_merge_mirror_and_scale() {
        let dir = tempfile::tempdir().unwrap();
        let layer = dir.path().join("layer.pdf");
        write_layer_pdf(&layer, "0 0 m 10 10 l S");
        let out = dir.path().join("merged.pdf");
        let frame = dir.path().join("frame.pdf");
        write_layer_pdf(&frame, "0 0 m 5 5 l S");
        let options = MergeOptions {
            mirror: true,
            scale: 2.0,
        };
        let layers = [
            MergeLayer::new(frame).with_options(MergeOptions {
                mirror: true,
                scale: 1.0,
            }),
            MergeLayer::new(layer).with_options(options),
        ];
        merge(&layers, &out, &RecordingNotifier::default()).unwrap();

        let content = Content::decode(page_content(&out).as_bytes()).unwrap();
        let transforms: Vec<Vec<f64>> = content
            .operations
            .iter()
            .filter(|op| op.operator == "cm")
            .map(|op| op.operands.iter().filter_map(crate::pdf::number).collect())
            .collect();
        assert_eq!(
            transforms,
            vec![
                vec![2.0, 0.0, 0.0, 2.0, -100.0, -50.0],
                vec![-1.0, 0.0, 0.0, 1.0, 200.0, 0.0],
                vec![-1.0, 0.0, 0.0, 1.0, 200.0, 0.0],
            ]
        );
    }

    #[test]
    fn test_concatenate_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("board_Top.pdf");
        let b = dir.path().join("board_Bottom.pdf");
        write_layer_pdf(&a, "1 0 0 RG 0 0 m 1 1 l S");
        write_layer_pdf(&b, "0 1 0 RG 0 0 m 2 2 l S");

        let out = dir.path().join("Job.pdf");
        let notifier = RecordingNotifier::default();
        concatenate(&[a, b], &out, &notifier).unwrap();
        assert!(notifier.errors().is_empty());

        let doc = Document::load(&out).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let first = String::from_utf8(doc.get_page_content(pages[&1]).unwrap()).unwrap();
        let second = String::from_utf8(doc.get_page_content(pages[&2]).unwrap()).unwrap();
        assert!(first.contains("1 0 0 RG"));
        assert!(second.contains("0 1 0 RG"));
    }

    #[test]
    fn test_concatenate_skips_unreadable_files() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("board_Top.pdf");
        let broken = dir.path().join("board_Middle.pdf");
        let b = dir.path().join("board_Bottom.pdf");
        write_layer_pdf(&a, "1 0 0 RG 0 0 m 1 1 l S");
        std::fs::write(&broken, "not a pdf").unwrap();
        write_layer_pdf(&b, "0 1 0 RG 0 0 m 2 2 l S");

        let out = dir.path().join("Job.pdf");
        let notifier = RecordingNotifier::default();
        concatenate(&[a, broken, b], &out, &notifier).unwrap();

        let errors = notifier.errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("create_pdf_from_pages"));
        assert!(errors[0].contains("board_Middle.pdf"));

        let doc = Document::load(&out).unwrap();
        let pages = doc.get_pages();
        assert_eq!(pages.len(), 2);
        let second = String::from_utf8(doc.get_page_content(pages[&2]).unwrap()).unwrap();
        assert!(second.contains("0 1 0 RG"));
    }

    #[test]
    fn test_concatenate_nothing_readable() {
        let dir = tempfile::tempdir().unwrap();
        let notifier = RecordingNotifier::default();
        let out = dir.path().join("Job.pdf");
        let result = concatenate(&[dir.path().join("none.pdf")], &out, &notifier);
        assert!(matches!(result, Err(DocsError::Pdf(_))));
        assert_eq!(notifier.errors().len(), 1);
        assert!(!out.exists());
    }
}
