//! Host plotting services and the assembly-drawing flow built on them.

pub mod kicad_cli;

pub use kicad_cli::KicadCli;

use crate::board::Board;
use crate::config::{
    is_copper_layer, layer_aliases, DocsConfig, GerberLayer, PlotTemplate, JOB_FILE, LAYER_PLOT_DIR,
};
use crate::error::DocsError;
use crate::notify::Notifier;
use crate::pdf::assemble::{self, MergeLayer, MergeOptions};
use crate::pdf::{color, svg, Rgb};
use log::{debug, info, warn};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrillMarks {
    None,
    Full,
}

/// What the host plotter can do by itself. Missing features are
/// emulated while merging layer plots.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlotCapabilities {
    pub mirror: bool,
    pub scale: bool,
    /// Honors [`LayerPlotRequest::tented`] by leaving vias off mask layers.
    pub tenting: bool,
}

/// Plot settings for one layer of an assembly drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct LayerPlotRequest {
    pub layer: String,
    pub template: String,
    pub output_dir: PathBuf,
    pub scale: f64,
    pub mirror: bool,
    pub tented: bool,
    pub frame: bool,
    pub negative: bool,
    pub drill_marks: DrillMarks,
}

/// Gerber, drill and PDF writers of the host design tool.
pub trait PlotService: Send {
    fn capabilities(&self) -> PlotCapabilities;

    fn plot_gerbers(
        &self,
        board: &dyn Board,
        layers: &[GerberLayer],
        output_dir: &Path,
    ) -> Result<(), DocsError>;

    fn write_drills(&self, board: &dyn Board, output_dir: &Path) -> Result<(), DocsError>;

    /// Plot one layer to a single-page PDF and return its path.
    fn plot_layer_pdf(
        &self,
        board: &dyn Board,
        request: &LayerPlotRequest,
    ) -> Result<PathBuf, DocsError>;
}

/// `<project>-<layer with dots as underscores>.pdf`
pub fn layer_pdf_name(project: &str, layer: &str) -> String {
    format!("{project}-{}.pdf", layer.replace('.', "_"))
}

/// Gerber plan entries whose layer exists on the board.
pub fn enabled_gerber_layers(board: &dyn Board, plan: &[GerberLayer]) -> Vec<GerberLayer> {
    plan.iter()
        .filter(|l| {
            layer_aliases(&l.name)
                .iter()
                .any(|name| board.is_layer_enabled(name))
        })
        .cloned()
        .collect()
}

/// Files left behind by [`plot_assembly_drawings`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssemblyOutput {
    pub job_file: Option<PathBuf>,
    pub single_pages: Vec<PathBuf>,
    pub svgs: Vec<PathBuf>,
}

impl AssemblyOutput {
    pub fn summary(&self) -> String {
        let mut msg = String::from("All done!");
        if let Some(job) = &self.job_file {
            msg.push_str(&format!("\n\nAssembly pdf created: {}", job.display()));
        }
        if !self.single_pages.is_empty() {
            msg.push_str("\n\nSingle page pdf files created:");
            for f in &self.single_pages {
                msg.push_str(&format!("\n{}", f.display()));
            }
        }
        if !self.svgs.is_empty() {
            msg.push_str("\n\nSVG files created:");
            for f in &self.svgs {
                msg.push_str(&format!("\n{}", f.display()));
            }
        }
        msg
    }
}

/// Fail early when `Job.pdf` cannot be written, e.g. because a viewer
/// holds it open.
pub fn check_job_writable(output_dir: &Path) -> Result<PathBuf, DocsError> {
    fs::create_dir_all(output_dir)?;
    let job = output_dir.join(JOB_FILE);
    let not_writable = |e: std::io::Error| {
        DocsError::Io(std::io::Error::new(
            e.kind(),
            format!(
                "the output file is not writeable, perhaps it's open in another application? {}: {e}",
                job.display()
            ),
        ))
    };
    fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&job)
        .map_err(not_writable)?;
    // no empty placeholder may outlive a failed concatenation
    fs::remove_file(&job).map_err(not_writable)?;
    Ok(job)
}

fn report(notifier: &dyn Notifier, operation: &'static str, path: &Path, err: DocsError) {
    let file = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let folder = path.parent().map(Path::to_path_buf).unwrap_or_default();
    notifier.error(&DocsError::artifact(operation, file, folder, err));
}

/// Plot, recolor and merge every layer of one template into
/// `<project>_<template>.pdf`.
fn plot_template(
    board: &dyn Board,
    plotter: &dyn PlotService,
    template: &PlotTemplate,
    config: &DocsConfig,
    output_dir: &Path,
    notifier: &dyn Notifier,
) -> Result<PathBuf, DocsError> {
    let project = board.project_name();
    let temp_dir = output_dir.join(LAYER_PLOT_DIR);
    fs::create_dir_all(&temp_dir)?;
    let caps = plotter.capabilities();
    if template.tented && !caps.tenting {
        warn!(
            "plotter cannot tent vias, template {} is plotted with open vias",
            template.name
        );
    }

    let mut layers = Vec::with_capacity(template.layers.len());
    for spec in &template.layers {
        let scale = if spec.is_frame { 1.0 } else { config.scale };
        let request = LayerPlotRequest {
            layer: spec.name.clone(),
            template: template.name.clone(),
            output_dir: temp_dir.clone(),
            scale,
            mirror: template.mirrored,
            tented: template.tented,
            frame: spec.is_frame,
            negative: spec.is_negative,
            drill_marks: if is_copper_layer(spec.id) {
                DrillMarks::Full
            } else {
                DrillMarks::None
            },
        };

        let plotted = match plotter.plot_layer_pdf(board, &request) {
            Ok(path) => path,
            Err(e) => {
                report(
                    notifier,
                    "plot_layer",
                    &temp_dir.join(layer_pdf_name(&project, &spec.name)),
                    e,
                );
                continue;
            }
        };

        let path = if spec.is_black() {
            plotted
        } else {
            let colored = temp_dir.join(format!(
                "{project}-{}-colored.pdf",
                spec.name.replace('.', "_")
            ));
            let result = Rgb::from_hex(&spec.color)
                .and_then(|rgb| color::recolor(&plotted, &colored, rgb));
            match result {
                Ok(()) => colored,
                Err(e) => {
                    report(notifier, "colorize_pdf", &plotted, e);
                    plotted
                }
            }
        };

        let options = MergeOptions {
            mirror: template.mirrored && !caps.mirror,
            scale: if caps.scale { 1.0 } else { scale },
        };
        layers.push(MergeLayer::new(path).with_options(options));
    }

    let assembly = output_dir.join(format!("{project}_{}.pdf", template.name));
    assemble::merge(&layers, &assembly, notifier)?;
    info!("assembled template {} into {}", template.name, assembly.display());
    Ok(assembly)
}

/// Produce the multi-page `Job.pdf` from the given templates, plus the
/// optional SVG exports, then clean up according to `config`.
pub fn plot_assembly_drawings(
    board: &dyn Board,
    plotter: &dyn PlotService,
    templates: &[PlotTemplate],
    config: &DocsConfig,
    output_dir: &Path,
    notifier: &dyn Notifier,
) -> Result<AssemblyOutput, DocsError> {
    let job = check_job_writable(output_dir)?;
    let temp_dir = output_dir.join(LAYER_PLOT_DIR);

    let mut template_files = Vec::with_capacity(templates.len());
    for template in templates {
        let project = board.project_name();
        match plot_template(board, plotter, template, config, output_dir, notifier) {
            Ok(path) => template_files.push(path),
            Err(e) => report(
                notifier,
                "merge_pdf",
                &output_dir.join(format!("{project}_{}.pdf", template.name)),
                e,
            ),
        }
    }

    let mut output = AssemblyOutput::default();
    match assemble::concatenate(&template_files, &job, notifier) {
        Ok(()) => output.job_file = Some(job.clone()),
        Err(e) => report(notifier, "create_pdf_from_pages", &job, e),
    }

    if config.create_svg {
        for file in &template_files {
            let svg_path = file.with_extension("svg");
            match svg::export_svg(file, &svg_path) {
                Ok(()) => output.svgs.push(svg_path),
                Err(e) => report(notifier, "create_svg", &svg_path, e),
            }
        }
    }

    if config.del_temp_files && temp_dir.exists() {
        if let Err(e) = fs::remove_dir_all(&temp_dir) {
            report(notifier, "del_temp_files", &temp_dir, e.into());
        }
    }

    if config.delete_single_page_files {
        for file in &template_files {
            if let Err(e) = fs::remove_file(file) {
                warn!("could not delete {}: {e}", file.display());
                report(notifier, "del_single_page_files", file, e.into());
            }
        }
    } else {
        output.single_pages = template_files;
    }

    debug!("assembly drawings: {output:?}");
    Ok(output)
}
