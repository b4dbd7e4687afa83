use clap::Parser;
use pcb_docs::{
    kicad, load_config, load_rotations, DocsError, FabPreset, KicadCli, LogNotifier, Pipeline,
    Progress,
};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "pcb-docs",
    about = "Generate fabrication and assembly documents for a KiCad board"
)]
struct Cli {
    /// Board file (.kicad_pcb)
    board: PathBuf,

    /// Settings file (default: docs.config.ini next to the board)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Rotation rules (default: rotations.cf next to the board, else built-in rules)
    #[arg(short, long)]
    rotations: Option<PathBuf>,

    /// kicad-cli executable (default: $KICAD_CLI or kicad-cli on PATH)
    #[arg(long)]
    kicad_cli: Option<PathBuf>,

    /// Plot scale for non-frame layers, overriding the settings file
    #[arg(long)]
    scale: Option<f64>,

    /// Also export each assembly page as SVG
    #[arg(long)]
    svg: bool,

    /// Do not open the output folder when done
    #[arg(long)]
    no_open: bool,

    /// Print the run summary as JSON
    #[arg(long)]
    json: bool,
}

fn run(cli: Cli) -> Result<(), DocsError> {
    let board = kicad::load(&cli.board)?;
    let mut config = load_config(&board, cli.config.as_deref())?;
    if let Some(scale) = cli.scale {
        config.scale = scale;
    }
    config.create_svg |= cli.svg;
    let rotations = load_rotations(&board, cli.rotations.as_deref())?;
    let plotter = cli.kicad_cli.map(KicadCli::new).unwrap_or_default();

    let pipeline =
        Pipeline::new(FabPreset::jlcpcb()?, config, rotations).reveal_folders(!cli.no_open);
    let (handle, progress) = pipeline.spawn(board, Box::new(plotter), Box::new(LogNotifier));
    for step in progress {
        if let Progress::Percent(p) = step {
            eprintln!("[{p:>3}%]");
        }
    }
    let summary = handle
        .join()
        .map_err(|_| DocsError::Environment("documentation worker panicked".to_string()))??;

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary.folder.display());
    }
    Ok(())
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
