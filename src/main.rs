use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use terrain_evolution::erosion::{ErosionPreset, ErosionStats};
use terrain_evolution::terrain::TerrainKind;
use terrain_evolution::{EarthSystem, EngineError, Grid, StepConfig};

#[derive(Parser, Debug)]
#[command(name = "terrain_evolution")]
#[command(about = "Evolve a terrain grid under rain, rivers, erosion and landslides")]
struct Args {
    /// Grid width in cells
    #[arg(short = 'W', long, default_value = "64")]
    width: usize,

    /// Grid height in cells
    #[arg(short = 'H', long, default_value = "64")]
    height: usize,

    /// Cell edge length in metres
    #[arg(short, long, default_value = "10.0")]
    cell_size: f64,

    /// Sea level in metres
    #[arg(long, default_value = "0.0")]
    sea_level: f64,

    /// Number of steps to run
    #[arg(short = 'n', long, default_value = "100")]
    steps: usize,

    /// Time per step
    #[arg(long, default_value = "1.0")]
    dt: f64,

    /// Initial terrain shape
    #[arg(short, long, value_enum, default_value_t = TerrainKind::Fractal)]
    terrain: TerrainKind,

    /// Relief of the initial terrain in metres
    #[arg(long, default_value = "200.0")]
    relief: f64,

    /// Seed for fractal terrain
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Erosion preset (ignored when --config is given)
    #[arg(short, long, value_enum, default_value_t = ErosionPreset::Normal)]
    preset: ErosionPreset,

    /// JSON step configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log statistics every N steps
    #[arg(long, default_value = "10")]
    log_every: usize,
}

#[derive(Serialize)]
struct Summary {
    width: usize,
    height: usize,
    steps: usize,
    time: f64,
    min_elevation: f64,
    max_elevation: f64,
    mean_elevation: f64,
    total_sediment: f64,
    max_discharge: f64,
    total_eroded: f64,
    total_deposited: f64,
    max_erosion: f64,
    max_deposition: f64,
}

fn run(args: &Args) -> Result<Summary, EngineError> {
    let config = match &args.config {
        Some(path) => {
            info!("Loading step configuration from {}", path.display());
            StepConfig::from_json_file(path)?
        }
        None => {
            info!("Using '{}' preset: {}", args.preset, args.preset.description());
            StepConfig::from_preset(args.preset)
        }
    };
    config.validate(args.width, args.height)?;

    let mut grid = Grid::new(args.width, args.height, args.cell_size, args.sea_level)?;
    grid.seed(args.terrain.build(args.width, args.height, args.relief, args.seed), None)?;
    let mut system = EarthSystem::from_grid(grid);
    info!(
        terrain = %args.terrain,
        steps = args.steps,
        dt = args.dt,
        "Running {}x{} grid",
        args.width,
        args.height
    );

    let mut totals = ErosionStats::default();
    for i in 0..args.steps {
        let stats = system.step(args.dt, &config);
        totals.merge(&stats.total);
        if args.log_every > 0 && (i + 1) % args.log_every == 0 {
            info!(
                step = i + 1,
                time = stats.time,
                eroded = stats.total.total_eroded,
                deposited = stats.total.total_deposited,
                sinks = stats.sinks,
                max_discharge = stats.max_discharge,
                mean_elevation = stats.mean_elevation,
                "Step"
            );
        }
    }

    let state = system.get_state();
    let (min_elevation, max_elevation) = state.elevation.min_max();
    Ok(Summary {
        width: args.width,
        height: args.height,
        steps: args.steps,
        time: state.time,
        min_elevation,
        max_elevation,
        mean_elevation: state.elevation.mean(),
        total_sediment: state.sediment.sum(),
        max_discharge: state.discharge.min_max().1,
        total_eroded: totals.total_eroded,
        total_deposited: totals.total_deposited,
        max_erosion: totals.max_erosion,
        max_deposition: totals.max_deposition,
    })
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(summary) => match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!("Failed to encode summary: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
