//! Profiling tool to find the expensive phases of a step

use std::time::Instant;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use terrain_evolution::climate::{source_field, ClimateKernel};
use terrain_evolution::erosion::{ErosionKernel, LateralErosionKernel, MassMovementKernel};
use terrain_evolution::terrain::fractal;
use terrain_evolution::{EarthSystem, Grid, HydrologyKernel, Rainfall, StepConfig};

#[derive(Parser, Debug)]
#[command(name = "profile_step")]
#[command(about = "Time each phase of a landscape-evolution step")]
struct Args {
    /// Grid width in cells
    #[arg(short = 'W', long, default_value = "512")]
    width: usize,

    /// Grid height in cells
    #[arg(short = 'H', long, default_value = "256")]
    height: usize,

    /// Seed for the fractal terrain
    #[arg(short, long, default_value = "1337")]
    seed: u64,

    /// Full steps to time after the per-phase pass
    #[arg(short = 'n', long, default_value = "5")]
    steps: usize,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let args = Args::parse();
    let (width, height) = (args.width, args.height);

    println!("=== Performance Profiling ===");
    println!("Map size: {}x{} ({} cells)", width, height, width * height);
    println!();

    let start = Instant::now();
    let mut grid = Grid::new(width, height, 30.0, 20.0)?;
    grid.seed(fractal(width, height, 500.0, args.seed), None)?;
    println!("Terrain generation: {:?}", start.elapsed());

    let config = StepConfig::default();
    let hydrology = HydrologyKernel::default();
    let erosion = ErosionKernel::new(config.erosion.clone());
    let climate = ClimateKernel::new(1.0);

    let start = Instant::now();
    let mut rain = source_field(width, height, config.precipitation, &config.rain_sources);
    let multiplier = climate.precipitation_multiplier(&grid);
    for (r, m) in rain.as_mut_slice().iter_mut().zip(multiplier.as_slice()) {
        *r *= m;
    }
    println!("Precipitation: {:?}", start.elapsed());

    let start = Instant::now();
    let fill = hydrology.fill_sinks(&mut grid);
    println!("Sink filling: {:?} ({} sweeps, converged: {})", start.elapsed(), fill.iterations, fill.converged);

    let start = Instant::now();
    let discharge = hydrology.route_flow_on(&mut grid, &fill.surface, Rainfall::Field(&rain));
    println!("D8 routing: {:?}", start.elapsed());

    let start = Instant::now();
    let _ = hydrology.route_flow_mfd(&grid, Rainfall::Field(&rain), 1.1);
    println!("MFD routing: {:?}", start.elapsed());

    let start = Instant::now();
    let _ = hydrology.water_depth(&grid, &discharge);
    println!("Water depth: {:?}", start.elapsed());

    let start = Instant::now();
    erosion.transport_sediment(&mut grid, &discharge, 1.0, None);
    println!("Sediment transport: {:?}", start.elapsed());

    let start = Instant::now();
    LateralErosionKernel::default().migrate(&mut grid, &discharge, 1.0);
    println!("Lateral erosion: {:?}", start.elapsed());

    let start = Instant::now();
    erosion.hillslope_diffuse(&mut grid, config.diffusion_rate);
    println!("Hillslope diffusion: {:?}", start.elapsed());

    let start = Instant::now();
    MassMovementKernel::default().relax(&mut grid, 1.0);
    println!("Mass movement: {:?}", start.elapsed());

    let mut system = EarthSystem::from_grid(grid);
    let start = Instant::now();
    for _ in 0..args.steps {
        system.step(1.0, &config);
    }
    let total = start.elapsed();
    println!();
    println!("Full steps: {} in {:?} ({:?} per step)", args.steps, total, total / args.steps.max(1) as u32);

    Ok(())
}
