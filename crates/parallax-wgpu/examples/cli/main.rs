//! Cone Map CLI
//!
//! Derives cone maps from a heightmap image (or a procedural heightmap) on the
//! GPU and writes the results as OpenEXR files.
//!
//! # Usage
//! ```bash
//! cargo run --example cli -- --heightmap height.png --cone relaxed --output out/
//! cargo run --example cli -- --settings stages.yaml --cone quick
//! ```

use parallax_wgpu::stages::{ConeAlgorithm, ConemapSettings, ProceduralHeightmapSettings, QuickConeAlgorithm, QuickConemapSettings};
use parallax_wgpu::{GpuStages, HeightmapPipeline, StageExecutor, texture};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;

/// Command-line arguments for the cone map generator
#[derive(Parser)]
#[command(version, about = "CLI tool for deriving cone maps from heightmaps")]
struct Args {
    /// Heightmap image; a procedural heightmap is generated when omitted
    #[arg(long)]
    heightmap: Option<PathBuf>,

    /// Stage settings as YAML
    #[arg(long, short)]
    settings: Option<PathBuf>,

    /// Cone map algorithm (standard, relaxed, quick, quick-naive)
    #[arg(long, short, default_value = "relaxed")]
    cone: String,

    /// Output directory
    #[arg(long, short, default_value = ".")]
    output: PathBuf,

    /// Log debug messages
    #[arg(long, short)]
    verbose: bool,
}

/// Settings file layout; every section is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StageSettings {
    procedural: ProceduralHeightmapSettings,
    conemap: ConemapSettings,
    quick_conemap: QuickConemapSettings,
}

enum ConeChoice {
    Direct(ConeAlgorithm),
    Quick(QuickConeAlgorithm),
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::WARN };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cone = match args.cone.to_lowercase().as_str() {
        "standard" => ConeChoice::Direct(ConeAlgorithm::Standard),
        "relaxed" => ConeChoice::Direct(ConeAlgorithm::Relaxed),
        "quick" => ConeChoice::Quick(QuickConeAlgorithm::RegionGrowing),
        "quick-naive" => ConeChoice::Quick(QuickConeAlgorithm::Naive),
        _ => {
            eprintln!("Invalid cone algorithm '{}'. Valid algorithms: standard, relaxed, quick, quick-naive", args.cone);
            std::process::exit(1);
        }
    };

    let settings: StageSettings = match &args.settings {
        Some(path) => {
            println!("Loading settings from: {}", path.display());
            serde_norway::from_str(&std::fs::read_to_string(path)?)?
        }
        None => StageSettings::default(),
    };

    println!("Initializing GPU...");
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::PRIMARY,
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))?;
    let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
        label: None,
        required_features: parallax_wgpu::device_features(adapter.features()),
        required_limits: wgpu::Limits::default(),
        memory_hints: wgpu::MemoryHints::default(),
        trace: Default::default(),
    }))?;
    println!("GPU initialized successfully");

    let mut stages = GpuStages::new(&device, &queue);
    let mut pipeline = HeightmapPipeline::new();
    pipeline.procedural_settings = settings.procedural;
    pipeline.conemap_settings = settings.conemap;
    pipeline.quick_conemap_settings = settings.quick_conemap;

    match &args.heightmap {
        Some(path) => {
            println!("Loading heightmap from: {}", path.display());
            pipeline.set_heightmap(texture::load_heightmap(&device, &queue, path, false)?);
        }
        None => {
            println!("Generating procedural heightmap ({})", pipeline.procedural_settings.height_function.name());
            pipeline.request_procedural_heightmap();
        }
    }

    // The procedural heightmap has to exist before a direct cone map can be requested
    pipeline.run_pending(&mut stages)?;
    match cone {
        ConeChoice::Direct(algorithm) => {
            if !pipeline.request_conemap(algorithm) {
                return Err("No heightmap to derive a cone map from".into());
            }
        }
        ConeChoice::Quick(algorithm) => pipeline.request_quick_conemap(algorithm),
    }

    let start = std::time::Instant::now();
    let report = pipeline.run_pending(&mut stages)?;
    let executed: Vec<&str> = report.executed.iter().map(|stage| stage.name()).collect();
    println!("Ran {} in {:.2?}", executed.join(", "), start.elapsed());

    std::fs::create_dir_all(&args.output)?;
    let outputs = [
        ("heightmap.exr", pipeline.heightmap()),
        ("conemap.exr", pipeline.conemap()),
        ("minmax.exr", pipeline.minmax()),
    ];
    for (file_name, output) in outputs {
        let Some(output) = output else {
            continue;
        };
        let path = args.output.join(file_name);
        println!("Saving to: {}\n{}", path.display(), texture::describe(Some(&stages.info(output))));
        texture::save_texture_exr(&device, &queue, output, &path)?;
    }

    println!("Done");
    Ok(())
}
