//! Parallax Viewer Example
//!
//! Renders a heightmap on a quad with bump mapping, parallax mapping, linear
//! search or cone step mapping, and derives cone maps from the heightmap on the
//! GPU while the viewer is running.
//!
//! # Usage
//! ```bash
//! cargo run --example viewer -- --heightmap height.png --albedo color.png
//! ```
//!
//! Without `--heightmap` a procedural heightmap is generated on startup.

mod app;
mod viewer;

use crate::app::ViewerApp;
use clap::Parser;
use std::path::PathBuf;
use winit::event_loop::{ControlFlow, EventLoop};

/// Command-line arguments for the viewer
#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Heightmap image; a procedural heightmap is generated when omitted
    #[arg(long)]
    heightmap: Option<PathBuf>,

    /// Albedo image used to shade the surface
    #[arg(long)]
    albedo: Option<PathBuf>,

    /// Log debug messages
    #[arg(long, short)]
    verbose: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let level = if args.verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let subscriber = tracing_subscriber::fmt().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("Starting parallax viewer...");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = ViewerApp::new(args);
    event_loop.run_app(&mut app)?;
    Ok(())
}
