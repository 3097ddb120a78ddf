use anyhow::{Context, Result};
use clap::Parser;
use facereg_core::CascadeDetector;
use facereg_hw::Camera;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod dataset;
mod menu;
mod registry;
mod workflow;

use config::Config;
use registry::Registry;

#[derive(Parser)]
#[command(name = "facereg", about = "Register faces from a webcam and recognize them live")]
struct Cli {
    /// TOML config file (also read from FACEREG_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Directory holding the registry and per-person image folders
    #[arg(long)]
    base_dir: Option<PathBuf>,
    /// V4L2 camera device (e.g., "/dev/video0")
    #[arg(long)]
    camera: Option<String>,
    /// List capture devices and exit
    #[arg(long)]
    list_cameras: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    if cli.list_cameras {
        let devices = Camera::list_devices();
        if devices.is_empty() {
            println!("No capture devices found");
        }
        for d in devices {
            println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
        }
        return Ok(());
    }

    let mut config = Config::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(base_dir) = cli.base_dir {
        config.base_dir = base_dir;
    }
    if let Some(camera) = cli.camera {
        config.camera_device = camera;
    }

    std::fs::create_dir_all(&config.base_dir)
        .with_context(|| format!("failed to create {}", config.base_dir.display()))?;

    let registry = Registry::load(config.registry_path()).context("failed to load registry")?;
    let detector = CascadeDetector::load(&config.cascade_path).with_context(|| {
        format!("failed to load face cascade {}", config.cascade_path.display())
    })?;

    tracing::info!(
        registry = %registry.path().display(),
        camera = %config.camera_device,
        people = registry.len(),
        "facereg ready"
    );

    let mut app = app::App::new(config, registry, detector);
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    menu::run(&mut stdin.lock(), &mut stdout, &mut app)?;

    tracing::info!("facereg exiting");
    Ok(())
}
