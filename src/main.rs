//! # Strata - Multi-Client Plane Compositor
//!
//! Server binary: brings up the display, binds the protocol socket and
//! drives the refresh loop that folds client submissions into one atomic
//! commit per cycle.

use std::path::PathBuf;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use log::{info, warn};

use strata::compositor::Compositor;
use strata::config::StrataConfig;
use strata::protocol::ProtocolServer;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "A minimal multi-client plane compositor for embedded Linux devices")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "/etc/strata.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// DRM device node to use instead of scanning /dev/dri
    #[arg(long)]
    device: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    if cli.debug {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    }

    info!("🚀 Starting Strata v{}", strata::VERSION);

    let mut config = match StrataConfig::load(&cli.config) {
        Ok(config) => {
            info!("✅ Configuration loaded from: {}", cli.config);
            config
        }
        Err(e) => {
            warn!("Failed to load configuration ({e:#}), falling back to defaults");
            StrataConfig::default()
        }
    };
    if cli.device.is_some() {
        config.device = cli.device;
    }
    config.validate().context("invalid configuration")?;

    run(config)
}

fn run(config: StrataConfig) -> Result<()> {
    let mut server = ProtocolServer::bind(&config.socket_path, config.max_clients)
        .with_context(|| format!("failed to bind {}", config.socket_path.display()))?;
    info!("Listening on: {}", config.socket_path.display());

    let mut compositor =
        Compositor::create(config.device.as_deref()).context("failed to bring up the display")?;
    ensure!(
        config
            .client_planes
            .iter()
            .all(|&plane| plane < compositor.surfaces().len()),
        "client mapping references plane {} but only {} were discovered",
        config.client_planes.iter().max().copied().unwrap_or(0),
        compositor.surfaces().len(),
    );
    compositor.apply_stacking(&config.plane_zpos);

    // The first commit carries the full mode-set; everything after only
    // updates plane state.
    compositor
        .commit(true)
        .context("initial mode-set commit failed")?;
    info!("✅ Display is up, entering refresh loop");

    let mut frame: u32 = 0;
    loop {
        server.poll().context("connection server poll failed")?;

        compositor
            .surfaces_mut()
            .sync_from_registry(server.registry_mut(), &config.client_planes);

        if let Err(e) = compositor.commit(false) {
            warn!("Skipping frame: {e}");
        }

        frame = frame.wrapping_add(1);
        if config.ack_clients {
            server.broadcast_sync(frame);
        }
    }
}
