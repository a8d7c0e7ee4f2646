//! Demo client: draws a colored rectangle on its assigned plane.
//!
//! Allocates a dumb buffer, paints a single rectangle into it and keeps
//! resubmitting the same framebuffer once per server acknowledgement.
//! Pair it with a server running `ack_clients = true`, or pass
//! `--no-sync` to submit once and park.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use drm::buffer::DrmFourcc;
use log::info;

use strata::buffer::DumbFramebuffer;
use strata::client::Client;
use strata::compositor::device::open_device;

#[derive(Parser)]
#[command(name = "strata-rect")]
#[command(about = "Strata demo client that shows a colored rectangle")]
struct Cli {
    /// Packed ARGB color, e.g. 0xff2288ee
    color: String,

    x: u32,
    y: u32,
    width: u32,
    height: u32,

    /// Client identity to claim
    client_id: u32,

    /// Socket path of the running server
    #[arg(short, long, default_value = "/run/strata.sock")]
    socket: PathBuf,

    /// Buffer size; must match the display mode for unscaled planes
    #[arg(long, default_value_t = 720)]
    buffer_width: u32,
    #[arg(long, default_value_t = 576)]
    buffer_height: u32,

    /// Submit once and sleep instead of pacing on acknowledgements
    #[arg(long)]
    no_sync: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let color = u32::from_str_radix(cli.color.trim_start_matches("0x"), 16)
        .context("color must be hex, e.g. ff2288ee")?;

    let card = open_device(None).context("failed to open a DRM device")?;
    let display = Client::connect(&cli.socket, cli.client_id)
        .with_context(|| format!("failed to connect to {}", cli.socket.display()))?;

    let mut fb = DumbFramebuffer::create(
        &card,
        DrmFourcc::Argb8888,
        cli.buffer_width,
        cli.buffer_height,
    )
    .context("failed to allocate a dumb buffer")?;
    fb.fill(&card, 0x0000_0000)?;
    fb.draw_rect(&card, color, cli.x, cli.y, cli.width, cli.height)?;

    info!(
        "client {}: submitting framebuffer {}",
        cli.client_id,
        fb.fb_id()
    );

    if cli.no_sync {
        display.submit(fb.fb_id())?;
        loop {
            std::thread::park();
        }
    }

    loop {
        display.submit(fb.fb_id())?;
        display.wait_sync().context("lost the server")?;
    }
}
