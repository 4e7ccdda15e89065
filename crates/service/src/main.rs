//! Virtual Logitech G29 racing wheel driven by keyboard and mouse.

use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use wheel_engine::WheelDevice;
use wheel_gadget::HidGadget;
use wheel_input::InputManager;

mod config;
mod daemon;

use config::EmulatorConfig;

#[derive(Debug, Parser)]
#[command(name = "wheel-emulator", about, version)]
struct Cli {
    /// Configuration file location.
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Log filter, e.g. "debug" or "wheel_engine=trace".
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(cli: &Cli) {
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);
    info!("starting wheel-emulator v{}", env!("CARGO_PKG_VERSION"));

    daemon::check_root()?;

    let config = EmulatorConfig::load_or_create(&cli.config)?;

    let running = Arc::new(AtomicBool::new(true));
    daemon::install_signal_handlers(Arc::clone(&running))?;

    let input = InputManager::initialize(
        config.keyboard_override(),
        config.mouse_override(),
        Arc::clone(&running),
    )
    .context("input capture unavailable")?;

    let device = WheelDevice::create(HidGadget::system(), Arc::clone(&running)).context(
        "USB gadget creation failed; ensure configfs is mounted, libcomposite/dummy_hcd \
         are available, and a UDC is present",
    )?;
    device.set_ffb_gain(config.ffb.gain);

    daemon::run_loop(&device, &input, config.steering.sensitivity, &running);

    info!("shutting down");
    device.shutdown();
    input.shutdown();
    info!("wheel-emulator stopped");
    Ok(())
}
