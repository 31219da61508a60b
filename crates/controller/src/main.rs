mod adc;
mod aggregate;
mod config;
mod error;
#[cfg(feature = "gpio")]
mod gpio;
mod hardware;
mod hw;
mod protocol;
mod reconcile;
mod scheduler;
mod sensors;
#[cfg(not(feature = "gpio"))]
mod sim;
mod valve;
mod w1;
mod water_level;

#[cfg(not(any(feature = "gpio", feature = "sim")))]
compile_error!("enable either the `gpio` or the `sim` feature");

use anyhow::{bail, Result};
use std::env;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use reconcile::{HttpCoordinator, EXCHANGE_TIMEOUT};
use scheduler::Scheduler;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    // ── Config ──────────────────────────────────────────────────────
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::load(&config_path)?;
    let cadence = cfg.cadence()?;
    hardware::log_inventory(&cfg);

    // ── Devices ─────────────────────────────────────────────────────
    let mut hw = hardware::build(&cfg)?;

    if env::args().skip(1).any(|arg| arg == "--check") {
        hw.force_safe_state();
        let failures = hw.check();
        if failures > 0 {
            bail!("hardware check: {failures} sensor read(s) failed");
        }
        info!("hardware check passed");
        return Ok(());
    }

    // ── Coordinator ─────────────────────────────────────────────────
    let coordinator =
        HttpCoordinator::new(&cfg.service_base_url, &cfg.controller_name, EXCHANGE_TIMEOUT)?;
    info!(
        controller = %cfg.controller_name,
        url = coordinator.url(),
        "reporting to coordinator"
    );

    // ── Control loop ────────────────────────────────────────────────
    // Scheduler::new forces the safe state before the first sample.
    let mut scheduler = Scheduler::new(hw, coordinator, cadence);

    tokio::select! {
        _ = scheduler.run() => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("cannot listen for shutdown signal: {e}");
            }
            info!("shutdown requested");
        }
    }

    scheduler.hardware_mut().force_safe_state();
    info!("controller stopped");
    Ok(())
}
