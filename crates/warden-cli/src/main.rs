//! `warden` – peripheral controller daemon
//!
//! This binary wires the Warden stack together.  It:
//!
//! 1. Installs the tracing pipeline and loads `~/.warden/config.toml`
//!    (falling back to defaults) with `WARDEN_*` overrides.
//! 2. Builds the peripheral registry: the board's Linux drivers, or the
//!    simulated set when `simulate` / `WARDEN_SIMULATE` is on.
//! 3. Starts the background loops and the HTTP API on one Tokio runtime
//!    whose blocking pool is sized by `workers`.
//! 4. Intercepts **Ctrl-C** to stop every loop and exit cleanly.

mod config;

use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info, warn};

use warden_cockpit::{ApiContext, ApiServer};
use warden_hal::{PeripheralRegistry, SimRegistry};
use warden_kernel::{DeviceState, PinScheduler};
use warden_memory::TemperatureLog;
use warden_network::{Probe, ReachabilityProber, TargetCache};
use warden_runtime::{Supervisor, init_tracing};

use config::Config;

fn main() {
    let _telemetry = init_tracing("warden");

    print_banner();

    let mut cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Ok(None) => {
            println!(
                "  No config at {}; using defaults.",
                config::config_path().display().to_string().dimmed()
            );
            Config::default()
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };
    config::apply_env_overrides(&mut cfg);
    if cfg.pins.is_empty() {
        warn!("no GPIO pins configured");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .max_blocking_threads(cfg.workers.max(1))
        .thread_name("warden")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to build the async runtime");
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(run(cfg)) {
        println!("{}: {}", "Fatal".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<(), String> {
    let peripherals = if cfg.simulate {
        println!("  {}", "Running against simulated peripherals.".yellow());
        SimRegistry::builder().build()
    } else {
        PeripheralRegistry::linux(&cfg.linux_peripherals())
    };

    let state = Arc::new(DeviceState::new(cfg.pins.iter().copied()));
    let scheduler = Arc::new(PinScheduler::new(
        Arc::clone(&state),
        Arc::clone(&peripherals.gpio),
    ));
    let temperature_log = Arc::new(TemperatureLog::new(
        &cfg.temperature_storage,
        cfg.temperature_ceiling_bytes(),
    ));
    let probe: Arc<dyn Probe> = Arc::new(ReachabilityProber::new(
        Arc::clone(&peripherals.commands),
        TargetCache::new(&cfg.reachability_cache_path, cfg.reachability_cache_ttl),
    ));

    let supervisor = Supervisor::new(
        Arc::clone(&scheduler),
        peripherals.clone(),
        Arc::clone(&temperature_log),
        Arc::clone(&probe),
        cfg.runtime(),
    )
    .start();

    let stop_state = Arc::clone(&state);
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        stop_state.stop();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    let server = ApiServer::new(Arc::new(ApiContext {
        state: Arc::clone(&state),
        scheduler: Arc::clone(&scheduler),
        peripherals,
        temperature_log,
        probe,
        allowed_clients: cfg.allowed_clients.clone(),
    }))
    .with_port(cfg.port);

    println!(
        "  API listening on {}\n",
        format!("http://0.0.0.0:{}", cfg.port).bold()
    );

    let mut active = state.subscribe_active();
    let outcome = tokio::select! {
        res = server.run() => res.map_err(|e| e.to_string()),
        _ = active.wait_for(|running| !*running) => Ok(()),
    };

    supervisor.shutdown().await;
    let failed = scheduler.force_all_off();
    if !failed.is_empty() {
        warn!(?failed, "pins left in an unknown state at exit");
    }
    info!("warden stopped");
    println!("{}", "  ✓ Exiting Warden.".green());
    outcome
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _      __           __         "#.bold().cyan());
    println!("{}", r#"| | /| / /__ _______/ /__ ___   "#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ __/ _  / -_) _ \  "#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/_/  \_,_/\__/_//_/  "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Warden".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Device-state & watchdog engine");
    println!();
}
