//! ChakraDrive daemon
//!
//! Commands arrive on stdin, feedback (`READY`, `OK ...`, `STATUS ...`,
//! `ARRIVED`) leaves on stdout. Logs go to stderr.

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chakra_drive::hal::{Hardware, create_hardware};
use chakra_drive::protocol::{Feedback, Reporter};
use chakra_drive::sensors::SensorSampler;
use chakra_drive::threads::spawn_threads;
use chakra_drive::time::{Clock, MonotonicClock, sleep_ms, sleep_secs};
use chakra_drive::{AppConfig, DriveContext, Error, Result};

const DEFAULT_CONFIG_PATH: &str = "/etc/chakra-drive.toml";

/// Parse config path from command line arguments.
///
/// Supports:
/// - `chakra-drive <path>` (positional)
/// - `chakra-drive --config <path>` (flag-based)
/// - `chakra-drive -c <path>` (short flag)
///
/// Returns `None` when no path was given.
fn parse_config_path() -> Option<String> {
    let args: Vec<String> = env::args().collect();

    for i in 1..args.len() {
        if (args[i] == "--config" || args[i] == "-c") && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
    }

    if args.len() > 1 && !args[1].starts_with('-') {
        return Some(args[1].clone());
    }

    None
}

/// An explicit path must exist; a missing default falls back to built-ins.
fn load_config() -> Result<AppConfig> {
    match parse_config_path() {
        Some(path) => {
            log::info!("Using config: {}", path);
            AppConfig::load(&path)
        }
        None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
            log::info!("Using config: {}", DEFAULT_CONFIG_PATH);
            AppConfig::load(DEFAULT_CONFIG_PATH)
        }
        None => {
            log::info!(
                "{} not found, using built-in defaults",
                DEFAULT_CONFIG_PATH
            );
            Ok(AppConfig::default())
        }
    }
}

fn run() -> Result<()> {
    log::info!("ChakraDrive v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    log::info!(
        "Device: {} ({})",
        config.device.name,
        config.device.device_type
    );

    // Installed first so a signal during calibration still ends in an
    // orderly shutdown instead of the default kill
    let running = Arc::new(AtomicBool::new(true));
    let signal_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        log::info!("Received shutdown signal");
        signal_flag.store(false, Ordering::Release);
    })
    .map_err(|e| Error::Other(format!("Error setting Ctrl-C handler: {}", e)))?;

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());

    // Buses, PWM at neutral and gyro calibration; any failure is fatal
    let Hardware {
        left_encoder,
        right_encoder,
        gyro,
        left_pwm,
        right_pwm,
        simulator: _,
    } = create_hardware(&config, Arc::clone(&clock))?;

    let sampler = SensorSampler::new(
        left_encoder,
        right_encoder,
        gyro,
        Arc::clone(&clock),
        Duration::from_millis(config.hardware.bus_timeout_ms),
    )?;

    let arming_secs = config.startup.arming_secs;
    let ctx = Arc::new(
        DriveContext::new(config, clock, left_pwm, right_pwm, Reporter::stdout())
            .with_running_flag(running),
    );

    log::info!("Arming ESCs...");
    ctx.stop_all();
    if ctx.is_running() {
        sleep_secs(arming_secs);
    }
    if !ctx.is_running() {
        log::info!("Shutdown requested during startup");
        ctx.abort();
        return Ok(());
    }
    ctx.emit(Feedback::Ready);

    let handles = match spawn_threads(Arc::clone(&ctx), sampler) {
        Ok(handles) => handles,
        Err(e) => {
            // Any thread that did start has been joined by now
            ctx.abort();
            return Err(e);
        }
    };
    log::info!("ChakraDrive running. Send 'q' or press Ctrl-C to stop.");

    while ctx.is_running() {
        sleep_ms(50);
    }

    log::info!("Shutting down...");
    ctx.stop_all();
    if handles.control.join().is_err() {
        log::error!("Control thread panicked");
    }
    if handles.sensor.join().is_err() {
        log::error!("Sensor thread panicked");
    }
    // Control has stopped recording, so this captures every row
    ctx.flush_telemetry();
    ctx.shutdown_outputs();

    log::info!("ChakraDrive stopped");
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
