//! # Fab Plant Supervisor
//!
//! Loads a configuration directory, starts the simulated I/O bus and runs
//! every configured line on its own thread until all lines stop, the tick
//! limit is reached or a shutdown signal arrives.
//!
//! # Usage
//!
//! ```bash
//! # Run the sample plant
//! fab --config-dir config/
//!
//! # Debug logging, status snapshot every 50 supervisor ticks
//! fab --config-dir config/ -v --snapshot-every 50
//!
//! # JSON logs, stop after 500 ticks
//! fab --config-dir config/ --json --ticks 500
//! ```

#![deny(warnings)]

use clap::Parser;
use fab_common::config::LogLevel;
use fab_common::io::bus::IoBus;
use fab_control::config::ConfigDir;
use fab_control::line::LineStatus;
use fab_control::plant::Plant;
use fab_hal::{SimBus, SimDriver};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

/// Fab plant supervisor - production lines over a simulated PLC bus
#[derive(Parser, Debug)]
#[command(name = "fab")]
#[command(version)]
#[command(about = "Runs the configured production lines over the simulated I/O bus")]
#[command(long_about = None)]
struct Args {
    /// Configuration directory (config.toml + io.toml + plant.toml).
    #[arg(short, long, value_name = "DIR", default_value = "config")]
    config_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Output logs in JSON format
    #[arg(long)]
    json: bool,

    /// Stop after this many supervisor ticks (0 = until every line stops)
    #[arg(long, default_value_t = 0)]
    ticks: u64,

    /// Log a JSON status snapshot every N supervisor ticks (0 = only at exit)
    #[arg(long, default_value_t = 0)]
    snapshot_every: u64,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = run() {
        error!("fab failed: {}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = ConfigDir::load(&args.config_dir);
    setup_tracing(&args, config.as_ref().ok().map(|c| c.app.shared.log_level));
    let config = config?;

    info!(
        "{} v{} starting from {}",
        config.app.shared.service_name,
        env!("CARGO_PKG_VERSION"),
        config.root.display()
    );

    let bus = Arc::new(SimBus::new(&config.io)?);
    let mut driver = SimDriver::start(Arc::clone(&bus), config.app.timing.sim_period());
    if !driver.is_running() {
        return Err("simulation thread did not start".into());
    }

    let mut plant = Plant::from_config_dir(&config, Arc::clone(&bus) as Arc<dyn IoBus>)?;

    let running = plant.running_flag();
    let stop = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Received shutdown signal");
        stop.store(false, Ordering::SeqCst);
    })?;

    plant.start()?;
    supervise(&plant, &args, config.app.timing.line_tick());

    let snapshot = plant.snapshot();
    info!(target: "fab::status", "{}", snapshot.to_json());
    for line in &snapshot.lines {
        match line.status {
            LineStatus::End => info!("line {}: END", line.name),
            LineStatus::Problem | LineStatus::Error => warn!(
                "line {}: {} at {} ({})",
                line.name,
                line.status,
                line.step.as_deref().unwrap_or("-"),
                line.error.as_deref().unwrap_or("no error recorded")
            ),
            status => info!("line {}: stopped while {status}", line.name),
        }
    }

    plant.shutdown();
    driver.stop();
    info!("fab shutdown complete, simulated {:?}", bus.elapsed());
    Ok(())
}

/// Wait for the lines, logging periodic snapshots.
fn supervise(plant: &Plant, args: &Args, tick: std::time::Duration) {
    let running = plant.running_flag();
    let mut ticks = 0u64;
    while running.load(Ordering::SeqCst) && !plant.is_finished() {
        thread::sleep(tick);
        ticks += 1;
        if args.snapshot_every > 0 && ticks % args.snapshot_every == 0 {
            info!(target: "fab::status", "{}", plant.snapshot().to_json());
        }
        if args.ticks > 0 && ticks >= args.ticks {
            info!("tick limit {} reached", args.ticks);
            break;
        }
    }
}

/// Setup tracing subscriber based on CLI arguments and `[shared] log_level`.
fn setup_tracing(args: &Args, configured: Option<LogLevel>) {
    let level = if args.verbose {
        Level::DEBUG
    } else {
        configured.map_or(Level::INFO, Level::from)
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}
