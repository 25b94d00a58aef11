//! Headless race runner
//!
//! Builds a race from defaults or a JSON config and prints the world
//! descriptor followed by snapshots as JSON lines.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

use circuit_sim::sim::simulation::{self, ControlCommand};
use circuit_sim::{RaceConfig, RaceSnapshot, SharedRaceServer, SimResult};

#[derive(Parser, Debug)]
#[command(name = "circuit-sim", about = "Run a racing simulation and stream snapshots")]
struct Args {
    /// JSON race config; defaults are used for anything it leaves out
    #[arg(long)]
    config: Option<std::path::PathBuf>,

    /// Override the config seed
    #[arg(long)]
    seed: Option<u64>,

    /// Generate this many cars instead of the configured roster
    #[arg(long)]
    cars: Option<u32>,

    /// Ticks to simulate as fast as possible
    #[arg(long, default_value_t = 7200)]
    ticks: u64,

    /// Run in real time for this many seconds instead of headless
    #[arg(long)]
    realtime: Option<f32>,

    /// Skip printing the world descriptor
    #[arg(long)]
    no_world: bool,
}

#[tokio::main]
async fn main() -> SimResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => RaceConfig::from_path(path)?,
        None => RaceConfig::default(),
    };
    if let Some(seed) = args.seed {
        config.seed = seed;
    }
    if let Some(cars) = args.cars {
        config.cars.clear();
        config.car_count = cars;
    }

    let server = simulation::create_shared_server(config)?;
    {
        let mut server = server.write()?;
        if !args.no_world {
            println!("{}", serde_json::to_string(&server.world())?);
        }
        server.apply(ControlCommand::Start)?;
    }

    match args.realtime {
        Some(seconds) => run_for(&server, seconds).await,
        None => run_headless(&server, args.ticks)?,
    }

    let mut server = server.write()?;
    server.apply(ControlCommand::Finish)?;
    let stats = server.stats();
    log::info!(
        "{} ticks, avg {:.3} ms per tick",
        stats.ticks,
        stats.avg_tick_time_ms
    );
    Ok(())
}

fn run_headless(server: &SharedRaceServer, ticks: u64) -> SimResult<()> {
    let mut server = server.write()?;
    for _ in 0..ticks {
        if let Some(snapshot) = server.tick() {
            emit(&snapshot);
        }
    }
    Ok(())
}

/// Real-time run stopped by a timer or Ctrl-C
async fn run_for(server: &SharedRaceServer, seconds: f32) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let timer = tokio::spawn(async move {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs_f32(seconds.max(0.0))) => {}
            _ = tokio::signal::ctrl_c() => log::info!("Interrupted"),
        }
        let _ = stop_tx.send(true);
    });

    simulation::run_realtime(Arc::clone(server), stop_rx, emit).await;
    timer.abort();
}

fn emit(snapshot: &RaceSnapshot) {
    match serde_json::to_string(snapshot) {
        Ok(line) => println!("{line}"),
        Err(e) => log::error!("failed to encode snapshot {}: {}", snapshot.tick, e),
    }
}
