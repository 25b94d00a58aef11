//! Simulation - Race server, control commands and fixed-rate loop
//!
//! The server owns the race, turns control commands into state changes
//! and steps the race at a fixed rate while running. Snapshots are
//! published into a version-stamped slot only after a tick completes.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use crate::sim::config::RaceConfig;
use crate::sim::error::SimResult;
use crate::sim::race::{Race, RaceSnapshot, RaceStatus};
use crate::sim::world::WorldDescriptor;

/// Upper bound on catch-up steps per `advance` call
const MAX_CATCH_UP_STEPS: u32 = 240;
/// Tick timings kept for averaging
const TICK_HISTORY: usize = 120;

/// External control events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlCommand {
    Start,
    Pause,
    Resume,
    Finish,
    Grid,
    GridOrder { ids: Vec<u32> },
}

/// Server statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStats {
    pub tick_rate: f32,
    pub avg_tick_time_ms: f32,
    pub car_count: u32,
    pub status: RaceStatus,
    pub running: bool,
    pub ticks: u64,
}

/// Latest complete snapshot plus a version counter
#[derive(Debug)]
pub struct SnapshotSlot {
    version: AtomicU64,
    latest: RwLock<Arc<RaceSnapshot>>,
}

impl SnapshotSlot {
    /// Slot holding `initial` at version 0
    pub fn new(initial: RaceSnapshot) -> Self {
        Self {
            version: AtomicU64::new(0),
            latest: RwLock::new(Arc::new(initial)),
        }
    }

    /// Replace the latest snapshot and bump the version
    pub fn publish(&self, snapshot: Arc<RaceSnapshot>) {
        match self.latest.write() {
            Ok(mut latest) => {
                *latest = snapshot;
                self.version.fetch_add(1, Ordering::Release);
            }
            Err(e) => log::error!("snapshot slot poisoned: {}", e),
        }
    }

    /// Version and snapshot of the last published tick
    pub fn latest(&self) -> (u64, Arc<RaceSnapshot>) {
        // The version is bumped under the write lock, so read it under the read lock
        let latest = match self.latest.read() {
            Ok(latest) => latest,
            Err(poisoned) => poisoned.into_inner(),
        };
        (self.version.load(Ordering::Acquire), Arc::clone(&*latest))
    }

    /// Number of snapshots published so far
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }
}

/// Main race server
pub struct RaceServer {
    race: Race,
    /// Whether the fixed-rate loop should step the race
    running: bool,
    /// Unconsumed wall time, in seconds
    accumulator: f64,
    /// Recent tick durations for averaging
    tick_times: Vec<f32>,
    snapshots: Arc<SnapshotSlot>,
}

impl RaceServer {
    /// Create a server with a freshly gridded race
    pub fn new(config: RaceConfig) -> SimResult<Self> {
        let race = Race::new(config)?;
        Ok(Self::with_race(race))
    }

    /// Wrap an existing race; the server starts stopped
    pub fn with_race(race: Race) -> Self {
        let snapshots = Arc::new(SnapshotSlot::new(race.snapshot()));
        Self {
            race,
            running: false,
            accumulator: 0.0,
            tick_times: Vec::with_capacity(TICK_HISTORY),
            snapshots,
        }
    }

    /// Apply a control command
    pub fn apply(&mut self, command: ControlCommand) -> SimResult<()> {
        match command {
            ControlCommand::Start => {
                self.race.start();
                self.running = true;
                self.accumulator = 0.0;
            }
            ControlCommand::Pause => {
                self.running = false;
                log::info!("Race paused");
            }
            ControlCommand::Resume => {
                if self.race.status == RaceStatus::Green {
                    self.running = true;
                    self.accumulator = 0.0;
                    log::info!("Race resumed");
                }
            }
            ControlCommand::Finish => {
                self.running = false;
                self.race.finish();
            }
            ControlCommand::Grid => {
                self.running = false;
                self.race.grid();
            }
            ControlCommand::GridOrder { ids } => self.race.set_grid_order(&ids)?,
        }
        self.publish();
        Ok(())
    }

    /// Perform a single simulation tick; returns a snapshot on publishing ticks
    pub fn tick(&mut self) -> Option<Arc<RaceSnapshot>> {
        if !self.running {
            return None;
        }

        let tick_start = Instant::now();
        let report = self.race.step();
        if !report.failed.is_empty() {
            log::warn!("tick {}: {} car updates rolled back", self.race.tick, report.failed.len());
        }

        let tick_time = tick_start.elapsed().as_secs_f32() * 1000.0;
        self.tick_times.push(tick_time);
        if self.tick_times.len() > TICK_HISTORY {
            self.tick_times.remove(0);
        }

        let every = u64::from(self.race.config.snapshot_every.max(1));
        (self.race.tick % every == 0).then(|| self.publish())
    }

    /// Consume wall time in fixed steps
    pub fn advance(&mut self, elapsed: Duration) -> Vec<Arc<RaceSnapshot>> {
        let mut published = Vec::new();
        if !self.running {
            return published;
        }

        let dt = f64::from(self.race.config.dt());
        self.accumulator += elapsed.as_secs_f64();
        let mut steps = 0;
        while self.accumulator >= dt && self.running {
            if steps == MAX_CATCH_UP_STEPS {
                log::warn!(
                    "simulation fell behind, dropping {:.0} ms",
                    self.accumulator * 1000.0
                );
                self.accumulator = 0.0;
                break;
            }
            self.accumulator -= dt;
            steps += 1;
            published.extend(self.tick());
        }
        published
    }

    fn publish(&self) -> Arc<RaceSnapshot> {
        let snapshot = Arc::new(self.race.snapshot());
        self.snapshots.publish(Arc::clone(&snapshot));
        snapshot
    }

    /// Slot readers can poll without touching the server
    pub fn snapshots(&self) -> Arc<SnapshotSlot> {
        Arc::clone(&self.snapshots)
    }

    /// Static circuit description for viewers
    pub fn world(&self) -> WorldDescriptor {
        self.race.world()
    }

    /// Read-only access to the race
    pub fn race(&self) -> &Race {
        &self.race
    }

    /// Get server statistics
    pub fn stats(&self) -> ServerStats {
        let avg_tick_time = if self.tick_times.is_empty() {
            0.0
        } else {
            self.tick_times.iter().sum::<f32>() / self.tick_times.len() as f32
        };

        ServerStats {
            tick_rate: self.race.config.tick_rate,
            avg_tick_time_ms: avg_tick_time,
            car_count: self.race.cars.len() as u32,
            status: self.race.status,
            running: self.running,
            ticks: self.race.tick,
        }
    }

    /// Check if server is running
    pub fn is_running(&self) -> bool {
        self.running
    }
}

/// Thread-safe race server handle
pub type SharedRaceServer = Arc<RwLock<RaceServer>>;

/// Create a new shared race server
pub fn create_shared_server(config: RaceConfig) -> SimResult<SharedRaceServer> {
    Ok(Arc::new(RwLock::new(RaceServer::new(config)?)))
}

/// Drive a shared server in real time until `shutdown` turns true.
///
/// Wall time is fed to [`RaceServer::advance`] on a fixed-period interval;
/// late ticks are skipped and caught up by the accumulator instead. Each
/// published snapshot is handed to `on_snapshot` after the lock is released.
pub async fn run_realtime<F>(
    server: SharedRaceServer,
    mut shutdown: watch::Receiver<bool>,
    mut on_snapshot: F,
) where
    F: FnMut(&RaceSnapshot),
{
    let period = match server.read() {
        Ok(s) => Duration::from_secs_f32(s.race().config.dt()),
        Err(e) => {
            log::error!("race server lock poisoned: {}", e);
            return;
        }
    };
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut last = time::Instant::now();

    while !*shutdown.borrow() {
        tokio::select! {
            _ = interval.tick() => {
                let now = time::Instant::now();
                let elapsed = now.duration_since(last);
                last = now;

                let published = match server.write() {
                    Ok(mut s) => s.advance(elapsed),
                    Err(e) => {
                        log::error!("race server lock poisoned: {}", e);
                        return;
                    }
                };
                for snapshot in &published {
                    on_snapshot(snapshot);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    log::info!("Real-time loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> RaceServer {
        RaceServer::new(RaceConfig::default()).unwrap()
    }

    #[test]
    fn ticks_only_while_running() {
        let mut server = server();
        assert!(server.tick().is_none());
        assert_eq!(server.race().tick, 0);
        server.apply(ControlCommand::Start).unwrap();
        server.tick();
        assert_eq!(server.race().tick, 1);
        server.apply(ControlCommand::Pause).unwrap();
        assert!(server.tick().is_none());
        assert_eq!(server.race().tick, 1);
        server.apply(ControlCommand::Resume).unwrap();
        assert!(server.is_running());
    }

    #[test]
    fn snapshots_follow_the_cadence() {
        let mut server = server();
        server.apply(ControlCommand::Start).unwrap();
        let published: Vec<_> = (0..12).filter_map(|_| server.tick()).collect();
        assert_eq!(published.len(), 3);
        assert!(published.iter().all(|s| s.tick % 4 == 0));
        let (_, latest) = server.snapshots().latest();
        assert_eq!(latest.tick, 12);
    }

    #[test]
    fn advance_consumes_whole_steps() {
        let mut server = server();
        server.apply(ControlCommand::Start).unwrap();
        server.advance(Duration::from_millis(105));
        assert_eq!(server.race().tick, 12);
    }

    #[test]
    fn advance_caps_catch_up() {
        let mut server = server();
        server.apply(ControlCommand::Start).unwrap();
        server.advance(Duration::from_secs(10));
        assert_eq!(server.race().tick, u64::from(MAX_CATCH_UP_STEPS));
    }

    #[test]
    fn finish_stops_and_resume_does_not_restart() {
        let mut server = server();
        server.apply(ControlCommand::Start).unwrap();
        server.apply(ControlCommand::Finish).unwrap();
        assert_eq!(server.race().status, RaceStatus::Finished);
        server.apply(ControlCommand::Resume).unwrap();
        assert!(!server.is_running());
    }

    #[test]
    fn grid_order_command_rejected_after_start() {
        let mut server = server();
        server.apply(ControlCommand::Start).unwrap();
        server.tick();
        let ids = server.race().grid_order().to_vec();
        assert!(server.apply(ControlCommand::GridOrder { ids }).is_err());
    }

    #[test]
    fn commands_parse_from_json() {
        let cmd: ControlCommand =
            serde_json::from_str(r#"{ "type": "grid_order", "ids": [2, 0, 1] }"#).unwrap();
        assert_eq!(cmd, ControlCommand::GridOrder { ids: vec![2, 0, 1] });
        let cmd: ControlCommand = serde_json::from_str(r#"{ "type": "pause" }"#).unwrap();
        assert_eq!(cmd, ControlCommand::Pause);
    }

    #[test]
    fn latest_pairs_version_with_snapshot() {
        let mut server = server();
        let slot = server.snapshots();
        server.apply(ControlCommand::Start).unwrap();
        for _ in 0..8 {
            server.tick();
        }
        let (version, latest) = slot.latest();
        assert_eq!(version, slot.version());
        assert_eq!(version, 3);
        assert_eq!(latest.tick, 8);
    }

    #[tokio::test]
    async fn realtime_loop_steps_until_shutdown() {
        let shared = create_shared_server(RaceConfig::default()).unwrap();
        shared.write().unwrap().apply(ControlCommand::Start).unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let stopper = tokio::spawn(async move {
            time::sleep(Duration::from_millis(150)).await;
            let _ = stop_tx.send(true);
        });

        let mut published = Vec::new();
        run_realtime(Arc::clone(&shared), stop_rx, |s| published.push(s.tick)).await;
        stopper.await.unwrap();

        let ticks = shared.read().unwrap().race().tick;
        assert!(ticks > 0);
        assert!(published.iter().all(|t| t % 4 == 0 && *t <= ticks));
    }

    #[tokio::test]
    async fn realtime_loop_returns_when_already_stopped() {
        let shared = create_shared_server(RaceConfig::default()).unwrap();
        shared.write().unwrap().apply(ControlCommand::Start).unwrap();
        let (_stop_tx, stop_rx) = watch::channel(true);
        run_realtime(Arc::clone(&shared), stop_rx, |_| {}).await;
        assert_eq!(shared.read().unwrap().race().tick, 0);
    }

    #[test]
    fn every_command_bumps_the_snapshot_version() {
        let mut server = server();
        let slot = server.snapshots();
        let before = slot.version();
        server.apply(ControlCommand::Grid).unwrap();
        assert_eq!(slot.version(), before + 1);
    }
}
