//! Race - The simulation context: track, pit lane, roster and clock
//!
//! Handles roster setup, grid formation and race status. Stepping is
//! delegated to the physics module; scheduling belongs to the server.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::sim::car::{AbilityStats, Car, CarSnapshot};
use crate::sim::config::RaceConfig;
use crate::sim::error::{SimError, SimResult};
use crate::sim::physics::{self, StepReport, Stepper};
use crate::sim::pit::PitFacility;
use crate::sim::splits::SplitTracker;
use crate::sim::track::Track;
use crate::sim::world::WorldDescriptor;

/// Race status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RaceStatus {
    Grid,
    Green,
    Finished,
}

/// Complete race state
#[derive(Debug, Clone)]
pub struct Race {
    pub config: RaceConfig,
    pub track: Track,
    pub pit: PitFacility,
    /// Roster; a car's index here is its identity within a session
    pub cars: Vec<Car>,
    pub splits: SplitTracker,
    pub status: RaceStatus,
    /// Simulation clock (ms since the last grid)
    pub clock_ms: f64,
    /// Ticks since the last grid
    pub tick: u64,
    /// Car ids by starting slot
    grid_order: Vec<u32>,
    rng: ChaCha8Rng,
}

impl Race {
    /// Build the circuit from the configured control points and grid the roster
    pub fn new(config: RaceConfig) -> SimResult<Self> {
        let track = Track::build(
            &config.control_points,
            config.width,
            config.height,
            &config.track,
        )?;
        Self::with_track(config, track)
    }

    /// Use an already built track
    pub fn with_track(config: RaceConfig, track: Track) -> SimResult<Self> {
        let pit = PitFacility::build(&track, &config.pit)?;
        let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
        let cars = Self::build_roster(&config, &mut rng);
        let grid_order = cars.iter().map(|c| c.id).collect();

        log::info!(
            "Track built: {} samples, {:.0} units, straight of {} samples, {} stalls",
            track.len(),
            track.total_length(),
            track.straight().len,
            pit.stalls().len()
        );

        let mut race = Self {
            config,
            track,
            pit,
            cars,
            splits: SplitTracker::default(),
            status: RaceStatus::Grid,
            clock_ms: 0.0,
            tick: 0,
            grid_order,
            rng,
        };
        race.grid();
        Ok(race)
    }

    fn build_roster(config: &RaceConfig, rng: &mut ChaCha8Rng) -> Vec<Car> {
        if config.cars.is_empty() {
            return (0..config.car_count)
                .map(|i| {
                    let stats = AbilityStats::random(rng);
                    Car::new(i, format!("Car {}", i + 1), stats, &config.car)
                })
                .collect();
        }

        config
            .cars
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let name = if entry.name.trim().is_empty() {
                    format!("Car {}", i + 1)
                } else {
                    entry.name.clone()
                };
                Car::new(i as u32, name, AbilityStats::from_json(&entry.stats), &config.car)
            })
            .collect()
    }

    /// Staggered two-wide formation behind the start line
    pub fn grid(&mut self) {
        let spacing = self.config.grid_spacing;
        let start_s = self.track.start_s();

        for (slot, id) in self.grid_order.iter().enumerate() {
            let Some(car) = self.cars.iter_mut().find(|c| c.id == *id) else {
                continue;
            };
            let row = (slot / 2) as f32;
            let column = slot % 2;
            let s = self
                .track
                .wrap(start_s - spacing * (row + 1.0) - column as f32 * spacing * 0.5);
            let half_width = self.track.half_width_at(self.track.index_at(s));
            let side = if column == 0 { 1.0 } else { -1.0 };
            car.reset(s, side * half_width * 0.4);
            physics::place(car, &self.track);
        }

        self.pit.release_all();
        self.splits.reset();
        self.status = RaceStatus::Grid;
        self.clock_ms = 0.0;
        self.tick = 0;
        log::info!("{} cars gridded", self.cars.len());
    }

    /// Reassign starting slots; only allowed while gridded
    pub fn set_grid_order(&mut self, ids: &[u32]) -> SimResult<()> {
        if self.status != RaceStatus::Grid || self.tick > 0 {
            return Err(SimError::RaceAlreadyStarted);
        }
        if let Some(id) = ids.iter().find(|id| !self.cars.iter().any(|c| c.id == **id)) {
            return Err(SimError::UnknownCar { id: *id });
        }
        let mut sorted = ids.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        if sorted.len() != ids.len() || ids.len() != self.cars.len() {
            return Err(SimError::IncompleteGridOrder);
        }

        self.grid_order = ids.to_vec();
        self.grid();
        Ok(())
    }

    /// Get car ids by starting slot
    pub fn grid_order(&self) -> &[u32] {
        &self.grid_order
    }

    /// Wave the green flag
    pub fn start(&mut self) {
        self.status = RaceStatus::Green;
        log::info!("Green flag");
    }

    /// Stop the race; the running order is frozen in the last snapshot
    pub fn finish(&mut self) {
        self.status = RaceStatus::Finished;
        match self.leader() {
            Some(car) => log::info!(
                "Race finished after {} ticks, {} leads on lap {}",
                self.tick,
                car.name,
                car.lap
            ),
            None => log::info!("Race finished after {} ticks", self.tick),
        }
    }

    /// Advance one fixed step of the configured length
    pub fn step(&mut self) -> StepReport {
        let dt = self.config.dt();
        self.step_with(dt)
    }

    /// Advance one step of `dt` seconds
    pub fn step_with(&mut self, dt: f32) -> StepReport {
        let stepper = Stepper {
            track: &self.track,
            config: &self.config,
            now_ms: self.clock_ms,
            dt,
        };
        let report = physics::step(
            &stepper,
            &mut self.pit,
            &mut self.cars,
            &mut self.splits,
            &mut self.rng,
        );
        self.clock_ms += f64::from(dt) * 1000.0;
        self.tick += 1;
        report
    }

    /// Get compact snapshot of the current (complete) tick
    pub fn snapshot(&self) -> RaceSnapshot {
        let cars = self
            .cars
            .iter()
            .map(|car| {
                let mut snapshot = CarSnapshot::from(car);
                snapshot.half_lap_gap_ms = self.splits.gap_for(car.id);
                snapshot
            })
            .collect();
        RaceSnapshot {
            tick: self.tick,
            clock_ms: self.clock_ms,
            status: self.status,
            cars,
            running_order: physics::ranking(&self.cars, &self.track)
                .into_iter()
                .map(|i| self.cars[i].id)
                .collect(),
            half_lap_leader: self.splits.leader,
            half_lap_number: self.splits.epoch,
        }
    }

    /// Static description of the circuit
    pub fn world(&self) -> WorldDescriptor {
        WorldDescriptor::new(&self.track, &self.pit)
    }

    /// Get current leader
    pub fn leader(&self) -> Option<&Car> {
        physics::ranking(&self.cars, &self.track)
            .first()
            .map(|&i| &self.cars[i])
    }

    /// Get car by ID
    pub fn car(&self, id: u32) -> Option<&Car> {
        self.cars.iter().find(|c| c.id == id)
    }

    /// Get mutable car by ID
    pub fn car_mut(&mut self, id: u32) -> Option<&mut Car> {
        self.cars.iter_mut().find(|c| c.id == id)
    }
}

/// Compact race snapshot for transfer to viewers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceSnapshot {
    pub tick: u64,
    pub clock_ms: f64,
    pub status: RaceStatus,
    pub cars: Vec<CarSnapshot>,
    /// Car ids, leader first
    pub running_order: Vec<u32>,
    pub half_lap_leader: Option<u32>,
    pub half_lap_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::config::CarEntry;
    use serde_json::json;

    #[test]
    fn grid_places_every_car_behind_the_line() {
        let race = Race::new(RaceConfig::default()).unwrap();
        let start = race.track.start_s();
        let mut behind: Vec<f32> = race
            .cars
            .iter()
            .map(|c| race.track.forward_gap(c.s, start))
            .collect();
        behind.sort_by(f32::total_cmp);
        assert!(behind[0] > 0.0);
        behind.dedup();
        assert_eq!(behind.len(), race.cars.len());
        assert_eq!(race.status, RaceStatus::Grid);
    }

    #[test]
    fn first_grid_slot_leads_the_running_order() {
        let race = Race::new(RaceConfig::default()).unwrap();
        let snapshot = race.snapshot();
        assert_eq!(snapshot.running_order, race.grid_order().to_vec());
    }

    #[test]
    fn leader_heads_the_running_order() {
        let mut race = Race::new(RaceConfig::default()).unwrap();
        race.start();
        for _ in 0..240 {
            race.step();
        }
        let order = race.snapshot().running_order;
        assert_eq!(race.leader().map(|c| c.id), order.first().copied());
    }

    #[test]
    fn grid_order_reorders_the_formation() {
        let mut race = Race::new(RaceConfig::default()).unwrap();
        let mut ids = race.grid_order().to_vec();
        ids.reverse();
        race.set_grid_order(&ids).unwrap();
        assert_eq!(race.snapshot().running_order, ids);
    }

    #[test]
    fn grid_order_is_validated() {
        let mut race = Race::new(RaceConfig::default()).unwrap();
        assert!(matches!(
            race.set_grid_order(&[0, 1]),
            Err(SimError::IncompleteGridOrder)
        ));
        assert!(matches!(
            race.set_grid_order(&[99]),
            Err(SimError::UnknownCar { id: 99 })
        ));
        race.start();
        race.step();
        let ids = race.grid_order().to_vec();
        assert!(matches!(
            race.set_grid_order(&ids),
            Err(SimError::RaceAlreadyStarted)
        ));
    }

    #[test]
    fn roster_entries_use_lenient_stats() {
        let config = RaceConfig {
            cars: vec![
                CarEntry {
                    name: "Vega".into(),
                    stats: json!({ "Speed": 10 }),
                },
                CarEntry {
                    name: String::new(),
                    stats: json!(null),
                },
            ],
            ..RaceConfig::default()
        };
        let race = Race::new(config).unwrap();
        assert_eq!(race.cars.len(), 2);
        assert_eq!(race.cars[0].name, "Vega");
        assert_eq!(race.cars[0].stats.speed, 10.0);
        assert_eq!(race.cars[1].name, "Car 2");
        assert_eq!(race.cars[1].stats, AbilityStats::default());
    }

    #[test]
    fn same_seed_same_roster() {
        let a = Race::new(RaceConfig::default()).unwrap();
        let b = Race::new(RaceConfig::default()).unwrap();
        let stats_a: Vec<_> = a.cars.iter().map(|c| c.stats).collect();
        let stats_b: Vec<_> = b.cars.iter().map(|c| c.stats).collect();
        assert_eq!(stats_a, stats_b);
    }

    #[test]
    fn regrid_resets_clock_and_splits() {
        let mut race = Race::new(RaceConfig::default()).unwrap();
        race.start();
        for _ in 0..600 {
            race.step();
        }
        assert!(race.clock_ms > 0.0);
        race.grid();
        assert_eq!(race.clock_ms, 0.0);
        assert_eq!(race.splits.epoch, 0);
        assert!(race.cars.iter().all(|c| c.lap == 0 && c.energy == 1.0));
        assert_eq!(race.pit.occupied_count(), 0);
    }
}
