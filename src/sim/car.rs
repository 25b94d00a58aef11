//! Car - Per-car simulation state, ability stats and driving coefficients
//!
//! Ability stats are coarse 0-10 ratings. They are validated once at the
//! roster boundary and turned into continuous coefficients the stepper
//! reads every tick.

use serde::{Deserialize, Serialize};

use crate::sim::config::CarTuning;
use crate::sim::geom::Vec2;

pub const STAT_MIN: f32 = 0.0;
pub const STAT_MAX: f32 = 10.0;
pub const STAT_DEFAULT: f32 = 5.0;

/// Validated ability ratings, each in [0, 10]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AbilityStats {
    pub speed: f32,
    pub acceleration: f32,
    pub braking: f32,
    pub handling: f32,
    pub endurance: f32,
    pub pit: f32,
    pub risk: f32,
}

impl Default for AbilityStats {
    fn default() -> Self {
        Self {
            speed: STAT_DEFAULT,
            acceleration: STAT_DEFAULT,
            braking: STAT_DEFAULT,
            handling: STAT_DEFAULT,
            endurance: STAT_DEFAULT,
            pit: STAT_DEFAULT,
            risk: STAT_DEFAULT,
        }
    }
}

impl AbilityStats {
    /// Parse a loosely shaped stats object.
    ///
    /// Keys are matched case-insensitively. Numbers and numeric strings are
    /// accepted; anything missing or unparsable falls back to 5. Values are
    /// clamped to [0, 10].
    pub fn from_json(value: &serde_json::Value) -> Self {
        let lookup = |name: &str| -> f32 {
            let Some(object) = value.as_object() else {
                return STAT_DEFAULT;
            };
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .and_then(|(_, v)| match v {
                    serde_json::Value::Number(n) => n.as_f64().map(|f| f as f32),
                    serde_json::Value::String(s) => s.trim().parse::<f32>().ok(),
                    _ => None,
                })
                .filter(|f| f.is_finite())
                .map(|f| f.clamp(STAT_MIN, STAT_MAX))
                .unwrap_or(STAT_DEFAULT)
        };

        Self {
            speed: lookup("speed"),
            acceleration: lookup("acceleration"),
            braking: lookup("braking"),
            handling: lookup("handling"),
            endurance: lookup("endurance"),
            pit: lookup("pit"),
            risk: lookup("risk"),
        }
    }

    /// Random ratings for generated rosters
    pub fn random<R: rand::Rng + ?Sized>(rng: &mut R) -> Self {
        let mut roll = || rng.gen_range(2.0..=9.0_f32).round();
        Self {
            speed: roll(),
            acceleration: roll(),
            braking: roll(),
            handling: roll(),
            endurance: roll(),
            pit: roll(),
            risk: roll(),
        }
    }
}

/// Continuous driving coefficients derived from [`AbilityStats`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coefficients {
    pub max_speed: f32,
    pub min_speed: f32,
    pub acceleration: f32,
    pub braking: f32,
    pub cornering_stiffness: f32,
    pub pit_speed: f32,
    pub service_ms: f32,
    /// Energy restored per second while servicing
    pub refill_rate: f32,
    pub wear_rate: f32,
    pub safe_gap: f32,
    pub pit_energy_threshold: f32,
    pub incident_probability: f32,
}

impl Coefficients {
    /// Derive coefficients from ratings and tuning baselines
    pub fn from_stats(stats: &AbilityStats, tuning: &CarTuning) -> Self {
        let max_speed = tuning.top_speed * (0.85 + 0.03 * stats.speed);
        let service_ms = tuning.service_ms * (1.5 - 0.1 * stats.pit);
        Self {
            max_speed,
            min_speed: max_speed * tuning.min_speed_fraction,
            acceleration: tuning.acceleration * (0.7 + 0.06 * stats.acceleration),
            braking: tuning.braking * (0.7 + 0.06 * stats.braking),
            cornering_stiffness: tuning.cornering_stiffness * (1.5 - 0.1 * stats.handling),
            pit_speed: tuning.pit_speed * (0.9 + 0.02 * stats.pit),
            service_ms,
            refill_rate: 1000.0 / service_ms.max(1.0),
            wear_rate: tuning.wear_rate * (1.5 - 0.1 * stats.endurance),
            safe_gap: tuning.safe_gap * (1.25 - 0.05 * stats.risk),
            pit_energy_threshold: tuning.pit_energy_threshold * (1.25 - 0.05 * stats.risk),
            incident_probability: tuning.incident_probability
                * (1.5 - 0.1 * stats.endurance)
                * (1.25 - 0.05 * stats.risk),
        }
    }
}

/// Pit stop progress; transitions only run forward through this cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PitState {
    #[default]
    None,
    Entering,
    Servicing,
    Exiting,
}

impl PitState {
    /// State that must follow this one
    pub fn next(self) -> PitState {
        match self {
            PitState::None => PitState::Entering,
            PitState::Entering => PitState::Servicing,
            PitState::Servicing => PitState::Exiting,
            PitState::Exiting => PitState::None,
        }
    }

    /// Whether the car is anywhere in the pit cycle
    pub fn in_pit(self) -> bool {
        self != PitState::None
    }
}

/// Active overtaking attempt
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Duel {
    /// Roster index of the defending car
    pub partner: usize,
    /// Lateral side (+1 left normal, -1 right) the pass is attempted on
    pub side: f32,
    /// Race distance at which the attempt is abandoned
    pub end_distance: f32,
}

/// Lap timing, in simulation milliseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LapTiming {
    /// Set at the first line crossing after a reset
    pub lap_start_ms: Option<f64>,
    pub last_lap_ms: Option<f64>,
    pub best_lap_ms: Option<f64>,
}

impl LapTiming {
    /// Record a crossing at `now_ms`; returns the lap time if it was kept
    pub fn record_crossing(&mut self, now_ms: f64, min_lap_ms: f64) -> Option<f64> {
        let lap = self
            .lap_start_ms
            .map(|start| now_ms - start)
            .filter(|lap| *lap >= min_lap_ms);
        self.lap_start_ms = Some(now_ms);
        if let Some(lap) = lap {
            self.last_lap_ms = Some(lap);
            if self.best_lap_ms.map_or(true, |best| lap < best) {
                self.best_lap_ms = Some(lap);
            }
        }
        lap
    }
}

/// Complete state for a single car
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Car {
    pub id: u32,
    pub name: String,
    pub stats: AbilityStats,
    pub coefficients: Coefficients,
    /// Wrapped arc length along the centerline
    pub s: f32,
    /// Offset from the centerline along the left normal
    pub lateral: f32,
    pub target_lateral: f32,
    pub velocity: f32,
    /// Start/finish crossings since the grid
    pub lap: u32,
    pub energy: f32,
    pub pos: Vec2,
    pub heading: f32,
    pub pit_state: PitState,
    pub pit_stall: Option<usize>,
    pub pit_elapsed_ms: f32,
    pub pit_target_ms: f32,
    pub laps_since_pit: u32,
    pub planned_pit_lap: Option<u32>,
    pub want_pit: bool,
    pub duel: Option<Duel>,
    pub timing: LapTiming,
}

impl Car {
    /// Create a car with full energy at s = 0
    pub fn new(id: u32, name: String, stats: AbilityStats, tuning: &CarTuning) -> Self {
        Self {
            id,
            name,
            stats,
            coefficients: Coefficients::from_stats(&stats, tuning),
            s: 0.0,
            lateral: 0.0,
            target_lateral: 0.0,
            velocity: 0.0,
            lap: 0,
            energy: 1.0,
            pos: Vec2::ZERO,
            heading: 0.0,
            pit_state: PitState::None,
            pit_stall: None,
            pit_elapsed_ms: 0.0,
            pit_target_ms: 0.0,
            laps_since_pit: 0,
            planned_pit_lap: None,
            want_pit: false,
            duel: None,
            timing: LapTiming::default(),
        }
    }

    /// Replace the stats and recompute coefficients
    pub fn set_stats(&mut self, stats: AbilityStats, tuning: &CarTuning) {
        self.stats = stats;
        self.coefficients = Coefficients::from_stats(&stats, tuning);
    }

    /// Reset to a grid slot; the car keeps its identity and stats
    pub fn reset(&mut self, s: f32, lateral: f32) {
        self.s = s;
        self.lateral = lateral;
        self.target_lateral = lateral;
        self.velocity = 0.0;
        self.lap = 0;
        self.energy = 1.0;
        self.pit_state = PitState::None;
        self.pit_stall = None;
        self.pit_elapsed_ms = 0.0;
        self.pit_target_ms = 0.0;
        self.laps_since_pit = 0;
        self.planned_pit_lap = None;
        self.want_pit = false;
        self.duel = None;
        self.timing = LapTiming::default();
    }

    /// Total distance covered: completed laps plus progress past the line
    pub fn race_distance(&self, start_s: f32, total_length: f32) -> f32 {
        self.lap as f32 * total_length
            + crate::sim::track::forward_gap(start_s, self.s, total_length)
    }

    /// Check that every integrated quantity is finite
    pub fn is_finite(&self) -> bool {
        self.s.is_finite()
            && self.lateral.is_finite()
            && self.velocity.is_finite()
            && self.energy.is_finite()
            && self.pos.is_finite()
    }
}

/// Compact car state for a snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarSnapshot {
    pub id: u32,
    pub name: String,
    pub s: f32,
    pub velocity: f32,
    pub lap: u32,
    pub lateral: f32,
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub energy: f32,
    pub in_pit: bool,
    pub pit_state: PitState,
    pub best_lap_ms: Option<f64>,
    pub last_lap_ms: Option<f64>,
    pub half_lap_gap_ms: Option<f64>,
}

impl From<&Car> for CarSnapshot {
    fn from(car: &Car) -> Self {
        Self {
            id: car.id,
            name: car.name.clone(),
            s: car.s,
            velocity: car.velocity,
            lap: car.lap,
            lateral: car.lateral,
            x: car.pos.x,
            y: car.pos.y,
            heading: car.heading,
            energy: car.energy,
            in_pit: car.pit_state.in_pit(),
            pit_state: car.pit_state,
            best_lap_ms: car.timing.best_lap_ms,
            last_lap_ms: car.timing.last_lap_ms,
            half_lap_gap_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn loose_stats_default_and_clamp() {
        let stats = AbilityStats::from_json(&json!({
            "Speed": 9,
            "HANDLING": "7.5",
            "braking": "fast",
            "risk": 42,
            "pit": null,
            "endurance": -3
        }));
        assert_eq!(stats.speed, 9.0);
        assert_eq!(stats.handling, 7.5);
        assert_eq!(stats.braking, STAT_DEFAULT);
        assert_eq!(stats.risk, STAT_MAX);
        assert_eq!(stats.pit, STAT_DEFAULT);
        assert_eq!(stats.endurance, STAT_MIN);
        assert_eq!(stats.acceleration, STAT_DEFAULT);
    }

    #[test]
    fn non_object_stats_are_neutral() {
        assert_eq!(AbilityStats::from_json(&json!("oops")), AbilityStats::default());
        assert_eq!(AbilityStats::from_json(&serde_json::Value::Null), AbilityStats::default());
    }

    #[test]
    fn coefficients_are_monotonic() {
        let tuning = CarTuning::default();
        let low = AbilityStats {
            speed: 2.0,
            handling: 2.0,
            pit: 2.0,
            endurance: 2.0,
            risk: 2.0,
            ..AbilityStats::default()
        };
        let high = AbilityStats {
            speed: 9.0,
            handling: 9.0,
            pit: 9.0,
            endurance: 9.0,
            risk: 9.0,
            ..AbilityStats::default()
        };
        let lo = Coefficients::from_stats(&low, &tuning);
        let hi = Coefficients::from_stats(&high, &tuning);
        assert!(hi.max_speed > lo.max_speed);
        assert!(hi.cornering_stiffness < lo.cornering_stiffness);
        assert!(hi.service_ms < lo.service_ms);
        assert!(hi.wear_rate < lo.wear_rate);
        assert!(hi.safe_gap < lo.safe_gap);
        assert!(hi.pit_energy_threshold < lo.pit_energy_threshold);
    }

    #[test]
    fn neutral_stats_hit_the_baselines() {
        let tuning = CarTuning::default();
        let c = Coefficients::from_stats(&AbilityStats::default(), &tuning);
        assert!((c.max_speed - tuning.top_speed).abs() < 1e-3);
        assert!((c.service_ms - tuning.service_ms).abs() < 1e-3);
        assert!((c.cornering_stiffness - tuning.cornering_stiffness).abs() < 1e-6);
    }

    #[test]
    fn pit_states_cycle_in_order() {
        let mut state = PitState::None;
        let mut seen = vec![state];
        for _ in 0..4 {
            state = state.next();
            seen.push(state);
        }
        assert_eq!(
            seen,
            vec![
                PitState::None,
                PitState::Entering,
                PitState::Servicing,
                PitState::Exiting,
                PitState::None
            ]
        );
    }

    #[test]
    fn first_crossing_after_reset_records_no_lap() {
        let mut timing = LapTiming::default();
        assert_eq!(timing.record_crossing(100.0, 2000.0), None);
        assert_eq!(timing.record_crossing(20_100.0, 2000.0), Some(20_000.0));
        assert_eq!(timing.record_crossing(21_000.0, 2000.0), None);
        assert_eq!(timing.record_crossing(39_000.0, 2000.0), Some(18_000.0));
        assert_eq!(timing.best_lap_ms, Some(18_000.0));
        assert_eq!(timing.last_lap_ms, Some(18_000.0));
    }
}
