//! Config - Race configuration and named tuning constants
//!
//! Every heuristic constant the stepper uses lives here so it can be
//! overridden from a JSON config instead of being edited in code.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::sim::error::SimResult;
use crate::sim::geom::Vec2;

/// Track geometry tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackTuning {
    /// Spline samples per control-point segment
    pub steps_per_segment: usize,
    /// Half width away from the straight
    pub normal_half_width: f32,
    /// Half width on the longest straight
    pub straight_half_width: f32,
    /// Curvature (1/units) below which a sample counts as straight
    pub straight_curvature: f32,
    /// Fraction of all samples used to ramp into/out of the straight
    pub blend_fraction: f32,
    /// Start/finish position as a fraction of the straight
    pub start_fraction: f32,
    /// Shortest total length accepted as a real track
    pub min_length: f32,
}

impl Default for TrackTuning {
    fn default() -> Self {
        Self {
            steps_per_segment: 24,
            normal_half_width: 34.0,
            straight_half_width: 52.0,
            straight_curvature: 0.0015,
            blend_fraction: 0.04,
            start_fraction: 0.08,
            min_length: 100.0,
        }
    }
}

/// Pit lane layout and pit-stop strategy tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PitTuning {
    pub lane_width: f32,
    /// Separator between the racing surface and the pit lane at full width
    pub separator_width: f32,
    pub stall_count: usize,
    pub entry_fraction: f32,
    pub exit_fraction: f32,
    /// Extra inward offset of each stall from the lane center
    pub stall_margin: f32,
    /// Distance at which an entering car snaps into its stall
    pub arrive_tolerance: f32,
    /// Service time jitter, as a +/- fraction of the baseline
    pub service_jitter: f32,
    pub min_laps_before_pit: u32,
    /// Energy threshold increase per lap beyond the minimum
    pub threshold_per_extra_lap: f32,
    /// Incident probability increase per lap beyond the minimum
    pub incident_per_extra_lap: f32,
    /// Arming threshold as a fraction of the pit energy threshold
    pub arm_factor: f32,
    /// Exiting cars accelerate toward this fraction of their top speed
    pub exit_speed_fraction: f32,
}

impl Default for PitTuning {
    fn default() -> Self {
        Self {
            lane_width: 22.0,
            separator_width: 10.0,
            stall_count: 6,
            entry_fraction: 0.18,
            exit_fraction: 0.86,
            stall_margin: 6.0,
            arrive_tolerance: 2.0,
            service_jitter: 0.15,
            min_laps_before_pit: 3,
            threshold_per_extra_lap: 0.04,
            incident_per_extra_lap: 0.03,
            arm_factor: 0.6,
            exit_speed_fraction: 0.6,
        }
    }
}

/// Baselines the ability stats scale into driving coefficients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CarTuning {
    pub top_speed: f32,
    pub acceleration: f32,
    pub braking: f32,
    pub cornering_stiffness: f32,
    pub min_speed_fraction: f32,
    pub pit_speed: f32,
    pub service_ms: f32,
    /// Energy drained per second at neutral stats
    pub wear_rate: f32,
    pub safe_gap: f32,
    pub pit_energy_threshold: f32,
    pub incident_probability: f32,
}

impl Default for CarTuning {
    fn default() -> Self {
        Self {
            top_speed: 260.0,
            acceleration: 90.0,
            braking: 180.0,
            cornering_stiffness: 1.0,
            min_speed_fraction: 0.3,
            pit_speed: 70.0,
            service_ms: 5000.0,
            wear_rate: 0.012,
            safe_gap: 28.0,
            pit_energy_threshold: 0.35,
            incident_probability: 0.05,
        }
    }
}

/// Speed, overtaking and lane heuristics
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DrivingTuning {
    /// Arc-length offsets sampled for the curvature speed limit
    pub lookahead: Vec<f32>,
    pub curve_gain: f32,
    /// Target speed multiplier at zero energy
    pub empty_energy_speed: f32,
    pub wear_base: f32,
    pub wear_curvature: f32,
    pub wear_speed: f32,
    pub slipstream_gap: f32,
    pub slipstream_bonus: f32,
    /// Lateral separation above which two cars count as side by side
    pub side_by_side_lateral: f32,
    /// Blend value at or above which a sample counts as straight
    pub straight_blend_cutoff: f32,
    pub duel_gap: f32,
    pub duel_speed_delta: f32,
    pub duel_window: f32,
    pub duel_clear_gap: f32,
    pub duel_lateral_fraction: f32,
    pub two_lane_width: f32,
    pub three_lane_width: f32,
    pub lane_lookahead: f32,
    pub lane_occupancy: f32,
    pub lane_change_cost: f32,
    pub lane_min_clearance: f32,
    pub lane_bias: f32,
    /// Fraction of the half width the racing line sits toward the inside
    pub racing_line_inside: f32,
    /// Lateral correction speed per unit of half width, per second
    pub lateral_rate: f32,
    pub edge_margin: f32,
    pub duel_edge_margin: f32,
    /// Smallest denominator used when normalizing by distance or speed
    pub min_denominator: f32,
}

impl Default for DrivingTuning {
    fn default() -> Self {
        Self {
            lookahead: vec![0.0, 40.0, 80.0, 140.0, 200.0],
            curve_gain: 60.0,
            empty_energy_speed: 0.85,
            wear_base: 0.6,
            wear_curvature: 60.0,
            wear_speed: 0.4,
            slipstream_gap: 60.0,
            slipstream_bonus: 1.05,
            side_by_side_lateral: 14.0,
            straight_blend_cutoff: 0.5,
            duel_gap: 45.0,
            duel_speed_delta: 8.0,
            duel_window: 300.0,
            duel_clear_gap: 12.0,
            duel_lateral_fraction: 0.55,
            two_lane_width: 70.0,
            three_lane_width: 96.0,
            lane_lookahead: 160.0,
            lane_occupancy: 12.0,
            lane_change_cost: 0.8,
            lane_min_clearance: 50.0,
            lane_bias: 14.0,
            racing_line_inside: 0.35,
            lateral_rate: 1.5,
            edge_margin: 8.0,
            duel_edge_margin: 4.0,
            min_denominator: 1e-3,
        }
    }
}

/// One roster entry; `stats` is parsed leniently at the boundary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CarEntry {
    pub name: String,
    pub stats: serde_json::Value,
}

/// Race configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RaceConfig {
    /// Seed for every random decision in the race
    pub seed: u64,
    pub width: f32,
    pub height: f32,
    /// Closed loop of control points in normalized 0..1 coordinates
    pub control_points: Vec<Vec2>,
    /// Explicit roster; when empty `car_count` cars are generated
    pub cars: Vec<CarEntry>,
    pub car_count: u32,
    /// Fixed simulation steps per second
    pub tick_rate: f32,
    /// Publish a snapshot every N ticks
    pub snapshot_every: u32,
    /// Arc-length spacing between grid rows
    pub grid_spacing: f32,
    /// Laps shorter than this are treated as artifacts of a reset
    pub min_lap_ms: f64,
    pub track: TrackTuning,
    pub pit: PitTuning,
    pub car: CarTuning,
    pub driving: DrivingTuning,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            seed: 7,
            width: 1600.0,
            height: 900.0,
            control_points: default_control_points(),
            cars: Vec::new(),
            car_count: 10,
            tick_rate: 120.0,
            snapshot_every: 4,
            grid_spacing: 24.0,
            min_lap_ms: 2000.0,
            track: TrackTuning::default(),
            pit: PitTuning::default(),
            car: CarTuning::default(),
            driving: DrivingTuning::default(),
        }
    }
}

impl RaceConfig {
    /// Parse a config, filling omitted fields with defaults
    pub fn from_json_str(json: &str) -> SimResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> SimResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Fixed step length in seconds
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_rate.max(1.0)
    }
}

/// Default circuit: a twisty infield closed by a long bottom straight
pub fn default_control_points() -> Vec<Vec2> {
    [
        (0.12, 0.62),
        (0.14, 0.30),
        (0.28, 0.14),
        (0.46, 0.22),
        (0.56, 0.42),
        (0.70, 0.20),
        (0.86, 0.22),
        (0.90, 0.50),
        (0.84, 0.80),
        (0.62, 0.82),
        (0.40, 0.82),
        (0.22, 0.80),
    ]
    .into_iter()
    .map(|(x, y)| Vec2::new(x, y))
    .collect()
}
