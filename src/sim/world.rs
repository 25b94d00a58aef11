//! World - Static description of the circuit sent once per viewer

use serde::{Deserialize, Serialize};

use crate::sim::geom::Vec2;
use crate::sim::pit::{PitFacility, Stall};
use crate::sim::track::Track;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CenterlinePoint {
    pub x: f32,
    pub y: f32,
    pub heading: f32,
    pub curvature: f32,
    pub curvature_sign: f32,
    pub arc_length: f32,
}

/// Everything a viewer needs to draw the circuit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldDescriptor {
    pub width: f32,
    pub height: f32,
    pub total_length: f32,
    pub centerline: Vec<CenterlinePoint>,
    pub left_edge: Vec<Vec2>,
    pub right_edge: Vec<Vec2>,
    pub lane_width: f32,
    pub pit_window: Vec<usize>,
    /// Pit lane center offset from the centerline, per window sample
    pub pit_lane_offsets: Vec<f32>,
    /// Separator width between track and pit lane, per window sample
    pub pit_separator: Vec<f32>,
    pub pit_entry_index: usize,
    pub pit_exit_index: usize,
    pub stalls: Vec<Stall>,
    pub start_index: usize,
    pub start_s: f32,
    pub half_lap_s: f32,
}

impl WorldDescriptor {
    /// Describe a built track and its pit lane
    pub fn new(track: &Track, pit: &PitFacility) -> Self {
        let (width, height) = track.dimensions();
        let (left_edge, right_edge) = track.edges();
        let pit_window = pit.window_indices();
        let pit_lane_offsets = pit_window
            .iter()
            .map(|&index| pit.lateral_offset_at(track, index))
            .collect();
        let pit_separator = (0..pit_window.len())
            .map(|k| pit.separator_width(k))
            .collect();
        Self {
            width,
            height,
            total_length: track.total_length(),
            centerline: track
                .samples()
                .iter()
                .map(|s| CenterlinePoint {
                    x: s.pos.x,
                    y: s.pos.y,
                    heading: s.heading,
                    curvature: s.curvature,
                    curvature_sign: s.curvature_sign,
                    arc_length: s.arc_length,
                })
                .collect(),
            left_edge,
            right_edge,
            lane_width: pit.lane_width(),
            pit_window,
            pit_lane_offsets,
            pit_separator,
            pit_entry_index: pit.entry_track_index(),
            pit_exit_index: pit.exit_track_index(),
            stalls: pit.stalls().to_vec(),
            start_index: track.start_index(),
            start_s: track.start_s(),
            half_lap_s: track.half_lap_s(),
        }
    }
}
