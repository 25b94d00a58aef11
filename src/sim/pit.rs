//! Pit - Pit lane window, service stalls and lane offset lookup
//!
//! The pit lane runs alongside the longest straight, on the inside of the
//! loop. Stalls are exclusive: a stall holds at most one car id and only
//! that car can release it.

use serde::{Deserialize, Serialize};

use crate::sim::config::PitTuning;
use crate::sim::error::{SimError, SimResult};
use crate::sim::geom::{smoothstep, Vec2};
use crate::sim::track::{Straight, Track};

/// One service slot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stall {
    pub track_index: usize,
    /// Position within the pit window's sample list
    pub window_position: usize,
    pub pos: Vec2,
    pub heading: f32,
    /// Offset from the centerline at `track_index`
    pub lateral: f32,
    /// Arc length of the stall's track sample
    pub s: f32,
    pub occupant: Option<u32>,
}

impl Stall {
    /// Whether a car holds this stall
    pub fn occupied(&self) -> bool {
        self.occupant.is_some()
    }
}

#[derive(Debug, Clone, Copy)]
struct LaneSample {
    track_index: usize,
    pos: Vec2,
    lateral: f32,
}

/// Pit lane built from the track's straight
#[derive(Debug, Clone)]
pub struct PitFacility {
    window: Straight,
    sample_count: usize,
    entry: usize,
    exit: usize,
    lane: Vec<LaneSample>,
    separator: Vec<f32>,
    stalls: Vec<Stall>,
    lane_width: f32,
}

impl PitFacility {
    /// Lay out the pit lane and stalls along the track's straight
    pub fn build(track: &Track, tuning: &PitTuning) -> SimResult<Self> {
        let window = track.straight();
        if window.len == 0 {
            return Err(SimError::NoStraight);
        }
        let n = track.len();
        let len = window.len;
        let entry = (len as f32 * tuning.entry_fraction) as usize;
        let exit = ((len as f32 * tuning.exit_fraction) as usize).min(len - 1);
        if exit <= entry || exit - entry <= tuning.stall_count {
            return Err(SimError::PitWindowTooShort {
                window: exit.saturating_sub(entry),
                stalls: tuning.stall_count,
            });
        }

        let side = track.inside_side();
        let mut lane = Vec::with_capacity(len);
        let mut separator = Vec::with_capacity(len);
        for k in 0..len {
            let index = window.index(k, n);
            let kf = k as f32;
            let taper = smoothstep(0.0, entry as f32, kf)
                * (1.0 - smoothstep(exit as f32, (len - 1) as f32, kf));
            let hw = track.half_width_at(index);
            let lateral = side
                * (hw - tuning.lane_width * 0.5
                    + taper * (tuning.separator_width + tuning.lane_width));
            lane.push(LaneSample {
                track_index: index,
                pos: track.sample(index).pos + track.normal_at(index) * lateral,
                lateral,
            });
            separator.push(tuning.separator_width * taper);
        }

        let span = exit - entry;
        let stalls = (0..tuning.stall_count)
            .map(|j| {
                let k = entry + (j + 1) * span / (tuning.stall_count + 1);
                let index = window.index(k, n);
                let sample = track.sample(index);
                let lateral = lane[k].lateral + side * tuning.stall_margin;
                Stall {
                    track_index: index,
                    window_position: k,
                    pos: sample.pos + track.normal_at(index) * lateral,
                    heading: sample.heading,
                    lateral,
                    s: sample.arc_length,
                    occupant: None,
                }
            })
            .collect();

        Ok(Self {
            window,
            sample_count: n,
            entry,
            exit,
            lane,
            separator,
            stalls,
            lane_width: tuning.lane_width,
        })
    }

    /// Get all stalls in driving order
    pub fn stalls(&self) -> &[Stall] {
        &self.stalls
    }

    /// Get stall by index
    pub fn stall(&self, index: usize) -> Option<&Stall> {
        self.stalls.get(index)
    }

    /// Width of the pit lane
    pub fn lane_width(&self) -> f32 {
        self.lane_width
    }

    /// Track index where cars may start turning in
    pub fn entry_track_index(&self) -> usize {
        self.window.index(self.entry, self.sample_count)
    }

    /// Track index where the stall is released
    pub fn exit_track_index(&self) -> usize {
        self.window.index(self.exit, self.sample_count)
    }

    /// Track indices of the whole candidate window, in driving order
    pub fn window_indices(&self) -> Vec<usize> {
        self.lane.iter().map(|l| l.track_index).collect()
    }

    /// Separator width at a window position (tapers to zero at both ends)
    pub fn separator_width(&self, window_position: usize) -> f32 {
        self.separator.get(window_position).copied().unwrap_or(0.0)
    }

    /// Position of a track index inside the pit window
    pub fn window_position(&self, track_index: usize) -> Option<usize> {
        self.window.position_of(track_index, self.sample_count)
    }

    /// Whether a car at `track_index` may turn into the pit lane
    pub fn in_entry_zone(&self, track_index: usize) -> bool {
        matches!(self.window_position(track_index), Some(k) if k >= self.entry && k < self.exit)
    }

    /// Whether a car at `track_index` has left the serviceable part of the lane
    pub fn past_exit(&self, track_index: usize) -> bool {
        !matches!(self.window_position(track_index), Some(k) if k < self.exit)
    }

    /// Number of stalls currently held
    pub fn occupied_count(&self) -> usize {
        self.stalls.iter().filter(|s| s.occupied()).count()
    }

    /// Stall currently held by `car_id`
    pub fn held_by(&self, car_id: u32) -> Option<usize> {
        self.stalls.iter().position(|s| s.occupant == Some(car_id))
    }

    /// Claim a free stall for a car at `track_index`.
    ///
    /// The first free stall ahead is preferred; when every stall ahead is
    /// taken the nearest free one behind is used instead.
    pub fn claim_stall(&mut self, car_id: u32, track_index: usize) -> Option<usize> {
        if let Some(held) = self.held_by(car_id) {
            return Some(held);
        }
        let k = self.window_position(track_index)?;
        let slot = self
            .stalls
            .iter()
            .position(|s| !s.occupied() && s.window_position > k)
            .or_else(|| self.stalls.iter().rposition(|s| !s.occupied()))?;
        self.stalls[slot].occupant = Some(car_id);
        Some(slot)
    }

    /// Free a stall; only its occupant can release it
    pub fn release(&mut self, stall: usize, car_id: u32) -> bool {
        match self.stalls.get_mut(stall) {
            Some(s) if s.occupant == Some(car_id) => {
                s.occupant = None;
                true
            }
            _ => false,
        }
    }

    /// Put `car_id` back to holding exactly `stall` (or nothing)
    pub fn restore_holding(&mut self, car_id: u32, stall: Option<usize>) {
        for (i, s) in self.stalls.iter_mut().enumerate() {
            if s.occupant == Some(car_id) && Some(i) != stall {
                s.occupant = None;
            }
        }
        if let Some(s) = stall.and_then(|i| self.stalls.get_mut(i)) {
            if s.occupant.is_none() {
                s.occupant = Some(car_id);
            }
        }
    }

    /// Free every stall (used when cars are gridded)
    pub fn release_all(&mut self) {
        for stall in &mut self.stalls {
            stall.occupant = None;
        }
    }

    /// Lateral offset of the pit lane center relative to the centerline at `track_index`
    pub fn lateral_offset_at(&self, track: &Track, track_index: usize) -> f32 {
        let nearest = self
            .lane
            .iter()
            .min_by_key(|l| track.index_distance(l.track_index, track_index))
            .map(|l| l.pos);
        match nearest {
            Some(pos) => (pos - track.sample(track_index).pos).dot(track.normal_at(track_index)),
            None => 0.0,
        }
    }
}
