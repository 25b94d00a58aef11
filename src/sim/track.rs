//! Track - Closed-loop centerline built from control points
//!
//! The centerline is a closed uniform Catmull-Rom spline sampled at a
//! fixed number of steps per control segment. Each sample carries its
//! heading, curvature and arc length; the longest low-curvature run is
//! marked as the straight, which is wider and hosts the pit lane.

use serde::{Deserialize, Serialize};

use crate::sim::config::TrackTuning;
use crate::sim::error::{SimError, SimResult};
use crate::sim::geom::{lerp, wrap_angle, Vec2};

const MIN_CONTROL_POINTS: usize = 4;
/// Samples closer than this are merged so arc length stays strictly increasing
const MIN_SAMPLE_SPACING: f32 = 1e-4;
/// Chord length floor used as the curvature denominator
const MIN_CHORD: f32 = 1e-3;
const SIGN_EPSILON: f32 = 1e-6;

/// One point of the sampled centerline
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackSample {
    pub pos: Vec2,
    /// Direction of travel (radians)
    pub heading: f32,
    /// Unsigned curvature (1/units)
    pub curvature: f32,
    /// +1 when the track turns toward the left normal, -1 toward the right, 0 if straight
    pub curvature_sign: f32,
    /// Distance along the centerline from sample 0
    pub arc_length: f32,
}

/// Contiguous, possibly wrapping, run of sample indices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Straight {
    pub start: usize,
    pub len: usize,
}

impl Straight {
    /// Track index of the k-th sample of the straight
    pub fn index(&self, k: usize, sample_count: usize) -> usize {
        (self.start + k) % sample_count
    }

    /// Position of `index` within the straight, if it lies on it
    pub fn position_of(&self, index: usize, sample_count: usize) -> Option<usize> {
        let k = (index + sample_count - self.start % sample_count) % sample_count;
        (k < self.len).then_some(k)
    }

    /// Whether `index` lies on the straight
    pub fn contains(&self, index: usize, sample_count: usize) -> bool {
        self.position_of(index, sample_count).is_some()
    }
}

/// World-space position and heading at some arc length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub pos: Vec2,
    pub heading: f32,
}

/// Immutable sampled track
#[derive(Debug, Clone)]
pub struct Track {
    samples: Vec<TrackSample>,
    total_length: f32,
    straight: Straight,
    blend: Vec<f32>,
    normal_half_width: f32,
    straight_half_width: f32,
    start_index: usize,
    /// +1 when the loop interior lies on the left normal side
    inside_side: f32,
    width: f32,
    height: f32,
}

impl Track {
    /// Build a track from normalized control points scaled to `width` x `height`
    pub fn build(
        control_points: &[Vec2],
        width: f32,
        height: f32,
        tuning: &TrackTuning,
    ) -> SimResult<Self> {
        if control_points.len() < MIN_CONTROL_POINTS {
            return Err(SimError::TooFewControlPoints {
                found: control_points.len(),
                min: MIN_CONTROL_POINTS,
            });
        }
        if control_points.iter().any(|p| !p.is_finite()) || !(width > 0.0 && height > 0.0) {
            return Err(SimError::DegenerateTrack {
                reason: "control points and dimensions must be finite and positive".into(),
            });
        }

        let points: Vec<Vec2> = control_points
            .iter()
            .map(|p| Vec2::new(p.x * width, p.y * height))
            .collect();
        let steps = tuning.steps_per_segment.max(1);
        let n = points.len();

        let mut positions = Vec::with_capacity(n * steps);
        let mut tangents = Vec::with_capacity(n * steps);
        for i in 0..n {
            let p0 = points[(i + n - 1) % n];
            let p1 = points[i];
            let p2 = points[(i + 1) % n];
            let p3 = points[(i + 2) % n];
            for step in 0..steps {
                let t = step as f32 / steps as f32;
                let (pos, tangent) = catmull_rom(p0, p1, p2, p3, t);
                positions.push(pos);
                tangents.push(tangent);
            }
        }

        Self::from_samples(positions, tangents, width, height, tuning)
    }

    /// Build a track directly from a closed polyline (no spline smoothing)
    pub fn from_polyline(
        points: &[Vec2],
        width: f32,
        height: f32,
        tuning: &TrackTuning,
    ) -> SimResult<Self> {
        if points.len() < MIN_CONTROL_POINTS {
            return Err(SimError::TooFewControlPoints {
                found: points.len(),
                min: MIN_CONTROL_POINTS,
            });
        }
        let n = points.len();
        let tangents = (0..n)
            .map(|i| points[(i + 1) % n] - points[(i + n - 1) % n])
            .collect();
        Self::from_samples(points.to_vec(), tangents, width, height, tuning)
    }

    fn from_samples(
        positions: Vec<Vec2>,
        tangents: Vec<Vec2>,
        width: f32,
        height: f32,
        tuning: &TrackTuning,
    ) -> SimResult<Self> {
        // Merge coincident samples from degenerate control segments
        let mut kept: Vec<(Vec2, Vec2)> = Vec::with_capacity(positions.len());
        for (pos, tangent) in positions.into_iter().zip(tangents) {
            if !pos.is_finite() || !tangent.is_finite() {
                return Err(SimError::DegenerateTrack {
                    reason: "non-finite centerline sample".into(),
                });
            }
            match kept.last() {
                Some((last, _)) if last.distance(pos) < MIN_SAMPLE_SPACING => {}
                _ => kept.push((pos, tangent)),
            }
        }
        while kept.len() > 1 && kept[0].0.distance(kept[kept.len() - 1].0) < MIN_SAMPLE_SPACING {
            kept.pop();
        }
        let n = kept.len();
        if n < MIN_CONTROL_POINTS {
            return Err(SimError::DegenerateTrack {
                reason: format!("only {n} distinct samples"),
            });
        }

        let mut samples: Vec<TrackSample> = Vec::with_capacity(n);
        let mut arc = 0.0;
        for i in 0..n {
            let (pos, tangent) = kept[i];
            if i > 0 {
                arc += kept[i - 1].0.distance(pos);
            }
            let heading = if tangent.length() > f32::EPSILON {
                tangent.to_angle()
            } else {
                (kept[(i + 1) % n].0 - pos).to_angle()
            };
            samples.push(TrackSample {
                pos,
                heading,
                curvature: 0.0,
                curvature_sign: 0.0,
                arc_length: arc,
            });
        }
        let total_length = arc + kept[n - 1].0.distance(kept[0].0);
        if !(total_length >= tuning.min_length) {
            return Err(SimError::DegenerateTrack {
                reason: format!("total length {total_length} below {}", tuning.min_length),
            });
        }

        for i in 0..n {
            let prev = samples[(i + n - 1) % n].pos;
            let next = samples[(i + 1) % n];
            let here = samples[i];
            let turn = wrap_angle(next.heading - here.heading).abs();
            let chord = here.pos.distance(next.pos).max(MIN_CHORD);
            let cross = (here.pos - prev).perp_dot(next.pos - here.pos);
            samples[i].curvature = turn / chord;
            samples[i].curvature_sign = if cross > SIGN_EPSILON {
                1.0
            } else if cross < -SIGN_EPSILON {
                -1.0
            } else {
                0.0
            };
        }

        let straight = longest_straight(&samples, tuning.straight_curvature);
        let blend = straight_blend(n, straight, tuning.blend_fraction);
        let start_index = if straight.len > 0 {
            straight.index(
                ((straight.len as f32 * tuning.start_fraction) as usize).min(straight.len - 1),
                n,
            )
        } else {
            0
        };

        let area: f32 = (0..n)
            .map(|i| samples[i].pos.perp_dot(samples[(i + 1) % n].pos))
            .sum();
        let inside_side = if area >= 0.0 { 1.0 } else { -1.0 };

        Ok(Self {
            samples,
            total_length,
            straight,
            blend,
            normal_half_width: tuning.normal_half_width,
            straight_half_width: tuning.straight_half_width,
            start_index,
            inside_side,
            width,
            height,
        })
    }

    /// Get all centerline samples
    pub fn samples(&self) -> &[TrackSample] {
        &self.samples
    }

    /// Get sample by index, wrapping around the loop
    pub fn sample(&self, index: usize) -> &TrackSample {
        &self.samples[index % self.samples.len()]
    }

    /// Number of centerline samples
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Check if the track has no samples
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Loop length, including the closing chord
    pub fn total_length(&self) -> f32 {
        self.total_length
    }

    /// Get the longest straight
    pub fn straight(&self) -> Straight {
        self.straight
    }

    /// Sample index of the start/finish line
    pub fn start_index(&self) -> usize {
        self.start_index
    }

    /// Arc length of the start/finish line
    pub fn start_s(&self) -> f32 {
        self.samples[self.start_index].arc_length
    }

    /// Arc length of the half-lap split line
    pub fn half_lap_s(&self) -> f32 {
        self.wrap(self.start_s() + self.total_length * 0.5)
    }

    /// Lateral sign pointing into the loop
    pub fn inside_side(&self) -> f32 {
        self.inside_side
    }

    /// World width and height
    pub fn dimensions(&self) -> (f32, f32) {
        (self.width, self.height)
    }

    /// Wrap any arc length into [0, total_length)
    pub fn wrap(&self, s: f32) -> f32 {
        wrap_s(s, self.total_length)
    }

    /// Forward distance from `from` to `to` along the loop, always >= 0
    pub fn forward_gap(&self, from: f32, to: f32) -> f32 {
        forward_gap(from, to, self.total_length)
    }

    /// Shortest index distance around the loop
    pub fn index_distance(&self, a: usize, b: usize) -> usize {
        let n = self.samples.len();
        let d = (a + n - b % n) % n;
        d.min(n - d)
    }

    /// Sample index at or before arc length `s`
    pub fn index_at(&self, s: f32) -> usize {
        let s = self.wrap(s);
        self.samples
            .partition_point(|sample| sample.arc_length <= s)
            .saturating_sub(1)
    }

    /// Unsigned curvature at arc length `s`
    pub fn curvature_at(&self, s: f32) -> f32 {
        self.samples[self.index_at(s)].curvature
    }

    /// Turn direction at arc length `s`
    pub fn curvature_sign_at(&self, s: f32) -> f32 {
        self.samples[self.index_at(s)].curvature_sign
    }

    /// 0 away from the straight, 1 on it, ramping linearly in between
    pub fn straight_blend(&self, index: usize) -> f32 {
        self.blend[index % self.blend.len()]
    }

    /// Half width at a sample, widened toward the straight
    pub fn half_width_at(&self, index: usize) -> f32 {
        lerp(
            self.normal_half_width,
            self.straight_half_width,
            self.straight_blend(index),
        )
    }

    /// Left-hand unit normal at a sample
    pub fn normal_at(&self, index: usize) -> Vec2 {
        Vec2::from_angle(self.sample(index).heading).perp()
    }

    /// Interpolated world pose at arc length `s`, shifted `lateral` along the normal
    pub fn pose_at(&self, s: f32, lateral: f32) -> Pose {
        let s = self.wrap(s);
        let i = self.index_at(s);
        let j = (i + 1) % self.samples.len();
        let a = self.samples[i];
        let b = self.samples[j];
        let end = if j == 0 { self.total_length } else { b.arc_length };
        let t = ((s - a.arc_length) / (end - a.arc_length).max(MIN_CHORD)).clamp(0.0, 1.0);
        let heading = a.heading + wrap_angle(b.heading - a.heading) * t;
        let pos = a.pos.lerp(b.pos, t) + Vec2::from_angle(heading).perp() * lateral;
        Pose { pos, heading }
    }

    /// Left and right edge polylines
    pub fn edges(&self) -> (Vec<Vec2>, Vec<Vec2>) {
        (0..self.samples.len())
            .map(|i| {
                let offset = self.normal_at(i) * self.half_width_at(i);
                let center = self.samples[i].pos;
                (center + offset, center - offset)
            })
            .unzip()
    }
}

/// Wrap `s` into [0, total)
pub fn wrap_s(s: f32, total: f32) -> f32 {
    let wrapped = s.rem_euclid(total);
    // rem_euclid can round up to `total` for tiny negative inputs
    if wrapped >= total {
        0.0
    } else {
        wrapped
    }
}

/// Forward distance from `from` to `to` on a loop of length `total`
pub fn forward_gap(from: f32, to: f32, total: f32) -> f32 {
    wrap_s(to - from, total)
}

/// Point and first derivative of a uniform Catmull-Rom segment
fn catmull_rom(p0: Vec2, p1: Vec2, p2: Vec2, p3: Vec2, t: f32) -> (Vec2, Vec2) {
    let a = p1 * 2.0;
    let b = p2 - p0;
    let c = p0 * 2.0 - p1 * 5.0 + p2 * 4.0 - p3;
    let d = p1 * 3.0 - p0 - p2 * 3.0 + p3;
    let t2 = t * t;
    let pos = (a + b * t + c * t2 + d * (t2 * t)) * 0.5;
    let tangent = (b + c * (2.0 * t) + d * (3.0 * t2)) * 0.5;
    (pos, tangent)
}

/// Longest circular run of samples below `threshold`; ties keep the first run
fn longest_straight(samples: &[TrackSample], threshold: f32) -> Straight {
    let n = samples.len();
    let mut best = Straight { start: 0, len: 0 };
    let mut run_start = 0;
    let mut run_len = 0;
    for k in 0..n * 2 {
        if samples[k % n].curvature < threshold {
            if run_len == 0 {
                run_start = k;
            }
            run_len += 1;
            if run_len > best.len && run_len <= n {
                best = Straight {
                    start: run_start % n,
                    len: run_len,
                };
            }
        } else {
            run_len = 0;
        }
    }
    best
}

fn straight_blend(n: usize, straight: Straight, blend_fraction: f32) -> Vec<f32> {
    if straight.len == 0 {
        return vec![0.0; n];
    }
    let ramp = ((n as f32 * blend_fraction).round() as usize).max(1);
    let last = straight.index(straight.len - 1, n);
    (0..n)
        .map(|i| {
            if straight.contains(i, n) {
                return 1.0;
            }
            let before = (straight.start + n - i) % n;
            let after = (i + n - last) % n;
            let d = before.min(after);
            (1.0 - d as f32 / (ramp + 1) as f32).max(0.0)
        })
        .collect()
}
