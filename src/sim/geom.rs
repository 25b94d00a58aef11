//! Geom - Scalar helpers shared by the track, pit and physics code

use std::f32::consts::{PI, TAU};

/// Point or direction in world space
pub use glam::Vec2;

/// Linear interpolation between `a` and `b`
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Hermite smoothstep between `edge0` and `edge1`
pub fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    if (edge1 - edge0).abs() <= f32::EPSILON {
        return if x < edge0 { 0.0 } else { 1.0 };
    }
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Wrap an angle into (-PI, PI]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle.rem_euclid(TAU);
    if a > PI {
        a -= TAU;
    }
    a
}

/// Move `current` toward `target` by at most `max_step`
pub fn approach(current: f32, target: f32, max_step: f32) -> f32 {
    if current < target {
        (current + max_step).min(target)
    } else {
        (current - max_step).max(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perp_dot_sign_follows_turn_direction() {
        let right = Vec2::X;
        let up = Vec2::Y;
        assert!(right.perp_dot(up) > 0.0);
        assert!(up.perp_dot(right) < 0.0);
        assert_eq!(right.perp(), up);
        assert!((Vec2::from_angle(0.5).to_angle() - 0.5).abs() < 1e-6);
    }

    #[test]
    fn smoothstep_is_clamped_and_symmetric() {
        assert_eq!(smoothstep(0.0, 10.0, -3.0), 0.0);
        assert_eq!(smoothstep(0.0, 10.0, 12.0), 1.0);
        assert!((smoothstep(0.0, 10.0, 5.0) - 0.5).abs() < 1e-6);
        assert_eq!(smoothstep(4.0, 4.0, 5.0), 1.0);
    }

    #[test]
    fn wrap_angle_stays_in_range() {
        assert!((wrap_angle(3.0 * PI) - PI).abs() < 1e-5);
        assert!((wrap_angle(-0.5) + 0.5).abs() < 1e-6);
    }

    #[test]
    fn approach_never_overshoots() {
        assert_eq!(approach(0.0, 1.0, 5.0), 1.0);
        assert_eq!(approach(3.0, 1.0, 0.5), 2.5);
    }
}
