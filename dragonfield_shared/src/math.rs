//! Math types.
//!
//! The world is a flat ground plane: `x` and `z` are horizontal, `y` is up.
//! Headings are radians around the `y` axis.

use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

/// Below this distance a smoothed value snaps onto its target.
pub const SNAP_EPSILON: f32 = 1e-3;

/// 3D vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Point on the ground plane.
    pub const fn ground(x: f32, z: f32) -> Self {
        Self { x, y: 0.0, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    /// Horizontal distance, ignoring `y`.
    pub fn distance_xz(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dz = self.z - other.z;
        (dx * dx + dz * dz).sqrt()
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

/// Wraps an angle into `(-PI, PI]`.
pub fn wrap_angle(a: f32) -> f32 {
    let mut r = a.rem_euclid(TAU);
    if r > PI {
        r -= TAU;
    }
    r
}

/// Signed shortest angular difference `to - from`, in `(-PI, PI]`.
pub fn angle_delta(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

/// Moves `from` toward `to` by fraction `t` along the short arc.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    wrap_angle(from + angle_delta(from, to) * t)
}

/// Frame-rate independent blend factor for exponential smoothing.
///
/// `rate` is in 1/s. The result is in `[0, 1)` for finite positive inputs, so a
/// lerp with it never overshoots.
pub fn smoothing_factor(rate: f32, dt_sec: f32) -> f32 {
    if !(rate > 0.0) || !(dt_sec > 0.0) {
        return 0.0;
    }
    (1.0 - (-rate * dt_sec).exp()).clamp(0.0, 1.0)
}

/// Forward direction on the ground plane for a heading.
pub fn forward(heading: f32) -> Vec3 {
    Vec3::ground(-heading.sin(), -heading.cos())
}

/// Right direction on the ground plane for a heading.
pub fn right(heading: f32) -> Vec3 {
    Vec3::ground(heading.cos(), -heading.sin())
}
