//! Differential drive pose integration

use std::f64::consts::{PI, TAU};

/// Pose of the simulated base in its odometry frame (mm, mm, radians)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DiffDrive {
    pub x: f64,
    pub y: f64,
    pub theta: f64,
}

impl DiffDrive {
    /// Advance the pose by `dt` seconds at `v` mm/s and `w` rad/s
    pub fn integrate(&mut self, dt: f64, v: f64, w: f64) {
        if w.abs() < 1e-9 {
            // straight line
            self.x += v * self.theta.cos() * dt;
            self.y += v * self.theta.sin() * dt;
        } else {
            // arc of radius v / w
            let r = v / w;
            let theta = self.theta + w * dt;
            self.x += r * (theta.sin() - self.theta.sin());
            self.y += r * (self.theta.cos() - theta.cos());
            self.theta = theta;
        }
        self.theta = normalize_angle(self.theta);
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Heading as whole degrees in `0..360`
    pub fn yaw_degrees(&self) -> i32 {
        (self.theta.to_degrees().round() as i32).rem_euclid(360)
    }
}

/// Normalize angle to [-π, π)
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle % TAU;
    if a >= PI {
        a -= TAU;
    } else if a < -PI {
        a += TAU;
    }
    a
}
