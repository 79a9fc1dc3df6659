//! Wheel + gyro dead reckoning.
//!
//! Travel comes from the mean of both wheels' tick deltas, heading from the
//! integrated gyro rate. Two deadbands keep a parked robot from drifting:
//! - gyro rates below `gyro_deadband_dps` are zeroed
//! - heading is frozen entirely while neither wheel moved `min_wheel_travel`
//!
//! Position is advanced along the midpoint of the heading before and after
//! the step. Heading is degrees, counter-clockwise from +x, in `[0, 360)`.

use crate::config::{FusionConfig, RobotConfig};

/// Normalize an angle in degrees into `[0, 360)`.
#[inline]
pub fn normalize_heading(degrees: f64) -> f64 {
    let h = degrees.rem_euclid(360.0);
    // rem_euclid rounds tiny negative inputs up to exactly 360
    if h >= 360.0 { 0.0 } else { h }
}

/// Robot pose plus the wheel positions it was last integrated from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f64,
    pub y: f64,
    /// Degrees in `[0, 360)`
    pub heading: f64,
    /// Left wheel absolute ticks at the last fusion step
    pub last_left: i64,
    /// Right wheel absolute ticks at the last fusion step
    pub last_right: i64,
    /// False until the snapshots hold real wheel positions
    seeded: bool,
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self {
            x,
            y,
            heading: normalize_heading(heading),
            last_left: 0,
            last_right: 0,
            seeded: false,
        }
    }

    /// Force the pose. Wheel snapshots are re-seeded on the next fusion step,
    /// so no wheel motion from before this call is applied.
    pub fn reset(&mut self, x: f64, y: f64, heading: f64) {
        *self = Self::new(x, y, heading);
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }
}

/// Result of one fusion step, for tracing.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FusionStep {
    pub travel: f64,
    pub heading_change: f64,
    pub dt: f64,
}

/// Integrates sensor samples into a [`Pose`].
#[derive(Debug, Clone)]
pub struct FusionEngine {
    ticks_per_unit: f64,
    gyro_deadband_dps: f64,
    min_wheel_travel: f64,
    last_timestamp: Option<f64>,
    updates: u64,
}

impl FusionEngine {
    pub fn new(robot: &RobotConfig, fusion: &FusionConfig) -> Self {
        Self {
            ticks_per_unit: robot.ticks_per_unit(),
            gyro_deadband_dps: fusion.gyro_deadband_dps,
            min_wheel_travel: fusion.min_wheel_travel,
            last_timestamp: None,
            updates: 0,
        }
    }

    /// Apply one sensor sample.
    ///
    /// `left`/`right` are absolute wheel positions in ticks, `gyro_rate` is
    /// deg/s (CCW positive) and `timestamp` is the sample time in seconds.
    /// Returns `None` when the call only seeded the snapshots.
    pub fn update(
        &mut self,
        pose: &mut Pose,
        left: i64,
        right: i64,
        gyro_rate: f64,
        timestamp: f64,
    ) -> Option<FusionStep> {
        let dt = match self.last_timestamp {
            Some(last) if timestamp > last => timestamp - last,
            _ => 0.0,
        };
        self.last_timestamp = Some(timestamp);

        if !pose.seeded {
            pose.last_left = left;
            pose.last_right = right;
            pose.seeded = true;
            return None;
        }

        let d_left = (left - pose.last_left) as f64 / self.ticks_per_unit;
        let d_right = (right - pose.last_right) as f64 / self.ticks_per_unit;
        pose.last_left = left;
        pose.last_right = right;

        let travel = (d_left + d_right) / 2.0;

        let mut rate = if gyro_rate.abs() < self.gyro_deadband_dps {
            0.0
        } else {
            gyro_rate
        };
        if d_left.abs().max(d_right.abs()) < self.min_wheel_travel {
            rate = 0.0;
        }

        let start = pose.heading;
        let end = start + rate * dt;
        let mid = ((start + end) / 2.0).to_radians();
        pose.x += travel * mid.cos();
        pose.y += travel * mid.sin();
        pose.heading = normalize_heading(end);

        self.updates += 1;
        if self.updates % 1000 == 0 {
            log::debug!(
                "Odometry #{}: ({:.3}, {:.3}) heading {:.2}",
                self.updates,
                pose.x,
                pose.y,
                pose.heading
            );
        }

        Some(FusionStep {
            travel,
            heading_change: end - start,
            dt,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn engine() -> FusionEngine {
        FusionEngine::new(&RobotConfig::default(), &FusionConfig::default())
    }

    fn tpu() -> f64 {
        RobotConfig::default().ticks_per_unit()
    }

    #[test]
    fn test_first_update_seeds_without_delta() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 15.0, 90.0);
        assert!(fusion.update(&mut pose, 50_000, -20_000, 30.0, 1.0).is_none());
        assert_eq!(pose.x, 0.0);
        assert_eq!(pose.y, 15.0);
        assert_eq!(pose.heading, 90.0);
        assert_eq!(pose.last_left, 50_000);
        assert!(pose.is_seeded());
    }

    #[test]
    fn test_straight_line() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 0.0, 0.0);
        fusion.update(&mut pose, 0, 0, 0.0, 0.0);

        let ticks = (2.0 * tpu()).round() as i64;
        for i in 1..=100 {
            let t = ticks * i / 100;
            fusion.update(&mut pose, t, t, 0.1, i as f64 * 0.01);
        }
        assert_relative_eq!(pose.x, 2.0, epsilon = 1e-3);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.heading, 0.0);
    }

    #[test]
    fn test_turn_integrates_gyro() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 0.0, 350.0);
        fusion.update(&mut pose, 0, 0, 0.0, 0.0);

        // 45 deg/s for 1 s while the wheels counter-rotate
        for i in 1..=200 {
            let t = i * 10;
            fusion.update(&mut pose, -t, t, 45.0, i as f64 * 0.005);
        }
        assert_relative_eq!(pose.heading, 35.0, epsilon = 1e-6);
        assert_relative_eq!(pose.x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(pose.y, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_stationary_ignores_gyro() {
        let mut fusion = engine();
        let mut pose = Pose::new(1.0, 2.0, 180.0);
        fusion.update(&mut pose, 10, 10, 0.0, 0.0);
        for i in 1..=400 {
            fusion.update(&mut pose, 10, 10, 5.0, i as f64 * 0.005);
        }
        assert_eq!(pose.heading, 180.0);
        assert_eq!(pose.x, 1.0);
    }

    #[test]
    fn test_gyro_deadband() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 0.0, 90.0);
        fusion.update(&mut pose, 0, 0, 0.0, 0.0);
        let step = fusion.update(&mut pose, 100, 100, 0.2, 0.5).unwrap();
        assert_eq!(step.heading_change, 0.0);
        let step = fusion.update(&mut pose, 200, 200, 0.3, 1.0).unwrap();
        assert_relative_eq!(step.heading_change, 0.15);
    }

    #[test]
    fn test_midpoint_integration() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 0.0, 0.0);
        fusion.update(&mut pose, 0, 0, 0.0, 0.0);
        // One unit of travel while turning 90 degrees: moves along 45 degrees
        let ticks = tpu().round() as i64;
        fusion.update(&mut pose, ticks, ticks, 90.0, 1.0);
        let expected = (ticks as f64 / tpu()) * std::f64::consts::FRAC_1_SQRT_2;
        assert_relative_eq!(pose.x, expected, epsilon = 1e-9);
        assert_relative_eq!(pose.y, expected, epsilon = 1e-9);
        assert_relative_eq!(pose.heading, 90.0);
    }

    #[test]
    fn test_heading_always_normalized() {
        let rates = [
            -1.0e6, -7200.0, -360.0, -359.999, -0.26, 0.26, 359.999, 360.0, 1234.5, 1.0e6,
        ];
        for &start in &[0.0, 0.0001, 90.0, 359.9999] {
            for &rate in &rates {
                let mut fusion = engine();
                let mut pose = Pose::new(0.0, 0.0, start);
                fusion.update(&mut pose, 0, 0, 0.0, 0.0);
                fusion.update(&mut pose, 500, -500, rate, 1.0);
                assert!(
                    (0.0..360.0).contains(&pose.heading),
                    "start {} rate {} -> {}",
                    start,
                    rate,
                    pose.heading
                );
            }
        }
    }

    #[test]
    fn test_normalize_heading_edges() {
        assert_eq!(normalize_heading(360.0), 0.0);
        assert_eq!(normalize_heading(-1e-17), 0.0);
        assert_relative_eq!(normalize_heading(-90.0), 270.0);
        assert_relative_eq!(normalize_heading(725.0), 5.0);
    }

    #[test]
    fn test_reset_reseeds() {
        let mut fusion = engine();
        let mut pose = Pose::new(0.0, 0.0, 0.0);
        fusion.update(&mut pose, 0, 0, 0.0, 0.0);
        pose.reset(5.0, 6.0, 370.0);
        assert_eq!((pose.x, pose.y), (5.0, 6.0));
        assert_relative_eq!(pose.heading, 10.0);
        // Motion accumulated before the reset is not applied
        assert!(fusion.update(&mut pose, 9000, 9000, 0.0, 0.1).is_none());
        assert_eq!((pose.x, pose.y), (5.0, 6.0));
    }
}
