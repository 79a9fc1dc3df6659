//! Per-wheel bang-bang position controller with stall boost.
//!
//! Each control tick, a wheel with an active target is either finished
//! (error within `stop_threshold`, or within `deadband_threshold` while not
//! stalled) or driven at a fixed effort toward the target:
//!
//! ```text
//! effort = max(max_percent * speed_scale, min_percent) + stall_count * boost
//! ```
//!
//! clamped to 100 %. Stall checks run every `stall_interval_secs` of wall
//! clock, not every tick. A stalled wheel keeps boosting until it moves or the
//! goal is stopped.

use crate::config::{ControlConfig, PwmConfig};
use crate::wheel::Wheel;

/// Lowest accepted PWM bound (percent).
pub const PWM_LIMIT_FLOOR: i32 = 20;
/// Highest accepted PWM bound (percent).
pub const PWM_LIMIT_CEILING: i32 = 100;

/// Autonomous drive effort bounds, set at startup and by `setpwm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmLimits {
    pub min_percent: i32,
    pub max_percent: i32,
}

impl PwmLimits {
    /// Clamp both bounds into `[20, 100]` and order them.
    pub fn new(min_percent: i32, max_percent: i32) -> Self {
        let mut min = min_percent.clamp(PWM_LIMIT_FLOOR, PWM_LIMIT_CEILING);
        let mut max = max_percent.clamp(PWM_LIMIT_FLOOR, PWM_LIMIT_CEILING);
        if min > max {
            std::mem::swap(&mut min, &mut max);
        }
        Self {
            min_percent: min,
            max_percent: max,
        }
    }

    pub fn from_config(pwm: &PwmConfig) -> Self {
        Self::new(pwm.min_percent, pwm.max_percent)
    }

    /// Unboosted effort for a speed scale.
    pub fn drive_magnitude(&self, speed_scale: f64) -> i32 {
        ((self.max_percent as f64 * speed_scale) as i32).max(self.min_percent)
    }
}

/// Outcome of one controller step for one wheel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelAction {
    /// No active target; output held at zero
    Idle,
    /// Target reached this tick
    Done,
    /// Driving at this signed effort (percent)
    Drive(i32),
}

impl WheelAction {
    /// The wheel has no remaining work in this phase.
    pub fn is_finished(self) -> bool {
        !matches!(self, WheelAction::Drive(_))
    }
}

/// Signed effort toward reducing `error`, with stall boost, clamped to ±100.
pub fn drive_effort(error: i64, magnitude: i32, stall_count: u32, boost_percent: i32) -> i32 {
    let boosted = (magnitude + stall_count as i32 * boost_percent).min(100);
    if error > 0 { boosted } else { -boosted }
}

/// Run one control step on a wheel. Caller holds the wheel lock.
pub fn update_wheel(
    wheel: &mut Wheel,
    magnitude: i32,
    now: f64,
    control: &ControlConfig,
    pwm: &PwmConfig,
) -> WheelAction {
    if !wheel.encoder.has_active_target() {
        wheel.stop(now, pwm);
        return WheelAction::Idle;
    }

    let error = wheel.encoder.error();
    let abs_error = error.abs();

    if abs_error <= control.stop_threshold {
        wheel.stop(now, pwm);
        wheel.encoder.clear_target();
        return WheelAction::Done;
    }

    if abs_error < control.deadband_threshold && wheel.encoder.stall.count == 0 {
        wheel.stop(now, pwm);
        wheel.encoder.clear_target();
        return WheelAction::Done;
    }

    let position = wheel.encoder.relative_position();
    if wheel.encoder.stall.check(
        now,
        position,
        error,
        control.stall_interval_secs,
        control.stall_min_movement,
        control.stall_min_error,
    ) {
        log::warn!(
            "{} motor stalled (count: {}), error: {}",
            wheel.id(),
            wheel.encoder.stall.count,
            error
        );
    }

    let effort = drive_effort(
        error,
        magnitude,
        wheel.encoder.stall.count,
        control.stall_boost_percent,
    );
    wheel.drive(effort, false, now, pwm);
    WheelAction::Drive(effort)
}
