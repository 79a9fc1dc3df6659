//! Multi-turn position tracking for a 12-bit absolute encoder.
//!
//! The AS5600 only reports the angle within one revolution. Rotation count is
//! reconstructed from consecutive samples, using the direction of the pulse
//! currently driving the wheel to decide which way a boundary crossing went:
//!
//! | Commanded  | Raw delta                       | Rotation step |
//! |------------|---------------------------------|---------------|
//! | Forward    | `< -WRAP_GUARD`                 | +1            |
//! | Forward    | `>= RANGE - WRAP_GUARD`         | -1            |
//! | Reverse    | `> WRAP_GUARD`                  | -1            |
//! | Reverse    | `<= -(RANGE - WRAP_GUARD)`      | +1            |
//! | Neutral    | `< -HALF_RANGE`                 | +1            |
//! | Neutral    | `> HALF_RANGE`                  | -1            |
//!
//! The second row of each direction covers a small movement against the
//! commanded direction across the zero angle (backlash, jitter).
//!
//! With a known direction a wheel may travel up to `TICK_RANGE - WRAP_GUARD`
//! ticks between samples without losing a turn, where the plain half-range
//! rule is limited to `HALF_RANGE`. The half-range rule is also used on the
//! sample where the direction changes, since the wheel may still be coasting.

use crate::hal::as5600::TICK_RANGE;
use crate::motor::MotorDirection;

const RANGE: i64 = TICK_RANGE as i64;
const HALF_RANGE: i64 = RANGE / 2;

/// Backward movement tolerated against the commanded direction (jitter, backlash).
pub const WRAP_GUARD: i64 = 512;

/// Stall bookkeeping for one wheel, sampled on a fixed wall-clock interval.
#[derive(Debug, Clone, Default)]
pub struct StallMonitor {
    /// Relative position at the last check
    pub sample_position: i64,
    /// Time of the last check
    pub sample_time: f64,
    /// Consecutive checks that found the wheel stuck
    pub count: u32,
}

impl StallMonitor {
    /// Restart the window at `now` from `position`.
    pub fn reset(&mut self, position: i64, now: f64) {
        self.sample_position = position;
        self.sample_time = now;
        self.count = 0;
    }

    /// Run a check if the interval has elapsed. Returns `true` when a new
    /// stall was counted.
    pub fn check(
        &mut self,
        now: f64,
        position: i64,
        error: i64,
        interval: f64,
        min_movement: i64,
        min_error: i64,
    ) -> bool {
        if now - self.sample_time <= interval {
            return false;
        }
        let moved = (position - self.sample_position).abs();
        let stalled = moved < min_movement && error.abs() > min_error;
        if stalled {
            self.count += 1;
        } else {
            self.count = 0;
        }
        self.sample_position = position;
        self.sample_time = now;
        stalled
    }
}

/// Tracking state for one wheel encoder.
#[derive(Debug, Clone)]
pub struct EncoderState {
    raw_current: u16,
    raw_previous: u16,
    /// Raw angle at the first sample; absolute position 0
    raw_origin: u16,
    seeded: bool,
    /// Signed full revolutions since startup
    rotation_count: i64,
    direction_current: MotorDirection,
    direction_previous: MotorDirection,
    /// Absolute position when the current phase began
    move_start_position: i64,
    /// Rotation count when the current phase began
    move_start_rotation_count: i64,
    /// Phase target, relative to `move_start_position`
    relative_target: i64,
    has_active_target: bool,
    pub stall: StallMonitor,
}

impl Default for EncoderState {
    fn default() -> Self {
        Self::new()
    }
}

impl EncoderState {
    pub fn new() -> Self {
        Self {
            raw_current: 0,
            raw_previous: 0,
            raw_origin: 0,
            seeded: false,
            rotation_count: 0,
            direction_current: MotorDirection::Neutral,
            direction_previous: MotorDirection::Neutral,
            move_start_position: 0,
            move_start_rotation_count: 0,
            relative_target: 0,
            has_active_target: false,
            stall: StallMonitor::default(),
        }
    }

    /// Fold in a new raw sample taken while the motor was commanded `direction`.
    ///
    /// Returns the rotation step applied (-1, 0 or +1).
    pub fn update(&mut self, raw: u16, direction: MotorDirection) -> i64 {
        let raw = raw % TICK_RANGE;
        self.direction_previous = self.direction_current;
        self.direction_current = direction;

        if !self.seeded {
            self.raw_origin = raw;
            self.raw_previous = raw;
            self.raw_current = raw;
            self.seeded = true;
            return 0;
        }

        self.raw_previous = self.raw_current;
        self.raw_current = raw;

        let delta = raw as i64 - self.raw_previous as i64;
        let effective = if self.direction_current == self.direction_previous {
            self.direction_current
        } else {
            MotorDirection::Neutral
        };
        let step = rotation_step(delta, effective);
        self.rotation_count += step;
        step
    }

    /// Ticks since the first sample.
    pub fn absolute_position(&self) -> i64 {
        self.rotation_count * RANGE + (self.raw_current as i64 - self.raw_origin as i64)
    }

    /// Ticks since the current phase began.
    pub fn relative_position(&self) -> i64 {
        self.absolute_position() - self.move_start_position
    }

    /// Start a new phase from the current position with a relative target.
    pub fn begin_move(&mut self, relative_target: i64, now: f64) {
        self.move_start_position = self.absolute_position();
        self.move_start_rotation_count = self.rotation_count;
        self.relative_target = relative_target;
        self.has_active_target = true;
        self.stall.reset(0, now);
    }

    /// Drop the active target and any stall history.
    pub fn clear_target(&mut self) {
        self.has_active_target = false;
        self.stall.count = 0;
    }

    /// Target minus relative position.
    pub fn error(&self) -> i64 {
        self.relative_target - self.relative_position()
    }

    pub fn has_active_target(&self) -> bool {
        self.has_active_target
    }

    pub fn relative_target(&self) -> i64 {
        self.relative_target
    }

    pub fn raw_angle(&self) -> u16 {
        self.raw_current
    }

    pub fn rotation_count(&self) -> i64 {
        self.rotation_count
    }

    pub fn move_start_rotation_count(&self) -> i64 {
        self.move_start_rotation_count
    }

    pub fn is_seeded(&self) -> bool {
        self.seeded
    }

    pub fn direction(&self) -> MotorDirection {
        self.direction_current
    }
}

/// Rotation step for a raw delta given the effective motor direction.
pub fn rotation_step(delta: i64, direction: MotorDirection) -> i64 {
    match direction {
        MotorDirection::Forward => {
            if delta < -WRAP_GUARD {
                1
            } else if delta >= RANGE - WRAP_GUARD {
                -1
            } else {
                0
            }
        }
        MotorDirection::Reverse => {
            if delta > WRAP_GUARD {
                -1
            } else if delta <= -(RANGE - WRAP_GUARD) {
                1
            } else {
                0
            }
        }
        MotorDirection::Neutral => {
            if delta < -HALF_RANGE {
                1
            } else if delta > HALF_RANGE {
                -1
            } else {
                0
            }
        }
    }
}
