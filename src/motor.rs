//! ESC pulse generation: speed mapping, ramp limiting and direction inference.
//!
//! ```text
//!  1.0 ms        1.45 ms  1.5 ms  1.55 ms          2.0 ms
//!  |-- reverse --|  dead  |  dead  |---- forward ---|
//!  -100 %       -1 %      0 %      +1 %          +100 %
//! ```
//!
//! Pulse width changes are ramped at `ramp_ns_per_sec` unless the command is
//! immediate (stops and manual pulses). Abrupt reversals can damage the ESCs.

use crate::config::PwmConfig;
use crate::wheel::WheelId;

/// Direction implied by the pulse currently on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorDirection {
    Reverse,
    Neutral,
    Forward,
}

impl MotorDirection {
    /// Classify a pulse width against neutral with a hysteresis band.
    pub fn from_pulse(pulse_ns: u32, cfg: &PwmConfig) -> Self {
        let pulse = pulse_ns as i64;
        let neutral = cfg.neutral_ns as i64;
        let band = cfg.direction_hysteresis_ns as i64;
        if pulse > neutral + band {
            MotorDirection::Forward
        } else if pulse < neutral - band {
            MotorDirection::Reverse
        } else {
            MotorDirection::Neutral
        }
    }
}

/// Map a signed speed percentage onto the ESC's active pulse range.
pub fn speed_to_pulse(percent: i32, cfg: &PwmConfig) -> u32 {
    let percent = percent.clamp(-100, 100) as i64;
    let fwd_start = cfg.forward_start_ns as i64;
    let rev_start = cfg.reverse_start_ns as i64;
    let pulse = if percent > 0 {
        fwd_start + percent * (cfg.forward_max_ns as i64 - fwd_start) / 100
    } else if percent < 0 {
        rev_start - (-percent) * (rev_start - cfg.reverse_max_ns as i64) / 100
    } else {
        cfg.neutral_ns as i64
    };
    clamp_pulse(pulse, cfg)
}

/// Clamp any pulse width into `[reverse_max, forward_max]`.
pub fn clamp_pulse(pulse_ns: i64, cfg: &PwmConfig) -> u32 {
    pulse_ns.clamp(cfg.reverse_max_ns as i64, cfg.forward_max_ns as i64) as u32
}

/// Move `current` toward `target` by at most `rate * dt` (never less than 1 ns).
pub fn ramp_step(current: u32, target: u32, dt: f64, rate_ns_per_sec: f64) -> u32 {
    let max_change = ((rate_ns_per_sec * dt) as i64).max(1);
    let diff = target as i64 - current as i64;
    (current as i64 + diff.clamp(-max_change, max_change)) as u32
}

/// Output state for one ESC.
#[derive(Debug, Clone)]
pub struct MotorChannel {
    pub id: WheelId,
    /// Pulse the last command asked for (before ramping)
    commanded_pulse_ns: u32,
    /// Pulse actually written to the output
    output_pulse_ns: u32,
    /// Time of the last command, `None` until the first one
    last_command_time: Option<f64>,
    /// Last requested speed, for telemetry
    speed_percent: i32,
}

impl MotorChannel {
    pub fn new(id: WheelId, cfg: &PwmConfig) -> Self {
        Self {
            id,
            commanded_pulse_ns: cfg.neutral_ns,
            output_pulse_ns: cfg.neutral_ns,
            last_command_time: None,
            speed_percent: 0,
        }
    }

    /// Apply a speed command and return the pulse to write.
    pub fn command_speed(&mut self, percent: i32, immediate: bool, now: f64, cfg: &PwmConfig) -> u32 {
        self.speed_percent = percent.clamp(-100, 100);
        let target = speed_to_pulse(percent, cfg);
        self.apply(target, immediate, now, cfg)
    }

    /// Apply a raw pulse width immediately (clamped to the ESC range).
    pub fn command_pulse(&mut self, pulse_ns: i64, now: f64, cfg: &PwmConfig) -> u32 {
        let target = clamp_pulse(pulse_ns, cfg);
        self.speed_percent = pulse_to_percent(target, cfg);
        self.apply(target, true, now, cfg)
    }

    fn apply(&mut self, target: u32, immediate: bool, now: f64, cfg: &PwmConfig) -> u32 {
        self.commanded_pulse_ns = target;
        let output = match self.last_command_time {
            Some(last) if !immediate && now > last => {
                ramp_step(self.output_pulse_ns, target, now - last, cfg.ramp_ns_per_sec)
            }
            _ => target,
        };
        self.output_pulse_ns = output;
        self.last_command_time = Some(now);
        output
    }

    pub fn output_pulse_ns(&self) -> u32 {
        self.output_pulse_ns
    }

    pub fn commanded_pulse_ns(&self) -> u32 {
        self.commanded_pulse_ns
    }

    pub fn speed_percent(&self) -> i32 {
        self.speed_percent
    }

    pub fn last_command_time(&self) -> Option<f64> {
        self.last_command_time
    }

    /// Direction of the pulse currently on the wire.
    pub fn direction(&self, cfg: &PwmConfig) -> MotorDirection {
        MotorDirection::from_pulse(self.output_pulse_ns, cfg)
    }
}

/// Approximate inverse of [`speed_to_pulse`] for manual pulses.
fn pulse_to_percent(pulse_ns: u32, cfg: &PwmConfig) -> i32 {
    let pulse = pulse_ns as i64;
    if pulse > cfg.forward_start_ns as i64 {
        let span = (cfg.forward_max_ns - cfg.forward_start_ns) as i64;
        ((pulse - cfg.forward_start_ns as i64) * 100 / span) as i32
    } else if pulse < cfg.reverse_start_ns as i64 {
        let span = (cfg.reverse_start_ns - cfg.reverse_max_ns) as i64;
        -(((cfg.reverse_start_ns as i64 - pulse) * 100 / span) as i32)
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> PwmConfig {
        PwmConfig::default()
    }

    #[test]
    fn test_speed_mapping_endpoints() {
        let cfg = cfg();
        assert_eq!(speed_to_pulse(0, &cfg), 1_500_000);
        assert_eq!(speed_to_pulse(1, &cfg), 1_554_500);
        assert_eq!(speed_to_pulse(100, &cfg), 2_000_000);
        assert_eq!(speed_to_pulse(-100, &cfg), 1_000_000);
        assert_eq!(speed_to_pulse(-50, &cfg), 1_225_000);
        assert_eq!(speed_to_pulse(250, &cfg), 2_000_000);
        assert_eq!(speed_to_pulse(-250, &cfg), 1_000_000);
    }

    #[test]
    fn test_ramp_limits_rate() {
        let cfg = cfg();
        let mut motor = MotorChannel::new(WheelId::Left, &cfg);

        // First command jumps directly
        assert_eq!(motor.command_speed(0, false, 0.0, &cfg), 1_500_000);

        // 10 ms later: at most 1666 ns of change
        let out = motor.command_speed(100, false, 0.010, &cfg);
        assert_eq!(out, 1_501_666);
        assert_eq!(motor.commanded_pulse_ns(), 2_000_000);

        // After 3 more seconds the ramp has reached the target
        let out = motor.command_speed(100, false, 3.010, &cfg);
        assert_eq!(out, 2_000_000);
    }

    #[test]
    fn test_ramp_minimum_step() {
        assert_eq!(ramp_step(1_500_000, 1_600_000, 0.0, 166_667.0), 1_500_001);
        assert_eq!(ramp_step(1_500_000, 1_400_000, 0.0, 166_667.0), 1_499_999);
        assert_eq!(ramp_step(1_500_000, 1_500_000, 1.0, 166_667.0), 1_500_000);
    }

    #[test]
    fn test_immediate_skips_ramp() {
        let cfg = cfg();
        let mut motor = MotorChannel::new(WheelId::Right, &cfg);
        motor.command_speed(0, false, 0.0, &cfg);
        assert_eq!(motor.command_speed(-100, true, 0.005, &cfg), 1_000_000);
        assert_eq!(motor.command_speed(0, true, 0.010, &cfg), 1_500_000);
    }

    #[test]
    fn test_manual_pulse_clamped() {
        let cfg = cfg();
        let mut motor = MotorChannel::new(WheelId::Left, &cfg);
        assert_eq!(motor.command_pulse(2_500_000, 0.0, &cfg), 2_000_000);
        assert_eq!(motor.speed_percent(), 100);
        assert_eq!(motor.command_pulse(500_000, 0.1, &cfg), 1_000_000);
        assert_eq!(motor.speed_percent(), -100);
    }

    #[test]
    fn test_direction_hysteresis() {
        let cfg = cfg();
        assert_eq!(MotorDirection::from_pulse(1_500_000, &cfg), MotorDirection::Neutral);
        assert_eq!(MotorDirection::from_pulse(1_525_000, &cfg), MotorDirection::Neutral);
        assert_eq!(MotorDirection::from_pulse(1_525_001, &cfg), MotorDirection::Forward);
        assert_eq!(MotorDirection::from_pulse(1_474_999, &cfg), MotorDirection::Reverse);
        assert_eq!(MotorDirection::from_pulse(1_000_000, &cfg), MotorDirection::Reverse);
    }
}
