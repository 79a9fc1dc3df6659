//! One drive wheel: ESC output, encoder tracking and the PWM device behind a
//! single lock, so direction inference always sees the pulse that was on the
//! wire when the angle was folded in.

use std::fmt;

use crate::config::PwmConfig;
use crate::encoder::EncoderState;
use crate::hal::PwmOutput;
use crate::motor::MotorChannel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WheelId {
    Left,
    Right,
}

impl WheelId {
    pub const ALL: [WheelId; 2] = [WheelId::Left, WheelId::Right];

    pub fn index(self) -> usize {
        match self {
            WheelId::Left => 0,
            WheelId::Right => 1,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            WheelId::Left => "Left",
            WheelId::Right => "Right",
        }
    }
}

impl fmt::Display for WheelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Snapshot of a wheel for telemetry.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WheelSnapshot {
    pub pulse_ns: u32,
    pub raw_angle: u16,
    pub target: i64,
    pub actual: i64,
    pub absolute: i64,
    pub has_target: bool,
}

pub struct Wheel {
    pub motor: MotorChannel,
    pub encoder: EncoderState,
    output: Box<dyn PwmOutput>,
    /// Write failures since the last success, for log throttling
    write_failures: u32,
}

impl Wheel {
    pub fn new(id: WheelId, output: Box<dyn PwmOutput>, cfg: &PwmConfig) -> Self {
        Self {
            motor: MotorChannel::new(id, cfg),
            encoder: EncoderState::new(),
            output,
            write_failures: 0,
        }
    }

    pub fn id(&self) -> WheelId {
        self.motor.id
    }

    /// Fold a raw encoder sample in using the direction currently on the wire.
    pub fn observe_angle(&mut self, raw: u16, cfg: &PwmConfig) {
        let direction = self.motor.direction(cfg);
        self.encoder.update(raw, direction);
    }

    /// Command a speed percentage, ramped unless `immediate`.
    pub fn drive(&mut self, percent: i32, immediate: bool, now: f64, cfg: &PwmConfig) {
        let pulse = self.motor.command_speed(percent, immediate, now, cfg);
        self.write(pulse);
    }

    /// Zero output right now.
    pub fn stop(&mut self, now: f64, cfg: &PwmConfig) {
        self.drive(0, true, now, cfg);
    }

    /// Manual pulse override (clamped, immediate).
    pub fn manual_pulse(&mut self, pulse_ns: i64, now: f64, cfg: &PwmConfig) -> u32 {
        let pulse = self.motor.command_pulse(pulse_ns, now, cfg);
        self.write(pulse);
        pulse
    }

    /// Neutral, then stop generating pulses.
    pub fn shutdown(&mut self, now: f64, cfg: &PwmConfig) {
        self.stop(now, cfg);
        if let Err(e) = self.output.disable() {
            log::warn!("{} PWM disable failed: {}", self.id(), e);
        }
    }

    pub fn snapshot(&self) -> WheelSnapshot {
        WheelSnapshot {
            pulse_ns: self.motor.output_pulse_ns(),
            raw_angle: self.encoder.raw_angle(),
            target: self.encoder.relative_target(),
            actual: self.encoder.relative_position(),
            absolute: self.encoder.absolute_position(),
            has_target: self.encoder.has_active_target(),
        }
    }

    fn write(&mut self, pulse: u32) {
        match self.output.write_pulse(pulse) {
            Ok(()) => {
                if self.write_failures > 0 {
                    log::info!(
                        "{} PWM output recovered after {} failed writes",
                        self.id(),
                        self.write_failures
                    );
                }
                self.write_failures = 0;
            }
            Err(e) => {
                self.write_failures += 1;
                // First failure and then once per second at 200 Hz
                if self.write_failures % 200 == 1 {
                    log::warn!(
                        "{} PWM write failed ({} consecutive): {}",
                        self.id(),
                        self.write_failures,
                        e
                    );
                }
            }
        }
    }
}
