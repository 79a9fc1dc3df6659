//! Simulated differential-drive robot.
//!
//! Provides the same sensor and actuator traits as the Linux drivers, backed by
//! a shared physics state:
//!
//! ```text
//! SimPwm ──pulse──► SimState ──revolutions──► SimEncoder (12-bit raw angle)
//!                      │
//!                      └──yaw rate + noise──► SimGyro
//! ```
//!
//! Physics is advanced lazily to `clock.now()` on every access, so with a
//! manual clock the whole robot is deterministic and needs no background
//! thread.
//!
//! ## Motor model
//!
//! Pulses inside the ESC deadband (`reverse_start_ns..forward_start_ns`) stop
//! the wheel. Beyond it, wheel speed rises linearly to `max_wheel_rps` at the
//! forward/reverse pulse limits. There is no inertia.

use std::f64::consts::PI;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::prelude::*;
use rand::rngs::SmallRng;
use rand_distr::StandardNormal;

use super::{AngleSensor, Hardware, PwmOutput, RateGyro};
use crate::config::{AppConfig, PwmConfig};
use crate::error::{Error, Result};
use crate::time::Clock;
use crate::wheel::WheelId;

use super::as5600::TICK_RANGE;

/// Sensor selector for fault injection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimSensor {
    LeftEncoder,
    RightEncoder,
    Gyro,
}

impl SimSensor {
    fn index(self) -> usize {
        match self {
            SimSensor::LeftEncoder => 0,
            SimSensor::RightEncoder => 1,
            SimSensor::Gyro => 2,
        }
    }
}

/// Gaussian noise with deterministic seeding.
struct NoiseGenerator {
    rng: SmallRng,
}

impl NoiseGenerator {
    /// Seed 0 draws from OS entropy.
    fn new(seed: u64) -> Self {
        let rng = if seed == 0 {
            SmallRng::from_entropy()
        } else {
            SmallRng::seed_from_u64(seed)
        };
        Self { rng }
    }

    #[inline]
    fn gaussian(&mut self, stddev: f64) -> f64 {
        if stddev == 0.0 {
            return 0.0;
        }
        let n: f64 = self.rng.sample(StandardNormal);
        n * stddev
    }
}

struct SimState {
    pwm: PwmConfig,
    max_wheel_rps: f64,
    wheel_circumference: f64,
    wheelbase: f64,
    gyro_noise_dps: f64,
    gyro_bias_dps: f64,
    noise: NoiseGenerator,

    /// Last pulse written per wheel
    pulses: [u32; 2],
    /// Wheels held in place regardless of pulse
    blocked: [bool; 2],
    /// Cumulative wheel revolutions (signed)
    revolutions: [f64; 2],
    /// Angle the encoder magnet reads at zero revolutions
    angle_offsets: [u16; 2],

    x: f64,
    y: f64,
    heading_deg: f64,
    yaw_rate_dps: f64,
    last_update: f64,

    /// Remaining injected read failures, indexed by [`SimSensor`]
    failures: [u32; 3],
}

impl SimState {
    fn wheel_rps(&self, wheel: usize) -> f64 {
        if self.blocked[wheel] {
            return 0.0;
        }
        let p = self.pulses[wheel] as f64;
        let cfg = &self.pwm;
        if p >= cfg.forward_start_ns as f64 {
            let span = (cfg.forward_max_ns - cfg.forward_start_ns) as f64;
            self.max_wheel_rps * ((p - cfg.forward_start_ns as f64) / span).min(1.0)
        } else if p <= cfg.reverse_start_ns as f64 {
            let span = (cfg.reverse_start_ns - cfg.reverse_max_ns) as f64;
            -self.max_wheel_rps * ((cfg.reverse_start_ns as f64 - p) / span).min(1.0)
        } else {
            0.0
        }
    }

    /// Integrate wheel motion and robot pose up to `now`.
    fn advance(&mut self, now: f64) {
        let dt = now - self.last_update;
        if dt <= 0.0 {
            return;
        }
        self.last_update = now;

        let rps = [self.wheel_rps(0), self.wheel_rps(1)];
        self.revolutions[0] += rps[0] * dt;
        self.revolutions[1] += rps[1] * dt;

        let v_left = rps[0] * self.wheel_circumference;
        let v_right = rps[1] * self.wheel_circumference;
        let v = (v_left + v_right) / 2.0;
        let omega_dps = ((v_right - v_left) / self.wheelbase).to_degrees();

        let start = self.heading_deg;
        let end = start + omega_dps * dt;
        let mid = ((start + end) / 2.0).to_radians();
        self.x += v * dt * mid.cos();
        self.y += v * dt * mid.sin();
        self.heading_deg = end.rem_euclid(360.0);
        self.yaw_rate_dps = omega_dps;
    }

    fn raw_angle(&self, wheel: usize) -> u16 {
        let range = TICK_RANGE as f64;
        let ticks = (self.revolutions[wheel] * range).floor() as i64;
        (ticks + self.angle_offsets[wheel] as i64).rem_euclid(TICK_RANGE as i64) as u16
    }

    fn take_failure(&mut self, sensor: SimSensor) -> bool {
        let slot = &mut self.failures[sensor.index()];
        if *slot > 0 {
            *slot -= 1;
            true
        } else {
            false
        }
    }
}

/// Handle to the simulated robot. Cheap to clone.
#[derive(Clone)]
pub struct SimulatedRobot {
    state: Arc<Mutex<SimState>>,
    clock: Arc<dyn Clock>,
    bus_latency: Duration,
}

impl SimulatedRobot {
    pub fn new(config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let sim = &config.simulation;
        let start = clock.now();
        let state = SimState {
            pwm: config.pwm.clone(),
            max_wheel_rps: sim.max_wheel_rps,
            wheel_circumference: PI * config.robot.wheel_diameter,
            wheelbase: config.robot.wheelbase,
            gyro_noise_dps: sim.gyro_noise_dps,
            gyro_bias_dps: sim.gyro_bias_dps,
            noise: NoiseGenerator::new(sim.random_seed),
            pulses: [config.pwm.neutral_ns; 2],
            blocked: [false; 2],
            revolutions: [0.0; 2],
            // Magnets are never mounted at zero
            angle_offsets: [1234, 3071],
            x: config.navigation.start_x,
            y: config.navigation.start_y,
            heading_deg: config.navigation.start_heading,
            yaw_rate_dps: 0.0,
            last_update: start,
            failures: [0; 3],
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            clock,
            bus_latency: Duration::from_micros(sim.bus_latency_us),
        }
    }

    /// Build a [`Hardware`] set wired to this robot.
    pub fn hardware(&self) -> Hardware {
        Hardware {
            left_encoder: Box::new(SimEncoder {
                robot: self.clone(),
                wheel: WheelId::Left,
            }),
            right_encoder: Box::new(SimEncoder {
                robot: self.clone(),
                wheel: WheelId::Right,
            }),
            gyro: Box::new(SimGyro {
                robot: self.clone(),
            }),
            left_pwm: Box::new(SimPwm {
                robot: self.clone(),
                wheel: WheelId::Left,
            }),
            right_pwm: Box::new(SimPwm {
                robot: self.clone(),
                wheel: WheelId::Right,
            }),
            simulator: Some(self.clone()),
        }
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut SimState) -> T) -> T {
        let mut state = self.state.lock();
        state.advance(self.clock.now());
        f(&mut state)
    }

    /// Ground-truth pose (x, y, heading degrees).
    pub fn true_pose(&self) -> (f64, f64, f64) {
        self.with_state(|s| (s.x, s.y, s.heading_deg))
    }

    /// Cumulative revolutions of one wheel.
    pub fn revolutions(&self, wheel: WheelId) -> f64 {
        self.with_state(|s| s.revolutions[wheel.index()])
    }

    /// Last pulse width written to one ESC.
    pub fn pulse(&self, wheel: WheelId) -> u32 {
        self.with_state(|s| s.pulses[wheel.index()])
    }

    /// Hold a wheel still (or release it) to simulate a stall.
    pub fn set_blocked(&self, wheel: WheelId, blocked: bool) {
        self.with_state(|s| s.blocked[wheel.index()] = blocked);
    }

    /// Make the next `count` reads of `sensor` fail.
    pub fn fail_reads(&self, sensor: SimSensor, count: u32) {
        self.with_state(|s| s.failures[sensor.index()] = count);
    }

    fn simulate_bus(&self) {
        if !self.bus_latency.is_zero() {
            std::thread::sleep(self.bus_latency);
        }
    }
}

struct SimEncoder {
    robot: SimulatedRobot,
    wheel: WheelId,
}

impl AngleSensor for SimEncoder {
    fn read_angle(&mut self) -> Result<u16> {
        self.robot.simulate_bus();
        let sensor = match self.wheel {
            WheelId::Left => SimSensor::LeftEncoder,
            WheelId::Right => SimSensor::RightEncoder,
        };
        let wheel = self.wheel.index();
        self.robot.with_state(|s| {
            if s.take_failure(sensor) {
                Err(Error::Bus {
                    bus: format!("sim-{}", sensor_name(sensor)),
                    reason: "injected read failure".into(),
                })
            } else {
                Ok(s.raw_angle(wheel))
            }
        })
    }
}

struct SimGyro {
    robot: SimulatedRobot,
}

impl RateGyro for SimGyro {
    fn read_rate(&mut self) -> Result<f64> {
        self.robot.simulate_bus();
        self.robot.with_state(|s| {
            if s.take_failure(SimSensor::Gyro) {
                return Err(Error::Bus {
                    bus: "sim-gyro".into(),
                    reason: "injected read failure".into(),
                });
            }
            let noise_dps = s.gyro_noise_dps;
            Ok(s.yaw_rate_dps + s.gyro_bias_dps + s.noise.gaussian(noise_dps))
        })
    }
}

struct SimPwm {
    robot: SimulatedRobot,
    wheel: WheelId,
}

impl PwmOutput for SimPwm {
    fn write_pulse(&mut self, pulse_ns: u32) -> Result<()> {
        let wheel = self.wheel.index();
        self.robot.with_state(|s| s.pulses[wheel] = pulse_ns);
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        let wheel = self.wheel.index();
        self.robot.with_state(|s| s.pulses[wheel] = s.pwm.neutral_ns);
        Ok(())
    }
}

/// PWM output that records every pulse, for tests of code that drives ESCs.
#[derive(Clone, Default)]
pub struct RecordingPwm {
    log: Arc<Mutex<Vec<u32>>>,
    disabled: Arc<Mutex<bool>>,
}

impl RecordingPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pulse written so far.
    pub fn pulses(&self) -> Vec<u32> {
        self.log.lock().clone()
    }

    pub fn last(&self) -> Option<u32> {
        self.log.lock().last().copied()
    }

    pub fn is_disabled(&self) -> bool {
        *self.disabled.lock()
    }
}

impl PwmOutput for RecordingPwm {
    fn write_pulse(&mut self, pulse_ns: u32) -> Result<()> {
        self.log.lock().push(pulse_ns);
        Ok(())
    }

    fn disable(&mut self) -> Result<()> {
        *self.disabled.lock() = true;
        Ok(())
    }
}

fn sensor_name(sensor: SimSensor) -> &'static str {
    match sensor {
        SimSensor::LeftEncoder => "left-encoder",
        SimSensor::RightEncoder => "right-encoder",
        SimSensor::Gyro => "gyro",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use approx::assert_relative_eq;

    fn quiet_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.simulation.gyro_noise_dps = 0.0;
        config.simulation.bus_latency_us = 0;
        config
    }

    fn robot() -> (Arc<ManualClock>, SimulatedRobot) {
        let clock = Arc::new(ManualClock::new());
        let robot = SimulatedRobot::new(&quiet_config(), clock.clone());
        (clock, robot)
    }

    #[test]
    fn test_deadband_holds_still() {
        let (clock, robot) = robot();
        let mut hw = robot.hardware();
        hw.left_pwm.write_pulse(1_540_000).unwrap();
        hw.right_pwm.write_pulse(1_460_000).unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(robot.revolutions(WheelId::Left), 0.0);
        assert_eq!(robot.revolutions(WheelId::Right), 0.0);
    }

    #[test]
    fn test_full_forward_drives_straight() {
        let (clock, robot) = robot();
        let mut hw = robot.hardware();
        hw.left_pwm.write_pulse(2_000_000).unwrap();
        hw.right_pwm.write_pulse(2_000_000).unwrap();
        clock.advance(Duration::from_secs(1));

        let (x, y, heading) = robot.true_pose();
        let expected = 3.0 * PI * (4.0 / 12.0);
        assert_relative_eq!(x, 0.0, epsilon = 1e-9);
        assert_relative_eq!(y, 15.0 + expected, epsilon = 1e-9);
        assert_relative_eq!(heading, 90.0, epsilon = 1e-9);
    }

    #[test]
    fn test_opposite_wheels_turn_ccw() {
        let (clock, robot) = robot();
        let mut hw = robot.hardware();
        hw.left_pwm.write_pulse(1_000_000).unwrap();
        hw.right_pwm.write_pulse(2_000_000).unwrap();
        clock.advance(Duration::from_millis(100));

        let rate = hw.gyro.read_rate().unwrap();
        assert!(rate > 0.0);
        let (_, _, heading) = robot.true_pose();
        assert!(heading > 90.0);
    }

    #[test]
    fn test_encoder_wraps() {
        let (clock, robot) = robot();
        let mut hw = robot.hardware();
        let start = hw.left_encoder.read_angle().unwrap();
        hw.left_pwm.write_pulse(2_000_000).unwrap();
        // 3 rev/s for 1 s: three whole turns back to the start angle
        clock.advance(Duration::from_secs(1));
        assert_eq!(hw.left_encoder.read_angle().unwrap(), start);
    }

    #[test]
    fn test_injected_failures() {
        let (_clock, robot) = robot();
        let mut hw = robot.hardware();
        robot.fail_reads(SimSensor::Gyro, 2);
        assert!(hw.gyro.read_rate().is_err());
        assert!(hw.gyro.read_rate().is_err());
        assert!(hw.gyro.read_rate().is_ok());
    }

    #[test]
    fn test_blocked_wheel() {
        let (clock, robot) = robot();
        let mut hw = robot.hardware();
        robot.set_blocked(WheelId::Right, true);
        hw.right_pwm.write_pulse(2_000_000).unwrap();
        clock.advance(Duration::from_secs(1));
        assert_eq!(robot.revolutions(WheelId::Right), 0.0);
    }
}
