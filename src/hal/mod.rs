//! Hardware abstraction layer.
//!
//! The control stack only sees three small traits:
//! - [`AngleSensor`]: one wheel's absolute magnetic encoder
//! - [`RateGyro`]: yaw rate in deg/s, counter-clockwise positive
//! - [`PwmOutput`]: one ESC's pulse width
//!
//! [`create_hardware`] builds either the Linux drivers (I2C character devices
//! and sysfs PWM) or the simulated robot, selected by `[device] type`.

pub mod as5600;
pub mod i2c;
pub mod mock;
pub mod mpu6050;
pub mod sysfs_pwm;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::{Error, Result};
use crate::time::Clock;

pub use mock::{RecordingPwm, SimSensor, SimulatedRobot};

/// Absolute angle sensor on a wheel shaft.
pub trait AngleSensor: Send {
    /// Raw angle in `[0, TICK_RANGE)`.
    fn read_angle(&mut self) -> Result<u16>;
}

/// Single-axis yaw rate sensor.
pub trait RateGyro: Send {
    /// Calibrated yaw rate in deg/s, counter-clockwise positive.
    fn read_rate(&mut self) -> Result<f64>;
}

/// One PWM channel driving an ESC.
pub trait PwmOutput: Send {
    /// Set the high time of the pulse in nanoseconds.
    fn write_pulse(&mut self, pulse_ns: u32) -> Result<()>;

    /// Return to neutral and stop generating pulses.
    fn disable(&mut self) -> Result<()>;
}

/// Fully initialized sensor and actuator set.
pub struct Hardware {
    pub left_encoder: Box<dyn AngleSensor>,
    pub right_encoder: Box<dyn AngleSensor>,
    pub gyro: Box<dyn RateGyro>,
    pub left_pwm: Box<dyn PwmOutput>,
    pub right_pwm: Box<dyn PwmOutput>,
    /// Present when running against the simulator
    pub simulator: Option<SimulatedRobot>,
}

/// Open every bus and PWM channel named in the config.
///
/// Any failure is returned before a single pulse leaves neutral; callers treat
/// it as fatal.
pub fn create_hardware(config: &AppConfig, clock: Arc<dyn Clock>) -> Result<Hardware> {
    match config.device.device_type.as_str() {
        "linux" => create_linux_hardware(config),
        "mock" => {
            log::info!("Using simulated robot (no hardware access)");
            let sim = SimulatedRobot::new(config, clock);
            Ok(sim.hardware())
        }
        other => Err(Error::Config(format!("unknown device type: {}", other))),
    }
}

fn create_linux_hardware(config: &AppConfig) -> Result<Hardware> {
    let hw = &config.hardware;
    let timeout_ms = hw.bus_timeout_ms;

    let left_encoder =
        as5600::As5600::open(&hw.left_encoder.bus, hw.left_encoder.address, timeout_ms)?;
    log::info!(
        "Left encoder: AS5600 on {} @ {:#04x}",
        hw.left_encoder.bus,
        hw.left_encoder.address
    );

    let right_encoder =
        as5600::As5600::open(&hw.right_encoder.bus, hw.right_encoder.address, timeout_ms)?;
    log::info!(
        "Right encoder: AS5600 on {} @ {:#04x}",
        hw.right_encoder.bus,
        hw.right_encoder.address
    );

    let mut gyro = mpu6050::Mpu6050::open(&hw.gyro.bus, hw.gyro.address, timeout_ms)?;
    log::info!("Gyro: MPU6050 on {} @ {:#04x}", hw.gyro.bus, hw.gyro.address);

    let chip = match hw.pwm_chip {
        Some(chip) => chip,
        None => sysfs_pwm::find_chip()?,
    };
    let left_pwm = sysfs_pwm::SysfsPwm::open(chip, hw.left_pwm_channel, &config.pwm)?;
    let right_pwm = sysfs_pwm::SysfsPwm::open(chip, hw.right_pwm_channel, &config.pwm)?;
    log::info!(
        "PWM: pwmchip{} channels {}/{} at neutral",
        chip,
        hw.left_pwm_channel,
        hw.right_pwm_channel
    );

    // ESCs now hold neutral, so the robot is still while the gyro settles
    gyro.calibrate(&config.imu)?;

    Ok(Hardware {
        left_encoder: Box::new(left_encoder),
        right_encoder: Box::new(right_encoder),
        gyro: Box::new(gyro),
        left_pwm: Box::new(left_pwm),
        right_pwm: Box::new(right_pwm),
        simulator: None,
    })
}
