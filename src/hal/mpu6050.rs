//! MPU6050 gyroscope, Z axis only.
//!
//! Configured for ±250 °/s full scale (131 LSB per °/s) with the 44 Hz DLPF.
//! The sensor's Z axis points down on this robot, so the calibrated rate is
//! negated to report counter-clockwise as positive.

use super::RateGyro;
use super::i2c::I2cDevice;
use crate::config::ImuConfig;
use crate::error::{Error, Result};
use crate::time::sleep_ms;

const REG_SMPLRT_DIV: u8 = 0x19;
const REG_CONFIG: u8 = 0x1A;
const REG_GYRO_CONFIG: u8 = 0x1B;
const REG_GYRO_ZOUT_H: u8 = 0x47;
const REG_PWR_MGMT_1: u8 = 0x6B;

/// LSB per deg/s at ±250 °/s
const GYRO_SENSITIVITY: f64 = 131.0;

pub struct Mpu6050 {
    dev: I2cDevice,
    /// Zero-rate output measured at startup (deg/s, sensor frame)
    offset_dps: f64,
}

impl Mpu6050 {
    /// Wake the chip and configure rate, filter and range.
    pub fn open(bus: &str, address: u16, timeout_ms: u64) -> Result<Self> {
        let mut dev = I2cDevice::open(bus, address, timeout_ms)?;

        dev.write_register(REG_PWR_MGMT_1, 0x00)?;
        sleep_ms(100);
        dev.write_register(REG_SMPLRT_DIV, 0x07)?;
        dev.write_register(REG_CONFIG, 0x03)?;
        dev.write_register(REG_GYRO_CONFIG, 0x00)?;

        Ok(Self {
            dev,
            offset_dps: 0.0,
        })
    }

    fn read_raw_dps(&mut self) -> Result<f64> {
        let raw = self.dev.read_u16_be(REG_GYRO_ZOUT_H)? as i16;
        Ok(raw as f64 / GYRO_SENSITIVITY)
    }

    /// Measure the zero-rate offset. The robot must be stationary.
    pub fn calibrate(&mut self, config: &ImuConfig) -> Result<()> {
        log::info!(
            "Calibrating gyro on {} ({} samples), keep the robot still",
            self.dev.bus(),
            config.calibration_samples
        );
        sleep_ms(config.settle_ms);

        for _ in 0..config.warmup_samples {
            // Early samples after wake-up are unreliable
            let _ = self.read_raw_dps();
            sleep_ms(config.sample_interval_ms);
        }

        let mut sum = 0.0;
        let mut good = 0u32;
        for _ in 0..config.calibration_samples {
            match self.read_raw_dps() {
                Ok(dps) => {
                    sum += dps;
                    good += 1;
                }
                Err(e) => log::debug!("Calibration read failed: {}", e),
            }
            sleep_ms(config.sample_interval_ms);
        }

        if config.calibration_samples > 0 && good == 0 {
            return Err(Error::InitializationFailed(
                "gyro calibration: no successful reads".into(),
            ));
        }
        self.offset_dps = if good > 0 { sum / good as f64 } else { 0.0 };
        log::info!(
            "Gyro offset {:.3} deg/s ({}/{} samples)",
            self.offset_dps,
            good,
            config.calibration_samples
        );
        Ok(())
    }
}

impl RateGyro for Mpu6050 {
    fn read_rate(&mut self) -> Result<f64> {
        let dps = self.read_raw_dps()?;
        Ok(-(dps - self.offset_dps))
    }
}
