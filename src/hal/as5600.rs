//! AS5600 12-bit magnetic rotary position sensor.

use super::AngleSensor;
use super::i2c::I2cDevice;
use crate::error::Result;

/// RAW ANGLE high byte (low byte follows at 0x0D)
const REG_RAW_ANGLE: u8 = 0x0C;

/// Counts per revolution of the raw angle output.
pub const TICK_RANGE: u16 = 4096;

pub struct As5600 {
    dev: I2cDevice,
}

impl As5600 {
    pub fn open(bus: &str, address: u16, timeout_ms: u64) -> Result<Self> {
        let mut dev = I2cDevice::open(bus, address, timeout_ms)?;
        // Probe once so a missing sensor fails startup instead of every sample
        let mut buf = [0u8; 2];
        dev.read_registers(REG_RAW_ANGLE, &mut buf)?;
        Ok(Self { dev })
    }
}

/// Assemble the 12-bit angle from the two register bytes.
#[inline]
pub fn raw_angle_from_bytes(high: u8, low: u8) -> u16 {
    (((high & 0x0F) as u16) << 8) | low as u16
}

impl AngleSensor for As5600 {
    fn read_angle(&mut self) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.dev.read_registers(REG_RAW_ANGLE, &mut buf)?;
        Ok(raw_angle_from_bytes(buf[0], buf[1]))
    }
}
