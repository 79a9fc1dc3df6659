//! Linux I2C character device access (`/dev/i2c-N`).

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::unix::io::AsRawFd;

use crate::error::{Error, Result};

/// Select the slave address for subsequent read/write calls.
const I2C_SLAVE: u32 = 0x0703;
/// Adapter timeout, in units of 10 ms.
const I2C_TIMEOUT: u32 = 0x0702;

/// One slave device on an I2C bus.
#[derive(Debug)]
pub struct I2cDevice {
    file: File,
    bus: String,
    address: u16,
}

impl I2cDevice {
    /// Open the bus and bind it to `address`.
    pub fn open(bus: &str, address: u16, timeout_ms: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(bus)
            .map_err(|e| Error::Bus {
                bus: bus.to_string(),
                reason: format!("open failed: {}", e),
            })?;

        let fd = file.as_raw_fd();
        // SAFETY: fd is a valid open descriptor owned by `file`; both requests
        // take a plain integer argument.
        let rc = unsafe { libc::ioctl(fd, I2C_SLAVE as _, address as libc::c_ulong) };
        if rc < 0 {
            return Err(Error::Bus {
                bus: bus.to_string(),
                reason: format!(
                    "cannot select slave {:#04x}: {}",
                    address,
                    std::io::Error::last_os_error()
                ),
            });
        }

        let ticks = timeout_ms.div_ceil(10).max(1) as libc::c_ulong;
        // SAFETY: as above
        let rc = unsafe { libc::ioctl(fd, I2C_TIMEOUT as _, ticks) };
        if rc < 0 {
            log::warn!(
                "{}: adapter timeout not supported ({}), relying on reader deadline",
                bus,
                std::io::Error::last_os_error()
            );
        }

        Ok(Self {
            file,
            bus: bus.to_string(),
            address,
        })
    }

    /// Write a single register.
    pub fn write_register(&mut self, register: u8, value: u8) -> Result<()> {
        self.file
            .write_all(&[register, value])
            .map_err(|e| self.bus_error("write", register, e))
    }

    /// Read consecutive registers starting at `register`.
    pub fn read_registers(&mut self, register: u8, buf: &mut [u8]) -> Result<()> {
        self.file
            .write_all(&[register])
            .map_err(|e| self.bus_error("address", register, e))?;
        self.file
            .read_exact(buf)
            .map_err(|e| self.bus_error("read", register, e))
    }

    /// Read a big-endian 16-bit register pair.
    pub fn read_u16_be(&mut self, register: u8) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read_registers(register, &mut buf)?;
        Ok(u16::from_be_bytes(buf))
    }

    pub fn bus(&self) -> &str {
        &self.bus
    }

    fn bus_error(&self, op: &str, register: u8, e: std::io::Error) -> Error {
        Error::Bus {
            bus: self.bus.clone(),
            reason: format!(
                "{} of register {:#04x} on slave {:#04x} failed: {}",
                op, register, self.address, e
            ),
        }
    }
}
