//! Linux sysfs PWM (`/sys/class/pwm/pwmchipN/pwmM`).

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::PwmOutput;
use crate::config::PwmConfig;
use crate::error::{Error, Result};

const PWM_CLASS: &str = "/sys/class/pwm";

/// Highest chip index probed during auto-detection.
const MAX_CHIPS: u32 = 10;

/// Locate the first `pwmchipN` that exists.
pub fn find_chip() -> Result<u32> {
    (0..MAX_CHIPS)
        .find(|n| Path::new(PWM_CLASS).join(format!("pwmchip{}", n)).exists())
        .ok_or_else(|| Error::Pwm(format!("no pwmchip found under {}", PWM_CLASS)))
}

/// An exported, enabled PWM channel.
pub struct SysfsPwm {
    channel_path: PathBuf,
    duty: File,
    neutral_ns: u32,
    enabled: bool,
}

impl SysfsPwm {
    /// Export the channel, set the period, write neutral and enable.
    pub fn open(chip: u32, channel: u32, config: &PwmConfig) -> Result<Self> {
        let chip_path = Path::new(PWM_CLASS).join(format!("pwmchip{}", chip));
        let channel_path = chip_path.join(format!("pwm{}", channel));

        if !channel_path.exists() {
            write_attr(&chip_path.join("export"), channel)?;
            // udev needs a moment to create the attribute files
            std::thread::sleep(Duration::from_millis(100));
        }

        write_attr(&channel_path.join("period"), config.period_ns)?;

        let mut duty = OpenOptions::new()
            .write(true)
            .open(channel_path.join("duty_cycle"))
            .map_err(|e| Error::Pwm(format!("{}/duty_cycle: {}", channel_path.display(), e)))?;
        duty.write_all(config.neutral_ns.to_string().as_bytes())
            .map_err(|e| Error::Pwm(format!("{}/duty_cycle: {}", channel_path.display(), e)))?;

        write_attr(&channel_path.join("enable"), 1)?;

        Ok(Self {
            channel_path,
            duty,
            neutral_ns: config.neutral_ns,
            enabled: true,
        })
    }
}

fn write_attr(path: &Path, value: impl std::fmt::Display) -> Result<()> {
    fs::write(path, value.to_string())
        .map_err(|e| Error::Pwm(format!("write {} to {}: {}", value, path.display(), e)))
}

impl PwmOutput for SysfsPwm {
    fn write_pulse(&mut self, pulse_ns: u32) -> Result<()> {
        self.duty.seek(SeekFrom::Start(0))?;
        // One write() per value: sysfs parses each write separately
        self.duty
            .write_all(pulse_ns.to_string().as_bytes())
            .map_err(|e| Error::Pwm(format!("{}: {}", self.channel_path.display(), e)))
    }

    fn disable(&mut self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        self.write_pulse(self.neutral_ns)?;
        write_attr(&self.channel_path.join("enable"), 0)?;
        self.enabled = false;
        Ok(())
    }
}

impl Drop for SysfsPwm {
    fn drop(&mut self) {
        if let Err(e) = self.disable() {
            log::warn!("Failed to disable {}: {}", self.channel_path.display(), e);
        }
    }
}
