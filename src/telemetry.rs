//! In-memory telemetry log, written out as CSV on `stop` and at shutdown.
//!
//! The control loop appends one entry per tick into a buffer preallocated at
//! startup, so recording never allocates. Once full, new entries are dropped
//! and counted.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::navigation::NavState;
use crate::shared::ControlMode;
use crate::wheel::WheelSnapshot;

const CSV_HEADER: &str = "time,mode,pwm_l,i2c_l,pwm_r,i2c_r,target_l,actual_l,target_r,actual_r,gyro_z,odom_x,odom_y,odom_heading,nav_state";

/// Give up looking for a free file name after this many suffixes.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// One control tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryEntry {
    pub time: f64,
    pub mode: ControlMode,
    pub left: WheelSnapshot,
    pub right: WheelSnapshot,
    pub gyro_rate: f64,
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub nav_state: NavState,
}

impl TelemetryEntry {
    fn write_row<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        writeln!(
            out,
            "{:.4},{},{},{},{},{},{},{},{},{},{:.4},{:.4},{:.4},{:.2},{}",
            self.time,
            self.mode.name(),
            self.left.pulse_ns,
            self.left.raw_angle,
            self.right.pulse_ns,
            self.right.raw_angle,
            self.left.target,
            self.left.actual,
            self.right.target,
            self.right.actual,
            self.gyro_rate,
            self.x,
            self.y,
            self.heading,
            self.nav_state.name()
        )
    }
}

pub struct TelemetryLog {
    entries: Vec<TelemetryEntry>,
    capacity: usize,
    dropped: u64,
}

impl TelemetryLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
            capacity,
            dropped: 0,
        }
    }

    pub fn record(&mut self, entry: TelemetryEntry) {
        if self.entries.len() < self.capacity {
            self.entries.push(entry);
        } else {
            if self.dropped == 0 {
                log::warn!(
                    "Telemetry buffer full ({} entries), dropping new entries",
                    self.capacity
                );
            }
            self.dropped += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn entries(&self) -> &[TelemetryEntry] {
        &self.entries
    }

    pub fn mode_label(&self) -> &'static str {
        mode_label(&self.entries)
    }

    /// Hand the recorded entries over for writing and continue into a fresh
    /// buffer of the same capacity. Cheap enough to call under a lock: the
    /// file I/O happens on the returned batch.
    pub fn take_batch(&mut self) -> TelemetryBatch {
        let entries = if self.entries.is_empty() {
            Vec::new()
        } else {
            std::mem::replace(&mut self.entries, Vec::with_capacity(self.capacity))
        };
        TelemetryBatch {
            entries,
            dropped: std::mem::take(&mut self.dropped),
        }
    }

    /// Take the buffer and write it. See [`TelemetryBatch::write`].
    pub fn flush(&mut self, config: &TelemetryConfig) -> Result<Option<PathBuf>> {
        self.take_batch().write(config)
    }
}

/// Entries detached from a [`TelemetryLog`], waiting to be written.
#[derive(Debug, Default)]
pub struct TelemetryBatch {
    entries: Vec<TelemetryEntry>,
    dropped: u64,
}

impl TelemetryBatch {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Write to a new CSV file under `log_dir`, plus the `_latest` copy.
    ///
    /// Returns the path written, or `None` when there was nothing to write.
    pub fn write(&self, config: &TelemetryConfig) -> Result<Option<PathBuf>> {
        self.write_stamped(config, &local_timestamp())
    }

    fn write_stamped(&self, config: &TelemetryConfig, stamp: &str) -> Result<Option<PathBuf>> {
        if self.entries.is_empty() {
            log::debug!("Telemetry buffer empty, nothing to write");
            return Ok(None);
        }

        let label = mode_label(&self.entries);
        fs::create_dir_all(&config.log_dir)?;

        let Some(path) = unused_path(&config.log_dir, label, stamp) else {
            log::error!(
                "Too many telemetry files for {} in {}",
                stamp,
                config.log_dir.display()
            );
            return Ok(None);
        };

        write_csv(&path, &self.entries)?;
        log::info!(
            "Saved {} telemetry entries to {}{}",
            self.entries.len(),
            path.display(),
            if self.dropped > 0 {
                format!(" ({} dropped)", self.dropped)
            } else {
                String::new()
            }
        );

        if let Some(dir) = &config.latest_dir {
            let latest = dir.join(format!("motor_log_{}_latest.csv", label));
            if let Err(e) = write_csv(&latest, &self.entries) {
                log::warn!("Failed to write {}: {}", latest.display(), e);
            }
        }

        Ok(Some(path))
    }
}

/// `joystick` when manual ticks outnumber autonomous ones, else `voice`.
fn mode_label(entries: &[TelemetryEntry]) -> &'static str {
    let (manual, autonomous) =
        entries
            .iter()
            .fold((0usize, 0usize), |(m, a), e| match e.mode {
                ControlMode::Manual => (m + 1, a),
                ControlMode::Autonomous => (m, a + 1),
                ControlMode::Idle => (m, a),
            });
    if manual > autonomous {
        "joystick"
    } else {
        "voice"
    }
}

/// First `motor_log_<label>_<stamp>[_<n>].csv` that does not exist yet.
fn unused_path(dir: &Path, label: &str, stamp: &str) -> Option<PathBuf> {
    (0..=MAX_NAME_ATTEMPTS)
        .map(|n| {
            if n == 0 {
                dir.join(format!("motor_log_{}_{}.csv", label, stamp))
            } else {
                dir.join(format!("motor_log_{}_{}_{}.csv", label, stamp, n))
            }
        })
        .find(|path| !path.exists())
}

fn write_csv(path: &Path, entries: &[TelemetryEntry]) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "{}", CSV_HEADER)?;
    for entry in entries {
        entry.write_row(&mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// Local wall-clock time as `YYYYmmdd_HHMMSS`.
fn local_timestamp() -> String {
    // SAFETY: time(NULL) has no preconditions; localtime_r writes only into
    // the tm we own.
    let tm = unsafe {
        let now = libc::time(std::ptr::null_mut());
        let mut tm: libc::tm = std::mem::zeroed();
        if libc::localtime_r(&now, &mut tm).is_null() {
            log::warn!("localtime_r failed, using epoch seconds in log name");
            return now.to_string();
        }
        tm
    };
    format!(
        "{:04}{:02}{:02}_{:02}{:02}{:02}",
        tm.tm_year + 1900,
        tm.tm_mon + 1,
        tm.tm_mday,
        tm.tm_hour,
        tm.tm_min,
        tm.tm_sec
    )
}
