//! Configuration loading for ChakraDrive
//!
//! Every section and field has a default matching the competition robot
//! (4" wheels, 12" wheelbase, AS5600 encoders, MPU6050, two ESCs on sysfs PWM),
//! so an empty or partial TOML file is valid.
//!
//! ```toml
//! [device]
//! type = "linux"            # or "mock" for the built-in simulator
//!
//! [hardware]
//! left_encoder = { bus = "/dev/i2c-3", address = 0x40 }
//! right_encoder = { bus = "/dev/i2c-1", address = 0x36 }
//! gyro = { bus = "/dev/i2c-2", address = 0x68 }
//!
//! [navigation]
//! start_x = 0.0
//! start_y = 15.0
//! start_heading = 90.0
//! ```

use crate::error::{Error, Result};
use crate::hal::as5600::TICK_RANGE;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub hardware: HardwareConfig,
    pub pwm: PwmConfig,
    pub robot: RobotConfig,
    pub control: ControlConfig,
    pub navigation: NavigationConfig,
    pub fusion: FusionConfig,
    pub imu: ImuConfig,
    pub telemetry: TelemetryConfig,
    pub startup: StartupConfig,
    pub simulation: SimulationConfig,
}

/// Which hardware backend to build
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeviceConfig {
    /// "linux" (I2C + sysfs PWM) or "mock" (simulated robot)
    #[serde(rename = "type", default = "default_device_type")]
    pub device_type: String,

    /// Human-readable robot name for logs
    #[serde(default = "default_device_name")]
    pub name: String,
}

/// One device on an I2C bus
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct I2cDeviceConfig {
    /// Bus device node, e.g. `/dev/i2c-1`
    pub bus: String,
    /// 7-bit slave address
    pub address: u16,
}

/// Bus and PWM wiring
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HardwareConfig {
    /// AS5600 on the left wheel
    #[serde(default = "default_left_encoder")]
    pub left_encoder: I2cDeviceConfig,

    /// AS5600 on the right wheel
    #[serde(default = "default_right_encoder")]
    pub right_encoder: I2cDeviceConfig,

    /// MPU6050
    #[serde(default = "default_gyro")]
    pub gyro: I2cDeviceConfig,

    /// Sysfs pwmchip index (auto-detected when absent)
    #[serde(default)]
    pub pwm_chip: Option<u32>,

    /// PWM channel driving the left ESC (GPIO12)
    #[serde(default)]
    pub left_pwm_channel: u32,

    /// PWM channel driving the right ESC (GPIO13)
    #[serde(default = "default_right_pwm_channel")]
    pub right_pwm_channel: u32,

    /// Upper bound on one sensor read before the sample is dropped (default: 20)
    #[serde(default = "default_bus_timeout_ms")]
    pub bus_timeout_ms: u64,
}

/// ESC pulse-width limits, in nanoseconds
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PwmConfig {
    /// PWM period (2.5 ms = 400 Hz)
    pub period_ns: u32,
    /// Pulse width at which the ESC holds the motor stopped
    pub neutral_ns: u32,
    /// First pulse width that moves the motor forward
    pub forward_start_ns: u32,
    /// Full forward
    pub forward_max_ns: u32,
    /// First pulse width that moves the motor in reverse
    pub reverse_start_ns: u32,
    /// Full reverse
    pub reverse_max_ns: u32,
    /// Maximum pulse-width change per second when ramping
    pub ramp_ns_per_sec: f64,
    /// Band around neutral treated as "not driving" for direction inference
    pub direction_hysteresis_ns: u32,
    /// Initial lower bound on autonomous drive effort (percent)
    pub min_percent: i32,
    /// Initial upper bound on autonomous drive effort (percent)
    pub max_percent: i32,
}

/// Physical robot geometry. Distances are in feet.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    /// Encoder counts per wheel revolution; must match the AS5600's 12-bit range
    pub ticks_per_rev: u32,
    /// Wheel diameter
    pub wheel_diameter: f64,
    /// Distance between wheel contact points
    pub wheelbase: f64,
}

/// Control loop and per-wheel controller tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ControlConfig {
    /// Control loop rate (Hz)
    pub rate_hz: u32,
    /// Emit a periodic STATUS line every N control ticks
    pub status_every_ticks: u32,
    /// |error| at or below this many ticks completes a wheel's phase
    pub stop_threshold: i64,
    /// |error| below this many ticks is not corrected unless stalled
    pub deadband_threshold: i64,
    /// Wall-clock interval between stall checks (seconds)
    pub stall_interval_secs: f64,
    /// Movement below this many ticks in one interval counts as stalled
    pub stall_min_movement: i64,
    /// Stall is only declared while |error| exceeds this many ticks
    pub stall_min_error: i64,
    /// Extra drive effort per consecutive stall (percent)
    pub stall_boost_percent: i32,
}

/// Navigation state machine tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NavigationConfig {
    pub start_x: f64,
    pub start_y: f64,
    /// Degrees, counter-clockwise from +x
    pub start_heading: f64,
    /// Goal counts as reached within this distance
    pub arrival_tolerance: f64,
    /// Heading errors above this trigger an in-place turn (degrees)
    pub turn_tolerance_deg: f64,
    /// Initial navigation speed scale [0, 1]
    pub default_speed: f64,
}

/// Odometry fusion tuning
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Gyro rates below this magnitude are treated as zero (deg/s)
    pub gyro_deadband_dps: f64,
    /// Heading is frozen while both wheels moved less than this
    pub min_wheel_travel: f64,
}

/// Gyro startup calibration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ImuConfig {
    /// Wait after wake-up before sampling
    pub settle_ms: u64,
    /// Readings discarded before averaging
    pub warmup_samples: u32,
    /// Readings averaged into the zero-rate offset
    pub calibration_samples: u32,
    /// Delay between calibration reads
    pub sample_interval_ms: u64,
}

/// Telemetry recorder
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Maximum rows held in memory before new rows are dropped
    pub capacity: usize,
    /// Directory for timestamped CSV files
    pub log_dir: PathBuf,
    /// Directory for the `_latest.csv` copy (omit to disable)
    pub latest_dir: Option<PathBuf>,
}

/// Startup sequencing
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StartupConfig {
    /// Neutral hold while the ESCs arm (seconds)
    pub arming_secs: f64,
}

/// Mock device physics and noise
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Wheel speed at full forward/reverse pulse (rev/s)
    pub max_wheel_rps: f64,
    /// Gyro noise standard deviation (deg/s)
    pub gyro_noise_dps: f64,
    /// Constant gyro bias (deg/s)
    pub gyro_bias_dps: f64,
    /// Simulated I2C transaction time (microseconds)
    pub bus_latency_us: u64,
    /// Random seed for reproducible noise (0 = random each run)
    pub random_seed: u64,
}

fn default_device_type() -> String {
    "linux".to_string()
}

fn default_device_name() -> String {
    "chakra".to_string()
}

fn default_left_encoder() -> I2cDeviceConfig {
    I2cDeviceConfig {
        bus: "/dev/i2c-3".to_string(),
        address: 0x40,
    }
}

fn default_right_encoder() -> I2cDeviceConfig {
    I2cDeviceConfig {
        bus: "/dev/i2c-1".to_string(),
        address: 0x36,
    }
}

fn default_gyro() -> I2cDeviceConfig {
    I2cDeviceConfig {
        bus: "/dev/i2c-2".to_string(),
        address: 0x68,
    }
}

fn default_right_pwm_channel() -> u32 {
    1
}

fn default_bus_timeout_ms() -> u64 {
    20
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            device_type: default_device_type(),
            name: default_device_name(),
        }
    }
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            left_encoder: default_left_encoder(),
            right_encoder: default_right_encoder(),
            gyro: default_gyro(),
            pwm_chip: None,
            left_pwm_channel: 0,
            right_pwm_channel: default_right_pwm_channel(),
            bus_timeout_ms: default_bus_timeout_ms(),
        }
    }
}

impl Default for PwmConfig {
    fn default() -> Self {
        Self {
            period_ns: 2_500_000,
            neutral_ns: 1_500_000,
            forward_start_ns: 1_550_000,
            forward_max_ns: 2_000_000,
            reverse_start_ns: 1_450_000,
            reverse_max_ns: 1_000_000,
            ramp_ns_per_sec: 166_667.0,
            direction_hysteresis_ns: 25_000,
            min_percent: 45,
            max_percent: 80,
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            ticks_per_rev: TICK_RANGE as u32,
            wheel_diameter: 4.0 / 12.0,
            wheelbase: 1.0,
        }
    }
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            rate_hz: 200,
            status_every_ticks: 10,
            stop_threshold: 30,
            deadband_threshold: 100,
            stall_interval_secs: 0.5,
            stall_min_movement: 20,
            stall_min_error: 100,
            stall_boost_percent: 10,
        }
    }
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            start_x: 0.0,
            start_y: 15.0,
            start_heading: 90.0,
            arrival_tolerance: 1.0,
            turn_tolerance_deg: 5.0,
            default_speed: 0.3,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            gyro_deadband_dps: 0.25,
            min_wheel_travel: 0.0005,
        }
    }
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            settle_ms: 500,
            warmup_samples: 200,
            calibration_samples: 200,
            sample_interval_ms: 5,
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            log_dir: PathBuf::from("logs"),
            latest_dir: Some(PathBuf::from("/dev/shm")),
        }
    }
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self { arming_secs: 2.0 }
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            max_wheel_rps: 3.0,
            gyro_noise_dps: 0.05,
            gyro_bias_dps: 0.0,
            bus_latency_us: 300,
            random_seed: 42,
        }
    }
}

impl AppConfig {
    /// Load and validate configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let pwm = &self.pwm;
        if !(pwm.reverse_max_ns < pwm.reverse_start_ns
            && pwm.reverse_start_ns <= pwm.neutral_ns
            && pwm.neutral_ns <= pwm.forward_start_ns
            && pwm.forward_start_ns < pwm.forward_max_ns)
        {
            return Err(Error::Config(format!(
                "pulse widths must satisfy reverse_max < reverse_start <= neutral <= forward_start < forward_max (got {} {} {} {} {})",
                pwm.reverse_max_ns,
                pwm.reverse_start_ns,
                pwm.neutral_ns,
                pwm.forward_start_ns,
                pwm.forward_max_ns
            )));
        }
        if pwm.forward_max_ns >= pwm.period_ns {
            return Err(Error::Config(format!(
                "forward_max_ns {} does not fit in period {}",
                pwm.forward_max_ns, pwm.period_ns
            )));
        }
        if pwm.ramp_ns_per_sec <= 0.0 {
            return Err(Error::Config("ramp_ns_per_sec must be positive".into()));
        }
        if self.robot.ticks_per_rev == 0
            || self.robot.wheel_diameter <= 0.0
            || self.robot.wheelbase <= 0.0
        {
            return Err(Error::Config(
                "robot geometry must be positive (ticks_per_rev, wheel_diameter, wheelbase)".into(),
            ));
        }
        if self.robot.ticks_per_rev != TICK_RANGE as u32 {
            return Err(Error::Config(format!(
                "ticks_per_rev {} does not match the encoder range {}",
                self.robot.ticks_per_rev, TICK_RANGE
            )));
        }
        if self.control.rate_hz == 0 || self.control.status_every_ticks == 0 {
            return Err(Error::Config(
                "control rate_hz and status_every_ticks must be non-zero".into(),
            ));
        }
        if self.control.stop_threshold < 0
            || self.control.deadband_threshold < self.control.stop_threshold
        {
            return Err(Error::Config(
                "control thresholds must satisfy 0 <= stop_threshold <= deadband_threshold".into(),
            ));
        }
        if self.control.stall_interval_secs <= 0.0 {
            return Err(Error::Config("stall_interval_secs must be positive".into()));
        }
        if self.telemetry.capacity == 0 {
            return Err(Error::Config("telemetry capacity must be non-zero".into()));
        }
        match self.device.device_type.as_str() {
            "linux" | "mock" => Ok(()),
            other => Err(Error::Config(format!(
                "unknown device type '{}' (expected \"linux\" or \"mock\")",
                other
            ))),
        }
    }
}

impl RobotConfig {
    /// Encoder ticks per unit of travel (per foot with the default geometry)
    pub fn ticks_per_unit(&self) -> f64 {
        self.ticks_per_rev as f64 / (PI * self.wheel_diameter)
    }
}

impl ControlConfig {
    /// Control loop period in seconds
    pub fn period_secs(&self) -> f64 {
        1.0 / self.rate_hz as f64
    }
}
