//! ChakraDrive - control core for a two-wheeled differential robot
//!
//! Reads two AS5600 magnetic encoders and an MPU6050 gyro, fuses them into a
//! pose, and drives two ESCs over sysfs PWM toward goals received on stdin.
//!
//! ## Threads
//!
//! - **sensor**: parallel bus reads, encoder tracking, pose fusion
//! - **control**: 200 Hz navigation state machine and wheel controllers
//! - **command**: stdin line protocol
//!
//! Hardware sits behind the traits in [`hal`]; `[device] type = "mock"`
//! swaps in a simulated robot.

pub mod config;
pub mod controller;
pub mod encoder;
pub mod error;
pub mod hal;
pub mod motor;
pub mod navigation;
pub mod odometry;
pub mod protocol;
pub mod sensors;
pub mod shared;
pub mod telemetry;
pub mod threads;
pub mod time;
pub mod wheel;

// Re-export commonly used types
pub use config::AppConfig;
pub use error::{Error, Result};
pub use shared::{ControlMode, DriveContext};
