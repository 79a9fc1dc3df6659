//! Error types for ChakraDrive

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// ChakraDrive error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Configuration value out of range or inconsistent
    #[error("Invalid config: {0}")]
    Config(String),

    /// I2C bus open, address select or transfer failure
    #[error("I2C error on {bus}: {reason}")]
    Bus {
        /// Bus device path
        bus: String,
        /// What went wrong
        reason: String,
    },

    /// Sysfs PWM export, period, duty or enable failure
    #[error("PWM error: {0}")]
    Pwm(String),

    /// Device initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// Bus read did not complete in time
    #[error("Communication timeout")]
    Timeout,

    /// Worker thread could not be started
    #[error("Failed to spawn {0} thread")]
    ThreadSpawn(&'static str),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}
