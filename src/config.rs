//! Configuration loading for the MELFA driver

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use crate::{DriverError, Result};

/// Default TCP port of the R-series controller command server
pub const DEFAULT_PORT: u16 = 10001;

/// Largest axis count a joint feedback frame can describe
pub const MAX_AXES: usize = 14;

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DriverConfig {
    pub connection: ConnectionConfig,
    pub robot: RobotConfig,
    pub motion: MotionConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    /// Port used by the position monitor; falls back to `port`
    pub monitor_port: Option<u16>,
    /// Name sent in the `OPEN=` handshake
    pub client_name: String,
    pub connect_timeout_secs: f64,
    /// Upper bound for one command round trip. No motion should take longer.
    pub response_timeout_secs: f64,
    pub buffer_size: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RobotConfig {
    pub axis_count: usize,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MotionConfig {
    pub speed_mms: f64,
    pub accel_percent_joints: f64,
    pub accel_percent_linear: f64,
    pub rounding: f64,
    pub tool: [f64; 6],
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Courtesy delay between the joint poll and the state poll
    pub poll_delay_ms: u64,
    /// Sleep between checks of the moving flag while idle
    pub idle_delay_ms: u64,
    /// Largest per-axis deviation still counted as "reached target".
    /// Linear and angular axes share this threshold.
    pub tolerance: f64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            monitor_port: None,
            client_name: "ROBODK".to_string(),
            connect_timeout_secs: 4.0,
            response_timeout_secs: 60.0,
            buffer_size: 512,
        }
    }
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self { axis_count: 6 }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            speed_mms: 50.0,
            accel_percent_joints: 100.0,
            accel_percent_linear: 100.0,
            rounding: -1.0,
            tool: [0.0; 6],
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: 50,
            idle_delay_ms: 10,
            tolerance: 4.0,
        }
    }
}

impl ConnectionConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_secs)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.response_timeout_secs)
    }

    /// Port for the monitor connection with default fallback
    pub fn monitor_port(&self) -> u16 {
        self.monitor_port.unwrap_or(self.port)
    }
}

impl MonitorConfig {
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }
}

impl DriverConfig {
    /// Load configuration from a YAML file, or JSON when the extension is `.json`
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| DriverError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let config: DriverConfig = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            _ => serde_yaml::from_str(&contents)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string
    pub fn load_from_str(contents: &str) -> Result<Self> {
        let config: DriverConfig = serde_yaml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.connection.host.is_empty() {
            return Err(DriverError::Config("Host cannot be empty".to_string()));
        }
        if self.connection.port == 0 {
            return Err(DriverError::Config("Port number must be greater than 0".to_string()));
        }
        if !(1..=MAX_AXES).contains(&self.robot.axis_count) {
            return Err(DriverError::Config(format!(
                "Axis count must be between 1 and {}, got {}",
                MAX_AXES, self.robot.axis_count
            )));
        }
        for (name, secs) in [
            ("connect_timeout_secs", self.connection.connect_timeout_secs),
            ("response_timeout_secs", self.connection.response_timeout_secs),
        ] {
            if !valid_timeout(secs) {
                return Err(DriverError::Config(format!(
                    "{} must be a positive, finite number of seconds, got {}",
                    name, secs
                )));
            }
        }
        if self.connection.buffer_size == 0 {
            return Err(DriverError::Config("Buffer size must be greater than 0".to_string()));
        }
        if self.monitor.tolerance.is_nan() || self.monitor.tolerance < 0.0 {
            return Err(DriverError::Config("Monitor tolerance must be non-negative".to_string()));
        }
        Ok(())
    }
}

/// Positive and representable as a `Duration`
fn valid_timeout(secs: f64) -> bool {
    secs > 0.0 && Duration::try_from_secs_f64(secs).is_ok()
}
