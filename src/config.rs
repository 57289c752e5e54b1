// Timeouts, physical model and device configuration
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

// Bounded wait per control loop iteration; also caps cancellation latency
pub const LOOP_POLL_TIMEOUT: Duration = Duration::from_millis(50);

// Watchdog: motors are stopped when no drive command arrives within this window
pub const DRIVE_TIMEOUT: Duration = Duration::from_millis(500);

// Physical model used by the odometry estimator
pub const WHEEL_DIAMETER_MM: f32 = 120.0;
pub const ENCODER_COUNTS_PER_ROTATION: f32 = 1196.8;

/// Device paths and network endpoints, loadable from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Serial port of the RoboClaw motor controllers.
    pub motor_port: String,
    pub motor_baudrate: u32,
    /// Serial port of the VMU931 IMU.
    pub imu_port: String,
    /// UDP port the drive-command server listens on.
    pub listen_port: u16,
    /// Receive timeout of the command transport itself (not the loop poll).
    pub receive_timeout_ms: u64,
    /// Optional destination for 32-byte dead-reckoning reports.
    pub report_to: Option<SocketAddr>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            motor_port: "/dev/ttyXRUSB0".to_string(),
            motor_baudrate: 460_800,
            imu_port: "/dev/ttyACM0".to_string(),
            listen_port: 10000,
            receive_timeout_ms: 100,
            report_to: None,
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("unable to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.listen_port, 10000);
        assert_eq!(cfg.receive_timeout(), Duration::from_millis(100));
        assert!(cfg.report_to.is_none());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: RuntimeConfig =
            serde_json::from_str(r#"{"listen_port": 9000, "report_to": "10.0.0.2:10001"}"#)
                .unwrap();
        assert_eq!(cfg.listen_port, 9000);
        assert_eq!(cfg.motor_baudrate, 460_800);
        assert_eq!(cfg.report_to.unwrap().port(), 10001);
    }
}
