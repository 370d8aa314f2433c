//! Runtime configuration from environment variables.
//!
//! Recognized variables (everything else is compiled defaults):
//!
//! | Variable | Effect |
//! |---|---|
//! | `USE_SIMULATION` | substitute simulated hardware for every device |
//! | `TOF_READ_RETRY_COUNT` | read attempts per ToF poll cycle |
//! | `TOF_READ_RETRY_DELAY` | base retry delay, seconds |
//! | `TOF_BUS_RECOVERY_ENABLED` | enable the I²C bus recovery procedure |
//! | `IMU_SERIAL_PORT` / `IMU_BAUD_RATE` | BNO085 UART |
//! | `MM1_SERIAL_PORT` / `MM1_BAUD_RATE` | RoboHAT UART |
//! | `MOWER_MASTER_KEY` | secure storage master key |
//! | `LOG_LEVEL` | default tracing filter (see `main.rs`) |

use std::path::PathBuf;
use std::time::Duration;

use mower_hal::HalConfig;
use mower_nav::AvoidanceConfig;
use mower_sensors::SensorInterfaceConfig;

/// Everything the supervisor needs to come up, resolved once at startup.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub use_simulation: bool,
    pub force_cleanup: bool,
    pub hal: HalConfig,
    pub sensors: SensorInterfaceConfig,
    pub avoidance: AvoidanceConfig,
    pub pid_file: PathBuf,
    pub snapshot_path: PathBuf,
    pub frame_dir: PathBuf,
    pub boundary_path: PathBuf,
    pub model_path: PathBuf,
    pub vault_path: PathBuf,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            use_simulation: false,
            force_cleanup: false,
            hal: HalConfig::default(),
            sensors: SensorInterfaceConfig::default(),
            avoidance: AvoidanceConfig::default(),
            pid_file: PathBuf::from("/tmp/autonomous_mower.pid"),
            snapshot_path: PathBuf::from(mower_bridge::snapshot::DEFAULT_SNAPSHOT_PATH),
            frame_dir: PathBuf::from(mower_bridge::frames::DEFAULT_FRAME_DIR),
            boundary_path: PathBuf::from("config/user_polygon.json"),
            model_path: PathBuf::from("config/pattern_model.json"),
            vault_path: PathBuf::from("config/secure_storage.enc"),
        }
    }
}

impl RuntimeConfig {
    /// Resolve the configuration from the process environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.use_simulation = env_bool("USE_SIMULATION").unwrap_or(false);

        if let Some(port) = env_string("IMU_SERIAL_PORT") {
            config.hal.imu_port = port;
        }
        if let Some(baud) = env_parse::<u32>("IMU_BAUD_RATE") {
            config.hal.imu_baud = baud;
        }
        if let Some(port) = env_string("MM1_SERIAL_PORT") {
            config.hal.mm1_port = port;
        }
        if let Some(baud) = env_parse::<u32>("MM1_BAUD_RATE") {
            config.hal.mm1_baud = baud;
        }

        if let Some(count) = env_parse::<u32>("TOF_READ_RETRY_COUNT") {
            config.sensors.max_retries = count;
        }
        if let Some(delay_s) = env_parse::<f64>("TOF_READ_RETRY_DELAY") {
            config.sensors.retry_base = Duration::from_secs_f64(delay_s.max(0.0));
        }
        if let Some(enabled) = env_bool("TOF_BUS_RECOVERY_ENABLED") {
            config.sensors.bus_recovery_enabled = enabled;
        }
        config
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name)?.trim().parse().ok()
}

fn env_bool(name: &str) -> Option<bool> {
    parse_bool(&env_string(name)?)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
