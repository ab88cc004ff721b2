//! Telemetry configuration.
//!
//! Loaded once at startup from a JSON file; every field has a default so a
//! missing file or a partial file still brings the system up.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::packet::CallSign;
use crate::sensors::SensorKind;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// HAM radio call sign placed in every packet header, at most 9 ASCII
    /// characters. Longer values are rejected when the file is loaded.
    pub call_sign: CallSign,
    /// Directory on the power-safe filesystem for in-flight logs.
    pub flight_fs: PathBuf,
    /// Directory on the removable filesystem for landed extraction logs.
    pub landed_fs: PathBuf,
    /// Path of the non-volatile flight state blob.
    pub nv_state_path: PathBuf,
    /// Path of the append-only syslog file.
    pub syslog_path: PathBuf,
    /// Path of the radio character device.
    pub radio_dev: PathBuf,
    /// Path of the eject LED GPIO, if the board has one.
    pub eject_led: Option<PathBuf>,
    /// Pressure at the reference altitude in millibar, used to convert
    /// barometric pressure into fused altitude.
    pub reference_pressure_mbar: f32,
    /// The sensors present on this board.
    pub enabled_sensors: Vec<SensorKind>,
}

fn default_call_sign() -> CallSign {
    let mut call_sign = CallSign::new();
    let _ = call_sign.try_push_str("N0CALL");
    call_sign
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            call_sign: default_call_sign(),
            flight_fs: "./flight".into(),
            landed_fs: "./landed".into(),
            nv_state_path: "./flight-state".into(),
            syslog_path: "./telemetry.log".into(),
            radio_dev: "./radio.bin".into(),
            eject_led: None,
            reference_pressure_mbar: 1013.25,
            enabled_sensors: vec![
                SensorKind::Accel,
                SensorKind::Gyro,
                SensorKind::Baro,
                SensorKind::Mag,
                SensorKind::Gnss,
            ],
        }
    }
}

impl TelemetryConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}
