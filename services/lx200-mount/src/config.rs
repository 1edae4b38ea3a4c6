//! Configuration types for the mount daemon

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::astro::Site;
use crate::error::MountError;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub serial: SerialConfig,
    pub server: ServerConfig,
    pub site: Site,
    pub pointing: PointingConfig,
    /// Named storage positions, keyed by the name callers pass to `park`
    #[serde(default)]
    pub park_positions: HashMap<String, ParkPosition>,
    /// Remote addresses allowed to issue control commands
    #[serde(default = "default_control_addrs")]
    pub control_addrs: Vec<IpAddr>,
    /// Optional dome collaborator endpoint
    #[serde(default)]
    pub dome: Option<DomeConfig>,
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Per-byte read timeout
    #[serde(default = "default_serial_timeout")]
    pub timeout_seconds: u64,
}

/// Server configuration for the remote command surface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

/// Pointing limits and timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointingConfig {
    /// Soft hour-angle limits, degrees, [negative, positive]
    pub ha_soft_limits: [f64; 2],
    /// Soft declination limits, degrees, [low, high]
    pub dec_soft_limits: [f64; 2],
    #[serde(default = "default_initialize_timeout")]
    pub initialize_timeout_seconds: u64,
    #[serde(default = "default_slew_timeout")]
    pub slew_timeout_seconds: u64,
    /// Worker poll interval while a slew is in flight
    #[serde(default = "default_slew_poll_interval")]
    pub slew_poll_interval_ms: u64,
    /// Worker poll interval while idle or tracking
    #[serde(default = "default_idle_poll_interval")]
    pub idle_poll_interval_ms: u64,
}

/// A named park position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParkPosition {
    pub desc: String,
    pub alt: f64,
    pub az: f64,
}

/// Dome collaborator endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomeConfig {
    pub url: String,
}

fn default_baud_rate() -> u32 {
    9600
}

fn default_serial_timeout() -> u64 {
    5
}

fn default_initialize_timeout() -> u64 {
    180
}

fn default_slew_timeout() -> u64 {
    180
}

fn default_slew_poll_interval() -> u64 {
    500
}

fn default_idle_poll_interval() -> u64 {
    5000
}

fn default_control_addrs() -> Vec<IpAddr> {
    vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            serial: SerialConfig::default(),
            server: ServerConfig::default(),
            site: Site {
                latitude: 28.7624,
                longitude: -17.8792,
                elevation: 2396.0,
            },
            pointing: PointingConfig::default(),
            park_positions: HashMap::from([(
                "stow".to_string(),
                ParkPosition {
                    desc: "Mount parked pointing at the zenith".to_string(),
                    alt: 88.0,
                    az: 0.0,
                },
            )]),
            control_addrs: default_control_addrs(),
            dome: None,
        }
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: default_baud_rate(),
            timeout_seconds: default_serial_timeout(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 11116 }
    }
}

impl Default for PointingConfig {
    fn default() -> Self {
        Self {
            ha_soft_limits: [-85.0, 85.0],
            dec_soft_limits: [-45.0, 85.0],
            initialize_timeout_seconds: default_initialize_timeout(),
            slew_timeout_seconds: default_slew_timeout(),
            slew_poll_interval_ms: default_slew_poll_interval(),
            idle_poll_interval_ms: default_idle_poll_interval(),
        }
    }
}

impl Config {
    pub fn serial_timeout(&self) -> Duration {
        Duration::from_secs(self.serial.timeout_seconds)
    }

    pub fn initialize_timeout(&self) -> Duration {
        Duration::from_secs(self.pointing.initialize_timeout_seconds)
    }

    pub fn slew_timeout(&self) -> Duration {
        Duration::from_secs(self.pointing.slew_timeout_seconds)
    }

    pub fn slew_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pointing.slew_poll_interval_ms)
    }

    pub fn idle_poll_interval(&self) -> Duration {
        Duration::from_millis(self.pointing.idle_poll_interval_ms)
    }

    /// True when the given remote address may issue control commands
    pub fn control_allowed(&self, addr: IpAddr) -> bool {
        self.control_addrs.contains(&addr)
    }

    /// Validate value ranges that serde cannot express
    pub fn validate(&self) -> Result<(), MountError> {
        let invalid = |message: String| Err(MountError::InvalidConfig(message));

        if !(-90.0..=90.0).contains(&self.site.latitude) {
            return invalid(format!("latitude {} outside [-90, 90]", self.site.latitude));
        }
        if !(-180.0..=180.0).contains(&self.site.longitude) {
            return invalid(format!(
                "longitude {} outside [-180, 180]",
                self.site.longitude
            ));
        }
        if self.site.elevation < 0.0 {
            return invalid(format!("elevation {} is negative", self.site.elevation));
        }

        let [ha_low, ha_high] = self.pointing.ha_soft_limits;
        if ha_low >= ha_high || ha_low < -180.0 || ha_high > 180.0 {
            return invalid(format!(
                "ha_soft_limits [{ha_low}, {ha_high}] must be an increasing pair within [-180, 180]"
            ));
        }
        let [dec_low, dec_high] = self.pointing.dec_soft_limits;
        if dec_low >= dec_high || dec_low < -90.0 || dec_high > 90.0 {
            return invalid(format!(
                "dec_soft_limits [{dec_low}, {dec_high}] must be an increasing pair within [-90, 90]"
            ));
        }

        for (name, position) in &self.park_positions {
            if !(0.0..=90.0).contains(&position.alt) {
                return invalid(format!(
                    "park position '{name}' altitude {} outside [0, 90]",
                    position.alt
                ));
            }
            if !(0.0..=360.0).contains(&position.az) {
                return invalid(format!(
                    "park position '{name}' azimuth {} outside [0, 360]",
                    position.az
                ));
            }
        }

        Ok(())
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    config.validate()?;
    Ok(config)
}
