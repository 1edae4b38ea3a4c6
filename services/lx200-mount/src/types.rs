//! Status codes, telescope state, and command types shared across the daemon

use chrono::{DateTime, Utc};

/// Numeric result codes returned to remote callers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandStatus {
    Succeeded,
    Failed,
    Blocked,
    InvalidControlIP,
    NotConnected,
    InvalidMountConfiguration,
    NotDisconnected,
    UnknownParkPosition,
    OutsideHALimits,
    OutsideDecLimits,
}

impl CommandStatus {
    /// Wire code for this status
    pub fn code(self) -> u8 {
        match self {
            CommandStatus::Succeeded => 0,
            CommandStatus::Failed => 1,
            CommandStatus::Blocked => 2,
            CommandStatus::InvalidControlIP => 5,
            CommandStatus::NotConnected => 10,
            CommandStatus::InvalidMountConfiguration => 11,
            CommandStatus::NotDisconnected => 14,
            CommandStatus::UnknownParkPosition => 15,
            CommandStatus::OutsideHALimits => 20,
            CommandStatus::OutsideDecLimits => 21,
        }
    }

    /// Human readable description, `None` for success
    pub fn message(self) -> Option<&'static str> {
        match self {
            CommandStatus::Succeeded => None,
            CommandStatus::Failed => Some("error: command failed"),
            CommandStatus::Blocked => Some("error: another command is already running"),
            CommandStatus::InvalidControlIP => Some("error: command not accepted from this IP"),
            CommandStatus::NotConnected => Some("error: mount has not been initialized"),
            CommandStatus::InvalidMountConfiguration => {
                Some("error: mount handset is not correctly configured")
            }
            CommandStatus::NotDisconnected => Some("error: mount has already been initialized"),
            CommandStatus::UnknownParkPosition => Some("error: unknown park position"),
            CommandStatus::OutsideHALimits => {
                Some("error: requested coordinates outside HA limits")
            }
            CommandStatus::OutsideDecLimits => {
                Some("error: requested coordinates outside Dec limits")
            }
        }
    }
}

/// Current state of the mount
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountState {
    /// No open serial link
    Disabled,
    /// Initialization handshake in progress
    Initializing,
    /// Connected, sidereal drive disengaged
    Stopped,
    /// Motion command in flight
    Slewing,
    /// Connected, sidereal drive engaged
    Tracking,
}

impl MountState {
    pub fn code(self) -> u8 {
        match self {
            MountState::Disabled => 0,
            MountState::Initializing => 1,
            MountState::Stopped => 2,
            MountState::Slewing => 3,
            MountState::Tracking => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            MountState::Disabled => "DISABLED",
            MountState::Initializing => "INITIALIZING",
            MountState::Stopped => "STOPPED",
            MountState::Slewing => "SLEWING",
            MountState::Tracking => "TRACKING",
        }
    }

    /// True when an open serial link backs this state
    pub fn is_connected(self) -> bool {
        !matches!(self, MountState::Disabled | MountState::Initializing)
    }
}

/// An equatorial target in the epoch-2000 frame, degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EquatorialTarget {
    pub ra: f64,
    pub dec: f64,
}

/// A horizon-frame target, degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HorizontalTarget {
    pub alt: f64,
    pub az: f64,
}

/// Commands consumed by the worker loop
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Initialize,
    Shutdown,
    Stop,
    Slew(EquatorialTarget),
    Track(EquatorialTarget),
    Park(HorizontalTarget),
    Sync(EquatorialTarget),
    Zero,
    OffsetRaDec { delta_ra: f64, delta_dec: f64 },
}

/// Last polled telescope status, replaced wholesale on every refresh.
///
/// All angles are degrees; `ra`/`dec` are reported in the epoch-2000 frame.
#[derive(Debug, Clone)]
pub struct StateSnapshot {
    pub time: DateTime<Utc>,
    pub state: MountState,
    pub lst: f64,
    pub ra: f64,
    pub dec: f64,
    pub ha: f64,
    pub alt: f64,
    pub az: f64,
    pub site_latitude: f64,
    pub site_longitude: f64,
    pub site_elevation: f64,
    pub moon_separation: f64,
    pub sun_separation: f64,
}
