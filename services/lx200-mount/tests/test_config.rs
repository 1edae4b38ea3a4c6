//! Tests for configuration loading and validation

use std::io::Write;
use std::net::{IpAddr, Ipv4Addr};

use lx200_mount::config::load_config;
use lx200_mount::Config;

fn write_config(json: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(json.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn full_config_parses() {
    let file = write_config(
        r#"{
        "serial": {"port": "/dev/ttyS0", "baud_rate": 9600, "timeout_seconds": 3},
        "server": {"port": 9021},
        "site": {"latitude": 28.7624, "longitude": -17.8792, "elevation": 2396},
        "pointing": {
            "ha_soft_limits": [-75, 75],
            "dec_soft_limits": [-40, 85],
            "initialize_timeout_seconds": 150,
            "slew_timeout_seconds": 120,
            "slew_poll_interval_ms": 250,
            "idle_poll_interval_ms": 2500
        },
        "park_positions": {
            "zenith": {"desc": "Pointing straight up", "alt": 89, "az": 0}
        },
        "control_addrs": ["10.2.6.2", "127.0.0.1"],
        "dome": {"url": "http://10.2.6.3:9004/notify"}
    }"#,
    );

    let config = load_config(&file.path().to_path_buf()).unwrap();
    assert_eq!(config.serial.port, "/dev/ttyS0");
    assert_eq!(config.serial.timeout_seconds, 3);
    assert_eq!(config.server.port, 9021);
    assert_eq!(config.site.latitude, 28.7624);
    assert_eq!(config.pointing.ha_soft_limits, [-75.0, 75.0]);
    assert_eq!(config.pointing.slew_poll_interval_ms, 250);
    assert_eq!(config.park_positions["zenith"].alt, 89.0);
    assert_eq!(config.park_positions["zenith"].desc, "Pointing straight up");
    assert!(config.control_allowed(IpAddr::V4(Ipv4Addr::new(10, 2, 6, 2))));
    assert!(!config.control_allowed(IpAddr::V4(Ipv4Addr::new(10, 2, 6, 9))));
    assert_eq!(config.dome.unwrap().url, "http://10.2.6.3:9004/notify");
}

#[test]
fn defaults_fill_optional_fields() {
    let file = write_config(
        r#"{
        "serial": {"port": "/dev/ttyUSB1"},
        "server": {"port": 9021},
        "site": {"latitude": 50.0, "longitude": 5.0, "elevation": 100},
        "pointing": {"ha_soft_limits": [-80, 80], "dec_soft_limits": [-30, 80]}
    }"#,
    );

    let config = load_config(&file.path().to_path_buf()).unwrap();
    assert_eq!(config.serial.baud_rate, 9600);
    assert_eq!(config.serial.timeout_seconds, 5);
    assert_eq!(config.pointing.slew_poll_interval_ms, 500);
    assert_eq!(config.pointing.idle_poll_interval_ms, 5000);
    assert!(config.control_allowed(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    assert!(config.dome.is_none());
    assert!(config.park_positions.is_empty());
}

#[test]
fn default_config_is_valid() {
    Config::default().validate().unwrap();
}

#[test]
fn latitude_out_of_range_is_rejected() {
    let mut config = Config::default();
    config.site.latitude = 95.0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("latitude"), "{err}");
}

#[test]
fn inverted_ha_limits_are_rejected() {
    let mut config = Config::default();
    config.pointing.ha_soft_limits = [60.0, -60.0];
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("ha_soft_limits"), "{err}");
}

#[test]
fn park_altitude_out_of_range_is_rejected() {
    let mut config = Config::default();
    config
        .park_positions
        .get_mut("stow")
        .unwrap()
        .alt = 120.0;
    let err = config.validate().unwrap_err();
    assert!(err.to_string().contains("stow"), "{err}");
}

#[test]
fn invalid_json_fails_to_load() {
    let file = write_config("{not json");
    assert!(load_config(&file.path().to_path_buf()).is_err());
}

#[test]
fn validation_runs_during_load() {
    let file = write_config(
        r#"{
        "serial": {"port": "/dev/ttyUSB0"},
        "server": {"port": 9021},
        "site": {"latitude": 50.0, "longitude": 5.0, "elevation": -10},
        "pointing": {"ha_soft_limits": [-80, 80], "dec_soft_limits": [-30, 80]}
    }"#,
    );
    let err = load_config(&file.path().to_path_buf()).unwrap_err();
    assert!(err.to_string().contains("elevation"), "{err}");
}
