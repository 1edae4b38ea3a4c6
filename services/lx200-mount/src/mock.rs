//! Simulated mount
//!
//! In-process responder speaking the handset's serial protocol, used for
//! development runs without hardware (`--mock`) and by the integration
//! tests. Models the boot and homing display sequence, site readback,
//! and a countdown-driven slew: the `D` distance bars stay up for a fixed
//! number of polls, then the pose jumps to the target.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::astro::{Astrometry, Site};
use crate::error::{MountError, Result};
use crate::io::{MountPort, MountPortFactory};
use crate::limits::wrap_degrees;
use crate::protocol::{
    format_hms, format_signed_dms, format_unsigned_dms, parse_sexagesimal, ACK,
    DRIVE_STARTUP_TEXT, FINDING_HOME_TEXT, SYNC_ACK,
};

/// Shared record of every frame the simulated mount received
#[derive(Clone, Default)]
pub struct FrameLog {
    frames: Arc<Mutex<Vec<String>>>,
}

impl FrameLog {
    fn push(&self, frame: &str) {
        self.frames.lock().unwrap().push(frame.to_string());
    }

    pub fn frames(&self) -> Vec<String> {
        self.frames.lock().unwrap().clone()
    }

    pub fn count_matching(&self, prefix: &str) -> usize {
        self.frames
            .lock()
            .unwrap()
            .iter()
            .filter(|frame| frame.starts_with(prefix))
            .count()
    }

    pub fn clear(&self) {
        self.frames.lock().unwrap().clear();
    }
}

/// Factory producing simulated mounts with a shared frame log
pub struct SimulatedMountFactory {
    site: Site,
    astro: Arc<dyn Astrometry>,
    alignment: u8,
    ack_delay_polls: u32,
    boot_display_polls: u32,
    homing_display_polls: u32,
    slew_poll_count: u32,
    log: FrameLog,
}

impl SimulatedMountFactory {
    /// Simulate a mount deployed at `site` (this is the site it reports
    /// back during the handshake, which need not match the daemon's
    /// configuration)
    pub fn new(site: Site, astro: Arc<dyn Astrometry>) -> Self {
        Self {
            site,
            astro,
            alignment: b'P',
            ack_delay_polls: 0,
            boot_display_polls: 1,
            homing_display_polls: 1,
            slew_poll_count: 3,
            log: FrameLog::default(),
        }
    }

    /// Alignment byte returned to the handshake probe
    pub fn with_alignment(mut self, alignment: u8) -> Self {
        self.alignment = alignment;
        self
    }

    /// Number of alignment probes to ignore before answering
    pub fn with_ack_delay_polls(mut self, polls: u32) -> Self {
        self.ack_delay_polls = polls;
        self
    }

    /// Number of `D` polls a slew keeps its distance bars up
    pub fn with_slew_polls(mut self, polls: u32) -> Self {
        self.slew_poll_count = polls;
        self
    }

    pub fn log(&self) -> FrameLog {
        self.log.clone()
    }
}

#[async_trait]
impl MountPortFactory for SimulatedMountFactory {
    async fn open(
        &self,
        _port: &str,
        _baud_rate: u32,
        _timeout: Duration,
    ) -> Result<Box<dyn MountPort>> {
        Ok(Box::new(SimulatedMount {
            site: self.site,
            astro: Arc::clone(&self.astro),
            log: self.log.clone(),
            alignment: self.alignment,
            ack_polls: self.ack_delay_polls,
            boot_polls: self.boot_display_polls,
            homing_polls: self.homing_display_polls,
            slew_poll_count: self.slew_poll_count,
            rx: Vec::new(),
            pending: VecDeque::new(),
            time_set: false,
            tracking: false,
            slewing_polls: 0,
            current: None,
            slew_target: None,
            target_ra: None,
            target_dec: None,
            target_alt: None,
            target_az: None,
        }))
    }
}

/// One simulated serial connection
struct SimulatedMount {
    site: Site,
    astro: Arc<dyn Astrometry>,
    log: FrameLog,
    alignment: u8,
    ack_polls: u32,
    boot_polls: u32,
    homing_polls: u32,
    slew_poll_count: u32,
    /// Bytes received but not yet framed
    rx: Vec<u8>,
    /// Bytes queued for the daemon to read
    pending: VecDeque<u8>,
    time_set: bool,
    tracking: bool,
    slewing_polls: u32,
    /// Apparent (ra, dec); materialized lazily at hour angle zero
    current: Option<(f64, f64)>,
    slew_target: Option<(f64, f64)>,
    target_ra: Option<f64>,
    target_dec: Option<f64>,
    target_alt: Option<f64>,
    target_az: Option<f64>,
}

impl SimulatedMount {
    fn respond_byte(&mut self, byte: u8) {
        self.pending.push_back(byte);
    }

    fn respond_string(&mut self, text: &str) {
        self.pending.extend(text.as_bytes());
        self.pending.push_back(b'#');
    }

    fn lst(&self, now: DateTime<Utc>) -> f64 {
        self.astro.apparent_lst(&self.site, now)
    }

    fn current(&mut self, now: DateTime<Utc>) -> (f64, f64) {
        let lst = self.lst(now);
        *self.current.get_or_insert((lst, 0.0))
    }

    fn altaz(&mut self, now: DateTime<Utc>) -> (f64, f64) {
        let (ra, dec) = self.current(now);
        self.astro.equatorial_to_horizontal(ra, dec, &self.site, now)
    }

    fn handle_alignment_probe(&mut self) {
        self.log.push("<ACK>");
        if self.ack_polls > 0 {
            self.ack_polls -= 1;
        } else {
            self.respond_byte(self.alignment);
        }
    }

    fn handle_frame(&mut self, body: &str) {
        self.log.push(body);
        let now = Utc::now();

        match body {
            "I" => {
                self.pending.clear();
                self.time_set = false;
                self.tracking = false;
                self.slewing_polls = 0;
                self.slew_target = None;
            }
            "ED" => {
                let text = if self.boot_polls > 0 {
                    self.boot_polls -= 1;
                    DRIVE_STARTUP_TEXT
                } else if self.time_set && self.homing_polls > 0 {
                    self.homing_polls -= 1;
                    FINDING_HOME_TEXT
                } else {
                    "Select Item: Object"
                };
                self.respond_string(text);
            }
            "GS" => {
                let lst = self.lst(now);
                self.respond_string(&format_hms(lst));
            }
            "Gt" => self.respond_string(&format_signed_dms(self.site.latitude)),
            // The handset stores longitude west positive
            "Gg" => self.respond_string(&format_signed_dms(-self.site.longitude)),
            "GR" => {
                let (ra, _) = self.current(now);
                self.respond_string(&format_hms(ra));
            }
            "GD" => {
                let (_, dec) = self.current(now);
                self.respond_string(&format_signed_dms(dec));
            }
            "GA" => {
                let (alt, _) = self.altaz(now);
                self.respond_string(&format_signed_dms(alt));
            }
            "GZ" => {
                let (_, az) = self.altaz(now);
                self.respond_string(&format_unsigned_dms(az));
            }
            "GW" => {
                let status = if self.tracking { "PT1" } else { "PN1" };
                self.respond_string(status);
            }
            "D" => {
                if self.slewing_polls > 0 {
                    self.slewing_polls -= 1;
                    if self.slewing_polls == 0 {
                        if let Some(target) = self.slew_target.take() {
                            self.current = Some(target);
                        }
                    }
                    self.respond_string("\x7f");
                } else {
                    self.respond_string("");
                }
            }
            "MS" => match (self.target_ra, self.target_dec) {
                (Some(ra), Some(dec)) => {
                    self.slew_target = Some((ra, dec));
                    self.slewing_polls = self.slew_poll_count;
                    self.tracking = true;
                    self.respond_byte(b'0');
                }
                _ => self.respond_byte(b'1'),
            },
            "MA" => match (self.target_alt, self.target_az) {
                (Some(dec), Some(az_channel)) => {
                    // The altitude channel carries declination and the
                    // azimuth channel 180 degrees plus hour angle
                    let ha = wrap_degrees(az_channel - 180.0);
                    let ra = (self.lst(now) - ha).rem_euclid(360.0);
                    self.slew_target = Some((ra, dec));
                    self.slewing_polls = self.slew_poll_count;
                    self.tracking = false;
                    self.respond_byte(b'0');
                }
                _ => self.respond_byte(b'1'),
            },
            "CM" => {
                if let (Some(ra), Some(dec)) = (self.target_ra, self.target_dec) {
                    self.current = Some((ra, dec));
                }
                // Syncing re-engages the sidereal drive
                self.tracking = true;
                self.respond_string(SYNC_ACK);
            }
            "Q" => {
                self.slewing_polls = 0;
                self.slew_target = None;
            }
            "AL" => self.tracking = false,
            "hP" | "hS" | "RG" => {}
            _ if body.starts_with("hI") => {
                self.time_set = true;
                self.respond_byte(b'1');
            }
            _ if body.starts_with("Sr") => {
                self.target_ra = parse_sexagesimal(body[2..].as_bytes()).ok();
                self.respond_byte(b'1');
            }
            _ if body.starts_with("Sd") => {
                self.target_dec = parse_sexagesimal(body[2..].as_bytes()).ok();
                self.respond_byte(b'1');
            }
            _ if body.starts_with("Sa") => {
                self.target_alt = parse_sexagesimal(body[2..].as_bytes()).ok();
                self.respond_byte(b'1');
            }
            _ if body.starts_with("Sz") => {
                self.target_az = parse_sexagesimal(body[2..].as_bytes()).ok();
                self.respond_byte(b'1');
            }
            _ if body.starts_with("Mg") => {}
            // Unknown commands get no response; the daemon times out
            _ => {}
        }
    }
}

#[async_trait]
impl MountPort for SimulatedMount {
    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        self.rx.extend_from_slice(data);
        loop {
            match self.rx.first() {
                None => break,
                Some(&ACK) => {
                    self.rx.remove(0);
                    self.handle_alignment_probe();
                }
                Some(_) => {
                    let Some(end) = self.rx.iter().position(|&b| b == b'#') else {
                        break;
                    };
                    let frame: Vec<u8> = self.rx.drain(..=end).collect();
                    let body_bytes = match frame.first() {
                        Some(b':') => &frame[1..frame.len() - 1],
                        _ => &frame[..frame.len() - 1],
                    };
                    let body = String::from_utf8_lossy(body_bytes).into_owned();
                    self.handle_frame(&body);
                }
            }
        }
        Ok(())
    }

    async fn read_byte(&mut self) -> Result<u8> {
        self.pending
            .pop_front()
            .ok_or_else(|| MountError::Timeout("simulated mount has nothing to say".to_string()))
    }

    async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(self.read_byte().await?);
        }
        Ok(out)
    }

    async fn flush_input(&mut self) -> Result<()> {
        self.pending.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::MeeusAstrometry;

    fn test_site() -> Site {
        Site {
            latitude: 28.7624,
            longitude: -17.8792,
            elevation: 2396.0,
        }
    }

    async fn open_mount(factory: &SimulatedMountFactory) -> Box<dyn MountPort> {
        factory.open("/dev/mock", 9600, Duration::from_secs(1)).await.unwrap()
    }

    #[tokio::test]
    async fn frames_split_across_writes() {
        let factory = SimulatedMountFactory::new(test_site(), Arc::new(MeeusAstrometry::new()));
        let mut mount = open_mount(&factory).await;

        mount.write_all(b":G").await.unwrap();
        mount.write_all(b"W#").await.unwrap();

        let response = mount.read_exact(4).await.unwrap();
        assert_eq!(&response, b"PN1#");
        assert_eq!(factory.log().frames(), vec!["GW".to_string()]);
    }

    #[tokio::test]
    async fn boot_display_sequence() {
        let factory = SimulatedMountFactory::new(test_site(), Arc::new(MeeusAstrometry::new()));
        let mut mount = open_mount(&factory).await;

        mount.write_all(b":ED#").await.unwrap();
        let mut text = Vec::new();
        loop {
            let byte = mount.read_byte().await.unwrap();
            if byte == b'#' {
                break;
            }
            text.push(byte);
        }
        assert_eq!(String::from_utf8_lossy(&text), DRIVE_STARTUP_TEXT);

        // The boot message clears on the next poll
        mount.write_all(b":ED#").await.unwrap();
        let mut text = Vec::new();
        loop {
            let byte = mount.read_byte().await.unwrap();
            if byte == b'#' {
                break;
            }
            text.push(byte);
        }
        assert!(!String::from_utf8_lossy(&text).contains(DRIVE_STARTUP_TEXT));
    }

    #[tokio::test]
    async fn slew_countdown_reaches_target() {
        let factory = SimulatedMountFactory::new(test_site(), Arc::new(MeeusAstrometry::new()))
            .with_slew_polls(2);
        let mut mount = open_mount(&factory).await;

        mount.write_all(b":Sr10:00:00#").await.unwrap();
        assert_eq!(mount.read_byte().await.unwrap(), b'1');
        mount.write_all(b":Sd+05*00:00#").await.unwrap();
        assert_eq!(mount.read_byte().await.unwrap(), b'1');
        mount.write_all(b":MS#").await.unwrap();
        assert_eq!(mount.read_byte().await.unwrap(), b'0');

        // Two polls of distance bars, then empty
        for _ in 0..2 {
            mount.write_all(b":D#").await.unwrap();
            assert_eq!(mount.read_exact(2).await.unwrap(), vec![0x7f, b'#']);
        }
        mount.write_all(b":D#").await.unwrap();
        assert_eq!(mount.read_byte().await.unwrap(), b'#');

        mount.write_all(b":GR#").await.unwrap();
        let mut ra = Vec::new();
        loop {
            let byte = mount.read_byte().await.unwrap();
            if byte == b'#' {
                break;
            }
            ra.push(byte);
        }
        assert_eq!(parse_sexagesimal(&ra).unwrap(), 150.0);
    }
}
