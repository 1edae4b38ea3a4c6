//! LX200 serial protocol codec
//!
//! Every request is framed as `:` + body + `#` and answered in one of four
//! shapes: nothing, a fixed number of bytes, a single boolean byte, or a
//! `#`-terminated string. A NAK byte (0x15) from the mount means "busy";
//! the codec transparently waits and resends the identical frame, so
//! higher layers never see the retry mechanics.
//!
//! Angle responses are sexagesimal strings. Hour quantities use `:`
//! separators and are converted to degrees; degree quantities use the
//! handset's degree-mark byte (0xDF) or `*`.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tracing::debug;

use crate::error::{MountError, Result};
use crate::io::MountPort;

/// Busy byte sent by the mount while it cannot accept a command
pub const NAK: u8 = 0x15;
/// Alignment query control byte (not framed)
pub const ACK: u8 = 0x06;
/// Terminator for string responses
const TERMINATOR: u8 = b'#';
/// Response byte for an accepted `MS`/`MA` motion command
pub const MOTION_ACCEPTED: u8 = b'0';
/// Fixed acknowledgement string returned by `CM`
pub const SYNC_ACK: &str = " M31 EX GAL MAG 3.5 SZ178.0'";
/// Handbox display text while the drive firmware boots
pub const DRIVE_STARTUP_TEXT: &str = "Getting Started";
/// Handbox display text while the mount seeks its home sensors
pub const FINDING_HOME_TEXT: &str = "Finding Home";

/// Delay before resending a frame after a busy byte
const BUSY_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Guide pulse directions for the `Mg` commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuideDirection {
    North,
    South,
    East,
    West,
}

impl GuideDirection {
    fn as_char(self) -> char {
        match self {
            GuideDirection::North => 'n',
            GuideDirection::South => 's',
            GuideDirection::East => 'e',
            GuideDirection::West => 'w',
        }
    }
}

/// Codec owning the byte port to the mount.
///
/// The worker loop holds the only instance for the lifetime of the link.
pub struct MountCodec {
    port: Box<dyn MountPort>,
}

impl MountCodec {
    pub fn new(port: Box<dyn MountPort>) -> Self {
        Self { port }
    }

    /// Write `:` + body + `#`, discarding any stale input first
    async fn write_frame(&mut self, body: &str) -> Result<()> {
        self.port.flush_input().await?;
        let frame = format!(":{body}#");
        debug!("Mount write: {}", frame);
        self.port.write_all(frame.as_bytes()).await
    }

    /// Send a command that produces no response
    pub async fn send(&mut self, body: &str) -> Result<()> {
        self.write_frame(body).await
    }

    /// Send a command and read exactly `count` response bytes
    pub async fn send_fixed(&mut self, body: &str, count: usize) -> Result<Vec<u8>> {
        self.write_frame(body).await?;
        self.port.read_exact(count).await
    }

    /// Send a command answered by a single boolean byte.
    ///
    /// A busy byte triggers a wait-and-resend of the identical frame; any
    /// other byte ends the exchange. The result is true iff the byte is `'1'`.
    pub async fn send_boolean(&mut self, body: &str) -> Result<bool> {
        self.write_frame(body).await?;
        loop {
            let byte = self.port.read_byte().await?;
            if byte == NAK {
                debug!("Mount busy, retrying '{}'", body);
                sleep(BUSY_RETRY_DELAY).await;
                self.write_frame(body).await?;
                continue;
            }
            return Ok(byte == b'1');
        }
    }

    /// Send a command answered by a `#`-terminated string.
    ///
    /// A busy byte is a retry only while nothing has been received yet; a
    /// NAK arriving mid-string is ordinary payload.
    pub async fn send_string(&mut self, body: &str) -> Result<Vec<u8>> {
        self.write_frame(body).await?;
        let mut buffer = Vec::new();
        loop {
            let byte = self.port.read_byte().await?;
            if byte == NAK && buffer.is_empty() {
                debug!("Mount busy, retrying '{}'", body);
                sleep(BUSY_RETRY_DELAY).await;
                self.write_frame(body).await?;
                continue;
            }
            if byte == TERMINATOR {
                return Ok(buffer);
            }
            buffer.push(byte);
        }
    }

    /// Probe the alignment state with the bare control byte.
    ///
    /// Returns `None` if the mount has not answered within the read timeout
    /// (it is still rebooting), otherwise the single response byte.
    pub async fn probe_alignment(&mut self) -> Result<Option<u8>> {
        self.port.flush_input().await?;
        self.port.write_all(&[ACK]).await?;
        match self.port.read_byte().await {
            Ok(byte) => Ok(Some(byte)),
            Err(MountError::Timeout(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    // Reads

    pub async fn read_ra(&mut self) -> Result<f64> {
        let raw = self.send_string("GR").await?;
        parse_sexagesimal(&raw)
    }

    pub async fn read_dec(&mut self) -> Result<f64> {
        let raw = self.send_string("GD").await?;
        parse_sexagesimal(&raw)
    }

    pub async fn read_altitude(&mut self) -> Result<f64> {
        let raw = self.send_string("GA").await?;
        parse_sexagesimal(&raw)
    }

    pub async fn read_azimuth(&mut self) -> Result<f64> {
        let raw = self.send_string("GZ").await?;
        parse_sexagesimal(&raw)
    }

    /// Local sidereal time as reported by the mount, degrees
    pub async fn read_sidereal(&mut self) -> Result<f64> {
        let raw = self.send_string("GS").await?;
        parse_sexagesimal(&raw)
    }

    /// Site latitude as stored in the handset, degrees
    pub async fn read_latitude(&mut self) -> Result<f64> {
        let raw = self.send_string("Gt").await?;
        parse_sexagesimal(&raw)
    }

    /// Site longitude as stored in the handset, degrees west positive
    pub async fn read_longitude(&mut self) -> Result<f64> {
        let raw = self.send_string("Gg").await?;
        parse_sexagesimal(&raw)
    }

    /// True while the mount reports an active slew (`D` distance bars)
    pub async fn is_slewing(&mut self) -> Result<bool> {
        let raw = self.send_string("D").await?;
        Ok(!raw.is_empty())
    }

    /// True while the sidereal drive is engaged (`GW` status string)
    pub async fn is_tracking(&mut self) -> Result<bool> {
        let raw = self.send_string("GW").await?;
        if raw.len() < 2 {
            return Err(MountError::InvalidResponse(format!(
                "status string too short: {:?}",
                raw
            )));
        }
        Ok(raw[1] == b'T')
    }

    /// Current handbox display contents
    pub async fn read_display(&mut self) -> Result<String> {
        let raw = self.send_string("ED").await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    // Setters (boolean acknowledgement)

    pub async fn set_target_ra(&mut self, ra: f64) -> Result<bool> {
        self.send_boolean(&format!("Sr{}", format_hms(ra))).await
    }

    pub async fn set_target_dec(&mut self, dec: f64) -> Result<bool> {
        self.send_boolean(&format!("Sd{}", format_signed_dms(dec)))
            .await
    }

    pub async fn set_target_altitude(&mut self, alt: f64) -> Result<bool> {
        self.send_boolean(&format!("Sa{}", format_signed_dms(alt)))
            .await
    }

    pub async fn set_target_azimuth(&mut self, az: f64) -> Result<bool> {
        self.send_boolean(&format!("Sz{}", format_unsigned_dms(az)))
            .await
    }

    /// Push the current UTC date and time in one handset command
    pub async fn set_utc(&mut self, time: DateTime<Utc>) -> Result<bool> {
        self.send_boolean(&format!("hI{}", time.format("%y%m%d%H%M%S")))
            .await
    }

    // Motion

    /// Start a slew to the equatorial target; returns the status byte
    pub async fn start_slew_equatorial(&mut self) -> Result<u8> {
        let raw = self.send_fixed("MS", 1).await?;
        Ok(raw[0])
    }

    /// Start a slew to the horizon-frame target; returns the status byte
    pub async fn start_slew_horizontal(&mut self) -> Result<u8> {
        let raw = self.send_fixed("MA", 1).await?;
        Ok(raw[0])
    }

    /// Sync the mount to the current target; returns the acknowledgement
    pub async fn sync_to_target(&mut self) -> Result<String> {
        let raw = self.send_string("CM").await?;
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    pub async fn abort_slew(&mut self) -> Result<()> {
        self.send("Q").await
    }

    pub async fn disable_tracking(&mut self) -> Result<()> {
        self.send("AL").await
    }

    /// Reboot the handset to a clean state
    pub async fn reboot(&mut self) -> Result<()> {
        self.send("I").await
    }

    /// Slew to the mount's stored park position
    pub async fn park(&mut self) -> Result<()> {
        self.send("hP").await
    }

    /// Store the current pose as the mount's park reference
    pub async fn store_park_position(&mut self) -> Result<()> {
        self.send("hS").await
    }

    /// Select the guide rate for subsequent pulse commands
    pub async fn select_guide_rate(&mut self) -> Result<()> {
        self.send("RG").await
    }

    /// Issue a guide pulse of the given duration
    pub async fn pulse_guide(&mut self, direction: GuideDirection, milliseconds: u64) -> Result<()> {
        self.send(&format!("Mg{}{:04}", direction.as_char(), milliseconds))
            .await
    }
}

/// Parse a sexagesimal angle response into decimal degrees.
///
/// Accepted shape is `[+-]D<sep>MM[<sep2>SS]`. A `:` separator marks an
/// hour quantity (multiplied by 15); any other non-digit byte (the degree
/// mark 0xDF, `*`) marks degrees. The leading sign applies to the whole
/// value. Works on raw bytes because the degree mark is not valid UTF-8.
pub fn parse_sexagesimal(raw: &[u8]) -> Result<f64> {
    let malformed = || MountError::ParseError(format!("malformed sexagesimal: {:?}", raw));

    let mut rest = raw;
    let negative = match rest.first() {
        Some(b'-') => {
            rest = &rest[1..];
            true
        }
        Some(b'+') => {
            rest = &rest[1..];
            false
        }
        _ => false,
    };

    let (whole, mut rest) = take_digits(rest).ok_or_else(malformed)?;
    let separator = *rest.first().ok_or_else(malformed)?;
    if separator.is_ascii_digit() {
        return Err(malformed());
    }
    rest = &rest[1..];

    let (minutes, mut rest) = take_digits(rest).ok_or_else(malformed)?;

    let seconds = if rest.is_empty() {
        0
    } else {
        let second_separator = rest[0];
        if second_separator.is_ascii_digit() {
            return Err(malformed());
        }
        let (seconds, tail) = take_digits(&rest[1..]).ok_or_else(malformed)?;
        rest = tail;
        seconds
    };

    if !rest.is_empty() || minutes >= 60 || seconds >= 60 {
        return Err(malformed());
    }

    let multiplier = if separator == b':' { 15.0 } else { 1.0 };
    let value = (whole as f64 + minutes as f64 / 60.0 + seconds as f64 / 3600.0) * multiplier;
    Ok(if negative { -value } else { value })
}

fn take_digits(bytes: &[u8]) -> Option<(u32, &[u8])> {
    let end = bytes.iter().position(|b| !b.is_ascii_digit()).unwrap_or(bytes.len());
    if end == 0 {
        return None;
    }
    let mut value: u32 = 0;
    for &b in &bytes[..end] {
        value = value.checked_mul(10)?.checked_add((b - b'0') as u32)?;
    }
    Some((value, &bytes[end..]))
}

/// Format degrees as `HH:MM:SS` of hours, wrapped into [0, 24h)
pub fn format_hms(degrees: f64) -> String {
    let total = ((degrees.rem_euclid(360.0) / 15.0) * 3600.0).round() as u64 % 86_400;
    format!(
        "{:02}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Format degrees as a signed `sDD*MM:SS`
pub fn format_signed_dms(degrees: f64) -> String {
    let sign = if degrees < 0.0 { '-' } else { '+' };
    let total = (degrees.abs() * 3600.0).round() as u64;
    format!(
        "{}{:02}*{:02}:{:02}",
        sign,
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Format degrees as an unsigned `DDD*MM:SS`, wrapped into [0, 360)
pub fn format_unsigned_dms(degrees: f64) -> String {
    let total = (degrees.rem_euclid(360.0) * 3600.0).round() as u64 % 1_296_000;
    format!(
        "{:03}*{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared view of what a scripted port received
    #[derive(Clone, Default)]
    struct PortLog {
        writes: Arc<Mutex<Vec<Vec<u8>>>>,
        flushes: Arc<AtomicUsize>,
    }

    impl PortLog {
        fn writes(&self) -> Vec<Vec<u8>> {
            self.writes.lock().unwrap().clone()
        }
    }

    /// Scripted port feeding a fixed byte stream and recording writes
    struct ScriptedPort {
        responses: std::collections::VecDeque<u8>,
        log: PortLog,
    }

    impl ScriptedPort {
        fn new(responses: &[u8]) -> (Self, PortLog) {
            let log = PortLog::default();
            (
                Self {
                    responses: responses.iter().copied().collect(),
                    log: log.clone(),
                },
                log,
            )
        }
    }

    #[async_trait]
    impl MountPort for ScriptedPort {
        async fn write_all(&mut self, data: &[u8]) -> Result<()> {
            self.log.writes.lock().unwrap().push(data.to_vec());
            Ok(())
        }

        async fn read_byte(&mut self) -> Result<u8> {
            self.responses
                .pop_front()
                .ok_or_else(|| MountError::Timeout("no more scripted bytes".to_string()))
        }

        async fn read_exact(&mut self, count: usize) -> Result<Vec<u8>> {
            let mut out = Vec::with_capacity(count);
            for _ in 0..count {
                out.push(self.read_byte().await?);
            }
            Ok(out)
        }

        async fn flush_input(&mut self) -> Result<()> {
            self.log.flushes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn codec_with(responses: &[u8]) -> MountCodec {
        let (port, _) = ScriptedPort::new(responses);
        MountCodec::new(Box::new(port))
    }

    #[tokio::test(start_paused = true)]
    async fn boolean_busy_retry_resends_identical_frame() {
        let (port, log) = ScriptedPort::new(&[NAK, NAK, b'1']);
        let mut codec = MountCodec::new(Box::new(port));

        assert!(codec.send_boolean("Sd+10*30:00").await.unwrap());

        let writes = log.writes();
        assert_eq!(writes.len(), 3);
        for write in &writes {
            assert_eq!(write.as_slice(), b":Sd+10*30:00#");
        }
        assert_eq!(log.flushes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn boolean_false_byte() {
        let mut codec = codec_with(&[b'0']);
        assert!(!codec.send_boolean("Sd+10*30:00").await.unwrap());
    }

    #[tokio::test]
    async fn string_reads_until_terminator() {
        let mut codec = codec_with(b"12:34:56#");
        let raw = codec.send_string("GS").await.unwrap();
        assert_eq!(raw, b"12:34:56");
    }

    #[tokio::test(start_paused = true)]
    async fn string_busy_retry_only_while_empty() {
        let mut codec = codec_with(&[NAK, b'A', NAK, b'B', b'#']);
        let raw = codec.send_string("ED").await.unwrap();
        // first NAK retries, second NAK is payload
        assert_eq!(raw, vec![b'A', NAK, b'B']);
    }

    #[tokio::test]
    async fn short_read_is_an_error() {
        let mut codec = codec_with(b"12:34");
        let err = codec.send_string("GS").await.unwrap_err();
        assert!(matches!(err, MountError::Timeout(_)));
    }

    #[tokio::test]
    async fn probe_alignment_maps_timeout_to_none() {
        let mut codec = codec_with(&[]);
        assert_eq!(codec.probe_alignment().await.unwrap(), None);
        let mut codec = codec_with(&[b'P']);
        assert_eq!(codec.probe_alignment().await.unwrap(), Some(b'P'));
    }

    #[test]
    fn parse_degree_type_with_sign() {
        assert_eq!(parse_sexagesimal(b"+10\xdf30:00").unwrap(), 10.5);
        assert_eq!(parse_sexagesimal(b"-05*30:00").unwrap(), -5.5);
        assert_eq!(parse_sexagesimal(b"-00*30:00").unwrap(), -0.5);
    }

    #[test]
    fn parse_hour_type_multiplies_by_fifteen() {
        assert_eq!(parse_sexagesimal(b"10:30:00").unwrap(), 157.5);
        let value = parse_sexagesimal(b"12:30:45").unwrap();
        assert!((value - (12.0 + 30.0 / 60.0 + 45.0 / 3600.0) * 15.0).abs() < 1e-12);
    }

    #[test]
    fn parse_without_seconds() {
        assert!((parse_sexagesimal(b"+28\xdf18").unwrap() - 28.3).abs() < 1e-12);
        assert!((parse_sexagesimal(b"-17*53").unwrap() + 17.0 + 53.0 / 60.0).abs() < 1e-12);
    }

    #[test]
    fn parse_high_precision_separators() {
        let value = parse_sexagesimal(b"+45\xdf30'30").unwrap();
        assert!((value - (45.0 + 30.0 / 60.0 + 30.0 / 3600.0)).abs() < 1e-12);
    }

    #[test]
    fn parse_rejects_malformed_input() {
        for raw in [
            b"".as_slice(),
            b"abc",
            b"10",
            b"10:",
            b"10:xx:00",
            b"10:30:00:00",
            b"10:75:00",
            b"10:30:99",
            b"++10:30:00",
        ] {
            assert!(
                parse_sexagesimal(raw).is_err(),
                "expected parse failure for {:?}",
                raw
            );
        }
    }

    #[test]
    fn format_round_trips() {
        assert_eq!(format_hms(157.5), "10:30:00");
        assert_eq!(format_hms(0.0), "00:00:00");
        assert_eq!(format_hms(359.999999), "00:00:00");
        assert_eq!(format_signed_dms(-5.5), "-05*30:00");
        assert_eq!(format_signed_dms(12.255), "+12*15:18");
        assert_eq!(format_unsigned_dms(182.25), "182*15:00");
        assert_eq!(format_unsigned_dms(-0.5), "359*30:00");
    }
}
