//! Command queue worker
//!
//! A single task owns the only handle to the serial link for the process
//! lifetime. It consumes queued commands, talks to the mount through the
//! protocol codec, and republishes the state snapshot after every
//! exchange. All synchronization with callers happens at the queue
//! boundary; nothing in here needs a lock.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::astro::Astrometry;
use crate::config::Config;
use crate::dome::DomeNotifier;
use crate::error::{MountError, Result};
use crate::io::MountPortFactory;
use crate::limits::wrap_degrees;
use crate::protocol::{
    GuideDirection, MountCodec, DRIVE_STARTUP_TEXT, FINDING_HOME_TEXT, MOTION_ACCEPTED, SYNC_ACK,
};
use crate::store::SnapshotStore;
use crate::types::{
    Command, CommandStatus, EquatorialTarget, HorizontalTarget, MountState, StateSnapshot,
};

/// A command paired with the channel its result is returned on
pub(crate) type QueuedCommand = (Command, oneshot::Sender<CommandStatus>);

/// Handset poll cadence during the initialization handshake
const HANDSHAKE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Pause between the zero-point sync acknowledgement and tracking shutoff
const ZERO_SETTLE_DELAY: Duration = Duration::from_secs(1);
/// Site agreement tolerances checked at the end of the handshake
const LATITUDE_TOLERANCE: f64 = 0.5;
const LONGITUDE_TOLERANCE: f64 = 0.5;
/// Sidereal time tolerance, about 40 seconds of clock time
const SIDEREAL_TOLERANCE: f64 = 0.16667;
/// Guide pulses run at 10 arcsec/s, so one degree takes 360000 ms
const PULSE_MS_PER_DEGREE: f64 = 3.6e5;

pub(crate) struct Worker {
    config: Arc<Config>,
    astro: Arc<dyn Astrometry>,
    dome: Arc<dyn DomeNotifier>,
    factory: Arc<dyn MountPortFactory>,
    store: SnapshotStore,
    force_stop: Arc<AtomicBool>,
    queue_rx: mpsc::Receiver<QueuedCommand>,
    codec: Option<MountCodec>,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: Arc<Config>,
        astro: Arc<dyn Astrometry>,
        dome: Arc<dyn DomeNotifier>,
        factory: Arc<dyn MountPortFactory>,
        store: SnapshotStore,
        force_stop: Arc<AtomicBool>,
        queue_rx: mpsc::Receiver<QueuedCommand>,
    ) -> Self {
        Self {
            config,
            astro,
            dome,
            factory,
            store,
            force_stop,
            queue_rx,
            codec: None,
        }
    }

    pub(crate) async fn run(mut self) {
        info!("Mount worker started");
        loop {
            let interval = if self.store.state().await == MountState::Slewing {
                self.config.slew_poll_interval()
            } else {
                self.config.idle_poll_interval()
            };

            match tokio::time::timeout(interval, self.queue_rx.recv()).await {
                Ok(None) => {
                    debug!("Command queue closed, worker exiting");
                    break;
                }
                // Initialize and Shutdown bypass the refresh wrapper:
                // before the former succeeds there is no link to poll, and
                // the latter tears the link down.
                Ok(Some((Command::Initialize, reply))) => {
                    let status = self.initialize().await;
                    let _ = reply.send(status);
                }
                Ok(Some((Command::Shutdown, reply))) => {
                    let status = self.shutdown().await;
                    let _ = reply.send(status);
                }
                Ok(Some((command, reply))) => {
                    let status = self.refreshed_execute(command).await;
                    let _ = reply.send(status);
                }
                Err(_) => {
                    if self.codec.is_some() {
                        if let Err(e) = self.refresh_status().await {
                            self.handle_lost_link(e).await;
                        }
                    }
                }
            }
        }
    }

    /// Refresh, run the command, refresh again.
    ///
    /// Protocol-level failures resolve to `Failed` with the link left open;
    /// anything that means the link itself is gone closes it.
    async fn refreshed_execute(&mut self, command: Command) -> CommandStatus {
        if self.codec.is_none() {
            return CommandStatus::NotConnected;
        }
        if let Err(e) = self.refresh_status().await {
            self.handle_lost_link(e).await;
            return CommandStatus::Failed;
        }

        let status = match self.try_execute(command).await {
            Ok(status) => status,
            Err(e) if e.is_link_fault() => {
                self.handle_lost_link(e).await;
                return CommandStatus::Failed;
            }
            Err(e) => {
                warn!("Command failed: {}", e);
                CommandStatus::Failed
            }
        };

        if self.codec.is_some() {
            if let Err(e) = self.refresh_status().await {
                self.handle_lost_link(e).await;
            }
        }
        status
    }

    async fn try_execute(&mut self, command: Command) -> Result<CommandStatus> {
        debug!("Executing {:?}", command);
        match command {
            Command::Stop => self.stop().await,
            Command::Slew(target) => self.point_untracked(target).await,
            Command::Track(target) => self.point_tracked(target).await,
            Command::Park(target) => self.park(target).await,
            Command::Sync(target) => self.sync(target).await,
            Command::Zero => self.zero().await,
            Command::OffsetRaDec {
                delta_ra,
                delta_dec,
            } => self.offset_pulses(delta_ra, delta_dec).await,
            Command::Initialize | Command::Shutdown => unreachable!("handled in run()"),
        }
    }

    /// Slew to an equatorial target and leave the sidereal drive engaged
    async fn point_tracked(&mut self, target: EquatorialTarget) -> Result<CommandStatus> {
        let now = Utc::now();
        let (ra, dec) = self.astro.j2000_to_apparent(target.ra, target.dec, now);

        if let Err(e) = self.dome.telescope_radec(target.ra, target.dec, true).await {
            warn!("Dome notification failed: {}", e);
        }

        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;
        if !codec.set_target_ra(ra).await? {
            warn!("Mount rejected target RA {}", ra);
            return Ok(CommandStatus::Failed);
        }
        if !codec.set_target_dec(dec).await? {
            warn!("Mount rejected target Dec {}", dec);
            return Ok(CommandStatus::Failed);
        }

        let status = codec.start_slew_equatorial().await?;
        if status != MOTION_ACCEPTED {
            warn!("Mount rejected slew, status byte {:#04x}", status);
            return Ok(CommandStatus::Failed);
        }
        Ok(CommandStatus::Succeeded)
    }

    /// Slew to an equatorial target without engaging tracking
    async fn point_untracked(&mut self, target: EquatorialTarget) -> Result<CommandStatus> {
        let now = Utc::now();
        let (ra, dec) = self.astro.j2000_to_apparent(target.ra, target.dec, now);
        let ha = wrap_degrees(self.astro.apparent_lst(&self.config.site, now) - ra);

        if let Err(e) = self.dome.telescope_radec(target.ra, target.dec, false).await {
            warn!("Dome notification failed: {}", e);
        }

        self.slew_axes(ha, dec).await
    }

    /// Slew to a named storage position
    async fn park(&mut self, target: HorizontalTarget) -> Result<CommandStatus> {
        if let Err(e) = self.dome.telescope_altaz(target.alt, target.az).await {
            warn!("Dome notification failed: {}", e);
        }

        let (ha, dec) = self
            .astro
            .horizontal_to_hadec(target.alt, target.az, &self.config.site);
        let status = self.slew_axes(ha, dec).await?;

        if status == CommandStatus::Succeeded {
            if let Err(e) = self.dome.telescope_parked().await {
                warn!("Dome notification failed: {}", e);
            }
        }
        Ok(status)
    }

    /// Drive the mount's alt-az shaped protocol. On this equatorially
    /// mounted instrument the altitude channel carries declination and the
    /// azimuth channel carries 180 degrees plus hour angle.
    async fn slew_axes(&mut self, ha: f64, dec: f64) -> Result<CommandStatus> {
        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;
        if !codec.set_target_altitude(dec).await? {
            warn!("Mount rejected declination channel value {}", dec);
            return Ok(CommandStatus::Failed);
        }
        let azimuth = (180.0 + ha).rem_euclid(360.0);
        if !codec.set_target_azimuth(azimuth).await? {
            warn!("Mount rejected hour-angle channel value {}", azimuth);
            return Ok(CommandStatus::Failed);
        }

        let status = codec.start_slew_horizontal().await?;
        if status != MOTION_ACCEPTED {
            warn!("Mount rejected slew, status byte {:#04x}", status);
            return Ok(CommandStatus::Failed);
        }
        Ok(CommandStatus::Succeeded)
    }

    /// Sync the mount's pointing model to the given target
    async fn sync(&mut self, target: EquatorialTarget) -> Result<CommandStatus> {
        let now = Utc::now();
        let (ra, dec) = self.astro.j2000_to_apparent(target.ra, target.dec, now);

        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;
        if !codec.set_target_ra(ra).await? || !codec.set_target_dec(dec).await? {
            warn!("Mount rejected sync target");
            return Ok(CommandStatus::Failed);
        }

        let ack = codec.sync_to_target().await?;
        if ack != SYNC_ACK {
            warn!("Unexpected sync acknowledgement: {:?}", ack);
            return Ok(CommandStatus::Failed);
        }
        Ok(CommandStatus::Succeeded)
    }

    /// Sync to hour angle zero, declination zero, then store that pose as
    /// the mount's park reference
    async fn zero(&mut self) -> Result<CommandStatus> {
        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;

        // Hour angle zero means a right ascension equal to the mount's own
        // sidereal clock
        let lst = codec.read_sidereal().await?;
        if !codec.set_target_ra(lst).await? || !codec.set_target_dec(0.0).await? {
            warn!("Mount rejected zero target");
            return Ok(CommandStatus::Failed);
        }

        let ack = codec.sync_to_target().await?;
        if ack != SYNC_ACK {
            warn!("Unexpected sync acknowledgement: {:?}", ack);
            return Ok(CommandStatus::Failed);
        }

        // Tracking resumes automatically after a sync; give the drives a
        // moment before shutting it off again
        sleep(ZERO_SETTLE_DELAY).await;
        codec.disable_tracking().await?;
        codec.store_park_position().await?;
        Ok(CommandStatus::Succeeded)
    }

    /// Nudge the pointing with guide pulses instead of a full slew
    async fn offset_pulses(&mut self, delta_ra: f64, delta_dec: f64) -> Result<CommandStatus> {
        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;
        codec.select_guide_rate().await?;

        let ra_ms = (delta_ra.abs() * PULSE_MS_PER_DEGREE).round() as u64;
        let dec_ms = (delta_dec.abs() * PULSE_MS_PER_DEGREE).round() as u64;

        if ra_ms > 0 {
            let direction = if delta_ra > 0.0 {
                GuideDirection::East
            } else {
                GuideDirection::West
            };
            codec.pulse_guide(direction, ra_ms).await?;
        }
        if dec_ms > 0 {
            let direction = if delta_dec > 0.0 {
                GuideDirection::North
            } else {
                GuideDirection::South
            };
            codec.pulse_guide(direction, dec_ms).await?;
        }

        // Wait out the longer pulse so the next refresh sees the final pose
        sleep(Duration::from_millis(ra_ms.max(dec_ms))).await;
        Ok(CommandStatus::Succeeded)
    }

    /// Halt all motion and wake any blocked pointing caller
    async fn stop(&mut self) -> Result<CommandStatus> {
        if let Err(e) = self.dome.telescope_stopped().await {
            warn!("Dome notification failed: {}", e);
        }

        self.force_stop.store(true, Ordering::SeqCst);

        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;
        codec.abort_slew().await?;
        codec.disable_tracking().await?;

        self.store.signal_completion();
        Ok(CommandStatus::Succeeded)
    }

    /// Poll the mount and replace the published snapshot wholesale
    async fn refresh_status(&mut self) -> Result<()> {
        let now = Utc::now();
        let codec = self.codec.as_mut().ok_or(MountError::NotConnected)?;

        let lst = codec.read_sidereal().await?;
        let alt = codec.read_altitude().await?;
        let az = codec.read_azimuth().await?;
        let slewing = codec.is_slewing().await?;

        let (ra, dec, state) = if slewing {
            // The handset reports the target, not the pose, while a slew
            // is in flight; derive the pointing from the axis encoders.
            let (ra, dec) = self
                .astro
                .horizontal_to_equatorial(alt, az, &self.config.site, now);
            (ra, dec, MountState::Slewing)
        } else {
            let ra = codec.read_ra().await?;
            let dec = codec.read_dec().await?;
            let state = if codec.is_tracking().await? {
                MountState::Tracking
            } else {
                MountState::Stopped
            };
            (ra, dec, state)
        };

        let (ra_2000, dec_2000) = self.astro.apparent_to_j2000(ra, dec, now);
        let (sun_ra, sun_dec) = self.astro.sun_position(now);
        let (moon_ra, moon_dec) = self.astro.moon_position(now);

        let snapshot = StateSnapshot {
            time: now,
            state,
            lst,
            ra: ra_2000,
            dec: dec_2000,
            ha: wrap_degrees(lst - ra),
            alt,
            az,
            site_latitude: self.config.site.latitude,
            site_longitude: self.config.site.longitude,
            site_elevation: self.config.site.elevation,
            moon_separation: self.astro.angular_separation(ra, dec, moon_ra, moon_dec),
            sun_separation: self.astro.angular_separation(ra, dec, sun_ra, sun_dec),
        };
        self.store.publish(state, Some(snapshot)).await;
        Ok(())
    }

    async fn initialize(&mut self) -> CommandStatus {
        if self.codec.is_some() {
            return CommandStatus::NotDisconnected;
        }

        info!("Initializing mount on {}", self.config.serial.port);
        self.store.publish(MountState::Initializing, None).await;

        match self.run_handshake().await {
            Ok(CommandStatus::Succeeded) => {
                info!("Mount initialized");
                CommandStatus::Succeeded
            }
            Ok(status) => {
                self.codec = None;
                self.store.publish(MountState::Disabled, None).await;
                status
            }
            Err(e) => {
                warn!("Mount initialization failed: {}", e);
                self.codec = None;
                self.store.publish(MountState::Disabled, None).await;
                CommandStatus::Failed
            }
        }
    }

    /// The initialization handshake state machine.
    ///
    /// The link is adopted into `self.codec` only once every step has
    /// passed; dropping the local codec on any earlier return closes it.
    async fn run_handshake(&mut self) -> Result<CommandStatus> {
        let deadline = Instant::now() + self.config.initialize_timeout();

        let port = self
            .factory
            .open(
                &self.config.serial.port,
                self.config.serial.baud_rate,
                self.config.serial_timeout(),
            )
            .await?;
        let mut codec = MountCodec::new(port);

        // Reboot the handset so the handshake starts from a known state
        codec.reboot().await?;

        // Probe until the handset answers the alignment query
        debug!("Handshake: awaiting alignment acknowledgement");
        let alignment = loop {
            if let Some(byte) = codec.probe_alignment().await? {
                break byte;
            }
            if Instant::now() >= deadline {
                return Err(MountError::Timeout(
                    "mount did not answer the alignment query".to_string(),
                ));
            }
            sleep(HANDSHAKE_POLL_INTERVAL).await;
        };
        if alignment != b'L' && alignment != b'P' {
            warn!("Unexpected alignment mode '{}'", alignment as char);
            return Ok(CommandStatus::InvalidMountConfiguration);
        }

        // Wait for the drive firmware to finish booting
        debug!("Handshake: awaiting drive startup");
        wait_for_display_clear(&mut codec, DRIVE_STARTUP_TEXT, deadline).await?;

        // Push UTC in one handset command
        debug!("Handshake: sending timestamp");
        if !codec.set_utc(Utc::now()).await? {
            return Err(MountError::InvalidResponse(
                "mount rejected the timestamp".to_string(),
            ));
        }

        // Wait for the homing run that follows the time set
        debug!("Handshake: awaiting home search");
        wait_for_display_clear(&mut codec, FINDING_HOME_TEXT, deadline).await?;

        // The handset must agree with the deployed site configuration
        debug!("Handshake: validating site");
        let latitude = codec.read_latitude().await?;
        // The handset stores longitude west positive
        let longitude = -codec.read_longitude().await?;
        let sidereal = codec.read_sidereal().await?;
        let expected = self.astro.apparent_lst(&self.config.site, Utc::now());

        if (latitude - self.config.site.latitude).abs() > LATITUDE_TOLERANCE {
            warn!(
                "Mount latitude {} disagrees with configured {}",
                latitude, self.config.site.latitude
            );
            return Ok(CommandStatus::InvalidMountConfiguration);
        }
        if (longitude - self.config.site.longitude).abs() > LONGITUDE_TOLERANCE {
            warn!(
                "Mount longitude {} disagrees with configured {}",
                longitude, self.config.site.longitude
            );
            return Ok(CommandStatus::InvalidMountConfiguration);
        }
        if wrap_degrees(sidereal - expected).abs() > SIDEREAL_TOLERANCE {
            warn!(
                "Mount sidereal time {} disagrees with computed {}",
                sidereal, expected
            );
            return Ok(CommandStatus::InvalidMountConfiguration);
        }

        codec.disable_tracking().await?;

        self.codec = Some(codec);
        self.refresh_status().await?;
        Ok(CommandStatus::Succeeded)
    }

    async fn shutdown(&mut self) -> CommandStatus {
        let Some(codec) = self.codec.as_mut() else {
            return CommandStatus::NotConnected;
        };

        // Park via the mount's own command so it remembers its position
        let result = codec.park().await;
        self.codec = None;
        self.store.publish(MountState::Disabled, None).await;

        match result {
            Ok(()) => {
                info!("Mount shut down");
                CommandStatus::Succeeded
            }
            Err(e) => {
                warn!("Park command failed during shutdown: {}", e);
                CommandStatus::Failed
            }
        }
    }

    async fn handle_lost_link(&mut self, error: MountError) {
        error!("Lost connection to mount: {}", error);
        self.codec = None;
        self.store.publish(MountState::Disabled, None).await;
    }
}

/// Poll the handbox display until the given message clears
async fn wait_for_display_clear(
    codec: &mut MountCodec,
    text: &str,
    deadline: Instant,
) -> Result<()> {
    loop {
        let display_text = codec.read_display().await?;
        if !display_text.contains(text) {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(MountError::Timeout(format!(
                "handset still reports '{}'",
                text
            )));
        }
        debug!("Waiting for handset: {}", display_text.trim());
        sleep(HANDSHAKE_POLL_INTERVAL).await;
    }
}
