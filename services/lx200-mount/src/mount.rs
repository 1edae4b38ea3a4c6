//! Public command surface and session coordination
//!
//! Arbitrates concurrent remote callers over the single mount worker: one
//! exclusive top-level command in flight at a time, a separate fast path
//! for status reads, and a cooperative stop that can interrupt a blocked
//! pointing command. Every path resolves to a [`CommandStatus`]; nothing
//! here ever panics a caller.

use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::time::Instant;
use tracing::{error, warn};

use crate::astro::Astrometry;
use crate::config::Config;
use crate::dome::DomeNotifier;
use crate::io::MountPortFactory;
use crate::limits::validate_target;
use crate::store::SnapshotStore;
use crate::types::{Command, CommandStatus, EquatorialTarget, HorizontalTarget, MountState};
use crate::worker::{QueuedCommand, Worker};

/// Offsets below one arc-minute on both axes are issued as guide pulses
const ARCMINUTE_DEG: f64 = 1.0 / 60.0;

/// Command queue depth; callers are serialized well before this fills
const QUEUE_DEPTH: usize = 8;

/// The daemon's stateful command surface.
///
/// Construction spawns the worker task that owns the serial link; the
/// daemon itself is shared freely between callers.
pub struct MountDaemon {
    config: Arc<Config>,
    astro: Arc<dyn Astrometry>,
    store: SnapshotStore,
    queue_tx: mpsc::Sender<QueuedCommand>,
    /// Serializes queue push + result retrieval pairs
    queue_lock: Mutex<()>,
    /// Admits one top-level command at a time; try-acquired, never waited
    /// on except by `stop` clearing the force-stop flag
    command_lock: Mutex<()>,
    force_stop: Arc<AtomicBool>,
    completion_rx: watch::Receiver<u64>,
}

impl MountDaemon {
    pub fn new(
        config: Arc<Config>,
        astro: Arc<dyn Astrometry>,
        dome: Arc<dyn DomeNotifier>,
        factory: Arc<dyn MountPortFactory>,
    ) -> Self {
        let (store, completion_rx) = SnapshotStore::new();
        let (queue_tx, queue_rx) = mpsc::channel(QUEUE_DEPTH);
        let force_stop = Arc::new(AtomicBool::new(false));

        let worker = Worker::new(
            Arc::clone(&config),
            Arc::clone(&astro),
            dome,
            factory,
            store.clone(),
            Arc::clone(&force_stop),
            queue_rx,
        );
        tokio::spawn(worker.run());

        Self {
            config,
            astro,
            store,
            queue_tx,
            queue_lock: Mutex::new(()),
            command_lock: Mutex::new(()),
            force_stop,
            completion_rx,
        }
    }

    /// Liveness check
    pub async fn ping(&self) -> CommandStatus {
        CommandStatus::Succeeded
    }

    /// Latest telescope status; lock-only, never blocks on the worker
    pub async fn status(&self) -> serde_json::Value {
        let (state, snapshot) = self.store.get().await;
        match snapshot {
            Some(snap) if state.is_connected() => json!({
                "date": format_time(snap.time),
                "state": state.code(),
                "state_label": state.label(),
                "lst": snap.lst,
                "ra": snap.ra,
                "ha": snap.ha,
                "dec": snap.dec,
                "alt": snap.alt,
                "az": snap.az,
                "site_latitude": snap.site_latitude,
                "site_longitude": snap.site_longitude,
                "site_elevation": snap.site_elevation,
                "moon_separation": snap.moon_separation,
                "sun_separation": snap.sun_separation,
            }),
            _ => json!({
                "date": format_time(Utc::now()),
                "state": state.code(),
                "state_label": state.label(),
            }),
        }
    }

    /// Open the serial link and run the initialization handshake
    pub async fn initialize(&self, peer: IpAddr) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if self.store.state().await != MountState::Disabled {
            return CommandStatus::NotDisconnected;
        }
        self.enqueue(Command::Initialize).await
    }

    /// Park the mount through its own firmware and close the link
    pub async fn shutdown(&self, peer: IpAddr) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }
        self.enqueue(Command::Shutdown).await
    }

    /// Slew to an epoch-2000 position without tracking
    pub async fn slew_radec(&self, peer: IpAddr, ra: f64, dec: f64) -> CommandStatus {
        self.pointing_command(peer, EquatorialTarget { ra, dec }, false)
            .await
    }

    /// Slew to an epoch-2000 position and track it
    pub async fn track_radec(&self, peer: IpAddr, ra: f64, dec: f64) -> CommandStatus {
        self.pointing_command(peer, EquatorialTarget { ra, dec }, true)
            .await
    }

    /// Offset the current pointing by the given deltas.
    ///
    /// Sub-arcminute offsets on both axes go out as guide pulses and
    /// return as soon as the pulses have been issued; anything larger is
    /// reissued as an absolute tracked target.
    pub async fn offset_radec(&self, peer: IpAddr, delta_ra: f64, delta_dec: f64) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        let (state, snapshot) = self.store.get().await;
        if !state.is_connected() {
            return CommandStatus::NotConnected;
        }

        if delta_ra.abs() < ARCMINUTE_DEG && delta_dec.abs() < ARCMINUTE_DEG {
            return self
                .enqueue(Command::OffsetRaDec {
                    delta_ra,
                    delta_dec,
                })
                .await;
        }

        let Some(snapshot) = snapshot else {
            return CommandStatus::NotConnected;
        };
        let target = EquatorialTarget {
            ra: snapshot.ra + delta_ra,
            dec: snapshot.dec + delta_dec,
        };
        if let Some(status) = validate_target(&target, Utc::now(), &self.config, self.astro.as_ref())
        {
            return status;
        }

        let status = self.enqueue(Command::Track(target)).await;
        if status != CommandStatus::Succeeded {
            return status;
        }
        self.wait_for_completion().await
    }

    /// Sync the mount's pointing model to an epoch-2000 position
    pub async fn sync(&self, peer: IpAddr, ra: f64, dec: f64) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }
        let target = EquatorialTarget { ra, dec };
        if let Some(status) = validate_target(&target, Utc::now(), &self.config, self.astro.as_ref())
        {
            return status;
        }
        self.enqueue(Command::Sync(target)).await
    }

    /// Sync to hour angle zero, declination zero and store the pose as the
    /// mount's park reference
    pub async fn zero(&self, peer: IpAddr) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }
        self.enqueue(Command::Zero).await
    }

    /// Slew to a named park position
    pub async fn park(&self, peer: IpAddr, name: &str) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }
        let Some(position) = self.config.park_positions.get(name) else {
            warn!("Unknown park position '{}'", name);
            return CommandStatus::UnknownParkPosition;
        };

        let target = HorizontalTarget {
            alt: position.alt,
            az: position.az,
        };
        let status = self.enqueue(Command::Park(target)).await;
        if status != CommandStatus::Succeeded {
            return status;
        }
        self.wait_for_completion().await
    }

    /// Halt all motion.
    ///
    /// Deliberately not gated on the command lock so it can interrupt an
    /// in-flight pointing command; the force-stop flag is cleared only
    /// once the lock is free again, which guarantees no interrupted caller
    /// is still running when the flag resets.
    pub async fn stop(&self, peer: IpAddr) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }

        let status = self.enqueue(Command::Stop).await;

        let _guard = self.command_lock.lock().await;
        self.force_stop.store(false, Ordering::SeqCst);
        status
    }

    /// Shared admission + wait path for slew and track
    async fn pointing_command(
        &self,
        peer: IpAddr,
        target: EquatorialTarget,
        track: bool,
    ) -> CommandStatus {
        if !self.config.control_allowed(peer) {
            return CommandStatus::InvalidControlIP;
        }
        let Ok(_guard) = self.command_lock.try_lock() else {
            return CommandStatus::Blocked;
        };
        if !self.store.state().await.is_connected() {
            return CommandStatus::NotConnected;
        }
        if let Some(status) = validate_target(&target, Utc::now(), &self.config, self.astro.as_ref())
        {
            return status;
        }

        let command = if track {
            Command::Track(target)
        } else {
            Command::Slew(target)
        };
        let status = self.enqueue(command).await;
        if status != CommandStatus::Succeeded {
            return status;
        }
        self.wait_for_completion().await
    }

    /// Push a command onto the worker queue and wait for its result.
    ///
    /// The link-access lock keeps command/result pairs from different
    /// callers from interleaving, including the stop-overlap window.
    async fn enqueue(&self, command: Command) -> CommandStatus {
        let _guard = self.queue_lock.lock().await;
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.queue_tx.send((command, reply_tx)).await.is_err() {
            error!("Mount worker is gone");
            return CommandStatus::Failed;
        }
        reply_rx.await.unwrap_or(CommandStatus::Failed)
    }

    /// Block until the accepted pointing command has finished.
    ///
    /// Wakes on the completion broadcast or after a poll interval,
    /// whichever comes first, and on each wake checks the force-stop flag,
    /// then the mount state, then the overall slew timeout.
    async fn wait_for_completion(&self) -> CommandStatus {
        let poll = self.config.slew_poll_interval();
        let deadline = Instant::now() + self.config.slew_timeout();
        let mut completion = self.completion_rx.clone();
        completion.borrow_and_update();

        loop {
            let _ = tokio::time::timeout(poll, completion.changed()).await;

            if self.force_stop.load(Ordering::SeqCst) {
                return CommandStatus::Failed;
            }
            if self.store.state().await != MountState::Slewing {
                return CommandStatus::Succeeded;
            }
            if Instant::now() >= deadline {
                warn!("Slew wait timed out, trusting the last snapshot");
                return CommandStatus::Succeeded;
            }
        }
    }
}

fn format_time(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_formatting() {
        use chrono::TimeZone;
        let time = Utc.with_ymd_and_hms(2026, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(format_time(time), "2026-02-03T04:05:06Z");
    }
}
