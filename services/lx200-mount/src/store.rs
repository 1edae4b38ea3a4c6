//! State snapshot store
//!
//! Holds the latest polled telescope status behind a lock that only ever
//! guards the pointer swap, never hardware I/O, so `status()` readers are
//! never blocked on the worker loop. A refresh that takes the mount out of
//! `Slewing` broadcasts on the completion channel to wake blocked pointing
//! callers.

use std::sync::Arc;

use tokio::sync::{watch, RwLock};

use crate::types::{MountState, StateSnapshot};

struct StoreInner {
    state: MountState,
    snapshot: Option<StateSnapshot>,
}

/// Shared handle to the latest telescope state
#[derive(Clone)]
pub struct SnapshotStore {
    inner: Arc<RwLock<StoreInner>>,
    completion_tx: Arc<watch::Sender<u64>>,
}

impl SnapshotStore {
    pub fn new() -> (Self, watch::Receiver<u64>) {
        let (completion_tx, completion_rx) = watch::channel(0);
        let store = Self {
            inner: Arc::new(RwLock::new(StoreInner {
                state: MountState::Disabled,
                snapshot: None,
            })),
            completion_tx: Arc::new(completion_tx),
        };
        (store, completion_rx)
    }

    pub async fn state(&self) -> MountState {
        self.inner.read().await.state
    }

    pub async fn get(&self) -> (MountState, Option<StateSnapshot>) {
        let inner = self.inner.read().await;
        (inner.state, inner.snapshot.clone())
    }

    /// Replace the stored state wholesale.
    ///
    /// Broadcasts completion when the mount leaves `Slewing`.
    pub async fn publish(&self, state: MountState, snapshot: Option<StateSnapshot>) {
        let left_slewing = {
            let mut inner = self.inner.write().await;
            let was_slewing = inner.state == MountState::Slewing;
            inner.state = state;
            inner.snapshot = snapshot;
            was_slewing && state != MountState::Slewing
        };
        if left_slewing {
            self.signal_completion();
        }
    }

    /// Wake everything blocked on the completion channel
    pub fn signal_completion(&self) {
        self.completion_tx.send_modify(|generation| *generation += 1);
    }
}
