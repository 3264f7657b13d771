//! eUICC card identity
//!
//! The card is identified by its EID. When the card status does not report
//! it, the EID is read from the ISD-R once, in the background, and every
//! interested party is told when it becomes available.

use std::sync::Arc;

use log::{debug, error, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::channel::SecureElement;
use crate::port::EuiccPort;

/// Called once with the EID, or with an empty string if it could not be read
pub type ReadyCallback = Box<dyn FnOnce(String) + Send>;

enum Resolution {
    Unresolved,
    Resolving,
    Resolved(String),
}

struct IdentityState {
    resolution: Resolution,
    waiters: Vec<(u64, ReadyCallback)>,
    next_id: u64,
}

/// An eUICC card: its ISD-R port plus the card identifier
pub struct EuiccCard<E> {
    port: Arc<EuiccPort<E>>,
    state: Mutex<IdentityState>,
}

/// An EID read in progress
///
/// Dropped without [`PendingRead::finish`], the read counts as failed so
/// waiters are still released.
struct PendingRead<'a, E: SecureElement> {
    card: &'a EuiccCard<E>,
    done: bool,
}

impl<E: SecureElement> PendingRead<'_, E> {
    fn finish(mut self, eid: String) {
        self.done = true;
        self.card.resolve(eid);
    }
}

impl<E: SecureElement> Drop for PendingRead<'_, E> {
    fn drop(&mut self) {
        if !self.done {
            warn!("EID read abandoned before completion");
            self.card.resolve(String::new());
        }
    }
}

impl<E: SecureElement> EuiccCard<E> {
    /// Wrap `port`; `eid` is the identifier from the card status, if any
    pub fn new(port: Arc<EuiccPort<E>>, eid: Option<String>) -> Self {
        let resolution = match eid.filter(|eid| !eid.is_empty()) {
            Some(eid) => {
                port.update_eid(&eid);
                Resolution::Resolved(port.eid().unwrap_or(eid))
            }
            None => match port.eid() {
                Some(eid) => Resolution::Resolved(eid),
                None => Resolution::Unresolved,
            },
        };

        Self {
            port,
            state: Mutex::new(IdentityState {
                resolution,
                waiters: Vec::new(),
                next_id: 0,
            }),
        }
    }

    /// Wrap `port` and read the EID on `handle` when `eid` is not usable
    pub fn start(
        port: Arc<EuiccPort<E>>,
        eid: Option<String>,
        handle: &tokio::runtime::Handle,
    ) -> Arc<Self> {
        let card = Arc::new(Self::new(port, eid));
        if card.get_identifier().is_none() {
            card.spawn_load(handle);
        }
        card
    }

    pub fn port(&self) -> &Arc<EuiccPort<E>> {
        &self.port
    }

    /// The EID, None while it is being read
    pub fn get_identifier(&self) -> Option<String> {
        if let Some(eid) = self.port.eid() {
            return Some(eid);
        }
        match &self.state.lock().resolution {
            Resolution::Resolved(eid) => Some(eid.clone()),
            _ => None,
        }
    }

    /// Register `callback` for the EID
    ///
    /// Runs immediately when the EID is already known. The returned id can
    /// be passed to [`EuiccCard::unregister`].
    pub fn on_identifier_ready(&self, callback: ReadyCallback) -> u64 {
        let mut state = self.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        if let Resolution::Resolved(eid) = &state.resolution {
            let eid = eid.clone();
            drop(state);
            callback(eid);
        } else {
            state.waiters.push((id, callback));
        }
        id
    }

    /// Drop a pending callback; false when it already ran or never existed
    pub fn unregister(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        let before = state.waiters.len();
        state.waiters.retain(|(waiter, _)| *waiter != id);
        state.waiters.len() != before
    }

    /// Wait until the EID is known
    ///
    /// Yields an empty string if reading it failed.
    pub async fn wait_for_identifier(&self) -> String {
        let (tx, rx) = oneshot::channel();
        self.on_identifier_ready(Box::new(move |eid| {
            let _ = tx.send(eid);
        }));
        rx.await.unwrap_or_default()
    }

    /// Read the EID from the ISD-R unless it is known or being read
    pub async fn load_identifier(&self) {
        {
            let mut state = self.state.lock();
            if !matches!(state.resolution, Resolution::Unresolved) {
                return;
            }
            state.resolution = Resolution::Resolving;
        }
        let pending = PendingRead {
            card: self,
            done: false,
        };

        let eid = match self.port.get_eid().await {
            Ok(eid) => eid,
            Err(e) => {
                error!("Failed to read the EID: {}", e);
                String::new()
            }
        };
        pending.finish(eid);
    }

    fn resolve(&self, eid: String) {
        let waiters = {
            let mut state = self.state.lock();
            state.resolution = Resolution::Resolved(eid.clone());
            std::mem::take(&mut state.waiters)
        };
        debug!("EID resolved, notifying {} waiters", waiters.len());
        for (_, callback) in waiters {
            callback(eid.clone());
        }
    }

    /// Start [`EuiccCard::load_identifier`] on `handle`
    pub fn spawn_load(self: &Arc<Self>, handle: &tokio::runtime::Handle) {
        let card = Arc::clone(self);
        handle.spawn(async move { card.load_identifier().await });
    }
}
