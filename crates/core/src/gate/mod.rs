//! Connectivity gate.
//!
//! Network-heavy jobs only run while the gate is active. State changes are
//! published through a `watch` channel so waiters wake up on reconnect.

mod probe;

pub use probe::ProbeGate;

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

/// Reports whether outbound traffic is currently allowed.
pub trait ConnectivityGate: Send + Sync {
    fn is_active(&self) -> bool;

    /// Receiver that observes connect/disconnect transitions.
    fn subscribe(&self) -> watch::Receiver<bool>;
}

/// Gate that is always open.
#[derive(Debug)]
pub struct AlwaysOnGate {
    state: watch::Sender<bool>,
}

impl AlwaysOnGate {
    pub fn new() -> Self {
        let (state, _) = watch::channel(true);
        Self { state }
    }
}

impl Default for AlwaysOnGate {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityGate for AlwaysOnGate {
    fn is_active(&self) -> bool {
        true
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}

/// Wait until `gate` is active, re-checking at least every `retry`.
///
/// Once the gate stops publishing transitions this falls back to plain
/// polling at the retry interval.
pub async fn wait_until_active(gate: &dyn ConnectivityGate, retry: Duration) {
    let mut rx = gate.subscribe();
    let mut publishing = true;
    while !gate.is_active() {
        debug!(retry_ms = retry.as_millis() as u64, "Connectivity gate closed, waiting");
        if !publishing {
            tokio::time::sleep(retry).await;
            continue;
        }
        if let Ok(Err(_)) = tokio::time::timeout(retry, rx.changed()).await {
            debug!("Connectivity gate stopped publishing, polling instead");
            publishing = false;
        }
    }
}
