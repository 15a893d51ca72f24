//! Gate driven by a periodic public-IP probe.

use std::time::Duration;

use reqwest::Client;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::GateConfig;

use super::ConnectivityGate;

/// Active while the probed public address is one of the expected ones.
pub struct ProbeGate {
    client: Client,
    probe_url: String,
    expected_ips: Vec<String>,
    state: watch::Sender<bool>,
}

impl ProbeGate {
    /// Starts closed until the first successful probe.
    pub fn new(config: &GateConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        let (state, _) = watch::channel(false);
        Ok(Self {
            client,
            probe_url: config.probe_url.clone(),
            expected_ips: config.expected_ips.clone(),
            state,
        })
    }

    /// Whether the probe response names an allowed address.
    pub fn is_expected(&self, address: &str) -> bool {
        let address = address.trim();
        self.expected_ips.iter().any(|ip| ip == address)
    }

    /// Probe once and update the gate. Returns the new state.
    pub async fn probe_once(&self) -> bool {
        let active = match self.fetch_address().await {
            Ok(address) => {
                let ok = self.is_expected(&address);
                if !ok {
                    debug!(address = %address.trim(), "Public address not in allow list");
                }
                ok
            }
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        };
        self.set_active(active);
        active
    }

    async fn fetch_address(&self) -> Result<String, reqwest::Error> {
        self.client
            .get(&self.probe_url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }

    pub(crate) fn set_active(&self, active: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == active {
                return false;
            }
            *current = active;
            true
        });
        if changed {
            if active {
                info!("Connectivity gate opened");
            } else {
                warn!("Connectivity gate closed");
            }
        }
    }

    /// Probe every `interval` until shutdown.
    pub fn spawn(
        self: std::sync::Arc<Self>,
        interval: Duration,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("Connectivity probe loop started");
            loop {
                self.probe_once().await;
                tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            info!("Connectivity probe loop stopped");
        })
    }
}

impl ConnectivityGate for ProbeGate {
    fn is_active(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
