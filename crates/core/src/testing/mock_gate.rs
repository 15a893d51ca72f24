//! Mock connectivity gate for testing.

use tokio::sync::watch;

use crate::gate::ConnectivityGate;

/// Gate whose state is set by the test.
#[derive(Debug)]
pub struct MockGate {
    state: watch::Sender<bool>,
}

impl MockGate {
    pub fn open() -> Self {
        let (state, _) = watch::channel(true);
        Self { state }
    }

    pub fn closed() -> Self {
        let (state, _) = watch::channel(false);
        Self { state }
    }

    pub fn set_active(&self, active: bool) {
        self.state.send_replace(active);
    }
}

impl ConnectivityGate for MockGate {
    fn is_active(&self) -> bool {
        *self.state.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }
}
