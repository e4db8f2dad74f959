//! Broker seam and the in-process implementation used for single-binary
//! deployments and tests. A production deployment substitutes a client for
//! an external broker behind the same trait.

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::errors::SignalError;
use crate::types::SignalEnvelope;

/// At-least-once, per-key-ordered signal transport. Implementations may
/// redeliver; consumers dedupe by opportunity id.
#[async_trait]
pub trait SignalBroker: Send + Sync {
    async fn publish(&self, envelope: SignalEnvelope) -> Result<(), SignalError>;

    /// Receive the next envelope, or `None` when the broker has nothing
    /// buffered right now.
    async fn try_recv(&self) -> Result<Option<SignalEnvelope>, SignalError>;
}

/// Unbounded in-process queue. Ordered, never drops, never unavailable.
pub struct InProcessBroker {
    tx: mpsc::UnboundedSender<SignalEnvelope>,
    rx: Mutex<mpsc::UnboundedReceiver<SignalEnvelope>>,
}

impl InProcessBroker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalBroker for InProcessBroker {
    async fn publish(&self, envelope: SignalEnvelope) -> Result<(), SignalError> {
        self.tx
            .send(envelope)
            .map_err(|_| SignalError::BrokerUnavailable("in-process queue closed".into()))
    }

    async fn try_recv(&self) -> Result<Option<SignalEnvelope>, SignalError> {
        let mut rx = self.rx.lock().await;
        match rx.try_recv() {
            Ok(env) => Ok(Some(env)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(SignalError::BrokerUnavailable(
                "in-process queue closed".into(),
            )),
        }
    }
}
