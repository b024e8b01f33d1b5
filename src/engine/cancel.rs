use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;

/// Stop switches of live runs, keyed by execution id.
pub struct CancelRegistry {
    senders: Mutex<HashMap<String, broadcast::Sender<()>>>,
}

/// Receiving half held by the orchestrator of one run. Polled between cases.
pub struct CancelSignal {
    receiver: broadcast::Receiver<()>,
    cancelled: bool,
}

impl CancelSignal {
    pub fn is_cancelled(&mut self) -> bool {
        if !self.cancelled {
            self.cancelled = match self.receiver.try_recv() {
                Ok(()) | Err(TryRecvError::Lagged(_)) | Err(TryRecvError::Closed) => true,
                Err(TryRecvError::Empty) => false,
            };
        }
        self.cancelled
    }
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self {
            senders: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: &str) -> CancelSignal {
        let (tx, rx) = broadcast::channel(1);
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.to_string(), tx);
        CancelSignal {
            receiver: rx,
            cancelled: false,
        }
    }

    /// Flip the switch of a live run. False when the run is unknown or over.
    pub fn cancel(&self, id: &str) -> bool {
        if let Some(tx) = self
            .senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
        {
            let _ = tx.send(());
            return true;
        }
        false
    }

    pub fn remove(&self, id: &str) {
        self.senders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}

impl Default for CancelRegistry {
    fn default() -> Self {
        Self::new()
    }
}
