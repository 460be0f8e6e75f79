use pgmock_core::SessionKey;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::debug;

/// Work queued onto a session by another task. The session performs any
/// resulting writes itself between protocol messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Cancel,
}

/// Live sessions keyed by the cancel key each one was handed.
#[derive(Debug, Default)]
pub struct Registry {
    sessions: Mutex<HashMap<SessionKey, UnboundedSender<Control>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a key no live session holds (ProcessID included) and returns
    /// it with the receiving end of the new session's control queue.
    pub fn register(&self) -> (SessionKey, UnboundedReceiver<Control>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let mut rng = rand::thread_rng();
        let key = loop {
            let candidate = SessionKey::new(rng.gen_range(1..=i32::MAX), rng.gen_range(1..=i32::MAX));
            if !sessions
                .keys()
                .any(|key| key.process_id == candidate.process_id)
            {
                break candidate;
            }
        };
        sessions.insert(key, tx);
        (key, rx)
    }

    pub fn unregister(&self, key: &SessionKey) {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
    }

    /// Queues a cancellation for the session holding `key`. Unknown keys are
    /// ignored; returns whether a live session was found.
    pub fn issue_cancel_request(&self, key: SessionKey) -> bool {
        let sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let delivered = sessions
            .get(&key)
            .is_some_and(|tx| tx.send(Control::Cancel).is_ok());
        debug!(pid = key.process_id, delivered, "cancel request routed");
        delivered
    }

    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
