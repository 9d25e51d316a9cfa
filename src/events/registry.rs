//! Listener registry with failure-isolated dispatch.

use super::types::FeatureEvent;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Outcome of a listener callback.
pub type ListenerResult = std::result::Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// Receives feature events.
pub trait FeatureListener: Send + Sync {
    fn changed(&self, event: &FeatureEvent) -> ListenerResult;

    /// Closed listeners are pruned after the next dispatch.
    fn is_closed(&self) -> bool {
        false
    }
}

impl<F> FeatureListener for F
where
    F: Fn(&FeatureEvent) -> ListenerResult + Send + Sync,
{
    fn changed(&self, event: &FeatureEvent) -> ListenerResult {
        self(event)
    }
}

/// Unique identifier for a registered listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

static NEXT_LISTENER_ID: AtomicU64 = AtomicU64::new(1);

/// Listener delivering into a bounded channel.
pub struct ChannelListener {
    sender: Sender<FeatureEvent>,
    disconnected: AtomicBool,
}

impl FeatureListener for ChannelListener {
    fn changed(&self, event: &FeatureEvent) -> ListenerResult {
        match self.sender.try_send(event.clone()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err("listener buffer full, event dropped".into()),
            Err(TrySendError::Disconnected(_)) => {
                self.disconnected.store(true, Ordering::SeqCst);
                Err("listener disconnected".into())
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.disconnected.load(Ordering::SeqCst)
    }
}

/// Receiving end of a channel listener.
pub struct ListenerHandle {
    pub id: ListenerId,
    pub receiver: crossbeam_channel::Receiver<FeatureEvent>,
}

impl ListenerHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<FeatureEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<FeatureEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<FeatureEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<FeatureEvent> {
        self.receiver.try_iter().collect()
    }
}

/// Listeners registered against one state.
pub struct ListenerRegistry {
    listeners: RwLock<Vec<(ListenerId, Arc<dyn FeatureListener>)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn add(&self, listener: Arc<dyn FeatureListener>) -> ListenerId {
        let id = ListenerId(NEXT_LISTENER_ID.fetch_add(1, Ordering::SeqCst));
        self.listeners.write().push((id, listener));
        id
    }

    /// Register a channel listener with the given buffer size.
    pub fn subscribe(&self, buffer_size: usize) -> ListenerHandle {
        let (sender, receiver) = bounded(buffer_size.max(1));
        let id = self.add(Arc::new(ChannelListener {
            sender,
            disconnected: AtomicBool::new(false),
        }));
        ListenerHandle { id, receiver }
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(lid, _)| *lid != id);
        listeners.len() != before
    }

    pub fn contains(&self, id: ListenerId) -> bool {
        self.listeners.read().iter().any(|(lid, _)| *lid == id)
    }

    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.read().is_empty()
    }

    pub fn clear(&self) {
        self.listeners.write().clear();
    }

    /// Deliver an event to every listener. A failing or panicking listener is logged and
    /// skipped; the rest still receive the event. Returns the number of successful
    /// deliveries.
    pub fn dispatch(&self, event: &FeatureEvent) -> usize {
        // Deliver outside the lock so listeners may register or unregister.
        let snapshot: Vec<_> = self.listeners.read().clone();
        let mut delivered = 0;
        let mut closed = Vec::new();

        for (id, listener) in &snapshot {
            match catch_unwind(AssertUnwindSafe(|| listener.changed(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => {
                    tracing::warn!(listener = id.0, kind = ?event.kind, error = %e, "problem issuing feature event");
                }
                Err(_) => {
                    tracing::warn!(listener = id.0, kind = ?event.kind, "feature listener panicked");
                }
            }
            if listener.is_closed() {
                closed.push(*id);
            }
        }

        if !closed.is_empty() {
            self.listeners.write().retain(|(id, _)| !closed.contains(id));
        }

        delivered
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
