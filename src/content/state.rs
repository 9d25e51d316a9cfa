//! Per-transaction cached metadata and listeners.

use super::ContentEntry;
use crate::error::Result;
use crate::events::{
    BatchFeatureEvent, FeatureEvent, FeatureListener, ListenerHandle, ListenerId, ListenerRegistry,
};
use crate::schema::FeatureType;
use crate::types::{Envelope, TransactionId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// A lazily computed, independently invalidated cached value.
#[derive(Debug)]
pub struct CacheCell<T> {
    value: Mutex<Option<T>>,
}

impl<T: Clone> CacheCell<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
        }
    }

    pub fn get(&self) -> Option<T> {
        self.value.lock().clone()
    }

    pub fn set(&self, value: T) {
        *self.value.lock() = Some(value);
    }

    pub fn clear(&self) {
        *self.value.lock() = None;
    }

    /// Return the cached value, computing it under the cell's lock when absent. A failed
    /// computation leaves the cell empty.
    pub fn get_or_try_init(&self, init: impl FnOnce() -> Result<T>) -> Result<T> {
        let mut value = self.value.lock();
        if let Some(v) = value.as_ref() {
            return Ok(v.clone());
        }
        let computed = init()?;
        *value = Some(computed.clone());
        Ok(computed)
    }
}

impl<T: Clone> Default for CacheCell<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// State of one feature type as seen by one transaction.
pub struct ContentState {
    entry: Weak<ContentEntry>,
    type_name: String,
    transaction: TransactionId,
    feature_type: CacheCell<Arc<FeatureType>>,
    /// Unrestricted count; `None` inside means the backend found counting too expensive.
    count: CacheCell<Option<usize>>,
    /// Unrestricted bounds; `None` inside means no feature has a geometry.
    bounds: CacheCell<Option<Envelope>>,
    listeners: ListenerRegistry,
    batch: Mutex<Option<BatchFeatureEvent>>,
    closed: AtomicBool,
}

impl ContentState {
    pub(crate) fn new(entry: Weak<ContentEntry>, type_name: String, transaction: TransactionId) -> Self {
        Self {
            entry,
            type_name,
            transaction,
            feature_type: CacheCell::new(),
            count: CacheCell::new(),
            bounds: CacheCell::new(),
            listeners: ListenerRegistry::new(),
            batch: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// A state for another transaction starting from this one's cached values. Listeners
    /// and pending batch events are not carried over.
    pub(crate) fn copy_for(&self, transaction: TransactionId) -> Self {
        let copy = Self::new(self.entry.clone(), self.type_name.clone(), transaction);
        if let Some(ft) = self.feature_type.get() {
            copy.feature_type.set(ft);
        }
        if let Some(count) = self.count.get() {
            copy.count.set(count);
        }
        if let Some(bounds) = self.bounds.get() {
            copy.bounds.set(bounds);
        }
        copy
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn transaction(&self) -> TransactionId {
        self.transaction
    }

    pub fn entry(&self) -> Option<Arc<ContentEntry>> {
        self.entry.upgrade()
    }

    pub fn feature_type(&self) -> &CacheCell<Arc<FeatureType>> {
        &self.feature_type
    }

    pub fn count(&self) -> &CacheCell<Option<usize>> {
        &self.count
    }

    pub fn bounds(&self) -> &CacheCell<Option<Envelope>> {
        &self.bounds
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn add_listener(&self, listener: Arc<dyn FeatureListener>) -> ListenerId {
        self.listeners.add(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    pub fn subscribe(&self, buffer_size: usize) -> ListenerHandle {
        self.listeners.subscribe(buffer_size)
    }

    /// Drop cached count and bounds after a content change.
    fn flush_content(&self) {
        self.count.clear();
        self.bounds.clear();
    }

    /// Drop every cached value. Listeners stay registered.
    pub fn flush(&self) {
        self.feature_type.clear();
        self.flush_content();
    }

    /// Terminal: clears caches, listeners and any pending batch.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.flush();
        self.listeners.clear();
        *self.batch.lock() = None;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Hand an event to this state's own listeners after invalidating its counts.
    pub fn deliver(&self, event: &FeatureEvent) {
        self.flush_content();
        self.listeners.dispatch(event);
    }

    /// Fire a per-feature event.
    ///
    /// Under auto-commit every other state of the entry hears about it as well. Under a
    /// transaction the event goes into the pending batch and reaches only this state's
    /// listeners until commit or rollback.
    pub fn fire_feature_event(&self, event: &FeatureEvent) {
        if self.transaction.is_auto_commit() {
            if let Some(entry) = self.entry.upgrade() {
                entry.notify_feature_event(self, event);
            }
        } else {
            self.batch
                .lock()
                .get_or_insert_with(|| BatchFeatureEvent::new(self.type_name.clone(), self.transaction))
                .add(event);
        }
        self.deliver(event);
    }

    pub(crate) fn replace_batch(&self, batch: BatchFeatureEvent) {
        *self.batch.lock() = Some(batch);
    }

    /// Drop the pending batch without telling anyone.
    pub(crate) fn discard_batch(&self) {
        *self.batch.lock() = None;
    }

    pub fn has_pending_batch(&self) -> bool {
        self.batch.lock().is_some()
    }

    /// Seal the pending batch as a commit or rollback event, deliver it to this state's
    /// listeners and relay it to every other state. Nothing happens when no batch is
    /// pending.
    pub fn fire_batch_feature_event(&self, commit: bool) {
        let Some(batch) = self.batch.lock().take() else {
            return;
        };
        let event = batch.seal(commit);
        self.deliver(&event);
        if let Some(entry) = self.entry.upgrade() {
            entry.notify_feature_event(self, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;

    #[test]
    fn test_cache_cell() {
        let cell: CacheCell<usize> = CacheCell::new();
        assert_eq!(cell.get(), None);
        assert_eq!(cell.get_or_try_init(|| Ok(3)).unwrap(), 3);
        assert_eq!(cell.get_or_try_init(|| Ok(4)).unwrap(), 3);
        cell.clear();
        assert!(cell
            .get_or_try_init(|| Err(StoreError::Unsupported("x".into())))
            .is_err());
        assert_eq!(cell.get(), None);
    }

    #[test]
    fn test_copy_carries_caches_only() {
        let state = ContentState::new(Weak::new(), "t".into(), TransactionId::AUTO_COMMIT);
        state.count().set(Some(12));
        state.bounds().set(Some(Envelope::new(0.0, 0.0, 1.0, 1.0)));
        let _handle = state.subscribe(4);

        let copy = state.copy_for(TransactionId(9));
        assert_eq!(copy.transaction(), TransactionId(9));
        assert_eq!(copy.count().get(), Some(Some(12)));
        assert_eq!(copy.bounds().get(), state.bounds().get());
        assert!(copy.listeners().is_empty());
    }

    #[test]
    fn test_transaction_events_are_batched() {
        use crate::events::FeatureEventKind;
        use crate::types::FeatureId;

        let state = ContentState::new(Weak::new(), "t".into(), TransactionId(5));
        let handle = state.subscribe(8);
        state.count().set(Some(1));
        let event = FeatureEvent {
            kind: FeatureEventKind::Added,
            type_name: "t".into(),
            transaction: TransactionId(5),
            bounds: None,
            fids: vec![FeatureId::from("new0")],
        };
        state.fire_feature_event(&event);
        assert!(state.has_pending_batch());
        assert_eq!(state.count().get(), None);

        state.fire_batch_feature_event(false);
        let kinds: Vec<_> = handle.drain().into_iter().map(|e| e.kind).collect();
        assert_eq!(kinds, vec![FeatureEventKind::Added, FeatureEventKind::Rollback]);
        assert!(!state.has_pending_batch());
    }

    #[test]
    fn test_close_is_terminal() {
        let state = ContentState::new(Weak::new(), "t".into(), TransactionId(5));
        let _handle = state.subscribe(1);
        state.close();
        assert!(state.is_closed());
        assert!(state.listeners().is_empty());
    }
}
