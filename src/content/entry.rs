//! Registry record for one feature type of a data store.

use super::datastore::{DataStore, DataStoreInner};
use super::ContentState;
use crate::error::{Result, StoreError};
use crate::events::FeatureEvent;
use crate::transaction::{DiffTransactionState, Transaction};
use crate::types::TransactionId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_ENTRY_ID: AtomicU64 = AtomicU64::new(1);

/// One logical dataset. Owns a [`ContentState`] per transaction that has touched it.
pub struct ContentEntry {
    type_name: String,
    /// Key of this entry's state on a transaction.
    transaction_key: String,
    store: Weak<DataStoreInner>,
    this: Weak<ContentEntry>,
    auto_commit: Arc<ContentState>,
    states: RwLock<HashMap<TransactionId, Arc<ContentState>>>,
}

impl ContentEntry {
    pub(crate) fn new(type_name: impl Into<String>, store: Weak<DataStoreInner>) -> Arc<Self> {
        let type_name = type_name.into();
        Arc::new_cyclic(|this: &Weak<ContentEntry>| {
            let auto_commit = Arc::new(ContentState::new(
                this.clone(),
                type_name.clone(),
                TransactionId::AUTO_COMMIT,
            ));
            let mut states = HashMap::new();
            states.insert(TransactionId::AUTO_COMMIT, Arc::clone(&auto_commit));
            ContentEntry {
                transaction_key: format!(
                    "content-entry-{}:{}",
                    NEXT_ENTRY_ID.fetch_add(1, Ordering::SeqCst),
                    type_name
                ),
                type_name,
                store,
                this: this.clone(),
                auto_commit,
                states: RwLock::new(states),
            }
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Owning data store, unless it has been dropped.
    pub fn data_store(&self) -> Result<DataStore> {
        self.store
            .upgrade()
            .map(DataStore::from_inner)
            .ok_or_else(|| StoreError::Closed(format!("data store of {} was dropped", self.type_name)))
    }

    /// State for `transaction`, created from the auto-commit state on first use.
    ///
    /// A new explicit-transaction state also attaches a [`DiffTransactionState`] to the
    /// transaction so commit, rollback and close reach it.
    pub fn state(&self, transaction: &Transaction) -> Arc<ContentState> {
        let id = transaction.id();
        if id.is_auto_commit() {
            return Arc::clone(&self.auto_commit);
        }
        if let Some(state) = self.states.read().get(&id) {
            return Arc::clone(state);
        }

        let state = {
            let mut states = self.states.write();
            if let Some(state) = states.get(&id) {
                return Arc::clone(state);
            }
            let state = Arc::new(self.auto_commit.copy_for(id));
            states.insert(id, Arc::clone(&state));
            state
        };

        if let Some(entry) = self.this.upgrade() {
            let diff_state = Arc::new(DiffTransactionState::new(entry, Arc::clone(&state)));
            if let Err(e) = transaction.put_state(self.transaction_key.clone(), diff_state) {
                tracing::warn!(type_name = %self.type_name, error = %e, "could not attach transaction state");
                self.states.write().remove(&id);
            }
        }
        tracing::debug!(type_name = %self.type_name, transaction = ?id, "created content state");
        state
    }

    /// Diff state this entry attached to `transaction`.
    pub(crate) fn diff_state(&self, transaction: &Transaction) -> Result<Arc<DiffTransactionState>> {
        self.state(transaction);
        transaction
            .state_as::<DiffTransactionState>(&self.transaction_key)
            .ok_or_else(|| {
                StoreError::Transaction(format!(
                    "transaction {:?} has no state for {}",
                    transaction.id(),
                    self.type_name
                ))
            })
    }

    pub fn has_state(&self, transaction: TransactionId) -> bool {
        self.states.read().contains_key(&transaction)
    }

    pub fn state_count(&self) -> usize {
        self.states.read().len()
    }

    /// Detach and close the state of a finished transaction.
    pub(crate) fn remove_state(&self, transaction: TransactionId) {
        if transaction.is_auto_commit() {
            return;
        }
        let removed = self.states.write().remove(&transaction);
        if let Some(state) = removed {
            state.close();
        }
    }

    /// Relay an event to the listeners of every state except `source`.
    pub fn notify_feature_event(&self, source: &ContentState, event: &FeatureEvent) {
        let others: Vec<Arc<ContentState>> = self
            .states
            .read()
            .values()
            .filter(|s| !std::ptr::eq(s.as_ref(), source))
            .cloned()
            .collect();
        for state in others {
            state.deliver(event);
        }
    }

    /// Close every state. The entry is unusable afterwards.
    pub(crate) fn dispose(&self) {
        let states: Vec<_> = self.states.write().drain().map(|(_, s)| s).collect();
        for state in states {
            state.close();
        }
        self.auto_commit.close();
    }
}
