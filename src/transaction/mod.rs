//! Transactions and per-transaction state.
//!
//! A [`Transaction`] is a shared handle carrying keyed [`TransactionState`]s. Each
//! feature type touched under a transaction registers one state holding its pending
//! [`Diff`]; the locking manager registers another to release transaction locks.

mod diff;
mod diff_state;

pub use diff::{Diff, Modification};
pub use diff_state::DiffTransactionState;

use crate::error::{Result, StoreError};
use crate::types::TransactionId;
use parking_lot::Mutex;
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

/// State attached to a transaction under a key.
pub trait TransactionState: Send + Sync {
    /// Called with `Some` when attached and `None` when the transaction is closed or the
    /// state is removed.
    fn set_transaction(&self, transaction: Option<&Transaction>);

    fn add_authorization(&self, _authorization: &str) -> Result<()> {
        Ok(())
    }

    fn commit(&self) -> Result<()>;

    fn rollback(&self) -> Result<()>;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

struct TransactionInner {
    id: TransactionId,
    handle: Option<String>,
    states: Mutex<HashMap<String, Arc<dyn TransactionState>>>,
    properties: Mutex<HashMap<String, String>>,
    authorizations: Mutex<BTreeSet<String>>,
    closed: AtomicBool,
}

/// Cloneable transaction handle. Clones refer to the same transaction.
#[derive(Clone)]
pub struct Transaction {
    inner: Arc<TransactionInner>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::build(
            TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst)),
            None,
        )
    }

    pub fn with_handle(handle: impl Into<String>) -> Self {
        Self::build(
            TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::SeqCst)),
            Some(handle.into()),
        )
    }

    /// The shared auto-commit transaction. Every write under it is applied immediately.
    pub fn auto_commit() -> Transaction {
        static AUTO_COMMIT: OnceLock<Transaction> = OnceLock::new();
        AUTO_COMMIT
            .get_or_init(|| Self::build(TransactionId::AUTO_COMMIT, Some("auto-commit".into())))
            .clone()
    }

    fn build(id: TransactionId, handle: Option<String>) -> Self {
        Self {
            inner: Arc::new(TransactionInner {
                id,
                handle,
                states: Mutex::new(HashMap::new()),
                properties: Mutex::new(HashMap::new()),
                authorizations: Mutex::new(BTreeSet::new()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.id
    }

    pub fn handle(&self) -> Option<&str> {
        self.inner.handle.as_deref()
    }

    pub fn is_auto_commit(&self) -> bool {
        self.inner.id.is_auto_commit()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    fn ensure_explicit(&self, operation: &str) -> Result<()> {
        if self.is_auto_commit() {
            return Err(StoreError::Transaction(format!(
                "{} is not supported on auto-commit",
                operation
            )));
        }
        if self.is_closed() {
            return Err(StoreError::Transaction(format!(
                "transaction {:?} is closed",
                self.id()
            )));
        }
        Ok(())
    }

    /// Attach a state under `key`.
    pub fn put_state(&self, key: impl Into<String>, state: Arc<dyn TransactionState>) -> Result<()> {
        self.ensure_explicit("put_state")?;
        let key = key.into();
        {
            let mut states = self.inner.states.lock();
            if states.contains_key(&key) {
                return Err(StoreError::Transaction(format!(
                    "state already registered for {}",
                    key
                )));
            }
            states.insert(key, Arc::clone(&state));
        }
        state.set_transaction(Some(self));
        Ok(())
    }

    pub fn state(&self, key: &str) -> Option<Arc<dyn TransactionState>> {
        self.inner.states.lock().get(key).cloned()
    }

    /// Look up a state and downcast it to its concrete type.
    pub fn state_as<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.state(key)?.as_any_arc().downcast::<T>().ok()
    }

    /// Detach a state; it is told via `set_transaction(None)`.
    pub fn remove_state(&self, key: &str) -> Option<Arc<dyn TransactionState>> {
        let removed = self.inner.states.lock().remove(key);
        if let Some(state) = &removed {
            state.set_transaction(None);
        }
        removed
    }

    pub fn property(&self, key: &str) -> Option<String> {
        self.inner.properties.lock().get(key).cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.properties.lock().insert(key.into(), value.into());
    }

    /// Grant this transaction a lock authorization and let every state react to it.
    pub fn add_authorization(&self, authorization: impl Into<String>) -> Result<()> {
        self.ensure_explicit("add_authorization")?;
        let authorization = authorization.into();
        self.inner.authorizations.lock().insert(authorization.clone());

        let mut first_error = None;
        for state in self.states_snapshot() {
            if let Err(e) = state.add_authorization(&authorization) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn has_authorization(&self, authorization: &str) -> bool {
        self.inner.authorizations.lock().contains(authorization)
    }

    pub fn authorizations(&self) -> Vec<String> {
        self.inner.authorizations.lock().iter().cloned().collect()
    }

    fn states_snapshot(&self) -> Vec<Arc<dyn TransactionState>> {
        self.inner.states.lock().values().cloned().collect()
    }

    /// Commit every attached state. All states are visited even when one fails; the
    /// first error is returned.
    pub fn commit(&self) -> Result<()> {
        self.ensure_explicit("commit")?;
        tracing::debug!(transaction = ?self.id(), "committing transaction");

        let mut first_error = None;
        for state in self.states_snapshot() {
            if let Err(e) = state.commit() {
                tracing::warn!(transaction = ?self.id(), error = %e, "state failed to commit");
                first_error.get_or_insert(e);
            }
        }
        self.inner.authorizations.lock().clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Roll back every attached state.
    pub fn rollback(&self) -> Result<()> {
        self.ensure_explicit("rollback")?;
        tracing::debug!(transaction = ?self.id(), "rolling back transaction");

        let mut first_error = None;
        for state in self.states_snapshot() {
            if let Err(e) = state.rollback() {
                tracing::warn!(transaction = ?self.id(), error = %e, "state failed to roll back");
                first_error.get_or_insert(e);
            }
        }
        self.inner.authorizations.lock().clear();
        first_error.map_or(Ok(()), Err)
    }

    /// Detach every state and make the handle unusable. Closing twice is a no-op.
    pub fn close(&self) {
        if self.is_auto_commit() || self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let states: Vec<_> = self.inner.states.lock().drain().map(|(_, s)| s).collect();
        for state in states {
            state.set_transaction(None);
        }
        self.inner.properties.lock().clear();
        self.inner.authorizations.lock().clear();
        tracing::debug!(transaction = ?self.id(), "transaction closed");
    }
}

impl Drop for TransactionInner {
    // A transaction dropped without close still detaches its states.
    fn drop(&mut self) {
        if self.id.is_auto_commit() || *self.closed.get_mut() {
            return;
        }
        for (_, state) in self.states.get_mut().drain() {
            state.set_transaction(None);
        }
        tracing::debug!(transaction = ?self.id, "transaction dropped without close");
    }
}

impl Default for Transaction {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for Transaction {}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.inner.id)
            .field("handle", &self.inner.handle)
            .field("closed", &self.is_closed())
            .finish()
    }
}
