//! In-process feature locking.
//!
//! Locks are either bound to a transaction (released when it commits, rolls back or
//! closes) or identified by an authorization string with an expiry. A transaction may
//! modify a locked feature when it owns the transaction lock or holds the authorization.

use crate::error::{Result, StoreError};
use crate::transaction::{Transaction, TransactionState};
use crate::types::{FeatureId, TransactionId};
use parking_lot::Mutex;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Key under which the locking manager registers its transaction state.
const LOCKING_STATE_KEY: &str = "in-process-locking";

static NEXT_LOCK: AtomicU64 = AtomicU64::new(1);

/// Lock request used by feature sources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FeatureLock {
    /// Held until the requesting transaction ends.
    Transaction,
    /// Held by whoever presents `id`, until `duration` elapses without a refresh.
    Authorization { id: String, duration: Duration },
}

impl FeatureLock {
    /// Authorization lock with a generated id.
    pub fn new(duration: Duration) -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let id = format!("lock-{:x}-{}", nanos, NEXT_LOCK.fetch_add(1, Ordering::SeqCst));
        FeatureLock::Authorization { id, duration }
    }

    pub fn with_id(id: impl Into<String>, duration: Duration) -> Self {
        FeatureLock::Authorization {
            id: id.into(),
            duration,
        }
    }

    pub fn authorization(&self) -> Option<&str> {
        match self {
            FeatureLock::Transaction => None,
            FeatureLock::Authorization { id, .. } => Some(id),
        }
    }
}

impl Default for FeatureLock {
    fn default() -> Self {
        FeatureLock::Transaction
    }
}

#[derive(Clone, Debug)]
enum Lock {
    Transaction(TransactionId),
    Memory {
        authorization: String,
        duration: Duration,
        expires: Instant,
    },
}

impl Lock {
    fn is_expired(&self, now: Instant) -> bool {
        match self {
            Lock::Transaction(_) => false,
            Lock::Memory { expires, .. } => *expires <= now,
        }
    }

    fn is_authorized(&self, transaction: &Transaction) -> bool {
        match self {
            Lock::Transaction(id) => *id == transaction.id(),
            Lock::Memory { authorization, .. } => transaction.has_authorization(authorization),
        }
    }

    fn is_matched(&self, authorization: &str) -> bool {
        matches!(self, Lock::Memory { authorization: a, .. } if a == authorization)
    }
}

/// type name -> feature id -> lock
type LockTable = HashMap<String, HashMap<FeatureId, Lock>>;

/// Locking manager for backends without native locking.
pub struct InProcessLockingManager {
    locks: Arc<Mutex<LockTable>>,
}

impl InProcessLockingManager {
    pub fn new() -> Self {
        Self {
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Live lock on a feature, dropping it first if it has expired.
    fn live_lock<'a>(table: &'a mut LockTable, type_name: &str, fid: &FeatureId) -> Option<&'a Lock> {
        let locks = table.get_mut(type_name)?;
        if locks.get(fid).is_some_and(|l| l.is_expired(Instant::now())) {
            locks.remove(fid);
        }
        locks.get(fid)
    }

    pub fn lock_feature_id(
        &self,
        type_name: &str,
        fid: &FeatureId,
        transaction: &Transaction,
        lock: &FeatureLock,
    ) -> Result<()> {
        let new_lock = match lock {
            FeatureLock::Transaction => {
                if transaction.is_auto_commit() {
                    return Err(StoreError::Transaction(
                        "transaction locks require an explicit transaction".into(),
                    ));
                }
                Lock::Transaction(transaction.id())
            }
            FeatureLock::Authorization { id, duration } => Lock::Memory {
                authorization: id.clone(),
                duration: *duration,
                expires: Instant::now() + *duration,
            },
        };

        {
            let mut table = self.locks.lock();
            match Self::live_lock(&mut table, type_name, fid) {
                Some(Lock::Transaction(owner)) if *owner == transaction.id() => return Ok(()),
                Some(_) => {
                    return Err(StoreError::FeatureLocked {
                        type_name: type_name.to_string(),
                        fid: fid.clone(),
                    })
                }
                None => {}
            }
            table
                .entry(type_name.to_string())
                .or_default()
                .insert(fid.clone(), new_lock);
        }

        if matches!(lock, FeatureLock::Transaction) && transaction.state(LOCKING_STATE_KEY).is_none() {
            transaction.put_state(
                LOCKING_STATE_KEY,
                Arc::new(LockingTransactionState {
                    locks: Arc::clone(&self.locks),
                    transaction: Mutex::new(None),
                }),
            )?;
        }
        tracing::debug!(type_name, fid = %fid, transaction = ?transaction.id(), "feature locked");
        Ok(())
    }

    /// Release one feature's lock. The transaction must be authorized for it.
    pub fn unlock_feature_id(
        &self,
        type_name: &str,
        fid: &FeatureId,
        transaction: &Transaction,
        lock: &FeatureLock,
    ) -> Result<()> {
        let mut table = self.locks.lock();
        let authorized = match Self::live_lock(&mut table, type_name, fid) {
            None => return Ok(()),
            Some(existing) => {
                existing.is_authorized(transaction)
                    || lock.authorization().is_some_and(|auth| existing.is_matched(auth))
            }
        };
        if !authorized {
            return Err(StoreError::FeatureLocked {
                type_name: type_name.to_string(),
                fid: fid.clone(),
            });
        }
        if let Some(locks) = table.get_mut(type_name) {
            locks.remove(fid);
        }
        Ok(())
    }

    /// Extend every lock held under `authorization`. Returns whether any lock was found.
    pub fn refresh(&self, authorization: &str, transaction: &Transaction) -> Result<bool> {
        self.for_authorization(authorization, transaction, |lock| {
            if let Lock::Memory {
                duration, expires, ..
            } = lock
            {
                *expires = Instant::now() + *duration;
            }
            true
        })
    }

    /// Drop every lock held under `authorization`. Returns whether any lock was found.
    pub fn release(&self, authorization: &str, transaction: &Transaction) -> Result<bool> {
        self.for_authorization(authorization, transaction, |_| false)
    }

    /// Visit every live lock matching `authorization`; the closure returns whether to keep it.
    fn for_authorization(
        &self,
        authorization: &str,
        transaction: &Transaction,
        mut visit: impl FnMut(&mut Lock) -> bool,
    ) -> Result<bool> {
        let now = Instant::now();
        let mut table = self.locks.lock();
        for locks in table.values_mut() {
            locks.retain(|_, l| !l.is_expired(now));
        }
        for (type_name, locks) in table.iter() {
            for (fid, lock) in locks {
                if lock.is_matched(authorization) && !lock.is_authorized(transaction) {
                    return Err(StoreError::FeatureLocked {
                        type_name: type_name.clone(),
                        fid: fid.clone(),
                    });
                }
            }
        }

        let mut found = false;
        for locks in table.values_mut() {
            locks.retain(|_, lock| {
                if !lock.is_matched(authorization) {
                    return true;
                }
                found = true;
                visit(lock)
            });
        }
        Ok(found)
    }

    /// Whether any live lock is held under `authorization`.
    pub fn exists(&self, authorization: &str) -> bool {
        let now = Instant::now();
        self.locks
            .lock()
            .values()
            .flat_map(|locks| locks.values())
            .any(|l| l.is_matched(authorization) && !l.is_expired(now))
    }

    pub fn is_locked(&self, type_name: &str, fid: &FeatureId) -> bool {
        Self::live_lock(&mut self.locks.lock(), type_name, fid).is_some()
    }

    /// Fail with [`StoreError::FeatureLocked`] unless `transaction` may modify the feature.
    pub fn assert_access(&self, type_name: &str, fid: &FeatureId, transaction: &Transaction) -> Result<()> {
        let mut table = self.locks.lock();
        match Self::live_lock(&mut table, type_name, fid) {
            Some(lock) if !lock.is_authorized(transaction) => Err(StoreError::FeatureLocked {
                type_name: type_name.to_string(),
                fid: fid.clone(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for InProcessLockingManager {
    fn default() -> Self {
        Self::new()
    }
}

fn release_transaction_locks(locks: &Mutex<LockTable>, id: TransactionId) {
    let mut table = locks.lock();
    for locks in table.values_mut() {
        locks.retain(|_, lock| !matches!(lock, Lock::Transaction(owner) if *owner == id));
    }
    table.retain(|_, locks| !locks.is_empty());
    tracing::debug!(transaction = ?id, "transaction locks released");
}

/// Releases a transaction's locks when it ends.
struct LockingTransactionState {
    locks: Arc<Mutex<LockTable>>,
    transaction: Mutex<Option<TransactionId>>,
}

impl LockingTransactionState {
    fn release(&self) {
        if let Some(id) = *self.transaction.lock() {
            release_transaction_locks(&self.locks, id);
        }
    }
}

impl TransactionState for LockingTransactionState {
    fn set_transaction(&self, transaction: Option<&Transaction>) {
        match transaction {
            Some(tx) => *self.transaction.lock() = Some(tx.id()),
            None => {
                self.release();
                *self.transaction.lock() = None;
            }
        }
    }

    fn commit(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        self.release();
        Ok(())
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
