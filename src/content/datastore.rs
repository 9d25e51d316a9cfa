//! Data store handle and entry registry.

use super::{ContentEntry, DataStoreBackend, FeatureBackend, FeatureSource, FeatureStore};
use crate::error::{Result, StoreError};
use crate::filter::Filter;
use crate::locking::InProcessLockingManager;
use crate::query::Query;
use crate::reader::BoxReader;
use crate::schema::FeatureType;
use crate::transaction::Transaction;
use crate::writer::{BoxWriter, WriteFlags};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Configuration for a data store.
#[derive(Clone, Debug)]
pub struct DataStoreConfig {
    /// Provide feature locking in-process for backends without native locking.
    pub in_process_locking: bool,

    /// Buffer size of channel listeners created by [`FeatureSource::listen`].
    pub listener_buffer: usize,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            in_process_locking: true,
            listener_buffer: 1024,
        }
    }
}

pub(crate) struct DataStoreInner {
    backend: Arc<dyn DataStoreBackend>,
    entries: RwLock<HashMap<String, Arc<ContentEntry>>>,
    /// Serializes entry creation; lookups only take the read lock.
    creating: Mutex<()>,
    locking: Option<Arc<InProcessLockingManager>>,
    config: DataStoreConfig,
    disposed: AtomicBool,
}

/// Transaction-aware access to the feature types of a backend.
///
/// Cloning is cheap; clones share entries, states and the locking manager.
#[derive(Clone)]
pub struct DataStore {
    inner: Arc<DataStoreInner>,
}

impl DataStore {
    pub fn new(backend: Arc<dyn DataStoreBackend>, config: DataStoreConfig) -> Self {
        let locking = config
            .in_process_locking
            .then(|| Arc::new(InProcessLockingManager::new()));
        Self {
            inner: Arc::new(DataStoreInner {
                backend,
                entries: RwLock::new(HashMap::new()),
                creating: Mutex::new(()),
                locking,
                config,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<DataStoreInner>) -> Self {
        Self { inner }
    }

    pub fn config(&self) -> &DataStoreConfig {
        &self.inner.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.disposed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed("data store disposed".into()));
        }
        Ok(())
    }

    pub fn type_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.inner.backend.create_type_names()
    }

    /// Entry for a type name, created on first use.
    pub fn entry(&self, type_name: &str) -> Result<Arc<ContentEntry>> {
        self.ensure_open()?;
        if let Some(entry) = self.inner.entries.read().get(type_name) {
            return Ok(Arc::clone(entry));
        }

        let _creating = self.inner.creating.lock();
        if let Some(entry) = self.inner.entries.read().get(type_name) {
            return Ok(Arc::clone(entry));
        }
        if !self.type_names()?.iter().any(|n| n == type_name) {
            return Err(StoreError::TypeNotFound(type_name.to_string()));
        }
        let entry = ContentEntry::new(type_name, Arc::downgrade(&self.inner));
        self.inner
            .entries
            .write()
            .insert(type_name.to_string(), Arc::clone(&entry));
        tracing::debug!(type_name, "created content entry");
        Ok(entry)
    }

    pub(crate) fn backend_source(&self, entry: &Arc<ContentEntry>) -> Result<Arc<dyn FeatureBackend>> {
        self.ensure_open()?;
        self.inner.backend.create_feature_source(entry)
    }

    pub fn schema(&self, type_name: &str) -> Result<Arc<FeatureType>> {
        self.feature_source(type_name)?.schema()
    }

    pub fn feature_source(&self, type_name: &str) -> Result<FeatureSource> {
        self.feature_source_in(type_name, &Transaction::auto_commit())
    }

    pub fn feature_source_in(&self, type_name: &str, transaction: &Transaction) -> Result<FeatureSource> {
        let entry = self.entry(type_name)?;
        let backend = self.backend_source(&entry)?;
        Ok(FeatureSource::new(
            entry,
            backend,
            Query::new(type_name),
            transaction.clone(),
            self.inner.locking.clone(),
            self.inner.config.listener_buffer,
        ))
    }

    /// Writable access; fails with [`StoreError::ReadOnly`] for read-only types.
    pub fn feature_store(&self, type_name: &str, transaction: &Transaction) -> Result<FeatureStore> {
        FeatureStore::new(self.feature_source_in(type_name, transaction)?)
    }

    /// Reader for a query naming its type.
    pub fn feature_reader(&self, query: &Query, transaction: &Transaction) -> Result<BoxReader> {
        let type_name = query
            .type_name
            .as_deref()
            .ok_or_else(|| StoreError::InvalidQuery("query does not name a feature type".into()))?;
        self.feature_source_in(type_name, transaction)?.reader(query)
    }

    /// Writer over the features matching `filter`, able to append past the end.
    pub fn feature_writer(&self, type_name: &str, filter: Filter, transaction: &Transaction) -> Result<BoxWriter> {
        self.feature_store(type_name, transaction)?
            .writer(filter, WriteFlags::UPDATE | WriteFlags::APPEND)
    }

    pub fn feature_writer_append(&self, type_name: &str, transaction: &Transaction) -> Result<BoxWriter> {
        self.feature_store(type_name, transaction)?.append_writer()
    }

    pub fn create_schema(&self, feature_type: &FeatureType) -> Result<()> {
        self.ensure_open()?;
        if self.type_names()?.iter().any(|n| n == feature_type.name()) {
            return Err(StoreError::TypeExists(feature_type.name().to_string()));
        }
        self.inner.backend.create_schema(feature_type)?;
        tracing::debug!(type_name = feature_type.name(), "schema created");
        Ok(())
    }

    pub fn remove_schema(&self, type_name: &str) -> Result<()> {
        self.ensure_open()?;
        if !self.type_names()?.iter().any(|n| n == type_name) {
            return Err(StoreError::TypeNotFound(type_name.to_string()));
        }
        self.inner.backend.remove_schema(type_name)?;
        let removed = self.inner.entries.write().remove(type_name);
        if let Some(entry) = removed {
            entry.dispose();
        }
        tracing::debug!(type_name, "schema removed");
        Ok(())
    }

    pub fn locking_manager(&self) -> Option<&Arc<InProcessLockingManager>> {
        self.inner.locking.as_ref()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Close every entry and release the backend. Later calls fail with
    /// [`StoreError::Closed`].
    pub fn dispose(&self) -> Result<()> {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let entries: Vec<_> = self.inner.entries.write().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.dispose();
        }
        self.inner.backend.dispose()
    }
}

impl std::fmt::Debug for DataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStore")
            .field("entries", &self.inner.entries.read().len())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}
