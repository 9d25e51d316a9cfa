//! Query-aware read access to one feature type.

use super::{CacheCell, ContentEntry, ContentState, FeatureBackend, FeatureCollection};
use crate::capabilities::{Capabilities, QueryCapabilities};
use crate::crs::find_transform;
use crate::error::{Result, StoreError};
use crate::events::{FeatureListener, ListenerHandle, ListenerId};
use crate::filter::{can_sort, sort_property_names, Filter, SortBy};
use crate::locking::{FeatureLock, InProcessLockingManager};
use crate::query::Query;
use crate::reader::{
    read_all, skip, BoxReader, DiffReader, FilteringReader, ForceCrsReader, MaxFeatureReader,
    ReprojectReader, RetypeReader, SortedReader,
};
use crate::schema::FeatureType;
use crate::transaction::{Diff, Transaction};
use crate::types::{Envelope, FeatureId};
use parking_lot::Mutex;
use std::sync::Arc;

struct SourceInner {
    entry: Arc<ContentEntry>,
    backend: Arc<dyn FeatureBackend>,
    capabilities: Capabilities,
    defining: Query,
    transaction: Transaction,
    /// Projected schema of a view; lives on the source since views are per instance.
    view_schema: CacheCell<Arc<FeatureType>>,
    locking: Option<Arc<InProcessLockingManager>>,
    feature_lock: Mutex<FeatureLock>,
    listener_buffer: usize,
}

/// Read access to one feature type under one transaction.
///
/// Every caller query is joined with the source's defining query before it reaches the
/// backend. Clauses the backend cannot apply natively are enforced by reader wrappers.
#[derive(Clone)]
pub struct FeatureSource {
    inner: Arc<SourceInner>,
}

impl FeatureSource {
    pub(crate) fn new(
        entry: Arc<ContentEntry>,
        backend: Arc<dyn FeatureBackend>,
        defining: Query,
        transaction: Transaction,
        locking: Option<Arc<InProcessLockingManager>>,
        listener_buffer: usize,
    ) -> Self {
        let capabilities = backend.capabilities();
        Self {
            inner: Arc::new(SourceInner {
                entry,
                backend,
                capabilities,
                defining,
                transaction,
                view_schema: CacheCell::new(),
                locking,
                feature_lock: Mutex::new(FeatureLock::Transaction),
                listener_buffer,
            }),
        }
    }

    fn derive(&self, defining: Query, transaction: Transaction) -> Self {
        Self::new(
            Arc::clone(&self.inner.entry),
            Arc::clone(&self.inner.backend),
            defining,
            transaction,
            self.inner.locking.clone(),
            self.inner.listener_buffer,
        )
    }

    pub fn type_name(&self) -> &str {
        self.inner.entry.type_name()
    }

    pub fn entry(&self) -> &Arc<ContentEntry> {
        &self.inner.entry
    }

    pub(crate) fn backend(&self) -> &Arc<dyn FeatureBackend> {
        &self.inner.backend
    }

    pub(crate) fn locking(&self) -> Option<&Arc<InProcessLockingManager>> {
        self.inner.locking.as_ref()
    }

    pub fn transaction(&self) -> &Transaction {
        &self.inner.transaction
    }

    pub fn defining_query(&self) -> &Query {
        &self.inner.defining
    }

    /// Native capabilities of the backend.
    pub fn capabilities(&self) -> Capabilities {
        self.inner.capabilities
    }

    pub fn query_capabilities(&self) -> Result<QueryCapabilities> {
        Ok(QueryCapabilities::new(
            self.inner.capabilities,
            self.absolute_schema()?,
        ))
    }

    /// The same source under another transaction.
    pub fn in_transaction(&self, transaction: &Transaction) -> Self {
        self.derive(self.inner.defining.clone(), transaction.clone())
    }

    pub fn state(&self) -> Arc<ContentState> {
        self.inner.entry.state(&self.inner.transaction)
    }

    pub fn is_view(&self) -> bool {
        self.inner.defining != Query::new(self.type_name())
    }

    /// Writes go through a diff rather than the backend.
    pub(crate) fn is_transactional(&self) -> bool {
        !self.inner.transaction.is_auto_commit() && !self.inner.capabilities.transact
    }

    /// Full schema of the type, cached on the transaction's state.
    pub fn absolute_schema(&self) -> Result<Arc<FeatureType>> {
        self.state()
            .feature_type()
            .get_or_try_init(|| Ok(Arc::new(self.inner.backend.build_feature_type()?)))
    }

    /// Schema of the features this source returns; differs from the absolute schema for
    /// views that project attributes or change the reference system.
    pub fn schema(&self) -> Result<Arc<FeatureType>> {
        if !self.is_view() {
            return self.absolute_schema();
        }
        self.inner
            .view_schema
            .get_or_try_init(|| self.result_schema(&Query::all()))
    }

    /// Schema of the features a query would return.
    pub(crate) fn result_schema(&self, query: &Query) -> Result<Arc<FeatureType>> {
        let joined = self.join_query(query)?;
        let absolute = self.absolute_schema()?;
        let mut schema = match &joined.properties {
            Some(names) => absolute.retype(names)?,
            None => absolute.as_ref().clone(),
        };
        if let Some(crs) = joined.reproject.as_ref().or(joined.crs.as_ref()) {
            schema = schema.with_crs(Some(crs.clone()));
        }
        Ok(Arc::new(schema))
    }

    /// Join with the defining query and resolve namespaced attribute names.
    pub(crate) fn join_query(&self, query: &Query) -> Result<Query> {
        let joined = Query::join(&self.inner.defining, query)?;
        let schema = self.absolute_schema()?;
        Ok(joined.resolve_property_names(&schema))
    }

    /// The transaction's pending diff, when there is one to overlay.
    fn pending_diff(&self) -> Result<Option<Arc<Mutex<Diff>>>> {
        if !self.is_transactional() {
            return Ok(None);
        }
        let diff = self.inner.entry.diff_state(&self.inner.transaction)?.diff();
        let empty = diff.lock().is_empty();
        Ok(if empty { None } else { Some(diff) })
    }

    pub fn bounds(&self) -> Result<Option<Envelope>> {
        self.bounds_of(&Query::all())
    }

    pub fn bounds_of(&self, query: &Query) -> Result<Option<Envelope>> {
        let joined = self.join_query(query)?;
        let caps = self.inner.capabilities;
        let must_read = joined.max_features.is_some()
            || joined.offset() > 0
            || joined.reproject.is_some()
            || (!caps.filter && !joined.filter.is_include())
            || self.pending_diff()?.is_some();

        if must_read {
            let mut bounds = None;
            for feature in read_all(self.reader(query)?)? {
                bounds = Envelope::union(bounds, feature.bounds());
            }
            return Ok(bounds);
        }

        let tx = &self.inner.transaction;
        if joined.filter.is_include() {
            self.state()
                .bounds()
                .get_or_try_init(|| self.inner.backend.bounds_internal(&joined, tx))
        } else {
            self.inner.backend.bounds_internal(&joined, tx)
        }
    }

    /// Number of features a query returns, or `None` when the backend finds counting too
    /// expensive.
    pub fn count(&self, query: &Query) -> Result<Option<usize>> {
        let joined = self.join_query(query)?;
        if self.pending_diff()?.is_some() {
            return Ok(Some(read_all(self.reader(query)?)?.len()));
        }
        if !self.inner.capabilities.filter && !joined.filter.is_include() {
            return Ok(None);
        }

        let unpaged = joined.without_paging();
        let tx = &self.inner.transaction;
        let total = if unpaged.filter.is_include() {
            self.state()
                .count()
                .get_or_try_init(|| self.inner.backend.count_internal(&unpaged, tx))?
        } else {
            self.inner.backend.count_internal(&unpaged, tx)?
        };

        Ok(total.map(|n| {
            let n = n.saturating_sub(joined.offset());
            joined.max_features.map_or(n, |max| n.min(max))
        }))
    }

    /// Lazy collection of the features matching `query`.
    pub fn features(&self, query: &Query) -> FeatureCollection {
        FeatureCollection::new(self.clone(), query.clone())
    }

    pub fn all_features(&self) -> FeatureCollection {
        self.features(&Query::all())
    }

    /// Read the features matching `query`.
    pub fn reader(&self, query: &Query) -> Result<BoxReader> {
        let mut query = self.join_query(query)?;
        let caps = self.inner.capabilities;

        // Paging is only stable over a defined order.
        if query.offset() > 0 && !query.has_sort() {
            if !caps.sort && !caps.reliable_fids {
                return Err(StoreError::Unsupported(format!(
                    "offset paging of {} needs a sort or reliable feature ids",
                    self.type_name()
                )));
            }
            query.sort_by = vec![SortBy::NaturalOrder];
        }

        let schema = self.absolute_schema()?;
        if !caps.sort && !can_sort(&schema, &query.sort_by) {
            return Err(StoreError::InvalidQuery(format!(
                "cannot sort {} by {:?}",
                self.type_name(),
                sort_property_names(&query.sort_by)
            )));
        }

        let diff = self.pending_diff()?;
        let native_caps = if diff.is_some() {
            caps.for_diff_overlay()
        } else {
            caps
        };

        let post_filter = !native_caps.filter && !query.filter.is_include();
        let post_sort = query.has_sort() && !native_caps.sort;
        let native_paging = !post_filter && !post_sort;
        let native_offset = query.offset() > 0 && native_caps.offset && native_paging;
        let native_limit = query.max_features.is_some()
            && native_caps.limit
            && native_paging
            && (query.offset() == 0 || native_offset);
        let native_reproject = query.reproject.is_some()
            && native_caps.reproject
            && query.crs.is_none()
            && !post_filter;

        // Attributes needed above the native reader must survive native retyping.
        let native_properties = match &query.properties {
            Some(names) if native_caps.retype => {
                let mut names = names.clone();
                let mut needed = Vec::new();
                if post_filter {
                    needed.extend(query.filter.property_names());
                }
                if post_sort {
                    needed.extend(sort_property_names(&query.sort_by));
                }
                for name in needed {
                    if schema.index_of(&name).is_some() && !names.contains(&name) {
                        names.push(name);
                    }
                }
                Some(names)
            }
            _ => None,
        };

        let native_filter = if !native_caps.filter {
            Filter::Include
        } else if let Some(diff) = &diff {
            DiffReader::widen_filter(&query.filter, &diff.lock())
        } else {
            query.filter.clone()
        };

        let native_query = Query {
            type_name: query.type_name.clone(),
            filter: native_filter,
            properties: native_properties.clone(),
            max_features: if native_limit { query.max_features } else { None },
            start_index: if native_offset { query.start_index } else { None },
            sort_by: if native_caps.sort {
                query.sort_by.clone()
            } else {
                Vec::new()
            },
            crs: None,
            reproject: if native_reproject {
                query.reproject.clone()
            } else {
                None
            },
            handle: query.handle.clone(),
            hints: query.hints.clone(),
        };

        let mut reader = self
            .inner
            .backend
            .reader_internal(&native_query, &self.inner.transaction)?;

        if let Some(diff) = &diff {
            reader = Box::new(DiffReader::new(reader, &diff.lock(), query.filter.clone()));
        }
        if post_filter {
            reader = Box::new(FilteringReader::new(reader, query.filter.clone()));
        }
        if post_sort {
            reader = Box::new(SortedReader::new(reader, query.sort_by.clone()));
        }
        if let Some(names) = &query.properties {
            if native_properties.as_ref() != Some(names) {
                let target = Arc::new(reader.feature_type().retype(names)?);
                reader = Box::new(RetypeReader::new(reader, target));
            }
        }
        if query.offset() > 0 && !native_offset {
            if let Err(e) = skip(reader.as_mut(), query.offset()) {
                let _ = reader.close();
                return Err(e);
            }
        }
        if let Some(max) = query.max_features {
            if !native_limit {
                reader = Box::new(MaxFeatureReader::new(reader, max));
            }
        }
        if let Some(crs) = &query.crs {
            reader = Box::new(ForceCrsReader::new(reader, crs.clone()));
        }
        if let Some(target) = &query.reproject {
            if !native_reproject {
                let source_crs = reader.feature_type().crs().cloned().ok_or_else(|| {
                    StoreError::InvalidQuery(format!(
                        "cannot reproject {}: no source reference system",
                        self.type_name()
                    ))
                })?;
                if source_crs != *target {
                    let transform = find_transform(&source_crs, target)?;
                    reader = Box::new(ReprojectReader::new(reader, target.clone(), transform));
                }
            }
        }
        Ok(reader)
    }

    /// A read-only source whose defining query is this source's joined with `query`.
    pub fn view(&self, query: &Query) -> Result<FeatureSource> {
        let defining = self.join_query(query)?;
        Ok(self.derive(defining, self.inner.transaction.clone()))
    }

    pub fn add_listener(&self, listener: Arc<dyn FeatureListener>) -> ListenerId {
        self.state().add_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.state().remove_listener(id)
    }

    /// Channel listener with an explicit buffer size.
    pub fn subscribe(&self, buffer_size: usize) -> ListenerHandle {
        self.state().subscribe(buffer_size)
    }

    /// Channel listener with the store's configured buffer size.
    pub fn listen(&self) -> ListenerHandle {
        self.subscribe(self.inner.listener_buffer)
    }

    pub fn set_feature_lock(&self, lock: FeatureLock) {
        *self.inner.feature_lock.lock() = lock;
    }

    pub fn feature_lock(&self) -> FeatureLock {
        self.inner.feature_lock.lock().clone()
    }

    fn matching_ids(&self, filter: Filter) -> Result<Vec<FeatureId>> {
        let query = Query::filtered(filter).with_properties(Vec::<String>::new());
        Ok(read_all(self.reader(&query)?)?
            .into_iter()
            .map(|f| f.id().clone())
            .collect())
    }

    /// Lock the features matching `filter` with the current feature lock. Features
    /// already locked by someone else are skipped. Returns how many were locked.
    pub fn lock_features(&self, filter: Filter) -> Result<usize> {
        let lock = self.feature_lock();
        let tx = &self.inner.transaction;
        let fids = self.matching_ids(filter)?;
        let mut locked = 0;

        if self.inner.capabilities.lock {
            for fid in &fids {
                self.inner.backend.lock_internal(fid, &lock, tx)?;
                locked += 1;
            }
            return Ok(locked);
        }

        let manager = self
            .inner
            .locking
            .as_ref()
            .ok_or_else(|| StoreError::Unsupported("feature locking".into()))?;
        for fid in &fids {
            match manager.lock_feature_id(self.type_name(), fid, tx, &lock) {
                Ok(()) => locked += 1,
                Err(StoreError::FeatureLocked { .. }) => {
                    tracing::debug!(fid = %fid, "feature already locked, skipped");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(locked)
    }

    /// Release the current feature lock on the features matching `filter`.
    pub fn unlock_features(&self, filter: Filter) -> Result<()> {
        let lock = self.feature_lock();
        let tx = &self.inner.transaction;
        let fids = self.matching_ids(filter)?;

        if self.inner.capabilities.lock {
            for fid in &fids {
                self.inner.backend.unlock_internal(fid, &lock, tx)?;
            }
            return Ok(());
        }

        let manager = self
            .inner
            .locking
            .as_ref()
            .ok_or_else(|| StoreError::Unsupported("feature locking".into()))?;
        for fid in &fids {
            manager.unlock_feature_id(self.type_name(), fid, tx, &lock)?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for FeatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureSource")
            .field("type_name", &self.type_name())
            .field("transaction", &self.inner.transaction.id())
            .field("defining", &self.inner.defining)
            .finish()
    }
}
