//! In-memory backend with configurable native capabilities.
//!
//! Tables keep features in insertion order and assign permanent ids of the form
//! `{type}.{n}`. Whatever query clauses the capabilities declare are applied here; the
//! feature source applies the rest, so results do not depend on the configuration.

use crate::capabilities::Capabilities;
use crate::content::{ContentEntry, DataStoreBackend, FeatureBackend};
use crate::crs::{find_transform, transform_geometry};
use crate::error::{Result, StoreError};
use crate::feature::Feature;
use crate::filter::compare_features;
use crate::query::Query;
use crate::reader::{BoxReader, CollectionReader};
use crate::schema::FeatureType;
use crate::transaction::Transaction;
use crate::types::{Envelope, FeatureId, Value};
use crate::writer::{BoxWriter, FeatureWriter, WriteFlags};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Default)]
struct TableRows {
    order: BTreeMap<u64, Feature>,
    index: HashMap<FeatureId, u64>,
    next_row: u64,
    next_id: u64,
}

impl TableRows {
    /// A generated id not already taken by a caller-provided one.
    fn generate_id(&mut self, type_name: &str) -> FeatureId {
        loop {
            self.next_id += 1;
            let fid = FeatureId(format!("{}.{}", type_name, self.next_id));
            if !self.index.contains_key(&fid) {
                return fid;
            }
        }
    }

    fn insert(&mut self, feature: Feature) {
        let seq = self.next_row;
        self.next_row += 1;
        self.index.insert(feature.id().clone(), seq);
        self.order.insert(seq, feature);
    }
}

struct Table {
    feature_type: Arc<FeatureType>,
    rows: RwLock<TableRows>,
}

/// A data store backend holding every table in memory.
pub struct MemoryDataStore {
    capabilities: Capabilities,
    tables: RwLock<HashMap<String, Arc<Table>>>,
    writer_opens: Arc<AtomicUsize>,
}

impl MemoryDataStore {
    /// Every query clause native, with reliable and caller-provided ids.
    pub fn new() -> Self {
        Self::with_capabilities(
            Capabilities::all_query_clauses()
                .with_reliable_fids(true)
                .with_use_provided_fid(true),
        )
    }

    /// Native transactions, locking and events are never offered.
    pub fn with_capabilities(capabilities: Capabilities) -> Self {
        Self {
            capabilities: Capabilities {
                transact: false,
                lock: false,
                event: false,
                ..capabilities
            },
            tables: RwLock::new(HashMap::new()),
            writer_opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    /// Number of native writers opened so far.
    pub fn writer_open_count(&self) -> usize {
        self.writer_opens.load(Ordering::SeqCst)
    }

    fn table(&self, type_name: &str) -> Result<Arc<Table>> {
        self.tables
            .read()
            .get(type_name)
            .cloned()
            .ok_or_else(|| StoreError::TypeNotFound(type_name.to_string()))
    }
}

impl Default for MemoryDataStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DataStoreBackend for MemoryDataStore {
    fn create_type_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.tables.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn create_feature_source(&self, entry: &Arc<ContentEntry>) -> Result<Arc<dyn FeatureBackend>> {
        Ok(Arc::new(MemoryFeatureBackend {
            table: self.table(entry.type_name())?,
            capabilities: self.capabilities,
            writer_opens: Arc::clone(&self.writer_opens),
        }))
    }

    fn create_schema(&self, feature_type: &FeatureType) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.contains_key(feature_type.name()) {
            return Err(StoreError::TypeExists(feature_type.name().to_string()));
        }
        tables.insert(
            feature_type.name().to_string(),
            Arc::new(Table {
                feature_type: Arc::new(feature_type.clone()),
                rows: RwLock::new(TableRows::default()),
            }),
        );
        Ok(())
    }

    fn remove_schema(&self, type_name: &str) -> Result<()> {
        self.tables
            .write()
            .remove(type_name)
            .map(|_| ())
            .ok_or_else(|| StoreError::TypeNotFound(type_name.to_string()))
    }
}

struct MemoryFeatureBackend {
    table: Arc<Table>,
    capabilities: Capabilities,
    writer_opens: Arc<AtomicUsize>,
}

impl MemoryFeatureBackend {
    /// Matching rows in insertion order.
    fn matching(&self, query: &Query) -> Vec<Feature> {
        self.table
            .rows
            .read()
            .order
            .values()
            .filter(|f| query.filter.evaluate(f))
            .cloned()
            .collect()
    }
}

impl FeatureBackend for MemoryFeatureBackend {
    fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    fn build_feature_type(&self) -> Result<FeatureType> {
        Ok(self.table.feature_type.as_ref().clone())
    }

    fn bounds_internal(&self, query: &Query, _transaction: &Transaction) -> Result<Option<Envelope>> {
        Ok(self
            .matching(query)
            .iter()
            .fold(None, |acc, f| Envelope::union(acc, f.bounds())))
    }

    fn count_internal(&self, query: &Query, _transaction: &Transaction) -> Result<Option<usize>> {
        Ok(Some(self.matching(query).len()))
    }

    fn reader_internal(&self, query: &Query, _transaction: &Transaction) -> Result<BoxReader> {
        let mut features = self.matching(query);
        if query.has_sort() {
            features.sort_by(|a, b| compare_features(&query.sort_by, a, b));
        }
        let mut features: Vec<Feature> = features
            .into_iter()
            .skip(query.offset())
            .take(query.max_features.unwrap_or(usize::MAX))
            .collect();

        let mut feature_type = Arc::clone(&self.table.feature_type);
        if let Some(names) = &query.properties {
            feature_type = Arc::new(feature_type.retype(names)?);
            features = features.iter().map(|f| f.retyped(&feature_type)).collect();
        }

        if let Some(target) = &query.reproject {
            let source = feature_type.crs().cloned().ok_or_else(|| {
                StoreError::InvalidQuery(format!(
                    "cannot reproject {}: no source reference system",
                    feature_type.name()
                ))
            })?;
            let transform = find_transform(&source, target)?;
            feature_type = Arc::new(feature_type.with_crs(Some(target.clone())));
            let mut reprojected = Vec::with_capacity(features.len());
            for feature in features {
                let mut feature = feature.relabeled(&feature_type);
                for value in feature.values_mut() {
                    if let Value::Geometry(geometry) = value {
                        *geometry = transform_geometry(geometry, transform.as_ref())?;
                    }
                }
                reprojected.push(feature);
            }
            features = reprojected;
        }

        Ok(Box::new(CollectionReader::new(feature_type, features)))
    }

    fn writer_internal(&self, query: &Query, flags: WriteFlags, _transaction: &Transaction) -> Result<BoxWriter> {
        let pending = if flags.contains(WriteFlags::UPDATE) {
            let rows = self.table.rows.read();
            rows.order
                .iter()
                .filter(|(_, f)| query.filter.evaluate(f))
                .map(|(seq, _)| *seq)
                .collect()
        } else {
            VecDeque::new()
        };
        self.writer_opens.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(type_name = self.table.feature_type.name(), ?flags, "memory writer opened");
        Ok(Box::new(MemoryWriter {
            table: Arc::clone(&self.table),
            use_provided_fid: self.capabilities.use_provided_fid,
            flags,
            pending,
            current: None,
            cursor: Cursor::Idle,
            closed: false,
        }))
    }

    fn is_writable(&self) -> bool {
        true
    }
}

enum Cursor {
    Idle,
    Existing(u64),
    Appending,
    Done,
}

struct MemoryWriter {
    table: Arc<Table>,
    use_provided_fid: bool,
    flags: WriteFlags,
    /// Sequence numbers of existing rows not yet visited.
    pending: VecDeque<u64>,
    current: Option<Feature>,
    cursor: Cursor,
    closed: bool,
}

impl MemoryWriter {
    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(StoreError::Closed("memory writer".into()));
        }
        Ok(())
    }
}

impl FeatureWriter for MemoryWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.table.feature_type)
    }

    fn has_next(&mut self) -> Result<bool> {
        self.ensure_open()?;
        let rows = self.table.rows.read();
        while let Some(seq) = self.pending.front() {
            if rows.order.contains_key(seq) {
                return Ok(true);
            }
            self.pending.pop_front();
        }
        Ok(false)
    }

    fn next(&mut self) -> Result<&mut Feature> {
        if self.has_next()? {
            if let Some(seq) = self.pending.pop_front() {
                let feature = self.table.rows.read().order.get(&seq).cloned();
                if let Some(feature) = feature {
                    self.cursor = Cursor::Existing(seq);
                    return Ok(self.current.insert(feature));
                }
            }
        }
        if !self.flags.contains(WriteFlags::APPEND) {
            return Err(StoreError::IllegalState(
                "writer has no more features and cannot append".into(),
            ));
        }
        let placeholder = format!("{}.new", self.table.feature_type.name());
        self.cursor = Cursor::Appending;
        Ok(self
            .current
            .insert(Feature::new(Arc::clone(&self.table.feature_type), placeholder)))
    }

    fn current(&mut self) -> Option<&mut Feature> {
        self.current.as_mut()
    }

    fn write(&mut self) -> Result<()> {
        self.ensure_open()?;
        let Some(current) = self.current.as_mut() else {
            return Err(StoreError::IllegalState("no current feature to write".into()));
        };
        let mut rows = self.table.rows.write();
        match self.cursor {
            Cursor::Existing(seq) => {
                let mut stored = current.clone();
                stored.set_use_provided_id(false);
                rows.order.insert(seq, stored);
            }
            Cursor::Appending => {
                let fid = if current.use_provided_id() && self.use_provided_fid {
                    if rows.index.contains_key(current.id()) {
                        return Err(StoreError::FeatureExists(current.id().clone()));
                    }
                    current.id().clone()
                } else {
                    rows.generate_id(self.table.feature_type.name())
                };
                current.set_id(fid);
                current.set_use_provided_id(false);
                rows.insert(current.clone());
            }
            Cursor::Idle | Cursor::Done => {
                return Err(StoreError::IllegalState("no current feature to write".into()));
            }
        }
        self.cursor = Cursor::Done;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        self.ensure_open()?;
        match self.cursor {
            Cursor::Existing(seq) => {
                let mut rows = self.table.rows.write();
                if let Some(removed) = rows.order.remove(&seq) {
                    rows.index.remove(removed.id());
                }
            }
            Cursor::Appending => {}
            Cursor::Idle | Cursor::Done => {
                return Err(StoreError::IllegalState("no current feature to remove".into()));
            }
        }
        self.cursor = Cursor::Done;
        self.current = None;
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.pending.clear();
        Ok(())
    }
}
