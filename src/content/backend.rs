//! Contract implemented by concrete storage backends.

use super::ContentEntry;
use crate::capabilities::Capabilities;
use crate::error::{Result, StoreError};
use crate::locking::FeatureLock;
use crate::query::Query;
use crate::reader::BoxReader;
use crate::schema::FeatureType;
use crate::transaction::Transaction;
use crate::types::{Envelope, FeatureId};
use crate::writer::{BoxWriter, WriteFlags};
use std::sync::Arc;

/// A store of feature types.
pub trait DataStoreBackend: Send + Sync {
    /// Names of the feature types currently available.
    fn create_type_names(&self) -> Result<Vec<String>>;

    /// Access to the features of one type.
    fn create_feature_source(&self, entry: &Arc<ContentEntry>) -> Result<Arc<dyn FeatureBackend>>;

    fn create_schema(&self, _feature_type: &FeatureType) -> Result<()> {
        Err(StoreError::Unsupported("schema creation".into()))
    }

    fn remove_schema(&self, _type_name: &str) -> Result<()> {
        Err(StoreError::Unsupported("schema removal".into()))
    }

    fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// Native access to one feature type.
///
/// Queries handed to `*_internal` contain only the clauses the backend declared in
/// [`capabilities`](FeatureBackend::capabilities); the caller applies the rest.
pub trait FeatureBackend: Send + Sync {
    fn capabilities(&self) -> Capabilities;

    fn build_feature_type(&self) -> Result<FeatureType>;

    /// Bounds of the matching features; `None` when none has a geometry.
    fn bounds_internal(&self, query: &Query, transaction: &Transaction) -> Result<Option<Envelope>>;

    /// Number of matching features, or `None` when counting is too expensive.
    fn count_internal(&self, query: &Query, transaction: &Transaction) -> Result<Option<usize>>;

    fn reader_internal(&self, query: &Query, transaction: &Transaction) -> Result<BoxReader>;

    fn writer_internal(
        &self,
        _query: &Query,
        _flags: WriteFlags,
        _transaction: &Transaction,
    ) -> Result<BoxWriter> {
        Err(StoreError::ReadOnly(self.build_feature_type()?.name().to_string()))
    }

    fn is_writable(&self) -> bool {
        false
    }

    /// Native lock; only called when `capabilities().lock` is set.
    fn lock_internal(&self, _fid: &FeatureId, _lock: &FeatureLock, _transaction: &Transaction) -> Result<()> {
        Err(StoreError::Unsupported("native feature locking".into()))
    }

    fn unlock_internal(
        &self,
        _fid: &FeatureId,
        _lock: &FeatureLock,
        _transaction: &Transaction,
    ) -> Result<()> {
        Err(StoreError::Unsupported("native feature locking".into()))
    }
}
