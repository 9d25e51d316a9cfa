//! # geostore
//!
//! Transaction-aware access to feature types held by pluggable backing stores.
//!
//! ## Core Concepts
//!
//! - **Backends**: implement [`DataStoreBackend`] and [`FeatureBackend`] and declare
//!   which query clauses they handle natively
//! - **Feature sources**: apply every clause the backend leaves out, so results do not
//!   depend on backend capabilities
//! - **Transactions**: writes under a [`Transaction`] are kept in a per-type diff and
//!   replayed on commit
//! - **Events**: listeners hear about row changes and about commits and rollbacks
//!
//! ## Example
//!
//! ```ignore
//! use geostore::{DataStore, DataStoreConfig, MemoryDataStore, Transaction};
//!
//! let store = DataStore::new(Arc::new(MemoryDataStore::new()), DataStoreConfig::default());
//! store.create_schema(&roads_type)?;
//!
//! let tx = Transaction::new();
//! let roads = store.feature_store("roads", &tx)?;
//! roads.add_features(&[road])?;
//! tx.commit()?;
//! tx.close();
//! ```

pub mod capabilities;
pub mod content;
pub mod crs;
pub mod directory;
pub mod error;
pub mod events;
pub mod feature;
pub mod filter;
pub mod locking;
pub mod memory;
pub mod query;
pub mod reader;
pub mod schema;
pub mod transaction;
pub mod types;
pub mod writer;

// Re-exports
pub use capabilities::{Capabilities, QueryCapabilities};
pub use content::{
    CacheCell, ContentEntry, ContentState, DataStore, DataStoreBackend, DataStoreConfig,
    FeatureBackend, FeatureCollection, FeatureSource, FeatureStore,
};
pub use crs::{find_transform, CoordinateTransform};
pub use directory::{DirectoryConfig, DirectoryDataStore};
pub use error::{Result, StoreError};
pub use events::{
    BatchFeatureEvent, FeatureEvent, FeatureEventKind, FeatureListener, ListenerHandle, ListenerId,
    ListenerResult,
};
pub use feature::Feature;
pub use filter::{CompareOp, Filter, SortBy, SortOrder};
pub use locking::{FeatureLock, InProcessLockingManager};
pub use memory::MemoryDataStore;
pub use query::{Hints, Query};
pub use reader::{BoxReader, FeatureIter, FeatureReader};
pub use schema::{AttributeDescriptor, AttributeType, FeatureType, FeatureTypeBuilder};
pub use transaction::{Diff, DiffTransactionState, Modification, Transaction, TransactionState};
pub use types::*;
pub use writer::{BoxWriter, FeatureWriter, WriteFlags};
