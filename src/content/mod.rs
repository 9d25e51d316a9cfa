//! Content model: data store, per-type entries, per-transaction states and the
//! feature source/store façade over a backend.
//!
//! A [`DataStore`] owns one [`ContentEntry`] per feature type. Each entry owns one
//! [`ContentState`] per transaction that has touched it. [`FeatureSource`] and
//! [`FeatureStore`] are the query-aware façade; they enforce every query clause the
//! [`FeatureBackend`] does not handle natively.

mod backend;
mod collection;
pub(crate) mod datastore;
mod entry;
mod source;
mod state;
mod store;

pub use backend::{DataStoreBackend, FeatureBackend};
pub use collection::FeatureCollection;
pub use datastore::{DataStore, DataStoreConfig};
pub use entry::ContentEntry;
pub use source::FeatureSource;
pub use state::{CacheCell, ContentState};
pub use store::FeatureStore;
