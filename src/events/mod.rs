//! Feature change notification.
//!
//! Listeners are registered per transaction state. Events fired under auto-commit are
//! delivered immediately; events fired under a transaction are batched and summarized as
//! a commit or rollback event when the transaction ends.
//!
//! # Example
//!
//! ```ignore
//! let source = store.feature_source("roads")?;
//! let handle = source.subscribe(100);
//!
//! while let Ok(event) = handle.recv() {
//!     match event.kind {
//!         FeatureEventKind::Added => println!("added {:?}", event.fids),
//!         FeatureEventKind::Commit => println!("transaction committed"),
//!         _ => {}
//!     }
//! }
//! ```

mod registry;
mod types;

pub use registry::{
    ChannelListener, FeatureListener, ListenerHandle, ListenerId, ListenerRegistry, ListenerResult,
};
pub use types::{BatchFeatureEvent, FeatureEvent, FeatureEventKind};
