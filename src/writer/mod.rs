//! Cursor-style feature writers.
//!
//! A writer walks the existing features selected by its filter. `next` past the last
//! feature yields a blank row for appending. After `write`, `current` returns the row as
//! stored, including any id the store assigned.

mod diff_writer;
mod event_writer;
mod filtering_writer;
mod locking_writer;

pub use diff_writer::DiffWriter;
pub use event_writer::EventWriter;
pub use filtering_writer::FilteringWriter;
pub use locking_writer::LockingWriter;

use crate::error::Result;
use crate::feature::Feature;
use crate::schema::FeatureType;
use crate::types::FeatureId;
use std::ops::BitOr;
use std::sync::Arc;

pub trait FeatureWriter: Send {
    fn feature_type(&self) -> Arc<FeatureType>;

    /// Whether another existing feature follows.
    fn has_next(&mut self) -> Result<bool>;

    /// Advance to the next existing feature, or to a blank row past the end.
    fn next(&mut self) -> Result<&mut Feature>;

    /// Row under the cursor.
    fn current(&mut self) -> Option<&mut Feature>;

    /// Store the current row.
    fn write(&mut self) -> Result<()>;

    /// Delete the current row.
    fn remove(&mut self) -> Result<()>;

    fn close(&mut self) -> Result<()>;
}

pub type BoxWriter = Box<dyn FeatureWriter>;

/// What a writer may do.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteFlags(u8);

impl WriteFlags {
    /// Visit and change existing features.
    pub const UPDATE: WriteFlags = WriteFlags(0b01);
    /// Append new features.
    pub const APPEND: WriteFlags = WriteFlags(0b10);

    pub fn contains(self, other: WriteFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Append only: existing features are not visited.
    pub fn is_append_only(self) -> bool {
        !self.contains(Self::UPDATE)
    }
}

impl BitOr for WriteFlags {
    type Output = WriteFlags;

    fn bitor(self, rhs: WriteFlags) -> WriteFlags {
        WriteFlags(self.0 | rhs.0)
    }
}

/// Write every feature through an appending writer. Returns the stored ids.
pub fn append_all(writer: &mut dyn FeatureWriter, features: &[Feature]) -> Result<Vec<FeatureId>> {
    let mut ids = Vec::with_capacity(features.len());
    for feature in features {
        let row = writer.next()?;
        row.copy_values_from(feature)?;
        if feature.use_provided_id() {
            row.set_id(feature.id().clone());
            row.set_use_provided_id(true);
        }
        writer.write()?;
        if let Some(written) = writer.current() {
            ids.push(written.id().clone());
        }
    }
    Ok(ids)
}
