use super::{BoxWriter, FeatureWriter};
use crate::error::{Result, StoreError};
use crate::feature::Feature;
use crate::filter::Filter;
use crate::schema::FeatureType;
use std::sync::Arc;

/// Restricts a writer to the existing features matching a filter.
///
/// Non-matching rows are stepped over without being written, which leaves them as they
/// were.
pub struct FilteringWriter {
    inner: BoxWriter,
    filter: Filter,
    /// The inner cursor already sits on the next matching row.
    staged: bool,
}

impl FilteringWriter {
    pub fn new(inner: BoxWriter, filter: Filter) -> Self {
        Self {
            inner,
            filter,
            staged: false,
        }
    }
}

impl FeatureWriter for FilteringWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.staged {
            return Ok(true);
        }
        while self.inner.has_next()? {
            let row = self.inner.next()?;
            if self.filter.evaluate(row) {
                self.staged = true;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn next(&mut self) -> Result<&mut Feature> {
        if self.has_next()? {
            self.staged = false;
            return self
                .inner
                .current()
                .ok_or_else(|| StoreError::IllegalState("staged row vanished".into()));
        }
        self.inner.next()
    }

    fn current(&mut self) -> Option<&mut Feature> {
        if self.staged {
            return None;
        }
        self.inner.current()
    }

    fn write(&mut self) -> Result<()> {
        self.inner.write()
    }

    fn remove(&mut self) -> Result<()> {
        self.inner.remove()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
