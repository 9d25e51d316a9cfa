use super::{BoxWriter, FeatureWriter};
use crate::error::Result;
use crate::feature::Feature;
use crate::locking::InProcessLockingManager;
use crate::schema::FeatureType;
use crate::transaction::Transaction;
use std::sync::Arc;

/// Refuses to write or remove features locked by someone else.
pub struct LockingWriter {
    inner: BoxWriter,
    manager: Arc<InProcessLockingManager>,
    type_name: String,
    transaction: Transaction,
}

impl LockingWriter {
    pub fn new(
        inner: BoxWriter,
        manager: Arc<InProcessLockingManager>,
        type_name: impl Into<String>,
        transaction: Transaction,
    ) -> Self {
        Self {
            inner,
            manager,
            type_name: type_name.into(),
            transaction,
        }
    }

    fn check_current(&mut self) -> Result<()> {
        if let Some(row) = self.inner.current() {
            self.manager
                .assert_access(&self.type_name, row.id(), &self.transaction)?;
        }
        Ok(())
    }
}

impl FeatureWriter for LockingWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<&mut Feature> {
        self.inner.next()
    }

    fn current(&mut self) -> Option<&mut Feature> {
        self.inner.current()
    }

    fn write(&mut self) -> Result<()> {
        self.check_current()?;
        self.inner.write()
    }

    fn remove(&mut self) -> Result<()> {
        self.check_current()?;
        self.inner.remove()
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
