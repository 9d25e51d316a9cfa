use super::FeatureWriter;
use crate::content::ContentState;
use crate::error::{Result, StoreError};
use crate::content::FeatureSource;
use crate::events::FeatureEvent;
use crate::feature::Feature;
use crate::filter::Filter;
use crate::query::Query;
use crate::reader::BoxReader;
use crate::schema::FeatureType;
use crate::transaction::Diff;
use crate::types::FeatureId;
use parking_lot::Mutex;
use std::sync::Arc;

enum Cursor {
    Idle,
    /// Editing a feature visible to the transaction; holds it as it was read.
    Existing(Feature),
    /// Editing a blank row that will become a pending add.
    Appending,
    /// The current row was written or removed.
    Done,
}

/// Writer recording edits into a transaction's diff instead of the store.
///
/// Existing features come from the transaction's view of the store, so edits made
/// earlier in the same transaction are visible.
pub struct DiffWriter {
    reader: BoxReader,
    diff: Arc<Mutex<Diff>>,
    state: Arc<ContentState>,
    feature_type: Arc<FeatureType>,
    lookahead: Option<Feature>,
    current: Option<Feature>,
    cursor: Cursor,
    /// Transaction view used to reject provided ids that are already taken.
    visible: Option<FeatureSource>,
}

impl DiffWriter {
    pub fn new(
        reader: BoxReader,
        diff: Arc<Mutex<Diff>>,
        state: Arc<ContentState>,
        feature_type: Arc<FeatureType>,
    ) -> Self {
        Self {
            reader,
            diff,
            state,
            feature_type,
            lookahead: None,
            current: None,
            cursor: Cursor::Idle,
            visible: None,
        }
    }

    /// Check appended rows with provided ids against what `source` can see.
    pub fn with_visible(mut self, source: FeatureSource) -> Self {
        self.visible = Some(source);
        self
    }

    fn is_taken(&self, fid: &FeatureId) -> Result<bool> {
        if self.diff.lock().is_added(fid) {
            return Ok(true);
        }
        let Some(source) = &self.visible else {
            return Ok(false);
        };
        let mut reader = source.reader(&Query::filtered(Filter::fid(fid.clone())))?;
        let found = reader.next_feature();
        let closed = reader.close();
        let found = found?.is_some();
        closed?;
        Ok(found)
    }
}

impl FeatureWriter for DiffWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.feature_type)
    }

    fn has_next(&mut self) -> Result<bool> {
        if self.lookahead.is_none() {
            self.lookahead = self.reader.next_feature()?;
        }
        Ok(self.lookahead.is_some())
    }

    fn next(&mut self) -> Result<&mut Feature> {
        if self.has_next()? {
            if let Some(feature) = self.lookahead.take() {
                self.cursor = Cursor::Existing(feature.clone());
                return Ok(self.current.insert(feature));
            }
        }
        let fid = self.diff.lock().next_fid();
        self.cursor = Cursor::Appending;
        Ok(self
            .current
            .insert(Feature::new(Arc::clone(&self.feature_type), fid)))
    }

    fn current(&mut self) -> Option<&mut Feature> {
        self.current.as_mut()
    }

    fn write(&mut self) -> Result<()> {
        let current = match (&self.cursor, &self.current) {
            (Cursor::Existing(_) | Cursor::Appending, Some(current)) => current.clone(),
            _ => return Err(StoreError::IllegalState("no current feature to write".into())),
        };
        if matches!(self.cursor, Cursor::Appending)
            && current.use_provided_id()
            && self.is_taken(current.id())?
        {
            return Err(StoreError::FeatureExists(current.id().clone()));
        }
        let tx = self.state.transaction();
        let event = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Existing(original) => {
                if original == current {
                    return Ok(());
                }
                let before = original.bounds();
                self.diff.lock().modify(current.id().clone(), current.clone());
                FeatureEvent::changed(tx, &current, before)
            }
            _ => {
                self.diff.lock().add(current.id().clone(), current.clone());
                FeatureEvent::added(tx, &current)
            }
        };
        self.state.fire_feature_event(&event);
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Existing(original) => {
                self.diff.lock().remove(original.id());
                self.current = None;
                self.state
                    .fire_feature_event(&FeatureEvent::removed(self.state.transaction(), &original));
                Ok(())
            }
            Cursor::Appending => {
                self.current = None;
                Ok(())
            }
            other => {
                self.cursor = other;
                Err(StoreError::IllegalState("no current feature to remove".into()))
            }
        }
    }

    fn close(&mut self) -> Result<()> {
        self.lookahead = None;
        self.current = None;
        self.cursor = Cursor::Idle;
        self.reader.close()
    }
}
