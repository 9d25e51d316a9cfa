use super::{BoxWriter, FeatureWriter};
use crate::content::ContentState;
use crate::error::Result;
use crate::events::FeatureEvent;
use crate::feature::Feature;
use crate::schema::FeatureType;
use crate::types::Envelope;
use std::sync::Arc;

/// Fires feature events for a native writer that does not fire its own.
pub struct EventWriter {
    inner: BoxWriter,
    state: Arc<ContentState>,
    appending: bool,
    before: Option<Envelope>,
}

impl EventWriter {
    pub fn new(inner: BoxWriter, state: Arc<ContentState>) -> Self {
        Self {
            inner,
            state,
            appending: false,
            before: None,
        }
    }
}

impl FeatureWriter for EventWriter {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn has_next(&mut self) -> Result<bool> {
        self.inner.has_next()
    }

    fn next(&mut self) -> Result<&mut Feature> {
        let appending = !self.inner.has_next()?;
        let row = self.inner.next()?;
        self.appending = appending;
        self.before = row.bounds();
        Ok(row)
    }

    fn current(&mut self) -> Option<&mut Feature> {
        self.inner.current()
    }

    fn write(&mut self) -> Result<()> {
        self.inner.write()?;
        let tx = self.state.transaction();
        if let Some(written) = self.inner.current() {
            let event = if self.appending {
                FeatureEvent::added(tx, written)
            } else {
                FeatureEvent::changed(tx, written, self.before)
            };
            self.state.fire_feature_event(&event);
        }
        self.appending = false;
        self.before = None;
        Ok(())
    }

    fn remove(&mut self) -> Result<()> {
        let event = match self.inner.current() {
            Some(row) if !self.appending => Some(FeatureEvent::removed(self.state.transaction(), row)),
            _ => None,
        };
        self.inner.remove()?;
        if let Some(event) = event {
            self.state.fire_feature_event(&event);
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}
