//! Binds a [`Diff`] to a transaction and replays it on commit.

use super::{Diff, Modification, Transaction, TransactionState};
use crate::content::{ContentEntry, ContentState};
use crate::error::{Result, StoreError};
use crate::events::{BatchFeatureEvent, FeatureEvent};
use crate::query::Query;
use crate::types::TransactionId;
use crate::writer::{FeatureWriter, WriteFlags};
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

/// Transaction state giving a non-transactional backend isolated writes.
///
/// Edits made under the transaction accumulate in the diff. Commit replays them through
/// a raw auto-commit writer; rollback discards them without touching the backend.
pub struct DiffTransactionState {
    entry: Arc<ContentEntry>,
    state: Arc<ContentState>,
    diff: Arc<Mutex<Diff>>,
    transaction: Mutex<Option<TransactionId>>,
}

impl DiffTransactionState {
    pub(crate) fn new(entry: Arc<ContentEntry>, state: Arc<ContentState>) -> Self {
        Self {
            entry,
            state,
            diff: Arc::new(Mutex::new(Diff::new())),
            transaction: Mutex::new(None),
        }
    }

    pub fn diff(&self) -> Arc<Mutex<Diff>> {
        Arc::clone(&self.diff)
    }

    pub fn state(&self) -> &Arc<ContentState> {
        &self.state
    }

    /// Replay the diff into the backing store, recording one event per applied row.
    fn replay(&self, diff: &Diff, events: &mut Vec<FeatureEvent>) -> Result<()> {
        let store = self.entry.data_store()?;
        let backend = store.backend_source(&self.entry)?;
        let query = Query::new(self.entry.type_name());
        // Existing rows are only visited when something besides adds is pending.
        let flags = if diff.modified().is_empty() {
            WriteFlags::APPEND
        } else {
            WriteFlags::UPDATE | WriteFlags::APPEND
        };
        let mut writer = backend.writer_internal(&query, flags, &Transaction::auto_commit())?;

        let result = self.replay_into(writer.as_mut(), diff, events);
        let closed = writer.close();
        result.and(closed)
    }

    fn replay_into(
        &self,
        writer: &mut dyn FeatureWriter,
        diff: &Diff,
        events: &mut Vec<FeatureEvent>,
    ) -> Result<()> {
        let tx = self.state.transaction();

        if !diff.modified().is_empty() {
            while writer.has_next()? {
                let row = writer.next()?;
                match diff.modification(row.id()) {
                    None => {}
                    Some(Modification::Removed) => {
                        let event = FeatureEvent::removed(tx, row);
                        writer.remove()?;
                        events.push(event);
                    }
                    Some(Modification::Updated(update)) => {
                        let before = row.bounds();
                        row.copy_values_from(update)?;
                        writer.write()?;
                        let written = writer.current().ok_or_else(|| {
                            StoreError::WriterExhausted("updated row vanished after write".into())
                        })?;
                        events.push(FeatureEvent::changed(tx, written, before));
                    }
                }
            }
        }

        for added in diff.added() {
            let row = writer.next().map_err(|e| match e {
                StoreError::Io(_) => e,
                other => StoreError::WriterExhausted(format!(
                    "no blank row to append {}: {}",
                    added.id(),
                    other
                )),
            })?;
            row.copy_values_from(added)?;
            if added.use_provided_id() {
                row.set_id(added.id().clone());
                row.set_use_provided_id(true);
            }
            writer.write()?;
            let written = writer.current().ok_or_else(|| {
                StoreError::WriterExhausted(format!("appended row {} vanished", added.id()))
            })?;
            events.push(FeatureEvent::added(tx, written));
        }
        Ok(())
    }
}

impl TransactionState for DiffTransactionState {
    fn set_transaction(&self, transaction: Option<&Transaction>) {
        let mut current = self.transaction.lock();
        match transaction {
            Some(tx) => *current = Some(tx.id()),
            None => {
                if let Some(id) = current.take() {
                    self.diff.lock().clear();
                    self.entry.remove_state(id);
                }
            }
        }
    }

    fn commit(&self) -> Result<()> {
        let mut events = Vec::new();
        let result = {
            // Held for the whole replay so a racing writer on this transaction waits.
            let mut diff = self.diff.lock();
            if diff.is_empty() {
                // Edits that cancelled out leave nothing to report.
                self.state.discard_batch();
                return Ok(());
            }
            let result = self.replay(&diff, &mut events);
            diff.clear();
            result
        };

        for event in &events {
            self.state.deliver(event);
        }
        self.state.replace_batch(BatchFeatureEvent::from_events(
            self.entry.type_name(),
            self.state.transaction(),
            &events,
        ));
        self.state.fire_batch_feature_event(true);

        match &result {
            Ok(()) => tracing::debug!(
                type_name = self.entry.type_name(),
                rows = events.len(),
                "diff applied"
            ),
            Err(e) => tracing::error!(
                type_name = self.entry.type_name(),
                applied = events.len(),
                error = %e,
                "diff commit failed part-way"
            ),
        }
        result
    }

    fn rollback(&self) -> Result<()> {
        self.diff.lock().clear();
        self.state.fire_batch_feature_event(false);
        Ok(())
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}
