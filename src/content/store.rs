//! Write access to one feature type.

use super::FeatureSource;
use crate::error::{Result, StoreError};
use crate::feature::Feature;
use crate::filter::Filter;
use crate::query::Query;
use crate::reader::{BoxReader, CollectionReader};
use crate::types::{FeatureId, Value};
use crate::writer::{
    append_all, BoxWriter, DiffWriter, EventWriter, FilteringWriter, LockingWriter, WriteFlags,
};
use std::ops::Deref;
use std::sync::Arc;

/// A [`FeatureSource`] over a writable backend.
///
/// Under an explicit transaction, edits are recorded in the transaction's diff and reach
/// the backend on commit. Under auto-commit they go straight to the backend.
#[derive(Clone, Debug)]
pub struct FeatureStore {
    source: FeatureSource,
}

impl FeatureStore {
    pub(crate) fn new(source: FeatureSource) -> Result<Self> {
        if !source.backend().is_writable() {
            return Err(StoreError::ReadOnly(source.type_name().to_string()));
        }
        Ok(Self { source })
    }

    pub fn source(&self) -> &FeatureSource {
        &self.source
    }

    /// The same store under another transaction.
    pub fn in_transaction(&self, transaction: &crate::transaction::Transaction) -> Self {
        Self {
            source: self.source.in_transaction(transaction),
        }
    }

    /// A view restricted by `query`. Reads work as on [`FeatureSource::view`]; every
    /// write fails with [`StoreError::ReadOnly`].
    pub fn view(&self, query: &Query) -> Result<Self> {
        Ok(Self {
            source: self.source.view(query)?,
        })
    }

    /// Writer over the features matching `filter`.
    pub fn writer(&self, filter: Filter, flags: WriteFlags) -> Result<BoxWriter> {
        if self.source.is_view() {
            return Err(StoreError::ReadOnly(format!("view of {}", self.type_name())));
        }
        let tx = self.source.transaction();
        let caps = self.source.capabilities();
        let schema = self.source.absolute_schema()?;
        let filter = filter.resolve_property_names(&schema);

        let mut writer: BoxWriter = if self.source.is_transactional() {
            let diff_state = self.source.entry().diff_state(tx)?;
            let reader: BoxReader = if flags.contains(WriteFlags::UPDATE) {
                self.source.reader(&Query::filtered(filter))?
            } else {
                Box::new(CollectionReader::empty(Arc::clone(&schema)))
            };
            Box::new(
                DiffWriter::new(
                    reader,
                    diff_state.diff(),
                    Arc::clone(diff_state.state()),
                    schema,
                )
                .with_visible(self.source.clone()),
            )
        } else {
            let native_filter = if caps.filter { filter.clone() } else { Filter::Include };
            let query = Query::new(self.type_name()).with_filter(native_filter);
            let mut writer = self.source.backend().writer_internal(&query, flags, tx)?;
            if !caps.event {
                writer = Box::new(EventWriter::new(writer, self.source.state()));
            }
            if !caps.filter && !filter.is_include() && flags.contains(WriteFlags::UPDATE) {
                writer = Box::new(FilteringWriter::new(writer, filter));
            }
            writer
        };

        if !caps.lock {
            if let Some(manager) = self.source.locking() {
                writer = Box::new(LockingWriter::new(
                    writer,
                    Arc::clone(manager),
                    self.type_name(),
                    tx.clone(),
                ));
            }
        }
        Ok(writer)
    }

    /// Writer that only appends.
    pub fn append_writer(&self) -> Result<BoxWriter> {
        self.writer(Filter::Exclude, WriteFlags::APPEND)
    }

    /// Append features; returns the ids they were stored under.
    pub fn add_features(&self, features: &[Feature]) -> Result<Vec<FeatureId>> {
        let mut writer = self.append_writer()?;
        let result = append_all(writer.as_mut(), features);
        let closed = writer.close();
        let ids = result?;
        closed?;
        tracing::debug!(type_name = self.type_name(), count = ids.len(), "features added");
        Ok(ids)
    }

    /// Replace every feature with the contents of `reader`.
    pub fn set_features(&self, mut reader: BoxReader) -> Result<()> {
        let mut writer = match self.writer(Filter::Include, WriteFlags::UPDATE | WriteFlags::APPEND) {
            Ok(writer) => writer,
            Err(e) => {
                let _ = reader.close();
                return Err(e);
            }
        };
        let result: Result<()> = (|| {
            while writer.has_next()? {
                writer.next()?;
                writer.remove()?;
            }
            while let Some(feature) = reader.next_feature()? {
                append_all(writer.as_mut(), std::slice::from_ref(&feature))?;
            }
            Ok(())
        })();
        let reader_closed = reader.close();
        let writer_closed = writer.close();
        result.and(reader_closed).and(writer_closed)
    }

    /// Set the named attributes on every feature matching `filter`.
    pub fn modify_features(&self, names: &[&str], values: &[Value], filter: Filter) -> Result<()> {
        if names.len() != values.len() {
            return Err(StoreError::IllegalAttribute {
                attribute: names.join(","),
                reason: format!("{} names but {} values", names.len(), values.len()),
            });
        }
        let schema = self.source.absolute_schema()?;
        for name in names {
            if schema.index_of(name).is_none() {
                return Err(StoreError::IllegalAttribute {
                    attribute: name.to_string(),
                    reason: format!("not an attribute of {}", schema.name()),
                });
            }
        }

        let mut writer = self.writer(filter, WriteFlags::UPDATE)?;
        let result: Result<()> = (|| {
            while writer.has_next()? {
                let row = writer.next()?;
                for (name, value) in names.iter().zip(values) {
                    row.set_value(name, value.clone())?;
                }
                writer.write()?;
            }
            Ok(())
        })();
        let closed = writer.close();
        result.and(closed)
    }

    /// Remove every feature matching `filter`.
    pub fn remove_features(&self, filter: Filter) -> Result<()> {
        let mut writer = self.writer(filter, WriteFlags::UPDATE)?;
        let result: Result<()> = (|| {
            while writer.has_next()? {
                writer.next()?;
                writer.remove()?;
            }
            Ok(())
        })();
        let closed = writer.close();
        result.and(closed)
    }
}

impl Deref for FeatureStore {
    type Target = FeatureSource;

    fn deref(&self) -> &FeatureSource {
        &self.source
    }
}
