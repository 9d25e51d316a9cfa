use super::FeatureSource;
use crate::error::Result;
use crate::feature::Feature;
use crate::filter::{Filter, SortBy};
use crate::query::Query;
use crate::reader::{read_all, BoxReader, FeatureIter};
use crate::schema::FeatureType;
use crate::types::Envelope;
use std::sync::Arc;

/// Lazy result of a query against a feature source. Nothing is read until asked for.
#[derive(Clone, Debug)]
pub struct FeatureCollection {
    source: FeatureSource,
    query: Query,
}

impl FeatureCollection {
    pub(crate) fn new(source: FeatureSource, query: Query) -> Self {
        Self { source, query }
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn schema(&self) -> Result<Arc<FeatureType>> {
        self.source.result_schema(&self.query)
    }

    /// Number of features, counting by iteration when the source cannot count cheaply.
    pub fn size(&self) -> Result<usize> {
        if let Some(count) = self.source.count(&self.query)? {
            return Ok(count);
        }
        let mut reader = self.reader()?;
        let mut size = 0;
        let result: Result<()> = (|| {
            while reader.next_feature()?.is_some() {
                size += 1;
            }
            Ok(())
        })();
        let closed = reader.close();
        result.and(closed)?;
        Ok(size)
    }

    pub fn is_empty(&self) -> Result<bool> {
        let mut reader = self.reader()?;
        let first = reader.next_feature();
        let closed = reader.close();
        let empty = first?.is_none();
        closed?;
        Ok(empty)
    }

    pub fn bounds(&self) -> Result<Option<Envelope>> {
        self.source.bounds_of(&self.query)
    }

    pub fn reader(&self) -> Result<BoxReader> {
        self.source.reader(&self.query)
    }

    pub fn iter(&self) -> Result<FeatureIter> {
        Ok(FeatureIter::new(self.reader()?))
    }

    pub fn to_vec(&self) -> Result<Vec<Feature>> {
        read_all(self.reader()?)
    }

    /// Features of this collection that also match `filter`.
    pub fn subcollection(&self, filter: Filter) -> Result<FeatureCollection> {
        let query = Query::join(&self.query, &Query::filtered(filter))?;
        Ok(Self::new(self.source.clone(), query))
    }

    /// This collection in another order.
    pub fn sort(&self, sort_by: Vec<SortBy>) -> FeatureCollection {
        Self::new(self.source.clone(), self.query.clone().with_sort(sort_by))
    }
}
