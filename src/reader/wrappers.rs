//! Generic readers applying the clauses a backend leaves to the caller.

use super::{BoxReader, FeatureReader};
use crate::crs::{transform_geometry, CoordinateTransform};
use crate::error::Result;
use crate::feature::Feature;
use crate::filter::{compare_features, Filter, SortBy};
use crate::schema::FeatureType;
use crate::types::{Crs, Value};
use std::sync::Arc;

/// Passes only features matching a filter.
pub struct FilteringReader {
    inner: BoxReader,
    filter: Filter,
}

impl FilteringReader {
    pub fn new(inner: BoxReader, filter: Filter) -> Self {
        Self { inner, filter }
    }
}

impl FeatureReader for FilteringReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        while let Some(feature) = self.inner.next_feature()? {
            if self.filter.evaluate(&feature) {
                return Ok(Some(feature));
            }
        }
        Ok(None)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Stops after a fixed number of features.
pub struct MaxFeatureReader {
    inner: BoxReader,
    remaining: usize,
}

impl MaxFeatureReader {
    pub fn new(inner: BoxReader, max: usize) -> Self {
        Self {
            inner,
            remaining: max,
        }
    }
}

impl FeatureReader for MaxFeatureReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let next = self.inner.next_feature()?;
        if next.is_some() {
            self.remaining -= 1;
        }
        Ok(next)
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Projects features onto a narrower type.
pub struct RetypeReader {
    inner: BoxReader,
    target: Arc<FeatureType>,
}

impl RetypeReader {
    pub fn new(inner: BoxReader, target: Arc<FeatureType>) -> Self {
        Self { inner, target }
    }
}

impl FeatureReader for RetypeReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.target)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        Ok(self.inner.next_feature()?.map(|f| f.retyped(&self.target)))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Sorts in memory. The inner reader is drained on first use.
pub struct SortedReader {
    inner: BoxReader,
    sort: Vec<SortBy>,
    sorted: Option<std::vec::IntoIter<Feature>>,
}

impl SortedReader {
    pub fn new(inner: BoxReader, sort: Vec<SortBy>) -> Self {
        Self {
            inner,
            sort,
            sorted: None,
        }
    }
}

impl FeatureReader for SortedReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if self.sorted.is_none() {
            let mut features = Vec::new();
            while let Some(feature) = self.inner.next_feature()? {
                features.push(feature);
            }
            features.sort_by(|a, b| compare_features(&self.sort, a, b));
            self.sorted = Some(features.into_iter());
        }
        Ok(self.sorted.as_mut().and_then(Iterator::next))
    }

    fn close(&mut self) -> Result<()> {
        self.sorted = None;
        self.inner.close()
    }
}

/// Relabels the coordinate reference system without touching coordinates.
pub struct ForceCrsReader {
    inner: BoxReader,
    target: Arc<FeatureType>,
}

impl ForceCrsReader {
    pub fn new(inner: BoxReader, crs: Crs) -> Self {
        let target = Arc::new(inner.feature_type().with_crs(Some(crs)));
        Self { inner, target }
    }
}

impl FeatureReader for ForceCrsReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.target)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        Ok(self
            .inner
            .next_feature()?
            .map(|f| f.relabeled(&self.target)))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Transforms every geometry attribute into another reference system.
pub struct ReprojectReader {
    inner: BoxReader,
    target: Arc<FeatureType>,
    transform: Arc<dyn CoordinateTransform>,
}

impl ReprojectReader {
    pub fn new(inner: BoxReader, crs: Crs, transform: Arc<dyn CoordinateTransform>) -> Self {
        let target = Arc::new(inner.feature_type().with_crs(Some(crs)));
        Self {
            inner,
            target,
            transform,
        }
    }
}

impl FeatureReader for ReprojectReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.target)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        let Some(feature) = self.inner.next_feature()? else {
            return Ok(None);
        };
        let mut feature = feature.relabeled(&self.target);
        for value in feature.values_mut() {
            if let Value::Geometry(geometry) = value {
                *geometry = transform_geometry(geometry, self.transform.as_ref())?;
            }
        }
        Ok(Some(feature))
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

/// Advance a reader past `count` features. Returns how many were actually skipped.
pub fn skip(reader: &mut dyn FeatureReader, count: usize) -> Result<usize> {
    for skipped in 0..count {
        if reader.next_feature()?.is_none() {
            return Ok(skipped);
        }
    }
    Ok(count)
}
