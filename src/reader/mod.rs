//! Feature readers and the decorators that enforce query clauses.

mod diff_reader;
mod wrappers;

pub use diff_reader::DiffReader;
pub use wrappers::{
    skip, FilteringReader, ForceCrsReader, MaxFeatureReader, ReprojectReader, RetypeReader,
    SortedReader,
};

use crate::error::Result;
use crate::feature::Feature;
use crate::schema::FeatureType;
use std::sync::Arc;

/// Pull-based stream of features of one type.
pub trait FeatureReader: Send {
    /// Type of the features this reader produces.
    fn feature_type(&self) -> Arc<FeatureType>;

    /// Next feature, or `None` when exhausted.
    fn next_feature(&mut self) -> Result<Option<Feature>>;

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub type BoxReader = Box<dyn FeatureReader>;

/// Reader over features already in memory.
pub struct CollectionReader {
    feature_type: Arc<FeatureType>,
    features: std::vec::IntoIter<Feature>,
}

impl CollectionReader {
    pub fn new(feature_type: Arc<FeatureType>, features: Vec<Feature>) -> Self {
        Self {
            feature_type,
            features: features.into_iter(),
        }
    }

    pub fn empty(feature_type: Arc<FeatureType>) -> Self {
        Self::new(feature_type, Vec::new())
    }
}

impl FeatureReader for CollectionReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        Arc::clone(&self.feature_type)
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        Ok(self.features.next())
    }
}

/// Iterator adapter; the reader is closed when exhausted or dropped.
pub struct FeatureIter {
    reader: Option<BoxReader>,
}

impl FeatureIter {
    pub fn new(reader: BoxReader) -> Self {
        Self {
            reader: Some(reader),
        }
    }

    fn finish(&mut self) {
        if let Some(mut reader) = self.reader.take() {
            if let Err(e) = reader.close() {
                tracing::warn!(error = %e, "failed to close feature reader");
            }
        }
    }
}

impl Iterator for FeatureIter {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        let reader = self.reader.as_mut()?;
        match reader.next_feature() {
            Ok(Some(feature)) => Some(Ok(feature)),
            Ok(None) => {
                self.finish();
                None
            }
            Err(e) => {
                self.finish();
                Some(Err(e))
            }
        }
    }
}

impl Drop for FeatureIter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Drain a reader into a vector and close it.
pub fn read_all(mut reader: BoxReader) -> Result<Vec<Feature>> {
    let mut features = Vec::new();
    let result: Result<()> = (|| {
        while let Some(feature) = reader.next_feature()? {
            features.push(feature);
        }
        Ok(())
    })();
    let closed = reader.close();
    result.and(closed)?;
    Ok(features)
}
