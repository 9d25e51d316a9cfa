//! Overlay of a transaction's pending edits on a native reader.

use super::{BoxReader, FeatureReader};
use crate::error::Result;
use crate::feature::Feature;
use crate::filter::Filter;
use crate::schema::FeatureType;
use crate::transaction::{Diff, Modification};
use crate::types::FeatureId;
use std::collections::HashMap;
use std::sync::Arc;

/// Presents the store as the transaction sees it.
///
/// Stored rows with a pending update are replaced (and re-tested against the filter),
/// removed rows are skipped, and pending adds matching the filter follow the stored rows
/// in insertion order. The diff is snapshotted when the reader opens.
pub struct DiffReader {
    inner: BoxReader,
    filter: Filter,
    modified: HashMap<FeatureId, Modification>,
    added: std::vec::IntoIter<Feature>,
    native_done: bool,
}

impl DiffReader {
    pub fn new(inner: BoxReader, diff: &Diff, filter: Filter) -> Self {
        let added: Vec<Feature> = diff
            .added()
            .filter(|f| filter.evaluate(f))
            .cloned()
            .collect();
        Self {
            inner,
            filter,
            modified: diff.modified().clone(),
            added: added.into_iter(),
            native_done: false,
        }
    }

    /// Filter to hand the native reader: the query filter widened by every modified id,
    /// so rows edited into the filter are still fetched.
    pub fn widen_filter(filter: &Filter, diff: &Diff) -> Filter {
        if filter.is_include() || diff.modified().is_empty() {
            return filter.clone();
        }
        filter.clone().or(Filter::ids(diff.modified_ids()))
    }
}

impl FeatureReader for DiffReader {
    fn feature_type(&self) -> Arc<FeatureType> {
        self.inner.feature_type()
    }

    fn next_feature(&mut self) -> Result<Option<Feature>> {
        if !self.native_done {
            while let Some(feature) = self.inner.next_feature()? {
                match self.modified.get(feature.id()) {
                    None => return Ok(Some(feature)),
                    Some(Modification::Removed) => {}
                    Some(Modification::Updated(update)) => {
                        if self.filter.evaluate(update) {
                            return Ok(Some(update.clone()));
                        }
                    }
                }
            }
            self.native_done = true;
        }
        Ok(self.added.next())
    }

    fn close(&mut self) -> Result<()> {
        self.inner.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::{read_all, CollectionReader, FilteringReader};
    use crate::schema::AttributeType;

    fn schema() -> Arc<FeatureType> {
        Arc::new(
            FeatureType::builder("wells")
                .attribute("depth", AttributeType::Int)
                .build()
                .unwrap(),
        )
    }

    fn well(id: &str, depth: i64) -> Feature {
        let mut f = Feature::new(schema(), id);
        f.set_value("depth", depth).unwrap();
        f
    }

    fn stored() -> BoxReader {
        Box::new(CollectionReader::new(
            schema(),
            vec![well("wells.1", 10), well("wells.2", 50), well("wells.3", 90)],
        ))
    }

    fn ids(features: &[Feature]) -> Vec<&str> {
        features.iter().map(|f| f.id().as_str()).collect()
    }

    #[test]
    fn test_overlay_replaces_removes_and_appends() {
        let mut diff = Diff::new();
        diff.modify(FeatureId::from("wells.1"), well("wells.1", 15));
        diff.remove(&FeatureId::from("wells.2"));
        let fid = diff.next_fid();
        diff.add(fid.clone(), well(fid.as_str(), 70));

        let reader = DiffReader::new(stored(), &diff, Filter::Include);
        let features = read_all(Box::new(reader)).unwrap();
        assert_eq!(ids(&features), vec!["wells.1", "wells.3", "new0"]);
        assert_eq!(features[0].value("depth"), Some(&15i64.into()));
    }

    #[test]
    fn test_updates_retested_against_filter() {
        let mut diff = Diff::new();
        diff.modify(FeatureId::from("wells.3"), well("wells.3", 5));
        let fid = diff.next_fid();
        diff.add(fid.clone(), well(fid.as_str(), 1));

        let filter = Filter::gt("depth", 20);
        let native = FilteringReader::new(stored(), DiffReader::widen_filter(&filter, &diff));
        let reader = DiffReader::new(Box::new(native), &diff, filter);
        let features = read_all(Box::new(reader)).unwrap();
        assert_eq!(ids(&features), vec!["wells.2"]);
    }

    #[test]
    fn test_widened_filter_includes_modified_ids() {
        let mut diff = Diff::new();
        diff.modify(FeatureId::from("wells.1"), well("wells.1", 99));
        let widened = DiffReader::widen_filter(&Filter::gt("depth", 50), &diff);
        assert!(widened.evaluate(&well("wells.1", 10)));
        assert!(!widened.evaluate(&well("wells.2", 10)));
        assert_eq!(DiffReader::widen_filter(&Filter::Include, &diff), Filter::Include);
    }
}
