//! Pending edits of one feature type within a transaction.

use crate::feature::Feature;
use crate::types::FeatureId;
use std::collections::{BTreeSet, HashMap};

/// Pending change to a feature that already exists in the store.
#[derive(Clone, Debug, PartialEq)]
pub enum Modification {
    Updated(Feature),
    Removed,
}

/// In-memory overlay of adds, updates and removals not yet applied to the store.
#[derive(Debug, Default)]
pub struct Diff {
    added: HashMap<FeatureId, Feature>,
    /// Insertion order of `added`; commit appends in this order.
    added_order: Vec<FeatureId>,
    modified: HashMap<FeatureId, Modification>,
    next_fid: u64,
}

impl Diff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty()
    }

    /// Reserve a temporary id for a new feature.
    pub fn next_fid(&mut self) -> FeatureId {
        let fid = FeatureId::new(format!("new{}", self.next_fid));
        self.next_fid += 1;
        fid
    }

    pub fn add(&mut self, fid: FeatureId, feature: Feature) {
        if self.added.insert(fid.clone(), feature).is_none() {
            self.added_order.push(fid);
        }
    }

    /// Record an update. A pending add is replaced in place and keeps its position.
    pub fn modify(&mut self, fid: FeatureId, feature: Feature) {
        if let Some(slot) = self.added.get_mut(&fid) {
            *slot = feature;
        } else {
            self.modified.insert(fid, Modification::Updated(feature));
        }
    }

    /// Record a removal. A pending add is simply dropped.
    pub fn remove(&mut self, fid: &FeatureId) {
        if self.added.remove(fid).is_some() {
            self.added_order.retain(|f| f != fid);
        } else {
            self.modified.insert(fid.clone(), Modification::Removed);
        }
    }

    /// Pending adds in insertion order.
    pub fn added(&self) -> impl Iterator<Item = &Feature> {
        self.added_order.iter().filter_map(|fid| self.added.get(fid))
    }

    pub fn added_len(&self) -> usize {
        self.added_order.len()
    }

    pub fn is_added(&self, fid: &FeatureId) -> bool {
        self.added.contains_key(fid)
    }

    pub fn modification(&self, fid: &FeatureId) -> Option<&Modification> {
        self.modified.get(fid)
    }

    pub fn modified(&self) -> &HashMap<FeatureId, Modification> {
        &self.modified
    }

    /// Ids of stored features with a pending update or removal.
    pub fn modified_ids(&self) -> BTreeSet<FeatureId> {
        self.modified.keys().cloned().collect()
    }

    /// Forget every pending edit. The temporary id counter keeps running so ids are
    /// never reused within one diff.
    pub fn clear(&mut self) {
        self.added.clear();
        self.added_order.clear();
        self.modified.clear();
    }
}
