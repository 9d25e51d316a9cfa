//! Feature event types.

use crate::feature::Feature;
use crate::filter::Filter;
use crate::types::{Envelope, FeatureId, TransactionId};
use serde::{Deserialize, Serialize};

/// What happened to the features named by an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureEventKind {
    Added,
    Changed,
    Removed,
    /// Net effect of a committed transaction.
    Commit,
    /// Net effect of a rolled back transaction.
    Rollback,
}

/// Notification about a change to features of one type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureEvent {
    pub kind: FeatureEventKind,
    pub type_name: String,
    /// Transaction the change was made under.
    pub transaction: TransactionId,
    /// Area affected by the change, when any feature had a geometry.
    pub bounds: Option<Envelope>,
    /// Affected feature ids.
    pub fids: Vec<FeatureId>,
}

impl FeatureEvent {
    fn single(
        kind: FeatureEventKind,
        transaction: TransactionId,
        feature: &Feature,
        bounds: Option<Envelope>,
    ) -> Self {
        Self {
            kind,
            type_name: feature.type_name().to_string(),
            transaction,
            bounds,
            fids: vec![feature.id().clone()],
        }
    }

    pub fn added(transaction: TransactionId, feature: &Feature) -> Self {
        Self::single(FeatureEventKind::Added, transaction, feature, feature.bounds())
    }

    /// A modified feature; bounds cover both the old and the new geometry.
    pub fn changed(transaction: TransactionId, feature: &Feature, before: Option<Envelope>) -> Self {
        let bounds = Envelope::union(feature.bounds(), before);
        Self::single(FeatureEventKind::Changed, transaction, feature, bounds)
    }

    pub fn removed(transaction: TransactionId, feature: &Feature) -> Self {
        Self::single(FeatureEventKind::Removed, transaction, feature, feature.bounds())
    }

    /// Identity filter matching the affected features.
    pub fn filter(&self) -> Filter {
        Filter::ids(self.fids.iter().cloned())
    }

    pub fn is_batch(&self) -> bool {
        matches!(self.kind, FeatureEventKind::Commit | FeatureEventKind::Rollback)
    }
}

/// Accumulates the events of one transaction until commit or rollback.
#[derive(Clone, Debug, PartialEq)]
pub struct BatchFeatureEvent {
    type_name: String,
    transaction: TransactionId,
    bounds: Option<Envelope>,
    fids: Vec<FeatureId>,
}

impl BatchFeatureEvent {
    pub fn new(type_name: impl Into<String>, transaction: TransactionId) -> Self {
        Self {
            type_name: type_name.into(),
            transaction,
            bounds: None,
            fids: Vec::new(),
        }
    }

    /// Build a batch summarizing a sequence of events.
    pub fn from_events<'a>(
        type_name: impl Into<String>,
        transaction: TransactionId,
        events: impl IntoIterator<Item = &'a FeatureEvent>,
    ) -> Self {
        let mut batch = Self::new(type_name, transaction);
        for event in events {
            batch.add(event);
        }
        batch
    }

    pub fn add(&mut self, event: &FeatureEvent) {
        self.bounds = Envelope::union(self.bounds, event.bounds);
        for fid in &event.fids {
            if !self.fids.contains(fid) {
                self.fids.push(fid.clone());
            }
        }
    }

    /// Swap a temporary id for the permanent one assigned on commit.
    pub fn replace_fid(&mut self, temporary: &FeatureId, permanent: FeatureId) {
        if let Some(slot) = self.fids.iter_mut().find(|f| *f == temporary) {
            *slot = permanent;
        }
    }

    pub fn fids(&self) -> &[FeatureId] {
        &self.fids
    }

    pub fn bounds(&self) -> Option<Envelope> {
        self.bounds
    }

    pub fn is_empty(&self) -> bool {
        self.fids.is_empty()
    }

    /// Close the batch as a commit or rollback notification.
    pub fn seal(self, commit: bool) -> FeatureEvent {
        FeatureEvent {
            kind: if commit {
                FeatureEventKind::Commit
            } else {
                FeatureEventKind::Rollback
            },
            type_name: self.type_name,
            transaction: self.transaction,
            bounds: self.bounds,
            fids: self.fids,
        }
    }
}
