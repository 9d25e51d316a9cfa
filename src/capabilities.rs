//! Backend capability declarations.

use crate::filter::{can_sort, SortBy};
use crate::schema::FeatureType;

/// Query clauses and services a backend implements natively.
///
/// Every clause a backend leaves unset is enforced generically by the feature source,
/// so flipping a flag changes where work happens, never the result.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub filter: bool,
    pub reproject: bool,
    pub limit: bool,
    pub offset: bool,
    pub sort: bool,
    pub retype: bool,
    /// Native transactions; otherwise writes under a transaction go through a diff.
    pub transact: bool,
    /// Native feature locking; otherwise the in-process locking manager is used.
    pub lock: bool,
    /// Writers fire their own feature events.
    pub event: bool,
    /// Feature ids are stable across reads (required for offset paging without sort).
    pub reliable_fids: bool,
    /// Writers honour caller-provided feature ids.
    pub use_provided_fid: bool,
}

impl Capabilities {
    /// Nothing native; every clause is handled by wrappers.
    pub const NONE: Capabilities = Capabilities {
        filter: false,
        reproject: false,
        limit: false,
        offset: false,
        sort: false,
        retype: false,
        transact: false,
        lock: false,
        event: false,
        reliable_fids: false,
        use_provided_fid: false,
    };

    /// Every query clause native (transactions, locking and events excluded).
    pub fn all_query_clauses() -> Self {
        Self {
            filter: true,
            reproject: true,
            limit: true,
            offset: true,
            sort: true,
            retype: true,
            ..Self::NONE
        }
    }

    pub fn with_filter(mut self, v: bool) -> Self {
        self.filter = v;
        self
    }

    pub fn with_reproject(mut self, v: bool) -> Self {
        self.reproject = v;
        self
    }

    pub fn with_limit(mut self, v: bool) -> Self {
        self.limit = v;
        self
    }

    pub fn with_offset(mut self, v: bool) -> Self {
        self.offset = v;
        self
    }

    pub fn with_sort(mut self, v: bool) -> Self {
        self.sort = v;
        self
    }

    pub fn with_retype(mut self, v: bool) -> Self {
        self.retype = v;
        self
    }

    pub fn with_reliable_fids(mut self, v: bool) -> Self {
        self.reliable_fids = v;
        self
    }

    pub fn with_use_provided_fid(mut self, v: bool) -> Self {
        self.use_provided_fid = v;
        self
    }

    /// Capabilities in effect when reading through a transaction diff. Only filtering
    /// stays native; the overlay needs full, untransformed rows to merge pending edits.
    pub(crate) fn for_diff_overlay(self) -> Self {
        Self {
            limit: false,
            offset: false,
            sort: false,
            retype: false,
            reproject: false,
            ..self
        }
    }
}

/// Query capabilities as seen by callers of a feature source.
///
/// Offset is always available and sorting is available for any attribute of the schema,
/// since the source supplies generic fallbacks.
#[derive(Clone, Debug)]
pub struct QueryCapabilities {
    native: Capabilities,
    feature_type: std::sync::Arc<FeatureType>,
}

impl QueryCapabilities {
    pub(crate) fn new(native: Capabilities, feature_type: std::sync::Arc<FeatureType>) -> Self {
        Self {
            native,
            feature_type,
        }
    }

    pub fn is_offset_supported(&self) -> bool {
        true
    }

    pub fn supports_sorting(&self, sort: &[SortBy]) -> bool {
        self.native.sort || can_sort(&self.feature_type, sort)
    }

    pub fn is_reliable_fid_supported(&self) -> bool {
        self.native.reliable_fids
    }

    pub fn is_use_provided_fid_supported(&self) -> bool {
        self.native.use_provided_fid
    }
}
