//! Queries and query joining.

use crate::error::{Result, StoreError};
use crate::filter::{resolve_property_name, Filter, SortBy};
use crate::schema::FeatureType;
use crate::types::Crs;
use std::collections::BTreeMap;

/// Free-form query hints. Later hints win when two sets are merged.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Hints(BTreeMap<String, String>);

impl Hints {
    /// Ask writers to keep caller-provided feature ids.
    pub const USE_PROVIDED_FID: &'static str = "use_provided_fid";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn merged(&self, other: &Hints) -> Hints {
        let mut merged = self.0.clone();
        merged.extend(other.0.iter().map(|(k, v)| (k.clone(), v.clone())));
        Hints(merged)
    }
}

/// A request for features.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Query {
    /// Feature type; `None` lets the source fill in its own.
    pub type_name: Option<String>,
    pub filter: Filter,
    /// Projected attribute names; `None` retrieves every attribute.
    pub properties: Option<Vec<String>>,
    pub max_features: Option<usize>,
    pub start_index: Option<usize>,
    pub sort_by: Vec<SortBy>,
    /// Overrides the native coordinate reference system.
    pub crs: Option<Crs>,
    /// Reproject results into this coordinate reference system.
    pub reproject: Option<Crs>,
    pub handle: Option<String>,
    pub hints: Hints,
}

impl Query {
    /// Everything, with no restrictions.
    pub fn all() -> Self {
        Self::default()
    }

    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn filtered(filter: Filter) -> Self {
        Self {
            filter,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_max_features(mut self, max: usize) -> Self {
        self.max_features = Some(max);
        self
    }

    pub fn with_start_index(mut self, start: usize) -> Self {
        self.start_index = Some(start);
        self
    }

    pub fn with_sort(mut self, sort_by: Vec<SortBy>) -> Self {
        self.sort_by = sort_by;
        self
    }

    pub fn with_crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn with_reproject(mut self, crs: Crs) -> Self {
        self.reproject = Some(crs);
        self
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.handle = Some(handle.into());
        self
    }

    pub fn with_hint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.hints.set(key, value);
        self
    }

    pub fn retrieves_all_properties(&self) -> bool {
        self.properties.is_none()
    }

    pub fn has_sort(&self) -> bool {
        !self.sort_by.is_empty()
    }

    pub fn offset(&self) -> usize {
        self.start_index.unwrap_or(0)
    }

    /// Whether the query restricts neither rows nor paging.
    pub fn is_unrestricted(&self) -> bool {
        self.filter.is_include() && self.max_features.is_none() && self.offset() == 0
    }

    /// Same query without paging clauses.
    pub(crate) fn without_paging(&self) -> Query {
        Query {
            max_features: None,
            start_index: None,
            ..self.clone()
        }
    }

    /// Combine a defining query with a caller query.
    ///
    /// Filters are conjoined, projections merged (an unrestricted side defers to the
    /// other), the lower `max_features` wins and start indexes add up. Sort, CRS,
    /// reprojection and handle come from `query`, falling back to `defining`.
    pub fn join(defining: &Query, query: &Query) -> Result<Query> {
        let type_name = match (&defining.type_name, &query.type_name) {
            (Some(a), Some(b)) if a != b => {
                return Err(StoreError::InvalidQuery(format!(
                    "type names compared are not equal: {} vs {}",
                    a, b
                )));
            }
            (Some(a), _) => Some(a.clone()),
            (None, b) => b.clone(),
        };

        let properties = match (&defining.properties, &query.properties) {
            (None, p) | (p, None) => p.clone(),
            (Some(a), Some(b)) => {
                let mut merged = a.clone();
                for name in b {
                    if !merged.contains(name) {
                        merged.push(name.clone());
                    }
                }
                Some(merged)
            }
        };

        let max_features = match (defining.max_features, query.max_features) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };

        let start_index = match (defining.start_index, query.start_index) {
            (None, None) => None,
            (a, b) => Some(a.unwrap_or(0).saturating_add(b.unwrap_or(0))),
        };

        let sort_by = if query.sort_by.is_empty() {
            defining.sort_by.clone()
        } else {
            query.sort_by.clone()
        };

        Ok(Query {
            type_name,
            filter: defining.filter.clone().and(query.filter.clone()),
            properties,
            max_features,
            start_index,
            sort_by,
            crs: query.crs.clone().or_else(|| defining.crs.clone()),
            reproject: query.reproject.clone().or_else(|| defining.reproject.clone()),
            handle: query.handle.clone().or_else(|| defining.handle.clone()),
            hints: defining.hints.merged(&query.hints),
        })
    }

    /// Rewrite namespaced property references (`gml:name`) to local attribute names.
    pub fn resolve_property_names(&self, feature_type: &FeatureType) -> Query {
        let resolve = |name: &str| resolve_property_name(name, feature_type);
        Query {
            filter: self.filter.resolve_property_names(feature_type),
            properties: self
                .properties
                .as_ref()
                .map(|names| names.iter().map(|n| resolve(n)).collect()),
            sort_by: self
                .sort_by
                .iter()
                .map(|s| match s {
                    SortBy::Property { name, order } => SortBy::Property {
                        name: resolve(name),
                        order: *order,
                    },
                    other => other.clone(),
                })
                .collect(),
            ..self.clone()
        }
    }
}
