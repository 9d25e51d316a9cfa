//! Sort specifications and feature comparison.

use crate::feature::Feature;
use crate::schema::FeatureType;
use std::cmp::Ordering;

/// Direction of a property sort.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One sort key.
#[derive(Clone, Debug, PartialEq)]
pub enum SortBy {
    /// Ascending feature id order.
    NaturalOrder,
    /// Descending feature id order.
    ReverseOrder,
    Property { name: String, order: SortOrder },
}

impl SortBy {
    pub fn asc(name: impl Into<String>) -> Self {
        SortBy::Property {
            name: name.into(),
            order: SortOrder::Ascending,
        }
    }

    pub fn desc(name: impl Into<String>) -> Self {
        SortBy::Property {
            name: name.into(),
            order: SortOrder::Descending,
        }
    }

    pub fn property_name(&self) -> Option<&str> {
        match self {
            SortBy::Property { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Attribute names referenced by a sort, excluding natural/reverse order.
pub fn sort_property_names(sort: &[SortBy]) -> Vec<String> {
    let mut names = Vec::new();
    for key in sort {
        if let Some(name) = key.property_name() {
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Whether every property sort key names an attribute of `feature_type`.
pub fn can_sort(feature_type: &FeatureType, sort: &[SortBy]) -> bool {
    sort.iter()
        .filter_map(SortBy::property_name)
        .all(|name| feature_type.index_of(name).is_some())
}

/// Compare two features under a sort specification. Ties break on natural id order so
/// the result is a total order.
pub fn compare_features(sort: &[SortBy], a: &Feature, b: &Feature) -> Ordering {
    for key in sort {
        let ordering = match key {
            SortBy::NaturalOrder => a.id().natural_cmp(b.id()),
            SortBy::ReverseOrder => b.id().natural_cmp(a.id()),
            SortBy::Property { name, order } => {
                let null = crate::types::Value::Null;
                let va = a.value(name).unwrap_or(&null);
                let vb = b.value(name).unwrap_or(&null);
                match order {
                    SortOrder::Ascending => va.sort_cmp(vb),
                    SortOrder::Descending => vb.sort_cmp(va),
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    a.id().natural_cmp(b.id())
}
