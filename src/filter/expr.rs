//! Filter predicates evaluated against features.

use crate::feature::Feature;
use crate::schema::FeatureType;
use crate::types::{Envelope, FeatureId, Value};
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Binary comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    fn test(self, ordering: Option<Ordering>) -> bool {
        match (self, ordering) {
            (CompareOp::Eq, Some(o)) => o == Ordering::Equal,
            (CompareOp::NotEq, Some(o)) => o != Ordering::Equal,
            (CompareOp::NotEq, None) => true,
            (CompareOp::Lt, Some(o)) => o == Ordering::Less,
            (CompareOp::Le, Some(o)) => o != Ordering::Greater,
            (CompareOp::Gt, Some(o)) => o == Ordering::Greater,
            (CompareOp::Ge, Some(o)) => o != Ordering::Less,
            _ => false,
        }
    }
}

/// A predicate over features.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum Filter {
    /// Matches everything.
    #[default]
    Include,
    /// Matches nothing.
    Exclude,
    /// Matches features whose id is in the set.
    Id(BTreeSet<FeatureId>),
    Compare {
        property: String,
        op: CompareOp,
        value: Value,
    },
    IsNull(String),
    /// Envelope intersection against a geometry attribute (default geometry when `None`).
    Bbox {
        property: Option<String>,
        envelope: Envelope,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn ids<I, F>(ids: I) -> Filter
    where
        I: IntoIterator<Item = F>,
        F: Into<FeatureId>,
    {
        Filter::Id(ids.into_iter().map(Into::into).collect())
    }

    pub fn fid(id: impl Into<FeatureId>) -> Filter {
        Filter::ids([id.into()])
    }

    pub fn compare(property: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Filter {
        Filter::Compare {
            property: property.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::compare(property, CompareOp::Eq, value)
    }

    pub fn lt(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::compare(property, CompareOp::Lt, value)
    }

    pub fn gt(property: impl Into<String>, value: impl Into<Value>) -> Filter {
        Filter::compare(property, CompareOp::Gt, value)
    }

    pub fn is_null(property: impl Into<String>) -> Filter {
        Filter::IsNull(property.into())
    }

    pub fn bbox(envelope: Envelope) -> Filter {
        Filter::Bbox {
            property: None,
            envelope,
        }
    }

    pub fn is_include(&self) -> bool {
        matches!(self, Filter::Include)
    }

    pub fn is_exclude(&self) -> bool {
        matches!(self, Filter::Exclude)
    }

    /// Conjunction with simplification: `Include` is the identity, `Exclude` absorbs,
    /// nested conjunctions are flattened.
    pub fn and(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Include, f) | (f, Filter::Include) => f,
            (Filter::Exclude, _) | (_, Filter::Exclude) => Filter::Exclude,
            (a, b) if a == b => a,
            (Filter::And(mut a), Filter::And(b)) => {
                a.extend(b);
                Filter::And(a)
            }
            (Filter::And(mut a), f) => {
                a.push(f);
                Filter::And(a)
            }
            (f, Filter::And(mut b)) => {
                b.insert(0, f);
                Filter::And(b)
            }
            (a, b) => Filter::And(vec![a, b]),
        }
    }

    /// Disjunction with simplification: `Exclude` is the identity, `Include` absorbs.
    pub fn or(self, other: Filter) -> Filter {
        match (self, other) {
            (Filter::Exclude, f) | (f, Filter::Exclude) => f,
            (Filter::Include, _) | (_, Filter::Include) => Filter::Include,
            (a, b) if a == b => a,
            (Filter::Or(mut a), Filter::Or(b)) => {
                a.extend(b);
                Filter::Or(a)
            }
            (Filter::Or(mut a), f) => {
                a.push(f);
                Filter::Or(a)
            }
            (f, Filter::Or(mut b)) => {
                b.insert(0, f);
                Filter::Or(b)
            }
            (a, b) => Filter::Or(vec![a, b]),
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Filter {
        match self {
            Filter::Include => Filter::Exclude,
            Filter::Exclude => Filter::Include,
            Filter::Not(inner) => *inner,
            f => Filter::Not(Box::new(f)),
        }
    }

    pub fn evaluate(&self, feature: &Feature) -> bool {
        match self {
            Filter::Include => true,
            Filter::Exclude => false,
            Filter::Id(ids) => ids.contains(feature.id()),
            Filter::Compare { property, op, value } => match feature.value(property) {
                Some(actual) if !actual.is_null() => op.test(actual.compare(value)),
                _ => false,
            },
            Filter::IsNull(property) => feature.value(property).map_or(true, Value::is_null),
            Filter::Bbox { property, envelope } => {
                let geometry = match property {
                    Some(name) => feature.value(name).and_then(Value::as_geometry),
                    None => feature.default_geometry(),
                };
                geometry
                    .and_then(|g| g.envelope())
                    .is_some_and(|env| env.intersects(envelope))
            }
            Filter::And(children) => children.iter().all(|c| c.evaluate(feature)),
            Filter::Or(children) => children.iter().any(|c| c.evaluate(feature)),
            Filter::Not(inner) => !inner.evaluate(feature),
        }
    }

    /// Attribute names referenced by this filter.
    pub fn property_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        self.collect_property_names(&mut names);
        names
    }

    fn collect_property_names(&self, names: &mut BTreeSet<String>) {
        match self {
            Filter::Compare { property, .. } | Filter::IsNull(property) => {
                names.insert(property.clone());
            }
            Filter::Bbox {
                property: Some(property),
                ..
            } => {
                names.insert(property.clone());
            }
            Filter::And(children) | Filter::Or(children) => {
                for child in children {
                    child.collect_property_names(names);
                }
            }
            Filter::Not(inner) => inner.collect_property_names(names),
            _ => {}
        }
    }

    /// Rewrite property references through `resolve`.
    pub fn map_property_names(&self, resolve: &impl Fn(&str) -> String) -> Filter {
        match self {
            Filter::Compare { property, op, value } => Filter::Compare {
                property: resolve(property),
                op: *op,
                value: value.clone(),
            },
            Filter::IsNull(property) => Filter::IsNull(resolve(property)),
            Filter::Bbox { property, envelope } => Filter::Bbox {
                property: property.as_deref().map(resolve),
                envelope: *envelope,
            },
            Filter::And(children) => {
                Filter::And(children.iter().map(|c| c.map_property_names(resolve)).collect())
            }
            Filter::Or(children) => {
                Filter::Or(children.iter().map(|c| c.map_property_names(resolve)).collect())
            }
            Filter::Not(inner) => Filter::Not(Box::new(inner.map_property_names(resolve))),
            other => other.clone(),
        }
    }

    /// Strip namespace prefixes (`gml:name` -> `name`) where the local name is an
    /// attribute of `feature_type`.
    pub fn resolve_property_names(&self, feature_type: &FeatureType) -> Filter {
        self.map_property_names(&|name| resolve_property_name(name, feature_type))
    }
}

pub(crate) fn resolve_property_name(name: &str, feature_type: &FeatureType) -> String {
    if feature_type.index_of(name).is_some() {
        return name.to_string();
    }
    match name.rsplit_once(':') {
        Some((_, local)) if feature_type.index_of(local).is_some() => local.to_string(),
        _ => name.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeType;
    use crate::types::Geometry;
    use std::sync::Arc;

    fn sample() -> Feature {
        let ft = Arc::new(
            FeatureType::builder("rivers")
                .attribute("name", AttributeType::Text)
                .attribute("flow", AttributeType::Float)
                .geometry("geom")
                .build()
                .unwrap(),
        );
        let mut f = Feature::new(ft, "rivers.1");
        f.set_value("name", "rhine").unwrap();
        f.set_value("flow", 4.5).unwrap();
        f.set_value("geom", Geometry::point(10.0, 10.0)).unwrap();
        f
    }

    #[test]
    fn test_and_simplification() {
        let f = Filter::eq("a", 1);
        assert_eq!(Filter::Include.and(f.clone()), f);
        assert_eq!(f.clone().and(Filter::Exclude), Filter::Exclude);
        assert_eq!(f.clone().and(f.clone()), f);
        let nested = Filter::eq("a", 1).and(Filter::eq("b", 2)).and(Filter::eq("c", 3));
        match nested {
            Filter::And(children) => assert_eq!(children.len(), 3),
            other => panic!("expected flattened And, got {:?}", other),
        }
    }

    #[test]
    fn test_or_and_not_simplification() {
        let f = Filter::eq("a", 1);
        assert_eq!(Filter::Exclude.or(f.clone()), f);
        assert_eq!(f.clone().or(Filter::Include), Filter::Include);
        assert_eq!(f.clone().not().not(), f);
        assert_eq!(Filter::Include.not(), Filter::Exclude);
    }

    #[test]
    fn test_evaluate() {
        let f = sample();
        assert!(Filter::eq("name", "rhine").evaluate(&f));
        assert!(Filter::gt("flow", 4).evaluate(&f));
        assert!(!Filter::lt("flow", 4).evaluate(&f));
        assert!(Filter::fid("rivers.1").evaluate(&f));
        assert!(!Filter::fid("rivers.2").evaluate(&f));
        assert!(Filter::bbox(Envelope::new(0.0, 0.0, 20.0, 20.0)).evaluate(&f));
        assert!(!Filter::bbox(Envelope::new(0.0, 0.0, 1.0, 1.0)).evaluate(&f));
        assert!(!Filter::is_null("name").evaluate(&f));
        assert!(Filter::is_null("missing").evaluate(&f));
        assert!(!Filter::eq("missing", 1).evaluate(&f));
    }

    #[test]
    fn test_property_names_and_resolution() {
        let f = sample();
        let filter = Filter::eq("gml:name", "rhine").and(Filter::gt("flow", 1));
        assert_eq!(
            filter.property_names().into_iter().collect::<Vec<_>>(),
            vec!["flow".to_string(), "gml:name".to_string()]
        );
        let resolved = filter.resolve_property_names(f.feature_type());
        assert!(resolved.property_names().contains("name"));
        assert!(resolved.evaluate(&f));
    }
}
