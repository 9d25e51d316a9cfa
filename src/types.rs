//! Core types for the feature store.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Identifier of a feature within its feature type.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeatureId(pub String);

impl FeatureId {
    pub fn new(id: impl Into<String>) -> Self {
        FeatureId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Natural ordering: a common prefix compares textually, a trailing run of digits
    /// numerically, so `parcels.9` sorts before `parcels.10`.
    pub fn natural_cmp(&self, other: &FeatureId) -> Ordering {
        let (a_prefix, a_num) = split_numeric_suffix(&self.0);
        let (b_prefix, b_num) = split_numeric_suffix(&other.0);
        a_prefix
            .cmp(b_prefix)
            .then_with(|| match (a_num, b_num) {
                (Some(a), Some(b)) => a.cmp(&b),
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            })
            .then_with(|| self.0.cmp(&other.0))
    }
}

fn split_numeric_suffix(s: &str) -> (&str, Option<u64>) {
    let digits = s.bytes().rev().take_while(u8::is_ascii_digit).count();
    if digits == 0 {
        return (s, None);
    }
    let (prefix, suffix) = s.split_at(s.len() - digits);
    (prefix, suffix.parse().ok())
}

impl fmt::Debug for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeatureId({})", self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(s: &str) -> Self {
        FeatureId(s.to_string())
    }
}

impl From<String> for FeatureId {
    fn from(s: String) -> Self {
        FeatureId(s)
    }
}

/// Identifier of a transaction. Zero is reserved for auto-commit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    pub const AUTO_COMMIT: TransactionId = TransactionId(0);

    pub fn is_auto_commit(self) -> bool {
        self == Self::AUTO_COMMIT
    }
}

impl fmt::Debug for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto_commit() {
            write!(f, "TransactionId(AUTO_COMMIT)")
        } else {
            write!(f, "TransactionId({})", self.0)
        }
    }
}

/// A planar coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Coordinate {
    pub x: f64,
    pub y: f64,
}

impl Coordinate {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Envelope {
    /// Create an envelope from two corners in any order.
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self {
            min_x: x1.min(x2),
            min_y: y1.min(y2),
            max_x: x1.max(x2),
            max_y: y1.max(y2),
        }
    }

    pub fn of_coordinate(c: Coordinate) -> Self {
        Self::new(c.x, c.y, c.x, c.y)
    }

    /// Envelope of a coordinate sequence; `None` when empty.
    pub fn of_coordinates<'a>(coords: impl IntoIterator<Item = &'a Coordinate>) -> Option<Self> {
        let mut iter = coords.into_iter();
        let first = iter.next()?;
        let mut env = Self::of_coordinate(*first);
        for c in iter {
            env.expand_to_include_coordinate(*c);
        }
        Some(env)
    }

    pub fn expand_to_include(&mut self, other: &Envelope) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn expand_to_include_coordinate(&mut self, c: Coordinate) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    /// Union of two optional envelopes.
    pub fn union(a: Option<Envelope>, b: Option<Envelope>) -> Option<Envelope> {
        match (a, b) {
            (Some(mut a), Some(b)) => {
                a.expand_to_include(&b);
                Some(a)
            }
            (a, None) => a,
            (None, b) => b,
        }
    }

    pub fn intersects(&self, other: &Envelope) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }

    pub fn contains(&self, c: Coordinate) -> bool {
        c.x >= self.min_x && c.x <= self.max_x && c.y >= self.min_y && c.y <= self.max_y
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }
}

/// Geometry value. Only envelopes and coordinate mapping are supported.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(Coordinate),
    LineString(Vec<Coordinate>),
    Polygon {
        exterior: Vec<Coordinate>,
        holes: Vec<Vec<Coordinate>>,
    },
    MultiPoint(Vec<Coordinate>),
}

impl Geometry {
    pub fn point(x: f64, y: f64) -> Self {
        Geometry::Point(Coordinate::new(x, y))
    }

    /// Rectangle polygon covering an envelope.
    pub fn rectangle(env: &Envelope) -> Self {
        Geometry::Polygon {
            exterior: vec![
                Coordinate::new(env.min_x, env.min_y),
                Coordinate::new(env.max_x, env.min_y),
                Coordinate::new(env.max_x, env.max_y),
                Coordinate::new(env.min_x, env.max_y),
                Coordinate::new(env.min_x, env.min_y),
            ],
            holes: Vec::new(),
        }
    }

    pub fn envelope(&self) -> Option<Envelope> {
        match self {
            Geometry::Point(c) => Some(Envelope::of_coordinate(*c)),
            Geometry::LineString(coords) | Geometry::MultiPoint(coords) => {
                Envelope::of_coordinates(coords)
            }
            // Holes lie within the exterior ring.
            Geometry::Polygon { exterior, .. } => Envelope::of_coordinates(exterior),
        }
    }

    /// Apply a fallible function to every coordinate.
    pub fn try_map_coordinates<E>(
        &self,
        mut f: impl FnMut(Coordinate) -> Result<Coordinate, E>,
    ) -> Result<Geometry, E> {
        let mut map_all = |coords: &[Coordinate]| -> Result<Vec<Coordinate>, E> {
            coords.iter().map(|c| f(*c)).collect()
        };
        Ok(match self {
            Geometry::Point(c) => Geometry::Point(map_all(std::slice::from_ref(c))?[0]),
            Geometry::LineString(coords) => Geometry::LineString(map_all(coords)?),
            Geometry::MultiPoint(coords) => Geometry::MultiPoint(map_all(coords)?),
            Geometry::Polygon { exterior, holes } => Geometry::Polygon {
                exterior: map_all(exterior)?,
                holes: holes
                    .iter()
                    .map(|h| map_all(h))
                    .collect::<Result<Vec<_>, E>>()?,
            },
        })
    }
}

/// Attribute value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Geometry(Geometry),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_geometry(&self) -> Option<&Geometry> {
        match self {
            Value::Geometry(g) => Some(g),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Compare two values. Integers and floats compare numerically; geometries and
    /// mismatched kinds are unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(_), Value::Float(_))
            | (Value::Float(_), Value::Int(_))
            | (Value::Float(_), Value::Float(_)) => self.as_f64()?.partial_cmp(&other.as_f64()?),
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Geometry(a), Value::Geometry(b)) if a == b => Some(Ordering::Equal),
            _ => None,
        }
    }

    /// Total order for sorting: nulls first, then by kind, then by value.
    pub fn sort_cmp(&self, other: &Value) -> Ordering {
        self.compare(other)
            .unwrap_or_else(|| self.kind_rank().cmp(&other.kind_rank()))
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Int(_) | Value::Float(_) => 2,
            Value::Text(_) => 3,
            Value::Geometry(_) => 4,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Value::from(*f),
            Value::Text(s) => serde_json::Value::String(s.clone()),
            Value::Geometry(g) => serde_json::to_value(g).unwrap_or(serde_json::Value::Null),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Geometry> for Value {
    fn from(v: Geometry) -> Self {
        Value::Geometry(v)
    }
}

/// Coordinate reference system identified by an authority code such as `EPSG:4326`.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Crs(String);

impl Crs {
    /// Create from an authority code. Codes are case-insensitive.
    pub fn new(code: impl AsRef<str>) -> Self {
        Crs(code.as_ref().trim().to_ascii_uppercase())
    }

    pub fn wgs84() -> Self {
        Crs::new("EPSG:4326")
    }

    pub fn web_mercator() -> Self {
        Crs::new("EPSG:3857")
    }

    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Crs({})", self.0)
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_id_natural_order() {
        let a = FeatureId::from("parcels.9");
        let b = FeatureId::from("parcels.10");
        assert_eq!(a.natural_cmp(&b), Ordering::Less);
        assert!(a > b, "lexical order differs from natural order");
        assert_eq!(
            FeatureId::from("a").natural_cmp(&FeatureId::from("a1")),
            Ordering::Less
        );
    }

    #[test]
    fn test_envelope_union_and_intersects() {
        let a = Envelope::new(0.0, 0.0, 1.0, 1.0);
        let b = Envelope::new(2.0, 2.0, 3.0, 3.0);
        let u = Envelope::union(Some(a), Some(b)).unwrap();
        assert_eq!(u, Envelope::new(0.0, 0.0, 3.0, 3.0));
        assert!(!a.intersects(&b));
        assert!(u.intersects(&a));
        assert_eq!(Envelope::union(None, Some(b)), Some(b));
    }

    #[test]
    fn test_geometry_envelope() {
        let line = Geometry::LineString(vec![Coordinate::new(1.0, 5.0), Coordinate::new(-2.0, 3.0)]);
        assert_eq!(line.envelope(), Some(Envelope::new(-2.0, 3.0, 1.0, 5.0)));
        assert_eq!(Geometry::LineString(vec![]).envelope(), None);
    }

    #[test]
    fn test_value_compare_numeric() {
        assert_eq!(Value::Int(2).compare(&Value::Float(2.5)), Some(Ordering::Less));
        assert_eq!(Value::Text("a".into()).compare(&Value::Int(1)), None);
        assert_eq!(Value::Null.sort_cmp(&Value::Int(1)), Ordering::Less);
    }

    #[test]
    fn test_crs_normalized() {
        assert_eq!(Crs::new("epsg:4326"), Crs::wgs84());
    }
}
