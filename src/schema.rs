//! Feature type (schema) definitions.

use crate::error::{Result, StoreError};
use crate::types::{Crs, Value};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Value binding of an attribute.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AttributeType {
    Bool,
    Int,
    Float,
    Text,
    Geometry,
}

impl AttributeType {
    /// Whether a (non-null) value can be stored in an attribute of this binding.
    /// Integers are accepted for float attributes.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (AttributeType::Bool, Value::Bool(_))
                | (AttributeType::Int, Value::Int(_))
                | (AttributeType::Float, Value::Float(_))
                | (AttributeType::Float, Value::Int(_))
                | (AttributeType::Text, Value::Text(_))
                | (AttributeType::Geometry, Value::Geometry(_))
        )
    }
}

/// A single attribute of a feature type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttributeDescriptor {
    pub name: String,
    pub binding: AttributeType,
    pub nillable: bool,
}

/// Describes the attributes of a family of features.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeatureType {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: Option<String>,
    crs: Option<Crs>,
}

impl FeatureType {
    pub fn builder(name: impl Into<String>) -> FeatureTypeBuilder {
        FeatureTypeBuilder {
            name: name.into(),
            attributes: Vec::new(),
            default_geometry: None,
            crs: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn attribute_count(&self) -> usize {
        self.attributes.len()
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(|a| a.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn descriptor(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn default_geometry(&self) -> Option<&AttributeDescriptor> {
        self.default_geometry
            .as_deref()
            .and_then(|name| self.descriptor(name))
    }

    pub fn default_geometry_index(&self) -> Option<usize> {
        self.default_geometry.as_deref().and_then(|n| self.index_of(n))
    }

    pub fn crs(&self) -> Option<&Crs> {
        self.crs.as_ref()
    }

    /// Project this type onto the named attributes, in the requested order.
    ///
    /// The default geometry survives when it is among the names; otherwise the first
    /// retained geometry attribute takes its place.
    pub fn retype(&self, names: &[String]) -> Result<FeatureType> {
        let mut attributes = Vec::with_capacity(names.len());
        for name in names {
            let descriptor = self.descriptor(name).ok_or_else(|| {
                StoreError::InvalidQuery(format!(
                    "{} has no attribute named {}",
                    self.name, name
                ))
            })?;
            attributes.push(descriptor.clone());
        }

        let default_geometry = match &self.default_geometry {
            Some(g) if names.iter().any(|n| n == g) => Some(g.clone()),
            _ => attributes
                .iter()
                .find(|a| a.binding == AttributeType::Geometry)
                .map(|a| a.name.clone()),
        };

        Ok(FeatureType {
            name: self.name.clone(),
            attributes,
            default_geometry,
            crs: self.crs.clone(),
        })
    }

    /// Same attributes with a different coordinate reference system.
    pub fn with_crs(&self, crs: Option<Crs>) -> FeatureType {
        FeatureType {
            crs,
            ..self.clone()
        }
    }

    /// Same attributes under a different type name.
    pub fn with_name(&self, name: impl Into<String>) -> FeatureType {
        FeatureType {
            name: name.into(),
            ..self.clone()
        }
    }
}

/// Builder for [`FeatureType`].
#[derive(Clone, Debug)]
pub struct FeatureTypeBuilder {
    name: String,
    attributes: Vec<AttributeDescriptor>,
    default_geometry: Option<String>,
    crs: Option<Crs>,
}

impl FeatureTypeBuilder {
    /// Add a nillable attribute.
    pub fn attribute(mut self, name: impl Into<String>, binding: AttributeType) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.into(),
            binding,
            nillable: true,
        });
        self
    }

    /// Add an attribute that rejects null values.
    pub fn required(mut self, name: impl Into<String>, binding: AttributeType) -> Self {
        self.attributes.push(AttributeDescriptor {
            name: name.into(),
            binding,
            nillable: false,
        });
        self
    }

    /// Add a geometry attribute; the first one becomes the default geometry.
    pub fn geometry(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if self.default_geometry.is_none() {
            self.default_geometry = Some(name.clone());
        }
        self.attributes.push(AttributeDescriptor {
            name,
            binding: AttributeType::Geometry,
            nillable: true,
        });
        self
    }

    pub fn crs(mut self, crs: Crs) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn build(self) -> Result<FeatureType> {
        if self.name.is_empty() {
            return Err(StoreError::InvalidSchema("type name is empty".into()));
        }
        let mut seen = HashSet::new();
        for attribute in &self.attributes {
            if !seen.insert(attribute.name.as_str()) {
                return Err(StoreError::InvalidSchema(format!(
                    "duplicate attribute {} in {}",
                    attribute.name, self.name
                )));
            }
        }
        Ok(FeatureType {
            name: self.name,
            attributes: self.attributes,
            default_geometry: self.default_geometry,
            crs: self.crs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parcels() -> FeatureType {
        FeatureType::builder("parcels")
            .required("name", AttributeType::Text)
            .attribute("area", AttributeType::Float)
            .geometry("geom")
            .crs(Crs::wgs84())
            .build()
            .unwrap()
    }

    #[test]
    fn test_duplicate_attribute_rejected() {
        let result = FeatureType::builder("t")
            .attribute("a", AttributeType::Int)
            .attribute("a", AttributeType::Text)
            .build();
        assert!(matches!(result, Err(StoreError::InvalidSchema(_))));
    }

    #[test]
    fn test_retype_preserves_requested_order() {
        let ft = parcels();
        let retyped = ft.retype(&["geom".to_string(), "name".to_string()]).unwrap();
        let names: Vec<_> = retyped.attribute_names().collect();
        assert_eq!(names, vec!["geom", "name"]);
        assert_eq!(retyped.default_geometry().unwrap().name, "geom");
        assert_eq!(retyped.crs(), Some(&Crs::wgs84()));
    }

    #[test]
    fn test_retype_without_geometry() {
        let retyped = parcels().retype(&["area".to_string()]).unwrap();
        assert!(retyped.default_geometry().is_none());
    }

    #[test]
    fn test_retype_unknown_attribute() {
        let result = parcels().retype(&["missing".to_string()]);
        assert!(matches!(result, Err(StoreError::InvalidQuery(_))));
    }

    #[test]
    fn test_accepts() {
        assert!(AttributeType::Float.accepts(&Value::Int(3)));
        assert!(!AttributeType::Int.accepts(&Value::Float(3.0)));
    }
}
