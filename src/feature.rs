//! Features: identified rows of attribute values.

use crate::error::{Result, StoreError};
use crate::schema::FeatureType;
use crate::types::{Envelope, FeatureId, Geometry, Value};
use std::sync::Arc;

/// A single feature.
#[derive(Clone, Debug, PartialEq)]
pub struct Feature {
    id: FeatureId,
    feature_type: Arc<FeatureType>,
    values: Vec<Value>,
    /// Ask the store to keep `id` rather than assigning its own.
    use_provided_id: bool,
}

impl Feature {
    /// A feature with every attribute set to null.
    pub fn new(feature_type: Arc<FeatureType>, id: impl Into<FeatureId>) -> Self {
        let values = vec![Value::Null; feature_type.attribute_count()];
        Self {
            id: id.into(),
            feature_type,
            values,
            use_provided_id: false,
        }
    }

    /// Build a feature from positional values, validating each against its descriptor.
    pub fn from_values(
        feature_type: Arc<FeatureType>,
        id: impl Into<FeatureId>,
        values: Vec<Value>,
    ) -> Result<Self> {
        let mut feature = Self::new(feature_type, id);
        feature.set_values(values)?;
        Ok(feature)
    }

    pub fn id(&self) -> &FeatureId {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<FeatureId>) {
        self.id = id.into();
    }

    pub fn feature_type(&self) -> &Arc<FeatureType> {
        &self.feature_type
    }

    pub fn type_name(&self) -> &str {
        self.feature_type.name()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn value(&self, name: &str) -> Option<&Value> {
        self.feature_type.index_of(name).map(|i| &self.values[i])
    }

    pub fn value_at(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn use_provided_id(&self) -> bool {
        self.use_provided_id
    }

    pub fn set_use_provided_id(&mut self, value: bool) {
        self.use_provided_id = value;
    }

    /// Builder-style variant of [`Feature::set_use_provided_id`].
    pub fn with_provided_id(mut self) -> Self {
        self.use_provided_id = true;
        self
    }

    pub fn set_value(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let index = self
            .feature_type
            .index_of(name)
            .ok_or_else(|| StoreError::IllegalAttribute {
                attribute: name.to_string(),
                reason: format!("not an attribute of {}", self.feature_type.name()),
            })?;
        self.set_value_at(index, value.into())
    }

    pub fn set_value_at(&mut self, index: usize, value: Value) -> Result<()> {
        let descriptor = self.feature_type.attributes().get(index).ok_or_else(|| {
            StoreError::IllegalAttribute {
                attribute: index.to_string(),
                reason: "index out of range".into(),
            }
        })?;
        if value.is_null() {
            if !descriptor.nillable {
                return Err(StoreError::IllegalAttribute {
                    attribute: descriptor.name.clone(),
                    reason: "null not allowed".into(),
                });
            }
        } else if !descriptor.binding.accepts(&value) {
            return Err(StoreError::IllegalAttribute {
                attribute: descriptor.name.clone(),
                reason: format!("{:?} does not accept {:?}", descriptor.binding, value),
            });
        }
        self.values[index] = value;
        Ok(())
    }

    /// Replace all values positionally.
    pub fn set_values(&mut self, values: Vec<Value>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(StoreError::IllegalAttribute {
                attribute: self.feature_type.name().to_string(),
                reason: format!(
                    "expected {} values, got {}",
                    self.values.len(),
                    values.len()
                ),
            });
        }
        for (i, value) in values.into_iter().enumerate() {
            self.set_value_at(i, value)?;
        }
        Ok(())
    }

    /// Copy every attribute that `other` shares with this feature, matched by name.
    pub fn copy_values_from(&mut self, other: &Feature) -> Result<()> {
        for (i, descriptor) in other.feature_type.attributes().iter().enumerate() {
            if let Some(target) = self.feature_type.index_of(&descriptor.name) {
                self.set_value_at(target, other.values[i].clone())?;
            }
        }
        Ok(())
    }

    pub fn default_geometry(&self) -> Option<&Geometry> {
        self.feature_type
            .default_geometry_index()
            .and_then(|i| self.values[i].as_geometry())
    }

    /// Bounds of the default geometry.
    pub fn bounds(&self) -> Option<Envelope> {
        self.default_geometry().and_then(Geometry::envelope)
    }

    /// Project onto another (usually retyped) feature type by attribute name.
    pub fn retyped(&self, target: &Arc<FeatureType>) -> Feature {
        let values = target
            .attributes()
            .iter()
            .map(|d| self.value(&d.name).cloned().unwrap_or_default())
            .collect();
        Feature {
            id: self.id.clone(),
            feature_type: Arc::clone(target),
            values,
            use_provided_id: self.use_provided_id,
        }
    }

    /// Same values under a feature type with identical attributes (e.g. another CRS).
    pub(crate) fn relabeled(mut self, target: &Arc<FeatureType>) -> Feature {
        self.feature_type = Arc::clone(target);
        self
    }

    pub(crate) fn values_mut(&mut self) -> &mut [Value] {
        &mut self.values
    }

    /// JSON rendering in a GeoJSON-like shape.
    pub fn to_json(&self) -> serde_json::Value {
        let mut properties = serde_json::Map::new();
        let geometry_index = self.feature_type.default_geometry_index();
        for (i, descriptor) in self.feature_type.attributes().iter().enumerate() {
            if Some(i) == geometry_index {
                continue;
            }
            properties.insert(descriptor.name.clone(), self.values[i].to_json());
        }
        serde_json::json!({
            "type": "Feature",
            "id": self.id.as_str(),
            "geometry": self.default_geometry().map(|g| Value::Geometry(g.clone()).to_json()),
            "properties": properties,
        })
    }
}
