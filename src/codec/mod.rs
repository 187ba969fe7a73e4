//! Exchange documents handed to the engine
//!
//! Every document is written whole to its own temp file through
//! [`ExchangeFileSet`]; the engine only ever sees file paths.

mod files;
pub mod rules;

pub use files::ExchangeFileSet;
pub use rules::{InteractionRule, RulesDocument};

use crate::catalog::CropCatalog;
use crate::model::{MoveInstruction, ParcelId, Plan};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldConfig {
    pub field_id: ParcelId,
    pub name: String,
    pub area: f64,
    pub daily_fixed_cost: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct FieldsDocument {
    pub fields: Vec<FieldConfig>,
}

impl FieldsDocument {
    pub fn from_plan(plan: &Plan) -> Self {
        Self {
            fields: plan
                .parcels
                .iter()
                .map(|p| FieldConfig {
                    field_id: p.id,
                    name: p.name.clone(),
                    area: p.area,
                    daily_fixed_cost: p.daily_fixed_cost,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CropsDocument {
    pub crops: Vec<Value>,
}

impl CropsDocument {
    /// One requirement profile per plan crop, keyed by master crop id.
    ///
    /// Plan crops whose master crop has left the catalog are skipped.
    pub fn from_plan(plan: &Plan, catalog: &dyn CropCatalog) -> Self {
        let mut crops = Vec::with_capacity(plan.crops.len());

        for snapshot in &plan.crops {
            match catalog.crop(snapshot.crop_id) {
                Some(master) => crops.push(with_crop_id(
                    master.requirement_profile(),
                    &master.id.to_string(),
                )),
                None => warn!(
                    "Plan {} crop snapshot {} refers to missing master crop {}",
                    plan.id, snapshot.id, snapshot.crop_id
                ),
            }
        }

        Self { crops }
    }
}

/// Rewrite `crop.crop_id` inside a requirement profile.
pub fn with_crop_id(mut profile: Value, crop_id: &str) -> Value {
    if !profile.is_object() {
        profile = Value::Object(Map::new());
    }
    if let Some(root) = profile.as_object_mut() {
        let crop = root
            .entry("crop")
            .or_insert_with(|| Value::Object(Map::new()));
        if !crop.is_object() {
            *crop = Value::Object(Map::new());
        }
        if let Some(crop) = crop.as_object_mut() {
            crop.insert("crop_id".to_string(), Value::String(crop_id.to_string()));
        }
    }
    profile
}

/// Weather data passed through to the engine as-is
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WeatherSeries(Value);

impl WeatherSeries {
    /// Accept stored weather, unwrapping the legacy `{"data": {"data": [...]}}` nesting.
    pub fn new(value: Value) -> Self {
        let nested = value
            .get("data")
            .filter(|d| d.is_object())
            .and_then(|d| d.get("data"))
            .is_some();

        if nested {
            if let Some(inner) = value.get("data") {
                return Self(inner.clone());
            }
        }
        Self(value)
    }

    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(Self::new(value))
    }

    pub fn as_value(&self) -> &Value {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MovesDocument<'a> {
    pub moves: &'a [MoveInstruction],
}
