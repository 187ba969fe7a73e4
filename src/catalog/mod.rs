//! Master crop catalog
//!
//! Crop master data is edited elsewhere; this module only reads it. Each crop
//! carries the staged-requirement profile produced by the crop serializer,
//! which is forwarded to the engine untouched apart from its id.

use crate::error::CatalogError;
use crate::model::{CropId, CropSnapshot};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MasterCrop {
    pub id: CropId,

    pub name: String,

    #[serde(default)]
    pub variety: Option<String>,

    #[serde(default)]
    pub area_per_unit: f64,

    #[serde(default)]
    pub revenue_per_area: f64,

    /// Rotation groups (e.g. "Solanaceae") used for interaction rules
    #[serde(default)]
    pub groups: Vec<String>,

    /// Staged-requirement profile as produced by the crop serializer
    #[serde(default)]
    pub requirement: Option<Value>,
}

impl MasterCrop {
    /// Profile to embed in the crops document.
    ///
    /// Crops without a serialized profile get a bare one built from their
    /// commercial attributes.
    pub fn requirement_profile(&self) -> Value {
        match &self.requirement {
            Some(profile) => profile.clone(),
            None => json!({
                "crop": {
                    "crop_id": self.id.to_string(),
                    "name": self.name,
                    "variety": self.variety,
                    "area_per_unit": self.area_per_unit,
                    "revenue_per_area": self.revenue_per_area,
                    "groups": self.groups,
                },
                "stage_requirements": [],
            }),
        }
    }

    /// Take a plan-scoped copy of the commercial attributes.
    pub fn snapshot(&self) -> CropSnapshot {
        CropSnapshot {
            id: 0,
            crop_id: self.id,
            name: self.name.clone(),
            variety: self.variety.clone(),
            area_per_unit: self.area_per_unit,
            revenue_per_area: self.revenue_per_area,
        }
    }
}

pub trait CropCatalog: Send + Sync {
    fn crop(&self, id: CropId) -> Option<&MasterCrop>;
}

/// Catalog held in memory, loaded from a YAML or JSON list of crops
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    crops: HashMap<CropId, MasterCrop>,
}

impl InMemoryCatalog {
    pub fn new(crops: Vec<MasterCrop>) -> Result<Self, CatalogError> {
        let mut map = HashMap::with_capacity(crops.len());
        for crop in crops {
            let id = crop.id;
            if map.insert(id, crop).is_some() {
                return Err(CatalogError::DuplicateCrop(id));
            }
        }
        Ok(Self { crops: map })
    }

    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let content = std::fs::read_to_string(path).map_err(|e| CatalogError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;

        // YAML is a superset of JSON, so one parser covers both formats
        let crops: Vec<MasterCrop> = serde_yaml::from_str(&content)?;
        Self::new(crops)
    }

    pub fn len(&self) -> usize {
        self.crops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.crops.is_empty()
    }
}

impl CropCatalog for InMemoryCatalog {
    fn crop(&self, id: CropId) -> Option<&MasterCrop> {
        self.crops.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_yaml_catalog() {
        let yaml = r#"
- id: 1
  name: Tomato
  area_per_unit: 0.3
  revenue_per_area: 1200.0
  groups: [Solanaceae]
- id: 2
  name: Cabbage
  variety: Early
  requirement:
    crop: {crop_id: "cabbage", name: Cabbage}
    stage_requirements:
      - stage: {name: Seedling, order: 1}
        thermal: {required_gdd: 200.0}
"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("crops.yaml");
        std::fs::write(&path, yaml).unwrap();

        let catalog = InMemoryCatalog::load(&path).unwrap();
        assert_eq!(catalog.len(), 2);

        let tomato = catalog.crop(1).unwrap();
        let profile = tomato.requirement_profile();
        assert_eq!(profile["crop"]["crop_id"], "1");
        assert_eq!(profile["crop"]["groups"][0], "Solanaceae");

        let cabbage = catalog.crop(2).unwrap();
        assert_eq!(cabbage.requirement_profile()["crop"]["crop_id"], "cabbage");
        assert_eq!(cabbage.snapshot().variety.as_deref(), Some("Early"));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let crop = MasterCrop {
            id: 1,
            name: "Tomato".to_string(),
            variety: None,
            area_per_unit: 0.3,
            revenue_per_area: 1200.0,
            groups: vec![],
            requirement: None,
        };
        let err = InMemoryCatalog::new(vec![crop.clone(), crop]).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateCrop(1)));
    }
}
