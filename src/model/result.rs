use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;

/// Identifier as reported by the engine
///
/// The engine echoes ids back either as JSON numbers or as strings, so both are
/// normalized to their string form for comparison.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EngineId(String);

impl EngineId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when this id refers to the given local numeric id.
    pub fn matches(&self, id: u64) -> bool {
        self.0.trim() == id.to_string()
    }
}

impl std::fmt::Display for EngineId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for EngineId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

impl Serialize for EngineId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for EngineId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Integer(i64),
            Float(f64),
            Text(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Integer(n) => EngineId(n.to_string()),
            Raw::Float(n) if n.fract() == 0.0 => EngineId(format!("{}", n as i64)),
            Raw::Float(n) => EngineId(n.to_string()),
            Raw::Text(s) => EngineId(s),
        })
    }
}

/// One placement in the engine's answer
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct EngineAllocation {
    /// Absent for placements the engine created itself
    #[serde(default)]
    pub allocation_id: Option<EngineId>,

    pub crop_id: EngineId,

    #[serde(default)]
    pub crop_name: Option<String>,

    #[serde(default)]
    pub variety: Option<String>,

    #[serde(default, alias = "area")]
    pub area_used: f64,

    pub start_date: String,

    pub completion_date: String,

    #[serde(default)]
    pub growth_days: Option<i64>,

    #[serde(default)]
    pub accumulated_gdd: f64,

    #[serde(default, alias = "cost")]
    pub total_cost: f64,

    #[serde(default, alias = "revenue")]
    pub expected_revenue: f64,

    #[serde(default)]
    pub profit: Option<f64>,
}

/// The allocations the engine placed on one parcel
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ParcelScheduleResult {
    #[serde(rename = "field_id")]
    pub parcel_id: EngineId,

    #[serde(default, rename = "field_name")]
    pub parcel_name: Option<String>,

    #[serde(default)]
    pub allocations: Vec<EngineAllocation>,
}

/// The engine's answer to `optimize allocate` / `optimize adjust`
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct OptimizerResult {
    #[serde(default)]
    pub optimization_id: Option<String>,

    #[serde(default)]
    pub algorithm_used: Option<String>,

    #[serde(default)]
    pub is_optimal: Option<bool>,

    #[serde(default)]
    pub optimization_time: Option<f64>,

    #[serde(default)]
    pub total_cost: Option<f64>,

    #[serde(default)]
    pub total_revenue: Option<f64>,

    #[serde(default)]
    pub total_profit: Option<f64>,

    #[serde(default, rename = "field_schedules")]
    pub schedules: Vec<ParcelScheduleResult>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<serde_json::Value>,
}

impl OptimizerResult {
    pub fn allocations(&self) -> impl Iterator<Item = &EngineAllocation> {
        self.schedules.iter().flat_map(|s| s.allocations.iter())
    }

    pub fn allocation_count(&self) -> usize {
        self.schedules.iter().map(|s| s.allocations.len()).sum()
    }

    /// Allocation ids that occur more than once, in first-seen order.
    pub fn duplicate_allocation_ids(&self) -> Vec<EngineId> {
        let mut seen = HashSet::new();
        let mut duplicates = Vec::new();
        for id in self.allocations().filter_map(|a| a.allocation_id.as_ref()) {
            if !seen.insert(id) && !duplicates.contains(id) {
                duplicates.push(id.clone());
            }
        }
        duplicates
    }

    /// Distinct crop ids referenced anywhere in the result
    pub fn referenced_crop_ids(&self) -> HashSet<&EngineId> {
        self.allocations().map(|a| &a.crop_id).collect()
    }
}
