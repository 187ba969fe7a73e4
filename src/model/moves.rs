use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::plan::{AllocationId, CropId, ParcelId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveAction {
    Add,
    #[default]
    Move,
    Remove,
}

/// Requested mutation fed into `optimize adjust`
///
/// Field names and value types follow the engine's moves document: parcel and
/// crop ids are sent as strings, the allocation id as a number.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MoveInstruction {
    /// Target allocation; absent when adding a new placement
    #[serde(default)]
    pub allocation_id: Option<AllocationId>,

    #[serde(default)]
    pub action: MoveAction,

    #[serde(default, with = "optional_id_string", skip_serializing_if = "Option::is_none")]
    pub crop_id: Option<CropId>,

    #[serde(rename = "to_field_id", default, with = "optional_id_string")]
    pub to_parcel_id: Option<ParcelId>,

    #[serde(default)]
    pub to_start_date: Option<NaiveDate>,

    #[serde(default)]
    pub to_area: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variety: Option<String>,
}

impl MoveInstruction {
    /// Relocate an existing allocation.
    pub fn relocate(
        allocation_id: AllocationId,
        to_parcel_id: ParcelId,
        to_start_date: NaiveDate,
        to_area: Option<f64>,
    ) -> Self {
        Self {
            allocation_id: Some(allocation_id),
            action: MoveAction::Move,
            crop_id: None,
            to_parcel_id: Some(to_parcel_id),
            to_start_date: Some(to_start_date),
            to_area,
            variety: None,
        }
    }

    /// Place a crop that has no allocation yet.
    pub fn add(
        crop_id: CropId,
        to_parcel_id: ParcelId,
        to_start_date: NaiveDate,
        to_area: f64,
        variety: Option<String>,
    ) -> Self {
        Self {
            allocation_id: None,
            action: MoveAction::Add,
            crop_id: Some(crop_id),
            to_parcel_id: Some(to_parcel_id),
            to_start_date: Some(to_start_date),
            to_area: Some(to_area),
            variety,
        }
    }
}

/// Ids travel as strings on the wire but may be sent back as numbers.
mod optional_id_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<u64>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(id) => serializer.serialize_str(&id.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Option::<Raw>::deserialize(deserializer)? {
            None => Ok(None),
            Some(Raw::Number(n)) => Ok(Some(n)),
            Some(Raw::Text(s)) if s.trim().is_empty() => Ok(None),
            Some(Raw::Text(s)) => s
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| serde::de::Error::custom(format!("invalid id '{}'", s))),
        }
    }
}
