use crate::catalog::CropCatalog;
use crate::error::CodecError;
use crate::model::Plan;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pairwise effect between two crop groups
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct InteractionRule {
    pub rule_id: String,
    pub rule_type: String,
    pub source_group: String,
    pub target_group: String,
    pub impact_ratio: f64,
    pub is_directional: bool,

    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct RulesDocument {
    pub rules: Vec<InteractionRule>,
}

/// Keep the first rule for each (source, target) pairing.
pub fn dedupe_rules(rules: Vec<InteractionRule>) -> Vec<InteractionRule> {
    let mut seen = HashSet::new();
    rules
        .into_iter()
        .filter(|r| seen.insert((r.source_group.clone(), r.target_group.clone())))
        .collect()
}

/// Validate and dedupe rules; `None` when there is nothing to send.
pub fn rules_document(rules: Vec<InteractionRule>) -> Result<Option<RulesDocument>, CodecError> {
    if let Some(bad) = rules.iter().find(|r| r.impact_ratio < 0.0) {
        return Err(CodecError::NegativeImpactRatio {
            source_group: bad.source_group.clone(),
            target_group: bad.target_group.clone(),
            ratio: bad.impact_ratio,
        });
    }

    let rules = dedupe_rules(rules);
    if rules.is_empty() {
        Ok(None)
    } else {
        Ok(Some(RulesDocument { rules }))
    }
}

/// Penalize planting a group right after itself, for every group in the plan.
pub fn continuous_cultivation_rules(
    plan: &Plan,
    catalog: &dyn CropCatalog,
    impact_ratio: f64,
) -> Vec<InteractionRule> {
    let mut rules = Vec::new();

    for snapshot in &plan.crops {
        let Some(crop) = catalog.crop(snapshot.crop_id) else {
            continue;
        };
        for group in &crop.groups {
            let suffix = uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, group.as_bytes())
                .simple()
                .to_string();
            rules.push(InteractionRule {
                rule_id: format!("continuous_{}_{}", group, &suffix[..8]),
                rule_type: "continuous_cultivation".to_string(),
                source_group: group.clone(),
                target_group: group.clone(),
                impact_ratio,
                is_directional: true,
                description: format!("Continuous cultivation penalty for {}", group),
            });
        }
    }

    dedupe_rules(rules)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{InMemoryCatalog, MasterCrop};
    use crate::model::CropSnapshot;

    fn rule(source: &str, target: &str, ratio: f64) -> InteractionRule {
        InteractionRule {
            rule_id: format!("{}-{}", source, target),
            rule_type: "continuous_cultivation".to_string(),
            source_group: source.to_string(),
            target_group: target.to_string(),
            impact_ratio: ratio,
            is_directional: true,
            description: String::new(),
        }
    }

    fn master(id: u64, groups: &[&str]) -> MasterCrop {
        MasterCrop {
            id,
            name: format!("crop-{}", id),
            variety: None,
            area_per_unit: 1.0,
            revenue_per_area: 1.0,
            groups: groups.iter().map(|g| g.to_string()).collect(),
            requirement: None,
        }
    }

    #[test]
    fn test_same_pairing_never_appears_twice() {
        let doc = rules_document(vec![
            rule("Solanaceae", "Solanaceae", 0.7),
            rule("Solanaceae", "Solanaceae", 0.5),
            rule("Brassicaceae", "Solanaceae", 1.2),
        ])
        .unwrap()
        .unwrap();

        assert_eq!(doc.rules.len(), 2);
        assert_eq!(doc.rules[0].impact_ratio, 0.7);
    }

    #[test]
    fn test_empty_rules_produce_no_document() {
        assert!(rules_document(vec![]).unwrap().is_none());
    }

    #[test]
    fn test_negative_ratio_rejected() {
        let err = rules_document(vec![rule("a", "b", -0.1)]).unwrap_err();
        assert!(matches!(err, CodecError::NegativeImpactRatio { .. }));
    }

    #[test]
    fn test_continuous_rules_one_per_group() {
        let catalog = InMemoryCatalog::new(vec![
            master(1, &["Solanaceae"]),
            master(2, &["Solanaceae", "Fruit"]),
        ])
        .unwrap();
        let mut plan = Plan::new(1, "rules");
        for (id, crop_id) in [(1, 1), (2, 2)] {
            plan.crops.push(CropSnapshot {
                id,
                crop_id,
                name: String::new(),
                variety: None,
                area_per_unit: 1.0,
                revenue_per_area: 1.0,
            });
        }

        let rules = continuous_cultivation_rules(&plan, &catalog, 0.7);
        assert_eq!(rules.len(), 2);
        assert!(rules[0].rule_id.starts_with("continuous_Solanaceae_"));
        assert!(rules.iter().all(|r| r.source_group == r.target_group));

        let again = continuous_cultivation_rules(&plan, &catalog, 0.7);
        assert_eq!(rules, again);
        assert_ne!(rules[0].rule_id, rules[1].rule_id);
    }
}
