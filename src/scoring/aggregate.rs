//! Composite score aggregation and status classification
//!
//! The composite is the weighted mean of the latest category scores over the
//! categories that are enabled and have been scored. Weights of missing
//! categories are left out (renormalized) and the gap is recorded in the
//! [`CompositeDetail`], so an incomplete composite is distinguishable from a
//! low one.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};

use crate::model::{
    Category, CategoryContribution, CategoryScore, CompositeDetail, CompositeScore, HealthStatus,
};

/// Category weights of the enabled collectors
pub type WeightTable = BTreeMap<Category, u32>;

pub const HEALTHY_FLOOR: f64 = 90.0;
pub const WARNING_FLOOR: f64 = 75.0;
pub const RISK_FLOOR: f64 = 60.0;

/// Classify a composite into its status band
///
/// `Healthy` >= 90, `Warning` >= 75, `Risk` >= 60, `Critical` below.
pub fn classify(composite: f64) -> HealthStatus {
    if composite >= HEALTHY_FLOOR {
        HealthStatus::Healthy
    } else if composite >= WARNING_FLOOR {
        HealthStatus::Warning
    } else if composite >= RISK_FLOOR {
        HealthStatus::Risk
    } else {
        HealthStatus::Critical
    }
}

/// Keep only the newest score per category
pub fn latest_per_category(scores: &[CategoryScore]) -> BTreeMap<Category, &CategoryScore> {
    let mut latest: BTreeMap<Category, &CategoryScore> = BTreeMap::new();
    for score in scores {
        match latest.get(&score.category) {
            Some(existing) if existing.collected_at >= score.collected_at => {}
            _ => {
                latest.insert(score.category, score);
            }
        }
    }
    latest
}

/// Compute the composite for one instance
///
/// Returns `None` when no enabled category has a score.
pub fn compose(
    instance_id: &str,
    scores: &[CategoryScore],
    weights: &WeightTable,
    computed_at: DateTime<Utc>,
) -> Option<CompositeScore> {
    let latest = latest_per_category(scores);

    let mut contributions = Vec::new();
    let mut missing = Vec::new();
    let mut weighted_sum = 0.0;
    let mut present_weight: u32 = 0;
    let total_weight: u32 = weights.values().sum();

    for (category, weight) in weights.iter().filter(|(_, weight)| **weight > 0) {
        match latest.get(category) {
            Some(score) => {
                weighted_sum += f64::from(score.score) * f64::from(*weight);
                present_weight += weight;
                contributions.push(CategoryContribution {
                    category: *category,
                    score: score.score,
                    weight: *weight,
                    collected_at: score.collected_at,
                });
            }
            None => missing.push(*category),
        }
    }

    if present_weight == 0 {
        return None;
    }

    let enabled: BTreeSet<&Category> = weights.keys().collect();
    let excluded = latest
        .keys()
        .filter(|category| !enabled.contains(category))
        .copied()
        .collect();

    let composite = round2(weighted_sum / f64::from(present_weight));
    let weight_coverage = round2(f64::from(present_weight) * 100.0 / f64::from(total_weight));

    Some(CompositeScore {
        instance_id: instance_id.to_string(),
        computed_at,
        composite,
        status: classify(composite),
        detail: CompositeDetail {
            contributions,
            missing,
            excluded,
            weight_coverage,
        },
    })
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
