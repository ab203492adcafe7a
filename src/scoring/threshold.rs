//! Threshold evaluation
//!
//! Turns raw metric values into a 0-100 category score. Rules are grouped by
//! their `group`, each group is evaluated independently in ascending
//! evaluation order and the first matching rule decides the group score.
//! Group sub-scores are then composed with the collector's [`GroupCombine`].
//!
//! A group reads the metric named after the group; the implicit group reads
//! [`DEFAULT_METRIC`].

use std::collections::BTreeMap;

use crate::model::{GroupCombine, GroupScore, RuleAction, ThresholdRule};

/// Metric key read by rules without a group
pub const DEFAULT_METRIC: &str = "value";

/// Result of evaluating all groups of a collector for one instance
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub score: u8,
    /// Most severe action among the evaluated groups
    pub action: RuleAction,
    pub groups: Vec<GroupScore>,
}

impl Evaluation {
    pub fn breached(&self) -> bool {
        self.action == RuleAction::Alert
    }
}

#[derive(Debug, Clone)]
struct RuleGroup {
    name: Option<String>,
    rules: Vec<ThresholdRule>,
    default_score: u8,
}

/// Evaluator built once per run from a collector's rule table
#[derive(Debug, Clone)]
pub struct ThresholdEvaluator {
    groups: Vec<RuleGroup>,
    combine: GroupCombine,
}

impl ThresholdEvaluator {
    pub fn new(rules: &[ThresholdRule], collector_default: u8, combine: GroupCombine) -> Self {
        let mut by_group: BTreeMap<Option<String>, Vec<ThresholdRule>> = BTreeMap::new();
        for rule in rules.iter().filter(|rule| rule.active) {
            by_group
                .entry(rule.group.clone())
                .or_default()
                .push(rule.clone());
        }

        let groups = by_group
            .into_iter()
            .map(|(name, mut rules)| {
                rules.sort_by_key(|rule| rule.evaluation_order);
                let default_score = rules
                    .iter()
                    .find_map(|rule| rule.default_score)
                    .unwrap_or(collector_default);
                RuleGroup {
                    name,
                    rules,
                    default_score,
                }
            })
            .collect();

        Self { groups, combine }
    }

    /// Whether any active rule exists
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Evaluate every group whose metric is present in `values`
    ///
    /// Returns `None` when no group could be evaluated, which the caller
    /// records as a skipped instance rather than an error.
    pub fn evaluate(&self, values: &BTreeMap<String, f64>) -> Option<Evaluation> {
        let groups: Vec<GroupScore> = self
            .groups
            .iter()
            .filter_map(|group| {
                let metric = group.name.as_deref().unwrap_or(DEFAULT_METRIC);
                let value = values.get(metric)?;
                Some(evaluate_group(group, metric, *value))
            })
            .collect();

        let scores: Vec<u8> = groups.iter().map(|group| group.score).collect();
        let score = self.combine.combine(&scores)?;
        let action = groups
            .iter()
            .map(|group| group.action)
            .max()
            .unwrap_or_default();

        Some(Evaluation {
            score,
            action,
            groups,
        })
    }
}

fn evaluate_group(group: &RuleGroup, metric: &str, value: f64) -> GroupScore {
    let matched = group
        .rules
        .iter()
        .find(|rule| rule.operator.holds(value, rule.threshold));

    match matched {
        Some(rule) => GroupScore {
            group: group.name.clone(),
            metric: metric.to_string(),
            value,
            score: rule.score,
            matched_rule: Some(rule.name.clone()),
            action: rule.action,
        },
        None => GroupScore {
            group: group.name.clone(),
            metric: metric.to_string(),
            value,
            score: group.default_score,
            matched_rule: None,
            action: RuleAction::Ok,
        },
    }
}
