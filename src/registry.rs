//! Collector registry
//!
//! A collector is a declarative bundle: its configuration, its ordered
//! threshold rules and its version queries. Adding a metric is a data change,
//! not a code change. The registry is owned by the scheduler actor, which is
//! the only writer.
//!
//! Each category is fed by at most one enabled collector.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Category, CollectorConfig, ThresholdRule, VersionQuery};
use crate::scoring::{QueryResolver, ThresholdEvaluator, WeightTable};

/// Configuration, rules and queries of one collector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectorBundle {
    #[serde(flatten)]
    pub config: CollectorConfig,
    #[serde(default)]
    pub rules: Vec<ThresholdRule>,
    #[serde(default)]
    pub queries: Vec<VersionQuery>,
}

impl CollectorBundle {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn evaluator(&self) -> ThresholdEvaluator {
        ThresholdEvaluator::new(
            &self.rules,
            self.config.default_score,
            self.config.group_combine,
        )
    }

    pub fn resolver(&self) -> QueryResolver {
        QueryResolver::new(&self.queries)
    }

    /// Check the invariants of the bundle
    pub fn validate(&self) -> Result<(), RegistryError> {
        let config = &self.config;
        if config.name.trim().is_empty() {
            return Err(RegistryError::Invalid("collector name must not be empty".into()));
        }
        if config.interval_secs == 0 {
            return Err(RegistryError::Invalid(format!(
                "{}: interval must be at least one second",
                config.name
            )));
        }
        if config.timeout_secs == 0 {
            return Err(RegistryError::Invalid(format!(
                "{}: timeout must be at least one second",
                config.name
            )));
        }
        if config.parallel_degree == 0 {
            return Err(RegistryError::Invalid(format!(
                "{}: parallel degree must be at least 1",
                config.name
            )));
        }
        if config.weight > 100 {
            return Err(RegistryError::Invalid(format!(
                "{}: weight {} exceeds 100",
                config.name, config.weight
            )));
        }
        if config.default_score > 100 {
            return Err(RegistryError::Invalid(format!(
                "{}: default score {} exceeds 100",
                config.name, config.default_score
            )));
        }

        validate_rules(&config.name, &self.rules)?;
        validate_queries(&config.name, &self.queries)
    }
}

fn validate_rules(collector: &str, rules: &[ThresholdRule]) -> Result<(), RegistryError> {
    let mut orders = HashSet::new();
    let mut names = HashSet::new();

    for rule in rules {
        if !names.insert(rule.name.as_str()) {
            return Err(RegistryError::Invalid(format!(
                "{collector}: duplicate rule name '{}'",
                rule.name
            )));
        }
        if !orders.insert((rule.group.as_deref(), rule.evaluation_order)) {
            return Err(RegistryError::Invalid(format!(
                "{collector}: evaluation order {} used twice in group '{}'",
                rule.evaluation_order,
                rule.group.as_deref().unwrap_or("default")
            )));
        }
        if rule.score > 100 || rule.default_score.is_some_and(|s| s > 100) {
            return Err(RegistryError::Invalid(format!(
                "{collector}: rule '{}' scores must be within 0-100",
                rule.name
            )));
        }
        if !rule.threshold.is_finite() {
            return Err(RegistryError::Invalid(format!(
                "{collector}: rule '{}' threshold must be finite",
                rule.name
            )));
        }
    }

    Ok(())
}

fn validate_queries(collector: &str, queries: &[VersionQuery]) -> Result<(), RegistryError> {
    for query in queries {
        if let Some(max) = &query.max_version
            && max < &query.min_version
        {
            return Err(RegistryError::Invalid(format!(
                "{collector}: query range {}..{} is empty",
                query.min_version, max
            )));
        }
        if query.template.trim().is_empty() {
            return Err(RegistryError::Invalid(format!(
                "{collector}: query template for {} must not be empty",
                query.min_version
            )));
        }
    }
    Ok(())
}

/// Partial update of a collector's configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorUpdate {
    pub enabled: Option<bool>,
    pub interval_secs: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub weight: Option<u32>,
    pub parallel_degree: Option<usize>,
}

impl CollectorUpdate {
    pub fn apply(&self, config: &mut CollectorConfig) {
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
        if let Some(interval) = self.interval_secs {
            config.interval_secs = interval;
        }
        if let Some(timeout) = self.timeout_secs {
            config.timeout_secs = timeout;
        }
        if let Some(weight) = self.weight {
            config.weight = weight;
        }
        if let Some(parallel) = self.parallel_degree {
            config.parallel_degree = parallel;
        }
    }
}

/// Errors raised by registry operations
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryError {
    UnknownCollector(String),
    Duplicate(String),
    /// Another enabled collector already scores this category
    CategoryTaken {
        category: Category,
        owner: String,
    },
    Invalid(String),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::UnknownCollector(name) => write!(f, "unknown collector '{name}'"),
            RegistryError::Duplicate(name) => write!(f, "collector '{name}' already exists"),
            RegistryError::CategoryTaken { category, owner } => write!(
                f,
                "category {category} is already scored by enabled collector '{owner}'"
            ),
            RegistryError::Invalid(msg) => write!(f, "invalid collector configuration: {msg}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Set of collector bundles keyed by name
#[derive(Debug, Clone, Default)]
pub struct CollectorRegistry {
    bundles: BTreeMap<String, CollectorBundle>,
}

impl CollectorRegistry {
    pub fn new(bundles: Vec<CollectorBundle>) -> Result<Self, RegistryError> {
        let mut registry = Self::default();
        for bundle in bundles {
            bundle.validate()?;
            if registry.bundles.contains_key(bundle.name()) {
                return Err(RegistryError::Duplicate(bundle.name().to_string()));
            }
            registry.check_category(&bundle)?;
            registry.bundles.insert(bundle.name().to_string(), bundle);
        }
        registry.warn_on_weight_sum();
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&CollectorBundle> {
        self.bundles.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CollectorBundle> {
        self.bundles.get_mut(name)
    }

    /// Bundles ordered by execution order, then name
    pub fn ordered(&self) -> Vec<&CollectorBundle> {
        let mut bundles: Vec<&CollectorBundle> = self.bundles.values().collect();
        bundles.sort_by(|a, b| {
            a.config
                .execution_order
                .cmp(&b.config.execution_order)
                .then_with(|| a.config.name.cmp(&b.config.name))
        });
        bundles
    }

    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Check that `bundle` may replace the registered collector of the same name
    pub fn admit(&self, bundle: &CollectorBundle) -> Result<(), RegistryError> {
        bundle.validate()?;
        if !self.bundles.contains_key(bundle.name()) {
            return Err(RegistryError::UnknownCollector(bundle.name().to_string()));
        }
        self.check_category(bundle)
    }

    /// Replace a bundle after validating it
    pub fn replace(&mut self, bundle: CollectorBundle) -> Result<(), RegistryError> {
        self.admit(&bundle)?;
        self.bundles.insert(bundle.name().to_string(), bundle);
        self.warn_on_weight_sum();
        Ok(())
    }

    /// Weight of each category's enabled collector
    pub fn weights(&self) -> WeightTable {
        self.bundles
            .values()
            .filter(|b| b.config.enabled)
            .map(|b| (b.config.category, b.config.weight))
            .collect()
    }

    fn check_category(&self, bundle: &CollectorBundle) -> Result<(), RegistryError> {
        if !bundle.config.enabled {
            return Ok(());
        }
        let owner = self.bundles.values().find(|other| {
            other.config.enabled
                && other.config.category == bundle.config.category
                && other.name() != bundle.name()
        });
        match owner {
            Some(owner) => Err(RegistryError::CategoryTaken {
                category: bundle.config.category,
                owner: owner.name().to_string(),
            }),
            None => Ok(()),
        }
    }

    fn warn_on_weight_sum(&self) {
        let total: u32 = self.weights().values().sum();
        if total != 100 && !self.bundles.is_empty() {
            warn!("enabled collector weights sum to {total}, composites are renormalized");
        }
    }
}
