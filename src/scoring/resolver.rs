//! Version-aware query resolution
//!
//! Version queries are kept in an interval map keyed by their minimum
//! version. Resolution only visits ranges starting at or below the target and
//! picks the highest priority, then the smallest minimum version.

use std::collections::BTreeMap;

use crate::model::{EngineVersion, VersionQuery};

#[derive(Debug, Clone, Default)]
pub struct QueryResolver {
    by_min_version: BTreeMap<EngineVersion, Vec<VersionQuery>>,
}

impl QueryResolver {
    pub fn new(queries: &[VersionQuery]) -> Self {
        let mut by_min_version: BTreeMap<EngineVersion, Vec<VersionQuery>> = BTreeMap::new();
        for query in queries.iter().filter(|query| query.active) {
            by_min_version
                .entry(query.min_version.clone())
                .or_default()
                .push(query.clone());
        }
        Self { by_min_version }
    }

    /// Select the query template for an engine version
    pub fn resolve(&self, version: &EngineVersion) -> Option<&VersionQuery> {
        let mut best: Option<&VersionQuery> = None;

        // ascending min version, so on equal priority the first seen wins
        for query in self
            .by_min_version
            .range(..=version.clone())
            .flat_map(|(_, queries)| queries.iter())
            .filter(|query| query.applies_to(version))
        {
            match best {
                Some(current) if current.priority >= query.priority => {}
                _ => best = Some(query),
            }
        }

        best
    }

    pub fn is_empty(&self) -> bool {
        self.by_min_version.is_empty()
    }
}
