//! Health scoring engine for a fleet of database instances
//!
//! Collectors probe every instance on their own interval, score the raw
//! metrics against ordered threshold rules and persist one category score per
//! instance. The aggregator folds the newest category scores into a weighted
//! composite with a health band. Every run is recorded in the execution log.

pub mod actors;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod detail;
pub mod history;
pub mod model;
pub mod probe;
pub mod registry;
pub mod scoring;
pub mod storage;
