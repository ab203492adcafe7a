//! HTTP route handlers

pub mod collectors;
pub mod executions;
pub mod health;
pub mod scores;
pub mod stats;
