//! Pure scoring logic: query resolution, threshold evaluation and aggregation
//!
//! Nothing in here performs I/O; the actors feed it data loaded once per run.

pub mod aggregate;
pub mod resolver;
pub mod threshold;

pub use aggregate::{WeightTable, classify, compose};
pub use resolver::QueryResolver;
pub use threshold::{Evaluation, ThresholdEvaluator};
