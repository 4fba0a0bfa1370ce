//! Common crate for shared metric wire types
//!
//! This crate provides the metric data point published by the agent, the
//! standard metric-name vocabulary and the topic layout used on the broker.
//! Both the agent and the tail tool depend on it so the two sides of the
//! wire agree on one schema.

pub mod metric;
pub mod names;
pub mod topic;

// Re-export commonly used types for convenience
pub use metric::{Metric, ModelError};
pub use names::{MetricKind, MAX_METRIC_NAME_LEN};
pub use topic::{metric_topic, parse_topic, subscription_filter, TopicError, TopicParts};
