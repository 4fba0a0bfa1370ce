//! Host metrics agent
//!
//! Samples CPU, memory and disk usage on a fixed interval and publishes each
//! reading to an MQTT broker as a tenant- and agent-scoped JSON data point.

pub mod backoff;
pub mod config;
pub mod error;
pub mod fake;
pub mod metrics;
pub mod mqtt;
pub mod publisher;
pub mod sampler;

pub use config::AgentConfig;
pub use error::{CollectError, PublishError};
pub use metrics::{MetricSource, SystemSource};
pub use publisher::{Publisher, PublisherConfig, Transport};
pub use sampler::{MetricSink, PublishingSink, Sampler};
