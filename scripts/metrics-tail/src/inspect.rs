//! Validation of received messages against the agent wire contract.

use common::names::is_canonical_name;
use common::{parse_topic, Metric, MetricKind, ModelError, TopicError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum InspectError {
    #[error("invalid topic: {0}")]
    Topic(#[from] TopicError),

    #[error("invalid payload: {0}")]
    Payload(#[from] ModelError),

    #[error("topic {field} '{topic}' does not match payload '{payload}'")]
    Mismatch {
        field: &'static str,
        topic: String,
        payload: String,
    },
}

/// A message that passed validation.
#[derive(Debug)]
pub struct Sample {
    pub metric: Metric,
    /// Known vocabulary entry, if any.
    pub kind: Option<MetricKind>,
    /// Name follows the dotted lowercase convention.
    pub canonical: bool,
}

impl Sample {
    /// Value rendered with the unit implied by its name.
    pub fn display_value(&self) -> String {
        let value = self.metric.value();
        match self.kind {
            Some(MetricKind::Cpu) | Some(MetricKind::Disk) => format!("{value:.2}%"),
            Some(MetricKind::Memory) => format!("{:.1} MiB", value / 1024.0 / 1024.0),
            None => format!("{value}"),
        }
    }
}

pub fn inspect(topic: &str, payload: &[u8]) -> Result<Sample, InspectError> {
    let parts = parse_topic(topic)?;
    let metric = Metric::from_json(payload)?;

    for (field, from_topic, from_payload) in [
        ("tenant_id", parts.tenant_id, metric.tenant_id()),
        ("agent_id", parts.agent_id, metric.agent_id()),
        ("metric_name", parts.metric_name, metric.metric_name()),
    ] {
        if from_topic != from_payload {
            return Err(InspectError::Mismatch {
                field,
                topic: from_topic.to_string(),
                payload: from_payload.to_string(),
            });
        }
    }

    Ok(Sample {
        kind: MetricKind::from_metric_name(metric.metric_name()),
        canonical: is_canonical_name(metric.metric_name()),
        metric,
    })
}
