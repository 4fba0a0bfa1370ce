//! Agent error types.

use common::{MetricKind, ModelError};
use thiserror::Error;

/// A single metric source failed for one cycle.
#[derive(Error, Debug)]
pub enum CollectError {
    #[error("{kind} source unavailable: {reason}")]
    Unavailable { kind: MetricKind, reason: String },

    #[error("{kind} source returned a non-finite value: {value}")]
    NonFinite { kind: MetricKind, value: f64 },

    #[error("invalid {kind} metric: {source}")]
    Invalid {
        kind: MetricKind,
        #[source]
        source: ModelError,
    },
}

impl CollectError {
    pub fn unavailable(kind: MetricKind, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            kind,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Unavailable { kind, .. }
            | Self::NonFinite { kind, .. }
            | Self::Invalid { kind, .. } => *kind,
        }
    }
}

#[derive(Error, Debug)]
pub enum PublishError {
    #[error("config cannot be nil")]
    MissingConfig,

    #[error("metric cannot be nil")]
    MissingMetric,

    #[error("failed to connect to MQTT broker at {addr}: {reason}")]
    Connect { addr: String, reason: String },

    #[error("not connected to MQTT broker")]
    NotConnected,

    #[error("failed to marshal metric: {0}")]
    Serialize(#[from] ModelError),

    #[error("failed to publish metric: {reason}")]
    PublishFailed { reason: String },
}
