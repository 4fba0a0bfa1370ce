//! Metric data point and its JSON wire format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::names::MAX_METRIC_NAME_LEN;
use crate::topic::metric_topic;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{field} must not be empty")]
    EmptyField { field: &'static str },

    #[error("metric_name exceeds 64 characters: {len} chars")]
    NameTooLong { len: usize },

    #[error("value of {metric_name} is not a finite number: {value}")]
    NonFiniteValue { metric_name: String, value: f64 },

    #[error("invalid metric JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One timestamped observation, scoped to a tenant and an agent.
///
/// Fields are private: a `Metric` cannot change after construction, and the
/// timestamp is taken exactly once, inside [`Metric::new`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    tenant_id: String,
    agent_id: String,
    metric_name: String,
    value: f64,
    timestamp: DateTime<Utc>,
}

impl Metric {
    /// Build a metric stamped with the current UTC instant.
    pub fn new(
        tenant_id: impl Into<String>,
        agent_id: impl Into<String>,
        metric_name: impl Into<String>,
        value: f64,
    ) -> Result<Self, ModelError> {
        let metric = Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            metric_name: metric_name.into(),
            value,
            timestamp: Utc::now(),
        };
        metric.validate()?;
        Ok(metric)
    }

    /// Parse a wire payload back into a metric, applying the same checks as
    /// [`Metric::new`].
    pub fn from_json(payload: &[u8]) -> Result<Self, ModelError> {
        let metric: Metric = serde_json::from_slice(payload)?;
        metric.validate()?;
        Ok(metric)
    }

    /// Compact JSON with the five wire keys. Non-finite values are refused
    /// instead of being written as `null`.
    pub fn to_json(&self) -> Result<String, ModelError> {
        if !self.value.is_finite() {
            return Err(ModelError::NonFiniteValue {
                metric_name: self.metric_name.clone(),
                value: self.value,
            });
        }
        Ok(serde_json::to_string(self)?)
    }

    /// `metrics/{tenant_id}/{agent_id}/{metric_name}`
    pub fn topic(&self) -> String {
        metric_topic(&self.tenant_id, &self.agent_id, &self.metric_name)
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn metric_name(&self) -> &str {
        &self.metric_name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    fn validate(&self) -> Result<(), ModelError> {
        if self.tenant_id.is_empty() {
            return Err(ModelError::EmptyField { field: "tenant_id" });
        }
        if self.agent_id.is_empty() {
            return Err(ModelError::EmptyField { field: "agent_id" });
        }
        if self.metric_name.is_empty() {
            return Err(ModelError::EmptyField { field: "metric_name" });
        }
        let len = self.metric_name.chars().count();
        if len > MAX_METRIC_NAME_LEN {
            return Err(ModelError::NameTooLong { len });
        }
        Ok(())
    }
}
