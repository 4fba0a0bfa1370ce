//! Broker topic layout: `metrics/{tenant_id}/{agent_id}/{metric_name}`.

use thiserror::Error;

pub const TOPIC_ROOT: &str = "metrics";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TopicError {
    #[error("expected 4 topic segments, got {0}")]
    SegmentCount(usize),

    #[error("topic must start with 'metrics/', got '{0}/'")]
    Root(String),

    #[error("empty {0} segment")]
    EmptySegment(&'static str),
}

/// Segments of a metric topic, borrowed from the topic string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopicParts<'a> {
    pub tenant_id: &'a str,
    pub agent_id: &'a str,
    pub metric_name: &'a str,
}

/// Plain interpolation, no escaping. Identity values containing `/` produce
/// topics that [`parse_topic`] will reject.
pub fn metric_topic(tenant_id: &str, agent_id: &str, metric_name: &str) -> String {
    format!("{TOPIC_ROOT}/{tenant_id}/{agent_id}/{metric_name}")
}

pub fn parse_topic(topic: &str) -> Result<TopicParts<'_>, TopicError> {
    let segments: Vec<&str> = topic.split('/').collect();
    let [root, tenant_id, agent_id, metric_name] = segments[..] else {
        return Err(TopicError::SegmentCount(segments.len()));
    };
    if root != TOPIC_ROOT {
        return Err(TopicError::Root(root.to_string()));
    }
    for (label, value) in [
        ("tenant_id", tenant_id),
        ("agent_id", agent_id),
        ("metric_name", metric_name),
    ] {
        if value.is_empty() {
            return Err(TopicError::EmptySegment(label));
        }
    }
    Ok(TopicParts {
        tenant_id,
        agent_id,
        metric_name,
    })
}

/// Subscription filter for every metric, or for one tenant's metrics.
pub fn subscription_filter(tenant_id: Option<&str>) -> String {
    match tenant_id {
        Some(tenant_id) => format!("{TOPIC_ROOT}/{tenant_id}/#"),
        None => format!("{TOPIC_ROOT}/#"),
    }
}
