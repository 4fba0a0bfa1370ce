//! Agent - Metric Publisher
//!
//! Owns the broker connection and turns each metric into a QoS 1 publish on
//! `metrics/{tenant_id}/{agent_id}/{metric_name}`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use common::Metric;
use tracing::{debug, info};

use crate::error::PublishError;
use crate::mqtt::MqttTransport;

/// Grace period given to in-flight acknowledgements on close.
pub const CLOSE_GRACE: Duration = Duration::from_millis(250);

#[derive(Clone, Debug)]
pub struct PublisherConfig {
    pub broker: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub client_id: String,
    pub keep_alive: Duration,
    /// Upper bound on the initial connection handshake.
    pub connect_timeout: Duration,
    /// How long a publish waits for the broker's PUBACK.
    pub ack_timeout: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl PublisherConfig {
    pub fn broker_addr(&self) -> String {
        format!("{}:{}", self.broker, self.port)
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            broker: "localhost".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: "agent-agent-default".to_string(),
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(10),
            reconnect_initial: Duration::from_secs(5),
            reconnect_max: Duration::from_secs(60),
        }
    }
}

/// Connection to a pub/sub broker as seen by the [`Publisher`].
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send one message at least once, resolving after the broker's
    /// acknowledgement. The retain flag is never set.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError>;

    fn is_connected(&self) -> bool;

    /// Disconnect (if connected) within `grace` and stop any background work.
    async fn shutdown(&self, grace: Duration);
}

pub struct Publisher {
    transport: Option<Box<dyn Transport>>,
    closed: AtomicBool,
}

impl Publisher {
    /// Connect to the broker described by `config`.
    ///
    /// Fails if no config is given or if the first connection attempt does
    /// not succeed. Later disconnects are retried in the background.
    pub async fn new(config: Option<PublisherConfig>) -> Result<Self, PublishError> {
        let config = config.ok_or(PublishError::MissingConfig)?;
        let transport = MqttTransport::connect(&config).await?;
        Ok(Self::with_transport(transport))
    }

    pub fn with_transport(transport: impl Transport + 'static) -> Self {
        Self {
            transport: Some(Box::new(transport)),
            closed: AtomicBool::new(false),
        }
    }

    /// A publisher with no connection behind it. Every publish fails with
    /// [`PublishError::NotConnected`].
    pub fn detached() -> Self {
        Self {
            transport: None,
            closed: AtomicBool::new(false),
        }
    }

    pub async fn publish(&self, metric: Option<&Metric>) -> Result<(), PublishError> {
        let metric = metric.ok_or(PublishError::MissingMetric)?;

        let topic = metric.topic();
        let payload = metric.to_json()?;

        let transport = match &self.transport {
            Some(transport) if !self.closed.load(Ordering::Acquire) => transport,
            _ => return Err(PublishError::NotConnected),
        };

        transport.publish(&topic, payload.into_bytes()).await?;
        debug!(topic = %topic, "Published metric");
        Ok(())
    }

    /// Disconnect gracefully. Safe to call repeatedly and on a publisher
    /// that never connected.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(transport) = &self.transport {
            let was_connected = transport.is_connected();
            transport.shutdown(CLOSE_GRACE).await;
            if was_connected {
                info!("Disconnected from MQTT broker");
            }
        }
    }

    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && self
                .transport
                .as_ref()
                .is_some_and(|transport| transport.is_connected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeTransport;

    fn sample_metric() -> Metric {
        Metric::new("t1", "a1", "cpu", 10.5).unwrap()
    }

    #[tokio::test]
    async fn new_without_config_fails() {
        let err = Publisher::new(None).await.err().unwrap();
        assert!(matches!(err, PublishError::MissingConfig));
        assert_eq!(err.to_string(), "config cannot be nil");
    }

    #[tokio::test]
    async fn publish_none_never_touches_transport() {
        let transport = FakeTransport::new();
        let publisher = Publisher::with_transport(transport.clone());

        let err = publisher.publish(None).await.unwrap_err();
        assert_eq!(err.to_string(), "metric cannot be nil");
        assert!(transport.published().is_empty());
        assert_eq!(transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn publish_builds_topic_and_payload() {
        let transport = FakeTransport::new();
        let publisher = Publisher::with_transport(transport.clone());
        let metric = sample_metric();

        publisher.publish(Some(&metric)).await.unwrap();

        let published = transport.published();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].topic, "metrics/t1/a1/cpu");
        assert!(!published[0].payload.is_empty());
        let decoded = Metric::from_json(&published[0].payload).unwrap();
        assert_eq!(decoded, metric);
    }

    #[tokio::test]
    async fn broker_rejection_surfaces_as_publish_failed() {
        let transport = FakeTransport::new();
        transport.fail_next("PUBACK timeout");
        let publisher = Publisher::with_transport(transport.clone());

        let err = publisher.publish(Some(&sample_metric())).await.unwrap_err();
        assert!(matches!(err, PublishError::PublishFailed { .. }));

        // Not retried at this layer
        assert_eq!(transport.publish_calls(), 1);
        publisher.publish(Some(&sample_metric())).await.unwrap();
    }

    #[tokio::test]
    async fn non_finite_metric_fails_before_network() {
        let transport = FakeTransport::new();
        let publisher = Publisher::with_transport(transport.clone());
        let metric = Metric::new("t1", "a1", "cpu", f64::NAN).unwrap();

        let err = publisher.publish(Some(&metric)).await.unwrap_err();
        assert!(matches!(err, PublishError::Serialize(_)));
        assert_eq!(transport.publish_calls(), 0);
    }

    #[tokio::test]
    async fn detached_publisher_is_inert() {
        let publisher = Publisher::detached();
        assert!(!publisher.is_connected());
        publisher.close().await;
        publisher.close().await;
        assert!(!publisher.is_connected());

        let err = publisher.publish(Some(&sample_metric())).await.unwrap_err();
        assert!(matches!(err, PublishError::NotConnected));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let transport = FakeTransport::new();
        let publisher = Publisher::with_transport(transport.clone());
        assert!(publisher.is_connected());

        publisher.close().await;
        publisher.close().await;

        assert!(!publisher.is_connected());
        assert_eq!(transport.shutdown_calls(), 1);
        let err = publisher.publish(Some(&sample_metric())).await.unwrap_err();
        assert!(matches!(err, PublishError::NotConnected));
    }

    #[tokio::test]
    async fn disconnected_transport_fails_the_call() {
        let transport = FakeTransport::new();
        transport.set_connected(false);
        let publisher = Publisher::with_transport(transport.clone());

        assert!(!publisher.is_connected());
        let err = publisher.publish(Some(&sample_metric())).await.unwrap_err();
        assert!(matches!(err, PublishError::NotConnected));
        assert!(transport.published().is_empty());
    }
}
