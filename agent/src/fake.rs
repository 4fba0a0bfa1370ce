//! In-memory stand-ins for the broker, the metric source and the sink, used
//! to script collection cycles and publishes in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::{Metric, MetricKind};

use crate::error::{CollectError, PublishError};
use crate::metrics::MetricSource;
use crate::publisher::Transport;
use crate::sampler::MetricSink;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

#[derive(Default)]
struct FakeBroker {
    published: Mutex<Vec<PublishedMessage>>,
    failures: Mutex<VecDeque<String>>,
    connected: AtomicBool,
    publish_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

/// Fake broker connection. Clones share state, so a test can keep one
/// handle and give another to the publisher.
#[derive(Clone)]
pub struct FakeTransport {
    broker: Arc<FakeBroker>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl FakeTransport {
    pub fn new() -> Self {
        let broker = FakeBroker {
            connected: AtomicBool::new(true),
            ..FakeBroker::default()
        };
        Self {
            broker: Arc::new(broker),
        }
    }

    /// Make the next publish fail as if the broker rejected it.
    pub fn fail_next(&self, reason: &str) {
        lock(&self.broker.failures).push_back(reason.to_string());
    }

    pub fn set_connected(&self, connected: bool) {
        self.broker.connected.store(connected, Ordering::SeqCst);
    }

    /// Messages the broker acknowledged, in order.
    pub fn published(&self) -> Vec<PublishedMessage> {
        lock(&self.broker.published).clone()
    }

    pub fn publish_calls(&self) -> usize {
        self.broker.publish_calls.load(Ordering::SeqCst)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.broker.shutdown_calls.load(Ordering::SeqCst)
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.broker.publish_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }
        if let Some(reason) = lock(&self.broker.failures).pop_front() {
            return Err(PublishError::PublishFailed { reason });
        }
        lock(&self.broker.published).push(PublishedMessage {
            topic: topic.to_string(),
            payload,
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.broker.connected.load(Ordering::SeqCst)
    }

    async fn shutdown(&self, _grace: Duration) {
        self.broker.shutdown_calls.fetch_add(1, Ordering::SeqCst);
        self.set_connected(false);
    }
}

#[derive(Default)]
struct Channel {
    script: VecDeque<Result<f64, String>>,
    steady: Option<f64>,
    calls: usize,
}

impl Channel {
    fn next(&mut self, kind: MetricKind) -> Result<f64, CollectError> {
        self.calls += 1;
        match self.script.pop_front() {
            Some(Ok(value)) => Ok(value),
            Some(Err(reason)) => Err(CollectError::unavailable(kind, reason)),
            None => self
                .steady
                .ok_or_else(|| CollectError::unavailable(kind, "script exhausted")),
        }
    }
}

/// Metric source that replays scripted readings per kind, then repeats a
/// steady value once the script runs out.
#[derive(Default)]
pub struct ScriptedSource {
    cpu: Channel,
    memory: Channel,
    disk: Channel,
    warm_up_pause: Duration,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every read returns the given values.
    pub fn steady(cpu: f64, memory: f64, disk: f64) -> Self {
        Self::new()
            .with_steady(MetricKind::Cpu, cpu)
            .with_steady(MetricKind::Memory, memory)
            .with_steady(MetricKind::Disk, disk)
    }

    pub fn with_script(mut self, kind: MetricKind, script: Vec<Result<f64, String>>) -> Self {
        self.channel(kind).script = script.into();
        self
    }

    pub fn with_steady(mut self, kind: MetricKind, value: f64) -> Self {
        self.channel(kind).steady = Some(value);
        self
    }

    pub fn with_warm_up_pause(mut self, pause: Duration) -> Self {
        self.warm_up_pause = pause;
        self
    }

    pub fn calls(&self, kind: MetricKind) -> usize {
        match kind {
            MetricKind::Cpu => self.cpu.calls,
            MetricKind::Memory => self.memory.calls,
            MetricKind::Disk => self.disk.calls,
        }
    }

    fn channel(&mut self, kind: MetricKind) -> &mut Channel {
        match kind {
            MetricKind::Cpu => &mut self.cpu,
            MetricKind::Memory => &mut self.memory,
            MetricKind::Disk => &mut self.disk,
        }
    }
}

impl MetricSource for ScriptedSource {
    fn cpu_usage_percent(&mut self) -> Result<f64, CollectError> {
        self.cpu.next(MetricKind::Cpu)
    }

    fn memory_used_bytes(&mut self) -> Result<f64, CollectError> {
        self.memory.next(MetricKind::Memory)
    }

    fn disk_usage_percent(&mut self) -> Result<f64, CollectError> {
        self.disk.next(MetricKind::Disk)
    }

    fn warm_up_pause(&self) -> Duration {
        self.warm_up_pause
    }
}

/// Sink that keeps every metric it receives. Optionally stalls once, on the
/// first metric, to simulate a slow publish.
#[derive(Default)]
pub struct RecordingSink {
    metrics: Vec<Metric>,
    stall_once: Option<Duration>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stalling_once(stall: Duration) -> Self {
        Self {
            metrics: Vec::new(),
            stall_once: Some(stall),
        }
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn names(&self) -> Vec<&str> {
        self.metrics.iter().map(Metric::metric_name).collect()
    }
}

#[async_trait]
impl MetricSink for RecordingSink {
    async fn accept(&mut self, metric: Metric) {
        if let Some(stall) = self.stall_once.take() {
            tokio::time::sleep(stall).await;
        }
        self.metrics.push(metric);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_source_replays_then_holds_steady() {
        let mut source = ScriptedSource::new()
            .with_script(MetricKind::Cpu, vec![Ok(0.0), Err("boom".into())])
            .with_steady(MetricKind::Cpu, 42.0);

        assert_eq!(source.cpu_usage_percent().unwrap(), 0.0);
        assert!(source.cpu_usage_percent().is_err());
        assert_eq!(source.cpu_usage_percent().unwrap(), 42.0);
        assert_eq!(source.cpu_usage_percent().unwrap(), 42.0);
        assert_eq!(source.calls(MetricKind::Cpu), 4);
        assert!(source.memory_used_bytes().is_err());
    }

    #[tokio::test]
    async fn fake_transport_scripts_failures() {
        let transport = FakeTransport::new();
        transport.fail_next("rejected");
        assert!(transport.publish("a/b", b"x".to_vec()).await.is_err());
        transport.publish("a/b", b"y".to_vec()).await.unwrap();
        assert_eq!(transport.publish_calls(), 2);
        assert_eq!(
            transport.published(),
            vec![PublishedMessage {
                topic: "a/b".into(),
                payload: b"y".to_vec()
            }]
        );
    }
}
