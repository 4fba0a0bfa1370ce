//! Agent - Collection Loop
//!
//! One collection cycle right away, then one per interval. Each cycle reads
//! CPU, memory and disk independently and forwards whatever succeeded to the
//! sink in that order.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{Metric, MetricKind};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::CollectError;
use crate::metrics::MetricSource;
use crate::publisher::Publisher;

/// Pause after the throwaway CPU read so the first real sample covers a
/// short window instead of reporting 0. Sources that need a longer gap
/// raise it through [`MetricSource::warm_up_pause`].
pub const WARM_UP_PAUSE: Duration = Duration::from_millis(100);

/// Receives each metric of a cycle, one at a time.
#[async_trait]
pub trait MetricSink: Send {
    async fn accept(&mut self, metric: Metric);
}

pub struct Sampler<S> {
    tenant_id: String,
    agent_id: String,
    source: S,
}

impl<S: MetricSource> Sampler<S> {
    pub fn new(tenant_id: impl Into<String>, agent_id: impl Into<String>, source: S) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            agent_id: agent_id.into(),
            source,
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Prime the differential CPU reading. The value is discarded.
    pub async fn warm_up(&mut self) {
        info!("Warming up CPU collector...");
        if let Err(e) = self.source.cpu_usage_percent() {
            warn!(error = %e, "CPU warm-up read failed");
        }
        tokio::time::sleep(WARM_UP_PAUSE.max(self.source.warm_up_pause())).await;
    }

    /// Run one cycle: every kind is attempted, failures are logged and
    /// skipped.
    pub fn collect(&mut self) -> Vec<Metric> {
        MetricKind::ALL
            .into_iter()
            .filter_map(|kind| match self.sample(kind) {
                Ok(metric) => Some(metric),
                Err(e) => {
                    error!(kind = %e.kind(), error = %e, "Error collecting {}", e.kind());
                    None
                }
            })
            .collect()
    }

    fn sample(&mut self, kind: MetricKind) -> Result<Metric, CollectError> {
        let value = self.source.read(kind)?;
        if !value.is_finite() {
            return Err(CollectError::NonFinite { kind, value });
        }
        Metric::new(&self.tenant_id, &self.agent_id, kind.metric_name(), value)
            .map_err(|source| CollectError::Invalid { kind, source })
    }

    /// Warm up, then collect every `period` until `shutdown` fires.
    ///
    /// A cycle that overruns the period delays the next one; missed ticks
    /// are dropped, never replayed.
    pub async fn run<K>(&mut self, period: Duration, sink: &mut K, shutdown: CancellationToken)
    where
        K: MetricSink + ?Sized,
    {
        self.warm_up().await;

        let mut ticker = interval(period.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(interval_secs = period.as_secs_f64(), "Collection loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let metrics = self.collect();
            debug!(count = metrics.len(), "Collected metrics");
            for metric in metrics {
                sink.accept(metric).await;
            }
        }
        info!("Collection loop stopped");
    }
}

/// Production sink: publish to the broker, then echo the JSON line to the
/// debug output whether or not the publish succeeded.
pub struct PublishingSink<W = Stdout> {
    publisher: Arc<Publisher>,
    out: W,
}

impl PublishingSink<Stdout> {
    pub fn stdout(publisher: Arc<Publisher>) -> Self {
        Self::new(publisher, io::stdout())
    }
}

impl<W: Write + Send> PublishingSink<W> {
    pub fn new(publisher: Arc<Publisher>, out: W) -> Self {
        Self { publisher, out }
    }

    pub fn output(&self) -> &W {
        &self.out
    }
}

#[async_trait]
impl<W: Write + Send> MetricSink for PublishingSink<W> {
    async fn accept(&mut self, metric: Metric) {
        let line = match metric.to_json() {
            Ok(line) => line,
            Err(e) => {
                error!(metric = metric.metric_name(), error = %e, "Error marshaling metric");
                return;
            }
        };

        if let Err(e) = self.publisher.publish(Some(&metric)).await {
            error!(metric = metric.metric_name(), error = %e, "Error publishing metric");
        }

        if let Err(e) = writeln!(self.out, "{line}").and_then(|_| self.out.flush()) {
            warn!(error = %e, "Failed to write metric to debug output");
        }
    }
}
