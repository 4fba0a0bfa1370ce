//! Agent - MQTT Transport
//!
//! Drives the `rumqttc` event loop on a background task that handles
//! reconnection with exponential backoff and matches PUBACKs to the publish
//! waiting on them.

use std::future::Future;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backoff::{jitter, Backoff};
use crate::error::PublishError;
use crate::publisher::{PublisherConfig, Transport};

const REQUEST_CAPACITY: usize = 16;
const MAX_JITTER: Duration = Duration::from_millis(500);

type AckResult = Result<(), PublishError>;

/// A publish handed to the worker together with the waiter for its PUBACK.
struct PublishRequest {
    topic: String,
    payload: Vec<u8>,
    done: oneshot::Sender<AckResult>,
}

struct Pending {
    pkid: Option<u16>,
    done: oneshot::Sender<AckResult>,
}

/// Tracks the single QoS 1 publish awaiting its PUBACK.
///
/// Only the worker enqueues publishes, one at a time, so the first outgoing
/// PUBLISH after [`AckTracker::register`] carries the packet id to wait for.
#[derive(Default)]
struct AckTracker {
    slot: Mutex<Option<Pending>>,
}

impl AckTracker {
    fn lock(&self) -> MutexGuard<'_, Option<Pending>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(&self, done: oneshot::Sender<AckResult>) {
        *self.lock() = Some(Pending { pkid: None, done });
    }

    /// Whether a publish is still waiting. A waiter whose caller gave up is
    /// dropped here.
    fn is_busy(&self) -> bool {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|p| p.done.is_closed()) {
            slot.take();
        }
        slot.is_some()
    }

    fn assign(&self, pkid: u16) {
        if let Some(pending) = self.lock().as_mut() {
            if pending.pkid.is_none() {
                pending.pkid = Some(pkid);
            }
        }
    }

    fn complete(&self, pkid: u16) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|p| p.pkid == Some(pkid)) {
            if let Some(pending) = slot.take() {
                let _ = pending.done.send(Ok(()));
            }
        }
    }

    fn fail(&self, reason: &str) {
        if let Some(pending) = self.lock().take() {
            let _ = pending.done.send(Err(PublishError::PublishFailed {
                reason: reason.to_string(),
            }));
        }
    }
}

struct Shared {
    connected: AtomicBool,
    acks: AckTracker,
}

pub struct MqttTransport {
    client: AsyncClient,
    requests: mpsc::Sender<PublishRequest>,
    shared: Arc<Shared>,
    ack_timeout: Duration,
    cancel: CancellationToken,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl MqttTransport {
    /// Open the connection and wait for the broker's CONNACK before handing
    /// the event loop to the reconnect worker.
    pub async fn connect(config: &PublisherConfig) -> Result<Self, PublishError> {
        let addr = config.broker_addr();

        let mut options =
            MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_credentials(config.username.clone(), config.password.clone());
        options.set_keep_alive(config.keep_alive);

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);

        info!(broker = %addr, client_id = %config.client_id, "Connecting to MQTT broker...");
        match timeout(config.connect_timeout, wait_for_connack(&mut eventloop)).await {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(PublishError::Connect { addr, reason }),
            Err(_) => {
                return Err(PublishError::Connect {
                    addr,
                    reason: format!("no CONNACK within {:?}", config.connect_timeout),
                })
            }
        }
        info!(broker = %addr, "Successfully connected to MQTT broker");

        let shared = Arc::new(Shared {
            connected: AtomicBool::new(true),
            acks: AckTracker::default(),
        });
        let (requests, inbox) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let worker = Worker {
            eventloop,
            inbox,
            link: Link {
                client: client.clone(),
                shared: Arc::clone(&shared),
            },
            backoff: Backoff::new(config.reconnect_initial, config.reconnect_max),
            cancel: cancel.clone(),
        };
        let worker = tokio::spawn(worker.run());

        Ok(Self {
            client,
            requests,
            shared,
            ack_timeout: config.ack_timeout,
            cancel,
            worker: Mutex::new(Some(worker)),
        })
    }
}

async fn wait_for_connack(eventloop: &mut EventLoop) -> Result<(), String> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(format!("broker refused connection: {:?}", ack.code))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(e.to_string()),
        }
    }
}

/// Background task owning the event loop. It is the only place publishes
/// enter the client queue, so nothing is queued while the link is down.
struct Worker {
    eventloop: EventLoop,
    inbox: mpsc::Receiver<PublishRequest>,
    link: Link,
    backoff: Backoff,
    cancel: CancellationToken,
}

impl Worker {
    /// Polls the event loop until cancelled or until a requested disconnect
    /// has been sent.
    async fn run(mut self) {
        loop {
            let poll = self.eventloop.poll();
            let Some(event) = serve_until(poll, &mut self.inbox, &self.link, &self.cancel).await
            else {
                break;
            };

            match self.handle(event) {
                ControlFlow::Continue(None) => {}
                ControlFlow::Continue(Some(delay)) => {
                    let pause = tokio::time::sleep(delay);
                    if serve_until(pause, &mut self.inbox, &self.link, &self.cancel)
                        .await
                        .is_none()
                    {
                        break;
                    }
                }
                ControlFlow::Break(()) => break,
            }
        }
    }

    /// Returns the reconnect delay after a connection error, or `Break` once
    /// the DISCONNECT has gone out.
    fn handle(
        &mut self,
        event: Result<Event, ConnectionError>,
    ) -> ControlFlow<(), Option<Duration>> {
        let shared = &self.link.shared;
        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    if !shared.connected.swap(true, Ordering::AcqRel) {
                        info!("MQTT connection restored");
                    }
                    self.backoff.reset();
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => shared.acks.assign(pkid),
            Ok(Event::Incoming(Packet::PubAck(ack))) => shared.acks.complete(ack.pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                shared.connected.store(false, Ordering::Release);
                return ControlFlow::Break(());
            }
            Ok(_) => {}
            Err(e) => {
                if shared.connected.swap(false, Ordering::AcqRel) {
                    warn!(error = %e, "MQTT connection lost");
                } else {
                    error!(error = %e, "MQTT reconnect failed");
                }
                shared.acks.fail(&format!("connection lost: {e}"));

                let delay = self.backoff.next_delay() + jitter(MAX_JITTER);
                warn!(delay_ms = delay.as_millis() as u64, "Reconnecting to MQTT broker...");
                return ControlFlow::Continue(Some(delay));
            }
        }
        ControlFlow::Continue(None)
    }
}

/// Drive `until` to completion while answering publish requests. `None`
/// once cancelled.
async fn serve_until<F: Future>(
    until: F,
    inbox: &mut mpsc::Receiver<PublishRequest>,
    link: &Link,
    cancel: &CancellationToken,
) -> Option<F::Output> {
    tokio::pin!(until);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return None,
            Some(request) = inbox.recv() => link.enqueue(request),
            output = &mut until => return Some(output),
        }
    }
}

/// Client handle plus connection state, shared by the worker's request
/// handling and its event processing.
struct Link {
    client: AsyncClient,
    shared: Arc<Shared>,
}

impl Link {
    fn enqueue(&self, request: PublishRequest) {
        if request.done.is_closed() {
            return;
        }
        if !self.shared.connected.load(Ordering::Acquire) {
            let _ = request.done.send(Err(PublishError::NotConnected));
            return;
        }
        if self.shared.acks.is_busy() {
            let _ = request.done.send(Err(PublishError::PublishFailed {
                reason: "another publish is awaiting its PUBACK".to_string(),
            }));
            return;
        }

        // Register first: the PUBLISH goes out on the next poll
        self.shared.acks.register(request.done);
        if let Err(e) = self.client.try_publish(
            request.topic,
            QoS::AtLeastOnce,
            false,
            request.payload,
        ) {
            self.shared.acks.fail(&e.to_string());
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    /// Fails with [`PublishError::NotConnected`] while the broker link is
    /// down; such a publish is never queued for a later session.
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        if !self.is_connected() {
            return Err(PublishError::NotConnected);
        }

        let (done, ack) = oneshot::channel();
        let request = PublishRequest {
            topic: topic.to_string(),
            payload,
            done,
        };
        if self.requests.send(request).await.is_err() {
            return Err(PublishError::NotConnected);
        }

        match timeout(self.ack_timeout, ack).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(PublishError::PublishFailed {
                reason: "MQTT worker stopped".to_string(),
            }),
            Err(_) => Err(PublishError::PublishFailed {
                reason: format!("no PUBACK within {:?}", self.ack_timeout),
            }),
        }
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    async fn shutdown(&self, grace: Duration) {
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        if self.is_connected() {
            if let Err(e) = self.client.disconnect().await {
                warn!(error = %e, "Failed to request MQTT disconnect");
            }
        }

        if let Some(mut worker) = worker {
            if timeout(grace, &mut worker).await.is_err() {
                worker.abort();
            }
        }
        self.cancel.cancel();
        self.shared.connected.store(false, Ordering::Release);
        self.shared.acks.fail("publisher closed");
    }
}

impl Drop for MqttTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
