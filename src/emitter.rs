//! Payload delivery.
//!
//! [`PayloadSink`] abstracts the ingestion collaborator. [`OutboundQueue`]
//! moves delivery off the frame loop: payloads go through a bounded channel
//! to one sender thread, and a full queue drops the payload instead of
//! blocking the caller. Failed deliveries are logged and dropped.

use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{Sender, TrySendError};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::payload::SessionPayload;
use crate::{Error, Result};

/// Acknowledgement from a sink.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReceipt {
    /// Opaque reference assigned by the receiver, if it returns one.
    pub session_id: Option<String>,
}

/// Destination for finished session payloads.
pub trait PayloadSink: Send {
    fn deliver(&mut self, payload: &SessionPayload) -> Result<DeliveryReceipt>;
}

/// Keeps delivered payloads in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    payloads: Arc<Mutex<Vec<SessionPayload>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn payloads(&self) -> Vec<SessionPayload> {
        match self.payloads.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.payloads().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PayloadSink for MemorySink {
    fn deliver(&mut self, payload: &SessionPayload) -> Result<DeliveryReceipt> {
        let mut guard = self
            .payloads
            .lock()
            .map_err(|_| Error::Transport("memory sink lock poisoned".to_string()))?;
        guard.push(payload.clone());
        Ok(DeliveryReceipt {
            session_id: Some(format!("mem-{}", guard.len())),
        })
    }
}

/// Writes one JSON document per line.
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> PayloadSink for JsonLinesSink<W> {
    fn deliver(&mut self, payload: &SessionPayload) -> Result<DeliveryReceipt> {
        let line = payload.to_json()?;
        writeln!(self.writer, "{line}")?;
        self.writer.flush()?;
        Ok(DeliveryReceipt::default())
    }
}

#[derive(Deserialize)]
struct IngestResponse {
    session_id: Option<String>,
}

/// Posts payloads to the ingestion API at `{base_url}/sessions`.
pub struct HttpSink {
    agent: ureq::Agent,
    endpoint: String,
    api_key: String,
}

impl HttpSink {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(timeout).build();
        Self {
            agent,
            endpoint: format!("{}/sessions", base_url.trim_end_matches('/')),
            api_key: api_key.to_string(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl PayloadSink for HttpSink {
    fn deliver(&mut self, payload: &SessionPayload) -> Result<DeliveryReceipt> {
        let body = payload.to_json()?;

        let response = match self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .set("X-API-Key", &self.api_key)
            .send_string(&body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let detail = response.into_string().unwrap_or_default();
                return Err(Error::Transport(format!("HTTP {code}: {detail}")));
            }
            Err(e) => return Err(Error::Transport(e.to_string())),
        };

        let text = response.into_string()?;
        let session_id = serde_json::from_str::<IngestResponse>(&text)
            .ok()
            .and_then(|r| r.session_id);

        Ok(DeliveryReceipt { session_id })
    }
}

#[derive(Debug, Default)]
struct QueueCounters {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Counters of an [`OutboundQueue`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub enqueued: u64,
    /// Rejected because the queue was full.
    pub dropped: u64,
    pub delivered: u64,
    /// Handed to the sink but not accepted.
    pub failed: u64,
}

/// Bounded queue drained by a dedicated sender thread.
pub struct OutboundQueue {
    sender: Option<Sender<SessionPayload>>,
    worker: Option<JoinHandle<()>>,
    counters: Arc<QueueCounters>,
}

impl OutboundQueue {
    /// Start the sender thread for `sink`.
    pub fn spawn<S: PayloadSink + 'static>(mut sink: S, capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig(
                "queue capacity must be at least 1".to_string(),
            ));
        }

        let (tx, rx) = crossbeam_channel::bounded::<SessionPayload>(capacity);
        let counters = Arc::new(QueueCounters::default());
        let worker_counters = Arc::clone(&counters);

        let worker = std::thread::Builder::new()
            .name("payload-sender".to_string())
            .spawn(move || {
                for payload in rx.iter() {
                    match sink.deliver(&payload) {
                        Ok(receipt) => {
                            worker_counters.delivered.fetch_add(1, Ordering::Relaxed);
                            info!(
                                session_id = receipt.session_id.as_deref().unwrap_or("-"),
                                duration_seconds = payload.duration_seconds,
                                "session delivered"
                            );
                        }
                        Err(e) => {
                            worker_counters.failed.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "session delivery failed, payload dropped");
                        }
                    }
                }
                debug!("payload sender stopped");
            })?;

        Ok(Self {
            sender: Some(tx),
            worker: Some(worker),
            counters,
        })
    }

    /// Queue a payload without blocking.
    ///
    /// Returns `Ok(false)` when the queue is full and the payload was dropped.
    pub fn enqueue(&self, payload: SessionPayload) -> Result<bool> {
        let sender = self.sender.as_ref().ok_or(Error::QueueClosed)?;
        match sender.try_send(payload) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            Err(TrySendError::Full(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("outbound queue full, payload dropped");
                Ok(false)
            }
            Err(TrySendError::Disconnected(_)) => Err(Error::QueueClosed),
        }
    }

    /// Payloads waiting for the sender thread.
    pub fn pending(&self) -> usize {
        self.sender.as_ref().map_or(0, |s| s.len())
    }

    pub fn stats(&self) -> QueueStats {
        QueueStats {
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
        }
    }

    /// Close the queue, wait for queued payloads to be delivered and return
    /// the final counters.
    pub fn shutdown(mut self) -> QueueStats {
        self.close();
        self.stats()
    }

    fn close(&mut self) {
        // Dropping the sender ends the worker's receive loop once drained
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("payload sender thread panicked");
            }
        }
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.close();
    }
}
