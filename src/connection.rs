//! Request/response semantics over a broker transport.
//!
//! A [`BrokerConnection`] turns typed requests into wire frames and
//! matches responses back by correlation id. Correlation ids are assigned
//! from a per-connection monotonic counter, and the waiter is registered
//! in the in-flight table *before* the frame is handed to the transport,
//! so a reply can never arrive ahead of its waiter.
//!
//! Two concurrent sends on the same connection may complete in either
//! order; nothing orders completions across requests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::network::{Incoming, NetworkObserver, Observers, Transport};
use crate::protocol::versions::{ApiVersionsRequest, ApiVersionsResponse};
use crate::protocol::{encode_request, KafkaRequest, KafkaResponse, RequestContext};

/// Plain counters a connection keeps about itself.
///
/// Late-reply discards are always counted; byte counters only move when
/// `track_telemetry` is enabled in the config.
#[derive(Default)]
struct Telemetry {
    requests_sent: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
    late_responses_discarded: AtomicU64,
}

/// Point-in-time copy of a connection's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TelemetrySnapshot {
    pub requests_sent: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub late_responses_discarded: u64,
}

type InFlightTable = Mutex<HashMap<i32, oneshot::Sender<Result<Bytes>>>>;

struct ConnectionInner {
    addr: String,
    config: ConnectionConfig,
    client_id: Option<String>,
    transport: Transport,
    in_flight: InFlightTable,
    next_correlation_id: AtomicI32,
    telemetry: Telemetry,
    shutdown: CancellationToken,
}

impl ConnectionInner {
    fn remove_waiter(&self, correlation_id: i32) -> Option<oneshot::Sender<Result<Bytes>>> {
        self.in_flight.lock().unwrap().remove(&correlation_id)
    }

    /// Complete every in-flight request with a clone of `err`.
    fn fail_all(&self, err: &Error) {
        let waiters: Vec<_> = {
            let mut table = self.in_flight.lock().unwrap();
            table.drain().collect()
        };
        if !waiters.is_empty() {
            tracing::debug!(
                addr = %self.addr,
                count = waiters.len(),
                error = %err,
                "failing in-flight requests"
            );
        }
        for (_, waiter) in waiters {
            let _ = waiter.send(Err(err.clone()));
        }
    }
}

/// A client connection to one broker.
///
/// Cheap to clone; all clones share the same socket, correlation counter,
/// and in-flight table. The underlying transport is disposed when the
/// connection is explicitly disposed or every clone is dropped.
#[derive(Clone)]
pub struct BrokerConnection {
    inner: Arc<ConnectionInner>,
    _guard: Arc<tokio_util::sync::DropGuard>,
}

impl std::fmt::Debug for BrokerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerConnection")
            .field("addr", &self.inner.addr)
            .finish()
    }
}

impl BrokerConnection {
    /// Open a connection to `addr` ("host:port"). Connecting happens in
    /// the background; the first send waits for it.
    pub fn connect(
        addr: &str,
        config: ConnectionConfig,
        client_id: Option<String>,
        observers: Vec<Box<dyn NetworkObserver>>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let observers: Observers = Arc::new(observers);
        let (transport, incoming) = Transport::spawn(
            addr.to_string(),
            config.clone(),
            observers,
            shutdown.child_token(),
        );

        let inner = Arc::new(ConnectionInner {
            addr: addr.to_string(),
            config,
            client_id,
            transport,
            in_flight: Mutex::new(HashMap::new()),
            next_correlation_id: AtomicI32::new(0),
            telemetry: Telemetry::default(),
            shutdown: shutdown.clone(),
        });

        tokio::spawn(demux(inner.clone(), incoming));

        Self {
            inner,
            _guard: Arc::new(shutdown.drop_guard()),
        }
    }

    /// The `host:port` this connection targets.
    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// A fresh context for one send: next correlation id, caller-chosen
    /// api version, the connection's client id.
    pub fn next_context(&self, api_version: i16) -> RequestContext {
        let correlation_id = self.inner.next_correlation_id.fetch_add(1, Ordering::Relaxed);
        RequestContext::new(correlation_id, api_version, self.inner.client_id.clone())
    }

    /// Send a request at the kind's base version.
    pub async fn send<R: KafkaRequest>(&self, request: &R) -> Result<R::Response> {
        let context = self.next_context(R::MIN_VERSION);
        self.send_with_context(request, context).await
    }

    /// Send a request with explicit framing inputs.
    ///
    /// The whole exchange — queueing, writing, waiting for the matched
    /// response — runs under the configured request timeout. On expiry
    /// the waiter is removed and a late reply for the id is discarded
    /// (and counted) by the demultiplexer.
    pub async fn send_with_context<R: KafkaRequest>(
        &self,
        request: &R,
        context: RequestContext,
    ) -> Result<R::Response> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Disposed);
        }

        let frame = encode_request(request, &context)?;
        let correlation_id = context.correlation_id;
        tracing::debug!(
            addr = %self.inner.addr,
            api = R::API_KEY.as_str(),
            api_version = context.api_version,
            correlation_id,
            bytes = frame.len(),
            "sending request"
        );

        self.count_request(frame.len());

        // Registration strictly precedes the enqueue: the receive side
        // can complete this id the moment the peer answers.
        let (waiter_tx, waiter_rx) = oneshot::channel();
        self.inner
            .in_flight
            .lock()
            .unwrap()
            .insert(correlation_id, waiter_tx);

        let exchange = async {
            self.inner.transport.send(frame).await?;
            match waiter_rx.await {
                Ok(result) => result,
                // Waiter dropped without completion: dispose raced us.
                Err(_) => Err(Error::Disposed),
            }
        };

        let body = match timeout(self.inner.config.request_timeout, exchange).await {
            Ok(Ok(body)) => body,
            Ok(Err(err)) => {
                self.inner.remove_waiter(correlation_id);
                return Err(err);
            }
            Err(_) => {
                self.inner.remove_waiter(correlation_id);
                tracing::warn!(
                    addr = %self.inner.addr,
                    correlation_id,
                    "request timed out"
                );
                return Err(Error::Timeout);
            }
        };

        R::Response::parse(body, context.api_version)
    }

    /// Send a request the peer will not answer (produce with acks=0):
    /// no waiter is registered, completion means the bytes were written.
    pub async fn send_no_response<R: KafkaRequest>(
        &self,
        request: &R,
        context: RequestContext,
    ) -> Result<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(Error::Disposed);
        }
        let frame = encode_request(request, &context)?;
        self.count_request(frame.len());
        timeout(
            self.inner.config.request_timeout,
            self.inner.transport.send(frame),
        )
        .await
        .map_err(|_| Error::Timeout)?
    }

    /// Probe the broker for its supported api version ranges.
    ///
    /// Never called implicitly; callers that skip it pass versions in
    /// the request context instead.
    pub async fn api_versions(&self) -> Result<ApiVersionsResponse> {
        self.send(&ApiVersionsRequest).await
    }

    /// Current telemetry counters.
    pub fn telemetry(&self) -> TelemetrySnapshot {
        let t = &self.inner.telemetry;
        TelemetrySnapshot {
            requests_sent: t.requests_sent.load(Ordering::Relaxed),
            bytes_sent: t.bytes_sent.load(Ordering::Relaxed),
            bytes_received: t.bytes_received.load(Ordering::Relaxed),
            late_responses_discarded: t.late_responses_discarded.load(Ordering::Relaxed),
        }
    }

    /// Tear the connection down: every in-flight request completes with
    /// [`Error::Disposed`] and the transport stops reconnecting.
    pub fn dispose(&self) {
        self.inner.shutdown.cancel();
        self.inner.fail_all(&Error::Disposed);
    }

    fn count_request(&self, frame_len: usize) {
        self.inner
            .telemetry
            .requests_sent
            .fetch_add(1, Ordering::Relaxed);
        if self.inner.config.track_telemetry {
            self.inner
                .telemetry
                .bytes_sent
                .fetch_add(frame_len as u64, Ordering::Relaxed);
        }
    }
}

/// Match incoming frames to their waiters by correlation id; fan a
/// transport fault out to every waiter exactly once.
async fn demux(inner: Arc<ConnectionInner>, mut incoming: mpsc::UnboundedReceiver<Incoming>) {
    while let Some(event) = incoming.recv().await {
        match event {
            Incoming::Frame(frame) => {
                if frame.len() < 4 {
                    tracing::warn!(addr = %inner.addr, "dropping undersized response frame");
                    continue;
                }
                let correlation_id =
                    i32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
                if inner.config.track_telemetry {
                    inner
                        .telemetry
                        .bytes_received
                        .fetch_add(frame.len() as u64, Ordering::Relaxed);
                }
                match inner.remove_waiter(correlation_id) {
                    Some(waiter) => {
                        let _ = waiter.send(Ok(frame));
                    }
                    None => {
                        // The sender timed out or was cancelled.
                        inner
                            .telemetry
                            .late_responses_discarded
                            .fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            addr = %inner.addr,
                            correlation_id,
                            "discarding response with no waiter"
                        );
                    }
                }
            }
            Incoming::Disconnected(err) => inner.fail_all(&err),
        }
    }

    // Transport is gone for good.
    inner.fail_all(&Error::Disposed);
}
