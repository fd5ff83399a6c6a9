//! Connection & communication with a broker.
//!
//! Kafka uses a binary protocol over TCP: size-delimited request and
//! response frames on a persistent connection. The server guarantees that
//! on a single TCP connection, requests are processed in the order they
//! are sent and responses return in that order, so a client that pipelines
//! requests can match replies positionally — this transport still tags
//! nothing and leaves correlation to the layer above.
//!
//! A [`Transport`] owns one endpoint and at most one socket at a time. A
//! long-running supervisor task acquires a connected stream (with
//! exponential backoff between attempts), then drives two pumps
//! concurrently: the send pump pops queued payloads and writes them, the
//! receive pump reads size-prefixed frames and hands them to the incoming
//! channel. When either pump faults, every queued send and every
//! undelivered frame waiter is completed with a connection error and the
//! supervisor reconnects — unless it has been disposed.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::config::ConnectionConfig;
use crate::error::{Error, Result};
use crate::retry;

/// Socket lifecycle events, reported to observers registered at
/// construction. Purely informational; protocol correctness does not
/// depend on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    /// The connected socket was lost.
    ServerDisconnected,
    /// A reconnect attempt is about to run (1-based attempt number).
    ReconnectionAttempt(u32),
    /// About to read a frame body of this many bytes.
    ReceivingFromSocket(usize),
    /// Finished reading a frame body of this many bytes.
    ReceivedFromSocket(usize),
    /// About to write a payload of this many bytes.
    SendingToSocket(usize),
    /// Finished writing a payload of this many bytes.
    SentToSocket(usize),
}

/// Observer of [`NetworkEvent`]s.
pub trait NetworkObserver: Send + Sync {
    fn on_event(&self, event: NetworkEvent);
}

pub(crate) type Observers = Arc<Vec<Box<dyn NetworkObserver>>>;

fn notify(observers: &Observers, event: NetworkEvent) {
    for observer in observers.iter() {
        observer.on_event(event);
    }
}

/// A queued outbound payload with its completion.
struct SendOp {
    payload: Vec<u8>,
    done: oneshot::Sender<Result<()>>,
}

/// What the receive side of a transport delivers, in arrival order.
pub(crate) enum Incoming {
    /// A complete response frame, size prefix stripped.
    Frame(Bytes),
    /// The socket died; everything in flight on it is gone.
    Disconnected(Error),
}

/// Byte-frame transport over a single broker socket.
pub(crate) struct Transport {
    sends: mpsc::UnboundedSender<SendOp>,
}

impl Transport {
    /// Spawn the supervisor for `addr`. Returns the transport handle and
    /// the channel on which frames and faults arrive.
    pub(crate) fn spawn(
        addr: String,
        config: ConnectionConfig,
        observers: Observers,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<Incoming>) {
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();

        let supervisor = Supervisor {
            addr,
            config,
            observers,
            sends: send_rx,
            incoming: incoming_tx,
            shutdown,
            carried: None,
        };
        tokio::spawn(supervisor.run());

        (Self { sends: send_tx }, incoming_rx)
    }

    /// Enqueue a payload and wait until the send pump has written it.
    pub(crate) async fn send(&self, payload: Vec<u8>) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.sends
            .send(SendOp { payload, done })
            .map_err(|_| Error::Disposed)?;
        wait.await.map_err(|_| Error::Disposed)?
    }
}

/// The long-running task that owns the socket.
struct Supervisor {
    addr: String,
    config: ConnectionConfig,
    observers: Observers,
    sends: mpsc::UnboundedReceiver<SendOp>,
    incoming: mpsc::UnboundedSender<Incoming>,
    shutdown: CancellationToken,
    /// A send op received while no socket was available; served first by
    /// the next send pump.
    carried: Option<SendOp>,
}

impl Supervisor {
    async fn run(mut self) {
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let stream = tokio::select! {
                res = self.acquire_stream() => res,
                _ = self.shutdown.cancelled() => break,
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    // Reconnect budget exhausted: fail everything pending
                    // and wait for fresh interest before trying again.
                    tracing::error!(addr = %self.addr, error = %err, "giving up connecting to broker");
                    let _ = self.incoming.send(Incoming::Disconnected(err.clone()));
                    self.drain_sends(&err);
                    tokio::select! {
                        op = self.sends.recv() => match op {
                            Some(op) => {
                                self.carried = Some(op);
                                continue;
                            }
                            None => break,
                        },
                        _ = self.shutdown.cancelled() => break,
                    }
                }
            };

            tracing::debug!(addr = %self.addr, "broker socket connected");
            let fault = self.run_pumps(stream).await;

            if self.shutdown.is_cancelled() {
                break;
            }

            tracing::warn!(addr = %self.addr, error = %fault, "broker socket lost, reconnecting");
            notify(&self.observers, NetworkEvent::ServerDisconnected);
            let wrapped = Error::ConnectionError(format!(
                "connection to {} lost: {}",
                self.addr, fault
            ));
            let _ = self.incoming.send(Incoming::Disconnected(wrapped.clone()));
            self.drain_sends(&wrapped);
        }

        // Disposed: nothing on this transport will ever complete.
        self.drain_sends(&Error::Disposed);
    }

    /// Connect with backoff, reporting each retry to the observers.
    async fn acquire_stream(&self) -> Result<TcpStream> {
        let attempts = AtomicU32::new(0);
        let addr = self.addr.clone();
        let connecting_timeout = self.config.connecting_timeout;

        let stream = (|| {
            let addr = addr.clone();
            async move {
                match timeout(connecting_timeout, TcpStream::connect(&addr)).await {
                    Ok(Ok(stream)) => Ok(stream),
                    Ok(Err(err)) => Err(Error::from(err)),
                    Err(_) => Err(Error::Timeout),
                }
            }
        })
        .retry(retry::reconnect_policy(&self.config))
        .when(|_| true)
        .notify(|err: &Error, delay: Duration| {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            notify(&self.observers, NetworkEvent::ReconnectionAttempt(attempt));
            tracing::warn!(
                addr = %self.addr,
                attempt,
                ?delay,
                error = %err,
                "broker connect failed, backing off"
            );
        })
        .await
        .map_err(|err| {
            Error::ConnectionError(format!("unable to connect to {}: {}", self.addr, err))
        })?;

        // Keepalive catches half-open connections the pumps would
        // otherwise only notice at the next request.
        let keepalive = socket2::TcpKeepalive::new()
            .with_time(Duration::from_secs(10))
            .with_interval(Duration::from_secs(20));
        let sock = socket2::SockRef::from(&stream);
        sock.set_nodelay(true)
            .and_then(|_| sock.set_tcp_keepalive(&keepalive))
            .map_err(Error::from)?;

        Ok(stream)
    }

    /// Drive the send and receive pumps until one faults or the
    /// transport is disposed. Returns the fault.
    async fn run_pumps(&mut self, stream: TcpStream) -> Error {
        let (reader, writer) = stream.into_split();

        let sends = &mut self.sends;
        let carried = &mut self.carried;
        let incoming = &self.incoming;
        let observers = &self.observers;
        let max_frame_size = self.config.max_frame_size;

        let send_pump = send_pump(writer, sends, carried, observers);
        let recv_pump = recv_pump(reader, incoming, observers, max_frame_size);

        tokio::select! {
            err = send_pump => err,
            err = recv_pump => err,
            _ = self.shutdown.cancelled() => Error::Disposed,
        }
    }

    /// Complete every queued send with a clone of `err`.
    fn drain_sends(&mut self, err: &Error) {
        if let Some(op) = self.carried.take() {
            let _ = op.done.send(Err(err.clone()));
        }
        while let Ok(op) = self.sends.try_recv() {
            let _ = op.done.send(Err(err.clone()));
        }
    }
}

/// Pop queued payloads and write them, in enqueue order.
async fn send_pump(
    mut writer: OwnedWriteHalf,
    sends: &mut mpsc::UnboundedReceiver<SendOp>,
    carried: &mut Option<SendOp>,
    observers: &Observers,
) -> Error {
    loop {
        let op = match carried.take() {
            Some(op) => op,
            None => match sends.recv().await {
                Some(op) => op,
                // All transport handles dropped.
                None => return Error::Disposed,
            },
        };

        notify(observers, NetworkEvent::SendingToSocket(op.payload.len()));
        match writer.write_all(&op.payload).await {
            Ok(()) => {
                notify(observers, NetworkEvent::SentToSocket(op.payload.len()));
                tracing::trace!(bytes = op.payload.len(), "wrote frame");
                let _ = op.done.send(Ok(()));
            }
            Err(err) => {
                let fault = Error::from(err);
                let _ = op.done.send(Err(Error::ConnectionError(format!(
                    "write failed: {}",
                    fault
                ))));
                return fault;
            }
        }
    }
}

/// Read size-prefixed frames and deliver them, in arrival order.
async fn recv_pump(
    mut reader: OwnedReadHalf,
    incoming: &mpsc::UnboundedSender<Incoming>,
    observers: &Observers,
    max_frame_size: usize,
) -> Error {
    loop {
        let mut size_buf = [0u8; 4];
        if let Err(err) = reader.read_exact(&mut size_buf).await {
            return Error::from(err);
        }
        let size = i32::from_be_bytes(size_buf);
        if size < 0 || size as usize > max_frame_size {
            return Error::ConnectionError(format!("peer announced invalid frame size {}", size));
        }

        notify(observers, NetworkEvent::ReceivingFromSocket(size as usize));
        let mut data = vec![0u8; size as usize];
        if let Err(err) = reader.read_exact(&mut data).await {
            return Error::from(err);
        }
        notify(observers, NetworkEvent::ReceivedFromSocket(data.len()));
        tracing::trace!(bytes = data.len(), "read frame");

        if incoming.send(Incoming::Frame(Bytes::from(data))).is_err() {
            return Error::Disposed;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder(Mutex<Vec<NetworkEvent>>);

    impl NetworkObserver for Recorder {
        fn on_event(&self, event: NetworkEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    #[tokio::test]
    async fn test_frames_roundtrip_over_socket() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        // Echo peer: read one framed request, reply with a framed answer.
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut size = [0u8; 4];
            sock.read_exact(&mut size).await.unwrap();
            let mut body = vec![0u8; i32::from_be_bytes(size) as usize];
            sock.read_exact(&mut body).await.unwrap();

            let reply = b"pong";
            sock.write_all(&(reply.len() as i32).to_be_bytes())
                .await
                .unwrap();
            sock.write_all(reply).await.unwrap();
        });

        let observers: Observers = Arc::new(vec![Box::new(Recorder(Mutex::new(Vec::new())))]);
        let shutdown = CancellationToken::new();
        let (transport, mut incoming) = Transport::spawn(
            addr,
            ConnectionConfig::default(),
            observers,
            shutdown.clone(),
        );

        let mut frame = (4i32).to_be_bytes().to_vec();
        frame.extend_from_slice(b"ping");
        transport.send(frame).await.unwrap();

        match incoming.recv().await.unwrap() {
            Incoming::Frame(body) => assert_eq!(body, Bytes::from_static(b"pong")),
            Incoming::Disconnected(err) => panic!("unexpected disconnect: {err}"),
        }

        shutdown.cancel();
    }

    #[tokio::test]
    async fn test_connect_failure_reports_attempts() {
        // A port nothing listens on; bind-then-drop reserves one.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let observers: Observers = Arc::new(vec![Box::new(SharedRecorder(recorder.clone()))]);

        let config = ConnectionConfig {
            max_reconnect_attempts: 2,
            connecting_timeout: Duration::from_millis(500),
            ..ConnectionConfig::default()
        };
        let shutdown = CancellationToken::new();
        let (_transport, mut incoming) =
            Transport::spawn(addr, config, observers, shutdown.clone());

        match incoming.recv().await.unwrap() {
            Incoming::Disconnected(Error::ConnectionError(_)) => {}
            _ => panic!("expected a connection error"),
        }

        let events = recorder.0.lock().unwrap();
        let attempts: Vec<_> = events
            .iter()
            .filter(|e| matches!(e, NetworkEvent::ReconnectionAttempt(_)))
            .collect();
        assert_eq!(attempts.len(), 2);

        shutdown.cancel();
    }

    struct SharedRecorder(Arc<Recorder>);

    impl NetworkObserver for SharedRecorder {
        fn on_event(&self, event: NetworkEvent) {
            self.0.on_event(event);
        }
    }
}
