// Copyright 2025 jonefeewang@gmail.com
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::cluster::BrokerMeta;
use crate::network::ResponseFrame;
use crate::protocol::{ApiKey, Codec, Request, RequestHeader, Response};
use crate::service::{AppError, AppResult, ClusterConfig};

/// Read side of a broker socket, accumulating bytes until a frame is complete.
#[derive(Debug)]
pub struct Connection {
    reader: OwnedReadHalf,
    buffer: BytesMut,
    max_frame_size: usize,
}

impl Connection {
    pub fn new(reader: OwnedReadHalf, max_frame_size: usize) -> Connection {
        Connection {
            reader,
            buffer: BytesMut::with_capacity(4 * 1024),
            max_frame_size,
        }
    }

    /// Reads the next `ResponseFrame`.
    ///
    /// `None` means the broker closed the socket between frames. A close in
    /// the middle of a frame is a connection reset. Cancellation safe: bytes
    /// already read stay in the buffer.
    pub async fn read_frame(&mut self) -> AppResult<Option<ResponseFrame>> {
        loop {
            if let Some(frame) = ResponseFrame::parse(&mut self.buffer, self.max_frame_size)? {
                return Ok(Some(frame));
            }
            if 0 == self.reader.read_buf(&mut self.buffer).await? {
                return if self.buffer.is_empty() {
                    Ok(None)
                } else {
                    Err(
                        io::Error::new(ErrorKind::ConnectionReset, "connection reset by peer")
                            .into(),
                    )
                };
            }
        }
    }
}

/// Why a broker connection stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// closed on request, e.g. a broker address changed
    Requested,
    /// the owning cluster is shutting down
    ClientClosing,
    /// the broker closed the socket
    PeerClosed,
    Io(String),
}

impl Display for CloseReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Requested => write!(f, "closed on request"),
            CloseReason::ClientClosing => write!(f, "client is closing"),
            CloseReason::PeerClosed => write!(f, "closed by broker"),
            CloseReason::Io(e) => write!(f, "I/O failure: {}", e),
        }
    }
}

impl CloseReason {
    fn to_error(&self, broker_id: i32) -> AppError {
        match self {
            CloseReason::ClientClosing => AppError::CancelledOnClose,
            reason => AppError::ConnectionClosed {
                broker_id,
                reason: reason.to_string(),
            },
        }
    }
}

struct PendingRequest {
    request: Request,
    response_tx: oneshot::Sender<AppResult<Response>>,
}

enum Command {
    Send(PendingRequest),
    /// drop pending entries whose caller stopped waiting
    Expire,
}

struct InFlight {
    api_key: ApiKey,
    api_version: i16,
    response_tx: oneshot::Sender<AppResult<Response>>,
}

/// A multiplexed connection to one broker.
///
/// Any number of callers may `send` concurrently; requests are written in
/// call order and responses are matched back by correlation id, so they may
/// complete in any order. A single task owns the socket and the pending
/// table. Once the connection closes, every pending and later request fails
/// with [`AppError::ConnectionClosed`], or [`AppError::CancelledOnClose`]
/// when the cluster is shutting down.
#[derive(Debug)]
pub struct BrokerConnection {
    broker: BrokerMeta,
    request_tx: mpsc::UnboundedSender<Command>,
    closed_rx: watch::Receiver<Option<CloseReason>>,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
    shutdown: CancellationToken,
    in_flight: Arc<AtomicUsize>,
    request_timeout: Duration,
}

impl std::fmt::Debug for PendingRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PendingRequest({:?})", self.request.api_key())
    }
}

impl BrokerConnection {
    pub async fn connect(
        broker: BrokerMeta,
        codec: Arc<dyn Codec>,
        config: &ClusterConfig,
    ) -> AppResult<Arc<BrokerConnection>> {
        let address = broker.address();
        let stream = time::timeout(config.connect_timeout(), TcpStream::connect(&address))
            .await
            .map_err(|_| {
                AppError::Timeout(format!("connecting to broker {} at {}", broker.id, address))
            })?
            .map_err(|e| {
                AppError::DetailedIoError(format!(
                    "connecting to broker {} at {}: {}",
                    broker.id, address, e
                ))
            })?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(None);
        let close_reason = Arc::new(Mutex::new(None));
        let shutdown = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));

        let task = ConnectionTask {
            broker: broker.clone(),
            codec,
            client_id: Some(config.client_id.clone()),
            reader: Connection::new(read_half, config.max_frame_size),
            writer: BufWriter::new(write_half),
            pending: HashMap::new(),
            next_correlation_id: 0,
            request_rx,
            closed_tx,
            close_reason: close_reason.clone(),
            shutdown: shutdown.clone(),
            in_flight: in_flight.clone(),
        };
        tokio::spawn(task.run());
        info!(broker_id = broker.id, %address, "connected to broker");

        Ok(Arc::new(BrokerConnection {
            broker,
            request_tx,
            closed_rx,
            close_reason,
            shutdown,
            in_flight,
            request_timeout: config.request_timeout(),
        }))
    }

    pub fn broker(&self) -> &BrokerMeta {
        &self.broker
    }

    /// Sends a request and waits for its response or the request timeout.
    pub async fn send(&self, request: Request) -> AppResult<Response> {
        if let Some(reason) = self.close_reason() {
            return Err(reason.to_error(self.broker.id));
        }
        let api_key = request.api_key();
        let (response_tx, response_rx) = oneshot::channel();
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        if self
            .request_tx
            .send(Command::Send(PendingRequest {
                request,
                response_tx,
            }))
            .is_err()
        {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            return Err(self.closed_error());
        }

        // the receiver is dropped here, before the task is asked to expire
        let outcome = time::timeout(self.request_timeout, response_rx).await;
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(self.closed_error()),
            Err(_) => {
                let _ = self.request_tx.send(Command::Expire);
                warn!(
                    broker_id = self.broker.id,
                    ?api_key,
                    timeout_ms = self.request_timeout.as_millis() as u64,
                    "request timed out"
                );
                Err(AppError::Timeout(format!(
                    "{:?} request to broker {}",
                    api_key, self.broker.id
                )))
            }
        }
    }

    /// Requests queued or awaiting a response.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed_rx.borrow().is_some()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.closed_rx.borrow().clone()
    }

    /// Resolves once the connection is closed, with the reason.
    pub async fn closed(&self) -> CloseReason {
        let mut closed_rx = self.closed_rx.clone();
        loop {
            if let Some(reason) = closed_rx.borrow_and_update().clone() {
                return reason;
            }
            if closed_rx.changed().await.is_err() {
                return self.close_reason().unwrap_or(CloseReason::PeerClosed);
            }
        }
    }

    /// Closes the connection, failing everything still pending.
    pub fn close(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shutdown.cancel();
    }

    fn closed_error(&self) -> AppError {
        let requested = self.close_reason.lock().clone();
        requested
            .or_else(|| self.close_reason())
            .unwrap_or(CloseReason::PeerClosed)
            .to_error(self.broker.id)
    }
}

impl Drop for BrokerConnection {
    fn drop(&mut self) {
        self.close(CloseReason::Requested);
    }
}

struct ConnectionTask {
    broker: BrokerMeta,
    codec: Arc<dyn Codec>,
    client_id: Option<String>,
    reader: Connection,
    writer: BufWriter<OwnedWriteHalf>,
    pending: HashMap<i32, InFlight>,
    next_correlation_id: i32,
    request_rx: mpsc::UnboundedReceiver<Command>,
    closed_tx: watch::Sender<Option<CloseReason>>,
    close_reason: Arc<Mutex<Option<CloseReason>>>,
    shutdown: CancellationToken,
    in_flight: Arc<AtomicUsize>,
}

impl ConnectionTask {
    async fn run(mut self) {
        let reason = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    break self.close_reason.lock().clone().unwrap_or(CloseReason::Requested);
                }
                next = self.request_rx.recv() => match next {
                    Some(Command::Send(pending)) => {
                        if let Err(e) = self.write_request(pending).await {
                            break CloseReason::Io(e.to_string());
                        }
                    }
                    Some(Command::Expire) => self.expire_abandoned(),
                    None => break CloseReason::Requested,
                },
                frame = self.reader.read_frame() => match frame {
                    Ok(Some(frame)) => self.complete(frame),
                    Ok(None) => break CloseReason::PeerClosed,
                    Err(e) => break CloseReason::Io(e.to_string()),
                },
            }
        };
        self.fail_all(reason);
    }

    fn next_correlation_id(&mut self) -> i32 {
        let id = self.next_correlation_id;
        self.next_correlation_id = self.next_correlation_id.wrapping_add(1);
        id
    }

    /// Encodes and writes one request. Encoding failures only fail that
    /// request; write failures end the connection.
    async fn write_request(&mut self, pending: PendingRequest) -> io::Result<()> {
        let api_key = pending.request.api_key();
        let header = RequestHeader {
            api_key,
            api_version: self.codec.api_version(api_key),
            correlation_id: self.next_correlation_id(),
            client_id: self.client_id.clone(),
        };

        let mut frame = BytesMut::with_capacity(256);
        frame.extend_from_slice(&[0u8; 4]);
        if let Err(e) = self.codec.encode_request(&header, &pending.request, &mut frame) {
            warn!(broker_id = self.broker.id, ?api_key, error = %e, "failed to encode request");
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let _ = pending.response_tx.send(Err(e));
            return Ok(());
        }
        let body_size = (frame.len() - 4) as i32;
        frame[..4].copy_from_slice(&body_size.to_be_bytes());

        // acks=0 produce: the broker never answers
        let unanswered = if pending.request.expects_response() {
            self.pending.insert(
                header.correlation_id,
                InFlight {
                    api_key,
                    api_version: header.api_version,
                    response_tx: pending.response_tx,
                },
            );
            None
        } else {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            Some(pending.response_tx)
        };
        trace!(
            broker_id = self.broker.id,
            correlation_id = header.correlation_id,
            ?api_key,
            size = frame.len(),
            "writing request"
        );
        self.writer.write_all(&frame).await?;
        self.writer.flush().await?;

        if let Some(response_tx) = unanswered {
            let _ = response_tx.send(Ok(Response::Produce(Default::default())));
        }
        Ok(())
    }

    fn complete(&mut self, frame: ResponseFrame) {
        let Some(in_flight) = self.pending.remove(&frame.correlation_id) else {
            // the caller timed out long ago or the broker is confused
            warn!(
                broker_id = self.broker.id,
                correlation_id = frame.correlation_id,
                "response for unknown correlation id dropped"
            );
            return;
        };
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        let result = self
            .codec
            .decode_response(in_flight.api_key, in_flight.api_version, frame.body);
        if let Err(e) = &result {
            warn!(
                broker_id = self.broker.id,
                correlation_id = frame.correlation_id,
                error = %e,
                "failed to decode response"
            );
        }
        let _ = in_flight.response_tx.send(result);
    }

    /// Removes requests whose caller gave up waiting. A late response for
    /// one of them is dropped as unknown.
    fn expire_abandoned(&mut self) {
        let before = self.pending.len();
        self.pending.retain(|_, in_flight| !in_flight.response_tx.is_closed());
        let expired = before - self.pending.len();
        if expired > 0 {
            self.in_flight.fetch_sub(expired, Ordering::AcqRel);
            debug!(broker_id = self.broker.id, expired, "expired abandoned requests");
        }
    }

    fn fail_all(mut self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason.clone());
            }
        }
        let _ = self.closed_tx.send(Some(reason.clone()));
        match &reason {
            CloseReason::PeerClosed | CloseReason::Io(_) => {
                warn!(broker_id = self.broker.id, %reason, pending = self.pending.len(), "broker connection lost")
            }
            _ => info!(broker_id = self.broker.id, %reason, "broker connection closed"),
        }

        let broker_id = self.broker.id;
        for (_, in_flight) in self.pending.drain() {
            self.in_flight.fetch_sub(1, Ordering::AcqRel);
            let _ = in_flight.response_tx.send(Err(reason.to_error(broker_id)));
        }
        self.request_rx.close();
        while let Ok(command) = self.request_rx.try_recv() {
            if let Command::Send(queued) = command {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                let _ = queued.response_tx.send(Err(reason.to_error(broker_id)));
            }
        }
        debug!(broker_id, "connection task finished");
    }
}
