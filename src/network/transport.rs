//! # Transport
//!
//! A [`Connection`] multiplexes both call streams over one TCP stream.
//!
//! ```text
//!   call() --> pending[id] ---------------------.
//!     |                                          |
//!     v                                          |
//!   writer thread --- JSON lines ---> peer       |
//!                                                |
//!   peer --- JSON lines ---> reader thread ------+--> response: pending[id]
//!                                |
//!                                '--> request: serving thread --> handler
//!                                                     |
//!                                       response <----'
//! ```
//!
//! Requests from the peer are handled by a single serving thread per
//! connection, so they are answered in the order they arrived. The reader
//! never runs a handler itself, which lets a handler make calls of its own
//! over the same connection without deadlocking.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, trace, warn};

use super::protocol::{Channel, Frame, FrameBody, Request, Response};
use crate::config::RpcConfig;
use crate::error::{Result, WorldError};

/// Answers the calls a peer makes.
pub trait RequestHandler: Send + Sync {
    /// Failures are reported to the caller as `Response::Error`.
    fn handle(&self, request: Request) -> Response;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn transport(err: std::io::Error) -> WorldError {
    WorldError::Transport(err.to_string())
}

/// Delay before retry number `attempt + 1`.
///
/// Exponential in `attempt`, capped at `backoff_max_ms`, plus up to half of
/// that again as random jitter so clients that failed together do not retry
/// together.
pub fn backoff_delay(attempt: u32, config: &RpcConfig) -> Duration {
    let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
    let base = config
        .backoff_base_ms
        .saturating_mul(factor)
        .min(config.backoff_max_ms);
    let jitter = fastrand::u64(0..=base / 2);
    Duration::from_millis(base + jitter)
}

/// One end of a client/server link.
pub struct Connection {
    /// Stream this end's own calls travel on.
    calls: Channel,
    peer: SocketAddr,
    stream: TcpStream,
    writer: Mutex<Option<Sender<Frame>>>,
    pending: Mutex<HashMap<u64, Sender<Response>>>,
    next_id: AtomicU64,
    closed: Mutex<bool>,
    closed_signal: Condvar,
}

impl Connection {
    /// Starts the reader, writer and serving threads for `stream`.
    ///
    /// # Arguments
    /// * `stream` - A connected socket
    /// * `calls` - The channel this end issues calls on; the peer's calls
    ///   arrive on the other one
    /// * `handler` - Answers the peer's calls
    pub fn open(stream: TcpStream, calls: Channel, handler: Arc<dyn RequestHandler>) -> Result<Arc<Self>> {
        stream.set_nodelay(true).map_err(transport)?;
        let peer = stream.peer_addr().map_err(transport)?;
        let read_stream = stream.try_clone().map_err(transport)?;
        let write_stream = stream.try_clone().map_err(transport)?;

        let (frame_tx, frame_rx) = mpsc::channel::<Frame>();
        let (request_tx, request_rx) = mpsc::channel::<(u64, Request)>();

        let connection = Arc::new(Connection {
            calls,
            peer,
            stream,
            writer: Mutex::new(Some(frame_tx)),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: Mutex::new(false),
            closed_signal: Condvar::new(),
        });

        {
            let connection = connection.clone();
            thread::Builder::new()
                .name(format!("conn-writer-{peer}"))
                .spawn(move || {
                    let mut writer = BufWriter::new(write_stream);
                    while let Ok(frame) = frame_rx.recv() {
                        let line = match frame.encode() {
                            Ok(line) => line,
                            Err(err) => {
                                warn!("Dropping unencodable frame for {}: {}", connection.peer, err);
                                continue;
                            }
                        };
                        if writeln!(writer, "{line}").and_then(|_| writer.flush()).is_err() {
                            debug!("Write to {} failed", connection.peer);
                            break;
                        }
                    }
                    connection.close();
                })
                .map_err(transport)?;
        }

        {
            let connection = connection.clone();
            thread::Builder::new()
                .name(format!("conn-serve-{peer}"))
                .spawn(move || {
                    let answers = calls.peer();
                    while let Ok((id, request)) = request_rx.recv() {
                        let name = request.name();
                        let response = handler.handle(request);
                        trace!("Answered {} #{} from {}", name, id, connection.peer);
                        let frame = Frame {
                            channel: answers,
                            id,
                            body: FrameBody::Response(response),
                        };
                        if connection.send_frame(frame).is_err() {
                            break;
                        }
                    }
                })
                .map_err(transport)?;
        }

        {
            let connection = connection.clone();
            thread::Builder::new()
                .name(format!("conn-reader-{peer}"))
                .spawn(move || {
                    let mut reader = BufReader::new(read_stream);
                    let mut line = String::new();
                    loop {
                        line.clear();
                        match reader.read_line(&mut line) {
                            Ok(0) => break,
                            Ok(_) => {}
                            Err(err) => {
                                debug!("Read from {} failed: {}", connection.peer, err);
                                break;
                            }
                        }
                        if line.trim().is_empty() {
                            continue;
                        }
                        let frame = match Frame::decode(&line) {
                            Ok(frame) => frame,
                            Err(err) => {
                                warn!("Closing connection to {}: {}", connection.peer, err);
                                break;
                            }
                        };
                        match frame.body {
                            FrameBody::Response(response) if frame.channel == calls => {
                                connection.resolve(frame.id, response);
                            }
                            FrameBody::Request(request) if frame.channel == calls.peer() => {
                                if request_tx.send((frame.id, request)).is_err() {
                                    break;
                                }
                            }
                            _ => warn!(
                                "Ignoring frame #{} on unexpected channel {:?} from {}",
                                frame.id, frame.channel, connection.peer
                            ),
                        }
                    }
                    connection.close();
                })
                .map_err(transport)?;
        }

        Ok(connection)
    }

    /// Connects to `addr` as a client.
    pub fn connect(addr: &str, handler: Arc<dyn RequestHandler>) -> Result<Arc<Self>> {
        let stream = TcpStream::connect(addr).map_err(transport)?;
        Self::open(stream, Channel::ClientCalls, handler)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    fn send_frame(&self, frame: Frame) -> Result<()> {
        match lock(&self.writer).as_ref() {
            Some(writer) => writer
                .send(frame)
                .map_err(|_| WorldError::Transport(format!("connection to {} closed", self.peer))),
            None => Err(WorldError::Transport(format!("connection to {} closed", self.peer))),
        }
    }

    fn resolve(&self, id: u64, response: Response) {
        match lock(&self.pending).remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(response);
            }
            None => debug!("Dropping late response #{} from {}", id, self.peer),
        }
    }

    /// Makes one call and waits up to `timeout` for the answer.
    ///
    /// # Errors
    /// - `Timeout` if no answer arrived in time; a late answer is discarded
    /// - `Transport` if the connection is or becomes closed
    /// - `Remote` if the peer answered with an error
    pub fn call(&self, request: Request, timeout: Duration) -> Result<Response> {
        let name = request.name();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel();
        lock(&self.pending).insert(id, tx);

        let frame = Frame {
            channel: self.calls,
            id,
            body: FrameBody::Request(request),
        };
        if let Err(err) = self.send_frame(frame) {
            lock(&self.pending).remove(&id);
            return Err(err);
        }

        match rx.recv_timeout(timeout) {
            Ok(Response::Error { message }) => Err(WorldError::Remote(message)),
            Ok(response) => Ok(response),
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.pending).remove(&id);
                Err(WorldError::Timeout(format!("{name} #{id} to {}", self.peer)))
            }
            Err(RecvTimeoutError::Disconnected) => Err(WorldError::Transport(format!(
                "connection to {} closed during {name}",
                self.peer
            ))),
        }
    }

    /// Makes a call under the retry policy of `config`.
    ///
    /// Idempotent calls are retried after a `Timeout`, up to
    /// `max_attempts`, sleeping [`backoff_delay`] in between. Other calls and
    /// other errors are returned after the first attempt.
    pub fn call_with_retry(&self, request: Request, config: &RpcConfig) -> Result<Response> {
        let attempts = if request.is_idempotent() {
            config.max_attempts.max(1)
        } else {
            1
        };
        let mut attempt = 0;
        loop {
            match self.call(request.clone(), config.timeout()) {
                Err(err) if err.is_retryable() && attempt + 1 < attempts => {
                    let delay = backoff_delay(attempt, config);
                    warn!("{}; retrying in {:?}", err, delay);
                    thread::sleep(delay);
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.closed)
    }

    /// Shuts the socket down and fails every outstanding call. Idempotent.
    pub fn close(&self) {
        {
            let mut closed = lock(&self.closed);
            if *closed {
                return;
            }
            *closed = true;
        }
        debug!("Closing connection to {}", self.peer);
        let _ = self.stream.shutdown(Shutdown::Both);
        lock(&self.writer).take();
        // Dropping the waiters turns their recv into Disconnected.
        lock(&self.pending).clear();
        self.closed_signal.notify_all();
    }

    /// Blocks until the connection is closed by either side.
    pub fn wait_closed(&self) {
        let mut closed = lock(&self.closed);
        while !*closed {
            closed = self
                .closed_signal
                .wait(closed)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}
