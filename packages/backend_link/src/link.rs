use serde::{Deserialize, Serialize};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::LinkError;

/// Prefix the backend puts on every successful reply
pub const SUCCESS_MARKER: &str = "OK";

/// Prefix of the textual result returned when the transport itself fails
pub const TRANSPORT_ERROR_PREFIX: &str = "TCP error: ";

const READ_CHUNK: usize = 4096;
const LINK_QUEUE_DEPTH: usize = 8;

/// Returns true when a backend reply denotes success.
pub fn is_success(reply: &str) -> bool {
    reply.starts_with(SUCCESS_MARKER)
}

/// Role announced in the first bytes of every backend connection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Reader,
    Writer,
}

impl Role {
    /// Wire tag sent to the backend
    pub fn tag(self) -> &'static str {
        match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for Role {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reader" => Ok(Role::Reader),
            "writer" => Ok(Role::Writer),
            _ => Err(()),
        }
    }
}

/// Where the backend lives and how patient to be with it
#[derive(Clone, Debug)]
pub struct LinkConfig {
    /// `host:port` of the backend
    pub addr: String,
    pub connect_timeout: Duration,
    /// A read that sees no data for this long is treated as complete
    pub read_timeout: Duration,
    /// Maximum number of blocking backend calls running at once
    pub max_in_flight: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            addr: "127.0.0.1:8080".to_string(),
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            max_in_flight: 32,
        }
    }
}

/// Per-call knobs for [`exchange`]
#[derive(Clone, Copy, Debug)]
pub struct ExchangeOptions {
    pub expect_reply: bool,
    /// Half-close the send side after writing. Only use this when the
    /// backend is expected to close rather than wait for more input.
    pub shutdown_write: bool,
    pub timeout: Duration,
}

impl ExchangeOptions {
    /// Send, keep the stream open, and collect whatever comes back.
    pub fn reply(timeout: Duration) -> Self {
        Self {
            expect_reply: true,
            shutdown_write: false,
            timeout,
        }
    }
}

/// Send `data` on an already-connected stream and read the reply.
///
/// Reading stops when the peer closes its side or when `timeout` passes
/// without any data. Bytes are decoded lossily. Transport failures come back
/// as `"TCP error: <detail>"` instead of an `Err`.
pub fn exchange(stream: &mut TcpStream, data: &[u8], options: &ExchangeOptions) -> String {
    match try_exchange(stream, data, options) {
        Ok(reply) => reply,
        Err(e) => LinkError::from(e).to_reply(),
    }
}

pub(crate) fn try_exchange(
    stream: &mut TcpStream,
    data: &[u8],
    options: &ExchangeOptions,
) -> io::Result<String> {
    stream.write_all(data)?;
    if options.shutdown_write {
        // Already half-closed is fine
        let _ = stream.shutdown(Shutdown::Write);
    }
    if !options.expect_reply {
        return Ok(String::new());
    }

    // A zero timeout is rejected by the OS
    stream.set_read_timeout(Some(options.timeout.max(Duration::from_millis(1))))?;

    let mut response = Vec::new();
    let mut buffer = [0u8; READ_CHUNK];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => response.extend_from_slice(&buffer[..n]),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&response).into_owned())
}

/// Open a TCP connection to the configured backend.
pub(crate) fn connect(config: &LinkConfig) -> Result<TcpStream, LinkError> {
    let timeout = config.connect_timeout.max(Duration::from_millis(1));
    let mut last_err = None;
    for addr in config.addr.to_socket_addrs()? {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Ok(stream);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(match last_err {
        Some(e) => LinkError::Io(e),
        None => LinkError::Unresolved(config.addr.clone()),
    })
}

/// Open a connection, run exactly one request, and close it.
///
/// Sends the role tag, then (writers only) the payload, half-closes the send
/// side and drains until the backend closes. The connection is closed no
/// matter how the exchange went.
pub fn one_shot(config: &LinkConfig, role: Role, payload: Option<&str>) -> String {
    match try_one_shot(config, role, payload) {
        Ok(reply) => reply,
        Err(e) => e.to_reply(),
    }
}

fn try_one_shot(config: &LinkConfig, role: Role, payload: Option<&str>) -> Result<String, LinkError> {
    let mut stream = connect(config)?;
    let result = (|| {
        stream.write_all(role.tag().as_bytes())?;
        let body = match role {
            Role::Writer => payload.unwrap_or_default(),
            Role::Reader => "",
        };
        let options = ExchangeOptions {
            expect_reply: true,
            shutdown_write: true,
            timeout: config.read_timeout,
        };
        try_exchange(&mut stream, body.as_bytes(), &options)
    })();
    let _ = stream.shutdown(Shutdown::Both);
    Ok(result?)
}

/// Identifier of a persistent backend link (for logs)
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct LinkId(pub u64);

impl LinkId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        LinkId(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// Messages that can be sent to a link actor
pub(crate) enum LinkMessage {
    Exchange {
        data: Vec<u8>,
        respond_to: oneshot::Sender<String>,
    },
    Close {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a persistent backend connection.
///
/// Cloning is cheap; every clone talks to the same actor, which serves
/// requests one at a time. The socket closes when [`LinkHandle::close`] is
/// called or when the last handle is dropped.
#[derive(Clone, Debug)]
pub struct LinkHandle {
    id: LinkId,
    sender: mpsc::Sender<LinkMessage>,
}

impl LinkHandle {
    pub fn id(&self) -> LinkId {
        self.id
    }

    /// Send bytes and wait for the backend's reply text.
    pub async fn exchange(&self, data: impl AsRef<[u8]>) -> String {
        let (tx, rx) = oneshot::channel();
        let msg = LinkMessage::Exchange {
            data: data.as_ref().to_vec(),
            respond_to: tx,
        };
        if self.sender.send(msg).await.is_err() {
            return LinkError::Closed.to_reply();
        }
        rx.await.unwrap_or_else(|_| LinkError::Closed.to_reply())
    }

    /// Close the backend connection and wait until the socket is shut down.
    pub async fn close(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(LinkMessage::Close { respond_to: tx })
            .await
            .is_ok()
        {
            let _ = rx.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Owns one backend socket and runs its blocking rounds on the blocking pool
pub(crate) struct LinkActor {
    id: LinkId,
    stream: Option<TcpStream>,
    read_timeout: Duration,
    permits: Arc<Semaphore>,
    receiver: mpsc::Receiver<LinkMessage>,
}

impl LinkActor {
    /// Start an actor for an already-connected stream and return its handle
    pub(crate) fn spawn(
        stream: TcpStream,
        read_timeout: Duration,
        permits: Arc<Semaphore>,
    ) -> LinkHandle {
        let id = LinkId::next();
        let (tx, rx) = mpsc::channel(LINK_QUEUE_DEPTH);
        let mut actor = Self {
            id,
            stream: Some(stream),
            read_timeout,
            permits,
            receiver: rx,
        };

        tokio::spawn(async move {
            actor.run().await;
        });

        LinkHandle { id, sender: tx }
    }

    async fn run(&mut self) {
        debug!(link = %self.id, "backend link opened");

        while let Some(msg) = self.receiver.recv().await {
            match msg {
                LinkMessage::Exchange { data, respond_to } => {
                    let reply = self.round_trip(data).await;
                    let _ = respond_to.send(reply);
                }
                LinkMessage::Close { respond_to } => {
                    self.shutdown();
                    let _ = respond_to.send(());
                    break;
                }
            }
        }

        self.shutdown();
        debug!(link = %self.id, "backend link closed");
    }

    async fn round_trip(&mut self, data: Vec<u8>) -> String {
        let Some(mut stream) = self.stream.take() else {
            return LinkError::Closed.to_reply();
        };

        let _permit = match self.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                self.stream = Some(stream);
                return LinkError::Worker("blocking pool closed".to_string()).to_reply();
            }
        };

        let options = ExchangeOptions::reply(self.read_timeout);
        let joined = tokio::task::spawn_blocking(move || {
            let reply = exchange(&mut stream, &data, &options);
            (stream, reply)
        })
        .await;

        match joined {
            Ok((stream, reply)) => {
                self.stream = Some(stream);
                reply
            }
            Err(e) => {
                // The stream went down with the worker
                warn!(link = %self.id, "backend exchange worker failed: {}", e);
                LinkError::Worker(e.to_string()).to_reply()
            }
        }
    }

    fn shutdown(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
