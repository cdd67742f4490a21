//! Connection multiplexer.
//!
//! One event loop owns the listener, the table of live connections and the
//! protocol [`Handler`]. Every connection gets a reader task and a writer
//! task; they only move bytes. All protocol state is touched from the event
//! loop, so commands from different clients never interleave mid-command.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::MissedTickBehavior;

use crate::config::ServerConfig;
use crate::error::ConnectionFault;
use crate::state::{Outbound, SessionId};

/// Lines queued for one client before further sends to it fail.
pub const OUTBOUND_QUEUE: usize = 4096;

const EVENT_QUEUE: usize = 1024;
const WRITE_TIMEOUT: Duration = Duration::from_secs(30);
const WRITE_BATCH: usize = 64;
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// The protocol side of the server. The multiplexer knows nothing else
/// about what runs over its sockets.
pub trait Handler {
    /// A connection was accepted. `outbound` feeds its writer.
    fn create_session(&mut self, id: SessionId, peer: SocketAddr, outbound: Outbound);

    /// Bytes arrived on a connection.
    fn handle(&mut self, id: SessionId, bytes: &[u8]);

    /// The connection is gone (peer closed or I/O fault).
    fn disconnected(&mut self, id: SessionId, reason: &str);

    /// Periodic work; runs after every wake of the event loop.
    fn housekeeping(&mut self, now: Instant);

    /// Sessions the handler has dropped and whose sockets should close.
    fn take_closed(&mut self) -> Vec<SessionId>;
}

/// Outcome of one socket read.
#[derive(Debug)]
pub enum ReadResult {
    Data(Vec<u8>),
    Closed,
    Fault(io::Error),
}

#[derive(Debug)]
enum ConnEvent {
    Read(SessionId, ReadResult),
    WriteFault(SessionId, io::Error),
}

struct Connection {
    peer: SocketAddr,
    reader: AbortHandle,
}

pub struct Server<H> {
    listener: TcpListener,
    handler: H,
    connections: HashMap<SessionId, Connection>,
    events_tx: mpsc::Sender<ConnEvent>,
    events_rx: mpsc::Receiver<ConnEvent>,
    next_id: u64,
    max_message_size: usize,
    poll_timeout: Duration,
}

impl<H: Handler> Server<H> {
    /// Bind the listening socket. Nothing is accepted until [`Server::run`].
    pub async fn bind(config: &ServerConfig, handler: H) -> Result<Self> {
        let (host, port) = config.bind_address()?;
        let addr = tokio::net::lookup_host((host.as_str(), port))
            .await
            .with_context(|| format!("Failed to resolve {host}:{port}"))?
            .next()
            .with_context(|| format!("No address found for {host}"))?;

        let socket = if addr.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket
            .bind(addr)
            .with_context(|| format!("Failed to bind {addr}"))?;
        let listener = socket.listen(config.max_pending_clients)?;
        tracing::info!("Listening on {}", listener.local_addr()?);

        let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE);
        Ok(Self {
            listener,
            handler,
            connections: HashMap::new(),
            events_tx,
            events_rx,
            next_id: 0,
            max_message_size: config.max_message_size.max(1),
            poll_timeout: config.poll_timeout(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Run the event loop forever.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = tokio::time::interval(self.poll_timeout);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.accept(stream, peer),
                    Err(e) => {
                        tracing::warn!("Accept error: {e}");
                        // Persistent errors (EMFILE) would otherwise spin.
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
                Some(event) = self.events_rx.recv() => {
                    self.process(event);
                    // Drain whatever else is already ready.
                    while let Ok(event) = self.events_rx.try_recv() {
                        self.process(event);
                    }
                }
                _ = ticker.tick() => {}
            }

            self.handler.housekeeping(Instant::now());
            self.reap();
        }
    }

    fn accept(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.next_id += 1;
        let id = SessionId(self.next_id);
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(session_id = %id, "set_nodelay failed: {e}");
        }

        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE);
        tokio::spawn(write_loop(id, write_half, rx, self.events_tx.clone()));
        let reader = tokio::spawn(read_loop(
            id,
            read_half,
            self.max_message_size,
            self.events_tx.clone(),
        ))
        .abort_handle();

        self.connections.insert(id, Connection { peer, reader });
        tracing::info!(session_id = %id, %peer, "New connection");
        self.handler.create_session(id, peer, tx);
    }

    fn process(&mut self, event: ConnEvent) {
        match event {
            ConnEvent::Read(id, ReadResult::Data(bytes)) => {
                if self.connections.contains_key(&id) {
                    self.handler.handle(id, &bytes);
                }
            }
            ConnEvent::Read(id, ReadResult::Closed) => {
                self.drop_connection(id, ConnectionFault::Closed);
            }
            ConnEvent::Read(id, ReadResult::Fault(e)) | ConnEvent::WriteFault(id, e) => {
                self.drop_connection(id, ConnectionFault::Io(e));
            }
        }
    }

    fn drop_connection(&mut self, id: SessionId, fault: ConnectionFault) {
        let Some(conn) = self.connections.remove(&id) else {
            return;
        };
        conn.reader.abort();
        match fault {
            ConnectionFault::Closed => {
                tracing::info!(session_id = %id, peer = %conn.peer, "Connection closed");
            }
            ref other => {
                tracing::warn!(session_id = %id, peer = %conn.peer, "Connection fault: {other}");
            }
        }
        self.handler.disconnected(id, &fault.to_string());
    }

    fn reap(&mut self) {
        for id in self.handler.take_closed() {
            if let Some(conn) = self.connections.remove(&id) {
                conn.reader.abort();
                tracing::debug!(session_id = %id, peer = %conn.peer, "Closed connection");
            }
        }
    }
}

async fn read_loop(
    id: SessionId,
    mut reader: OwnedReadHalf,
    max_message_size: usize,
    events: mpsc::Sender<ConnEvent>,
) {
    let mut buf = vec![0u8; max_message_size];
    loop {
        let result = match reader.read(&mut buf).await {
            Ok(0) => ReadResult::Closed,
            Ok(n) => ReadResult::Data(buf[..n].to_vec()),
            Err(e) => ReadResult::Fault(e),
        };
        let last = !matches!(result, ReadResult::Data(_));
        if events.send(ConnEvent::Read(id, result)).await.is_err() || last {
            break;
        }
    }
}

/// Drains one client's outbound queue. Ends when the session drops its
/// sender, after flushing what is left, or on the first write error.
async fn write_loop(
    id: SessionId,
    writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<String>,
    events: mpsc::Sender<ConnEvent>,
) {
    let mut writer = BufWriter::new(writer);
    while let Some(line) = rx.recv().await {
        let batch = async {
            writer.write_all(line.as_bytes()).await?;
            // Batch whatever else is queued into one flush.
            for _ in 0..WRITE_BATCH {
                match rx.try_recv() {
                    Ok(queued) => writer.write_all(queued.as_bytes()).await?,
                    Err(_) => break,
                }
            }
            writer.flush().await
        };
        let result = match tokio::time::timeout(WRITE_TIMEOUT, batch).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "write timed out")),
        };
        if let Err(e) = result {
            tracing::warn!(session_id = %id, "Write error: {e}");
            let _ = events.send(ConnEvent::WriteFault(id, e)).await;
            return;
        }
    }
    let _ = writer.shutdown().await;
}
