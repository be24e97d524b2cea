//! Message-preserving datagram transport.
//!
//! The reliability layer below the proxy is an external collaborator;
//! this module carries its contract: sessions deliver whole payloads
//! in order, report a close reason, and feed a set of process-wide
//! throughput counters. A UDP implementation backs real traffic;
//! [`Conn::pair`] builds an in-memory duplex for tests.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::net::UdpSocket;
use tokio::sync::{Mutex, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One UDP datagram is one payload; the peer never sends more.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Inbox depth per connection before the driver drops datagrams.
const INBOX_DEPTH: usize = 256;

static NEXT_SESSION_ID: AtomicU32 = AtomicU32::new(1);

fn next_session_id() -> u32 {
    NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed)
}

// ─── Counters ────────────────────────────────────────────────────────────────

/// Process-wide transport counters, SNMP style.
///
/// `bytes_*` count payloads, `out/in_*` count datagrams on the wire.
#[derive(Default)]
pub struct NetStats {
    /// Payload bytes sent.
    pub bytes_sent: AtomicU64,
    /// Payload bytes received.
    pub bytes_received: AtomicU64,
    /// Datagram bytes sent.
    pub out_bytes: AtomicU64,
    /// Datagram bytes received.
    pub in_bytes: AtomicU64,
    /// Datagrams sent.
    pub out_pkts: AtomicU64,
    /// Datagrams received.
    pub in_pkts: AtomicU64,
}

/// A point-in-time copy of [`NetStats`].
#[derive(Clone, Copy, Default)]
pub struct StatsSnapshot {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub out_bytes: u64,
    pub in_bytes: u64,
    pub out_pkts: u64,
    pub in_pkts: u64,
}

impl NetStats {
    /// Copy all counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            out_bytes: self.out_bytes.load(Ordering::Relaxed),
            in_bytes: self.in_bytes.load(Ordering::Relaxed),
            out_pkts: self.out_pkts.load(Ordering::Relaxed),
            in_pkts: self.in_pkts.load(Ordering::Relaxed),
        }
    }

    /// Zero all counters.
    pub fn reset(&self) {
        self.bytes_sent.store(0, Ordering::Relaxed);
        self.bytes_received.store(0, Ordering::Relaxed);
        self.out_bytes.store(0, Ordering::Relaxed);
        self.in_bytes.store(0, Ordering::Relaxed);
        self.out_pkts.store(0, Ordering::Relaxed);
        self.in_pkts.store(0, Ordering::Relaxed);
    }

    fn note_sent(&self, n: usize) {
        self.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
        self.out_bytes.fetch_add(n as u64, Ordering::Relaxed);
        self.out_pkts.fetch_add(1, Ordering::Relaxed);
    }

    fn note_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
        self.in_bytes.fetch_add(n as u64, Ordering::Relaxed);
        self.in_pkts.fetch_add(1, Ordering::Relaxed);
    }
}

// ─── Conn ────────────────────────────────────────────────────────────────────

enum Sink {
    Udp { socket: Arc<UdpSocket>, peer: SocketAddr },
    Mem { tx: mpsc::Sender<Vec<u8>> },
}

/// One transport session.
pub struct Conn {
    id: u32,
    remote: SocketAddr,
    inbox: Mutex<mpsc::Receiver<Vec<u8>>>,
    sink: Sink,
    stats: Arc<NetStats>,
    closed: CancellationToken,
    close_reason: AtomicU32,
}

impl Conn {
    /// Stable id for logging.
    pub fn session_id(&self) -> u32 {
        self.id
    }

    /// The peer address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    /// Await the next payload; `None` once the session is closed.
    pub async fn recv(&self) -> Option<Vec<u8>> {
        if self.closed.is_cancelled() {
            return None;
        }
        let mut inbox = self.inbox.lock().await;
        tokio::select! {
            _ = self.closed.cancelled() => None,
            payload = inbox.recv() => payload,
        }
    }

    /// Send one payload to the peer.
    pub async fn send(&self, payload: &[u8]) -> io::Result<()> {
        if self.closed.is_cancelled() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "session closed"));
        }
        match &self.sink {
            Sink::Udp { socket, peer } => {
                socket.send_to(payload, *peer).await?;
                self.stats.note_sent(payload.len());
                Ok(())
            }
            Sink::Mem { tx } => tx
                .send(payload.to_vec())
                .await
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer gone")),
        }
    }

    /// Close the session, recording a non-zero `reason` if given.
    pub fn close(&self, reason: u32) {
        if reason != 0 {
            self.close_reason.store(reason, Ordering::Relaxed);
        }
        self.closed.cancel();
    }

    /// The recorded close reason (0 when none).
    pub fn close_reason(&self) -> u32 {
        self.close_reason.load(Ordering::Relaxed)
    }

    /// Build a cross-wired in-memory pair. What one side sends, the
    /// other receives.
    pub fn pair() -> (Arc<Conn>, Arc<Conn>) {
        let addr: SocketAddr = ([127, 0, 0, 1], 0).into();
        let (a_tx, a_rx) = mpsc::channel(INBOX_DEPTH);
        let (b_tx, b_rx) = mpsc::channel(INBOX_DEPTH);
        let stats = Arc::new(NetStats::default());
        let a = Arc::new(Conn {
            id: next_session_id(),
            remote: addr,
            inbox: Mutex::new(a_rx),
            sink: Sink::Mem { tx: b_tx },
            stats: stats.clone(),
            closed: CancellationToken::new(),
            close_reason: AtomicU32::new(0),
        });
        let b = Arc::new(Conn {
            id: next_session_id(),
            remote: addr,
            inbox: Mutex::new(b_rx),
            sink: Sink::Mem { tx: a_tx },
            stats,
            closed: CancellationToken::new(),
            close_reason: AtomicU32::new(0),
        });
        (a, b)
    }
}

// ─── Dial ────────────────────────────────────────────────────────────────────

/// Open a session to a remote endpoint.
pub async fn dial(addr: &str, stats: Arc<NetStats>) -> io::Result<Arc<Conn>> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect(addr).await?;
    let remote = socket.peer_addr()?;
    let socket = Arc::new(socket);

    let (tx, rx) = mpsc::channel(INBOX_DEPTH);
    let conn = Arc::new(Conn {
        id: next_session_id(),
        remote,
        inbox: Mutex::new(rx),
        sink: Sink::Udp { socket: socket.clone(), peer: remote },
        stats: stats.clone(),
        closed: CancellationToken::new(),
        close_reason: AtomicU32::new(0),
    });

    let closed = conn.closed.clone();
    tokio::spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = closed.cancelled() => break,
                received = socket.recv(&mut buf) => {
                    let Ok(n) = received else { break };
                    stats.note_received(n);
                    if tx.send(buf[..n].to_vec()).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    Ok(conn)
}

// ─── Listener ────────────────────────────────────────────────────────────────

struct ListenerShared {
    socket: Arc<UdpSocket>,
    peers: StdMutex<HashMap<SocketAddr, mpsc::Sender<Vec<u8>>>>,
    stats: Arc<NetStats>,
    closed: CancellationToken,
}

/// Accepts transport sessions on a UDP endpoint.
///
/// A session begins with the first datagram from a new peer address.
pub struct Listener {
    local: SocketAddr,
    accepted: Mutex<mpsc::Receiver<Arc<Conn>>>,
    shared: Arc<ListenerShared>,
}

impl Listener {
    /// Bind the endpoint and start the receive driver.
    pub async fn bind(addr: &str, stats: Arc<NetStats>) -> io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local = socket.local_addr()?;
        let shared = Arc::new(ListenerShared {
            socket,
            peers: StdMutex::new(HashMap::new()),
            stats,
            closed: CancellationToken::new(),
        });

        let (accept_tx, accept_rx) = mpsc::channel(64);
        let driver = shared.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (n, from) = tokio::select! {
                    _ = driver.closed.cancelled() => break,
                    received = driver.socket.recv_from(&mut buf) => match received {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("[transport] recv_from failed: {e}");
                            break;
                        }
                    },
                };
                driver.stats.note_received(n);
                let payload = buf[..n].to_vec();

                let known = driver.peers.lock().unwrap_or_else(|e| e.into_inner()).get(&from).cloned();
                let tx = match known {
                    Some(tx) => tx,
                    None => {
                        let (tx, rx) = mpsc::channel(INBOX_DEPTH);
                        let conn = Arc::new(Conn {
                            id: next_session_id(),
                            remote: from,
                            inbox: Mutex::new(rx),
                            sink: Sink::Udp { socket: driver.socket.clone(), peer: from },
                            stats: driver.stats.clone(),
                            closed: CancellationToken::new(),
                            close_reason: AtomicU32::new(0),
                        });
                        driver.peers.lock().unwrap_or_else(|e| e.into_inner()).insert(from, tx.clone());
                        if accept_tx.send(conn).await.is_err() {
                            break;
                        }
                        tx
                    }
                };
                if tx.try_send(payload).is_err() {
                    debug!("[transport] inbox full, dropping datagram from {from}");
                }
            }
        });

        Ok(Self { local, accepted: Mutex::new(accept_rx), shared })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Await the next new session; `None` once the listener is closed.
    pub async fn accept(&self) -> Option<Arc<Conn>> {
        let mut accepted = self.accepted.lock().await;
        tokio::select! {
            _ = self.shared.closed.cancelled() => None,
            conn = accepted.recv() => conn,
        }
    }

    /// Drop a session, recording why.
    pub fn disconnect(&self, conn: &Conn, reason: u32) {
        self.shared.peers.lock().unwrap_or_else(|e| e.into_inner()).remove(&conn.remote);
        conn.close(reason);
        debug!("[transport] session {} disconnected, reason: {reason}", conn.id);
    }

    /// Stop accepting and release the endpoint.
    pub fn close(&self) {
        self.shared.closed.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mem_pair_is_cross_wired() {
        let (a, b) = Conn::pair();
        a.send(b"ping").await.unwrap();
        assert_eq!(b.recv().await.unwrap(), b"ping");
        b.send(b"pong").await.unwrap();
        assert_eq!(a.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn recv_ends_after_close() {
        let (a, b) = Conn::pair();
        a.close(7);
        assert_eq!(a.recv().await, None);
        assert_eq!(a.close_reason(), 7);
        assert!(a.send(b"late").await.is_err());
        drop(a);
        assert_eq!(b.recv().await, None);
    }

    #[tokio::test]
    async fn udp_listener_accepts_and_echoes() {
        let stats = Arc::new(NetStats::default());
        let listener = Listener::bind("127.0.0.1:0", stats.clone()).await.unwrap();
        let addr = listener.local_addr().to_string();

        let client = dial(&addr, stats.clone()).await.unwrap();
        client.send(b"hello").await.unwrap();

        let conn = listener.accept().await.unwrap();
        assert_eq!(conn.recv().await.unwrap(), b"hello");

        conn.send(b"world").await.unwrap();
        assert_eq!(client.recv().await.unwrap(), b"world");

        assert_eq!(stats.snapshot().in_pkts, 2);
        stats.reset();
        assert_eq!(stats.snapshot().in_pkts, 0);
    }
}
