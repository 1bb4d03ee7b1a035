//! Peer mirrors and their cached probe connections.
//!
//! Each configured mirror gets one long-lived outbound HTTP/1.1 connection,
//! established lazily on the first probe and reused for every probe after
//! that. Probes are dispatched over an in-process queue as `(request,
//! reply-channel)` pairs and written to the socket pipelined; responses are
//! matched back to their probes strictly in FIFO order.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::rc::Rc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{lookup_host, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tokio::time::{self, Instant};

use crate::config::{PeerConfig, Upstream};
use crate::proto::io::BoundedBuf;
use crate::proto::parse;
use crate::stats::Counter;

/// What a probe learned about one file on one mirror.
pub(crate) type ProbeReply = parse::Response;

/// Connection state of a peer.
///
/// `New` peers have no socket and connect lazily on the next probe.
/// `Failed` peers are skipped entirely until `/rpc/ping` resets them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerState {
    New,
    Connecting,
    Active,
    Failed,
}

/// The two classes of repository files a peer may publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FileKind {
    /// Mutable index files; freshness matters.
    Database,
    /// Immutable content files; presence suffices.
    Package,
}

struct Probe {
    path: String,
    reply: oneshot::Sender<ProbeReply>,
}

struct InFlight {
    reply: oneshot::Sender<ProbeReply>,
    deadline: Instant,
}

/// A configured mirror (or the upstream fallback, which behaves like one).
#[derive(Debug)]
pub(crate) struct Peer {
    pub(crate) host: String,
    pub(crate) port: u16,
    db_prefix: Option<String>,
    pkg_prefix: Option<String>,
    is_upstream: bool,
    probe_timeout: Duration,
    state: Cell<PeerState>,
    // first resolved address; used to skip probing the host a request came from
    addr: Cell<Option<IpAddr>>,
    dispatch: RefCell<Option<mpsc::UnboundedSender<Probe>>>,
    /// Bytes this peer saved others from downloading externally.
    pub(crate) shared: Counter,
    /// Bytes this peer obtained from its siblings.
    pub(crate) received: Counter,
}

impl Peer {
    pub(crate) fn new(config: &PeerConfig, probe_timeout: Duration) -> Rc<Peer> {
        Rc::new(Peer {
            host: config.host.clone(),
            port: config.port,
            db_prefix: config.db_prefix.clone(),
            pkg_prefix: config.pkg_prefix.clone(),
            is_upstream: false,
            probe_timeout,
            state: Cell::new(PeerState::New),
            addr: Cell::new(None),
            dispatch: RefCell::new(None),
            shared: Counter::default(),
            received: Counter::default(),
        })
    }

    pub(crate) fn upstream(config: &Upstream, probe_timeout: Duration) -> Rc<Peer> {
        Rc::new(Peer {
            host: config.host.clone(),
            port: config.port,
            db_prefix: Some(config.prefix.clone()),
            pkg_prefix: Some(config.prefix.clone()),
            is_upstream: true,
            probe_timeout,
            state: Cell::new(PeerState::New),
            addr: Cell::new(None),
            dispatch: RefCell::new(None),
            shared: Counter::default(),
            received: Counter::default(),
        })
    }

    pub(crate) fn state(&self) -> PeerState {
        self.state.get()
    }

    pub(crate) fn addr(&self) -> Option<IpAddr> {
        self.addr.get()
    }

    pub(crate) fn is_upstream(&self) -> bool {
        self.is_upstream
    }

    pub(crate) fn prefix(&self, kind: FileKind) -> Option<&str> {
        match kind {
            FileKind::Database => self.db_prefix.as_deref(),
            FileKind::Package => self.pkg_prefix.as_deref(),
        }
    }

    /// `Failed → New`: lets the next probe attempt a reconnect.
    pub(crate) fn retry_failed(&self) {
        if self.state.get() == PeerState::Failed {
            self.state.set(PeerState::New);
        }
    }

    /// The request path a probe for `filename` should use, or `None` when
    /// the peer publishes no files of this kind.
    pub(crate) fn probe_path(&self, kind: FileKind, filename: &str) -> Option<String> {
        let prefix = self.prefix(kind)?;
        Some(format!("/{}/{}", prefix, self.visible_name(filename)))
    }

    /// The absolute URL a client gets redirected to for `filename`.
    pub(crate) fn redirect_url(&self, kind: FileKind, filename: &str) -> String {
        let scheme = if self.port == 443 { "https" } else { "http" };
        let prefix = self.prefix(kind).unwrap_or("");
        format!(
            "{}://{}:{}/{}/{}",
            scheme,
            self.host,
            self.port,
            prefix,
            self.visible_name(filename)
        )
    }

    // Peers publish a flat namespace keyed by basename; upstream mirrors the
    // full repository layout.
    fn visible_name<'a>(&self, filename: &'a str) -> &'a str {
        if self.is_upstream {
            filename
        } else {
            flatname(filename)
        }
    }

    /// Enqueues a `HEAD` probe for `path` and returns the reply channel, or
    /// `None` when the peer is marked failed.
    ///
    /// The first probe against an idle peer spawns its connection task;
    /// probes issued while the connection is still being established are
    /// buffered in the queue and flushed once the socket is up. Dropping the
    /// returned receiver cancels interest: the reply, when it arrives, is
    /// discarded silently.
    pub(crate) fn probe(self: Rc<Self>, path: String) -> Option<oneshot::Receiver<ProbeReply>> {
        if self.state.get() == PeerState::Failed {
            return None;
        }
        let (tx, rx) = oneshot::channel();
        let mut probe = Probe { path, reply: tx };

        let mut dispatch = self.dispatch.borrow_mut();
        if let Some(sender) = dispatch.as_ref() {
            match sender.send(probe) {
                Ok(()) => return Some(rx),
                // the previous connection task is gone; start over
                Err(mpsc::error::SendError(returned)) => probe = returned,
            }
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        let _ = sender.send(probe);
        *dispatch = Some(sender);
        self.state.set(PeerState::Connecting);
        drop(dispatch);
        task::spawn_local(connection(self, receiver));
        Some(rx)
    }
}

/// Returns the last path segment.
pub(crate) fn flatname(filename: &str) -> &str {
    match filename.rfind('/') {
        Some(at) => &filename[at + 1..],
        None => filename,
    }
}

async fn connection(peer: Rc<Peer>, mut probes: mpsc::UnboundedReceiver<Probe>) {
    debug!(peer = %peer.host, "connecting");
    let sock = match establish(&peer).await {
        Ok(sock) => sock,
        Err(err) => {
            warn!(peer = %peer.host, error = %err, "cannot connect");
            peer.state.set(PeerState::Failed);
            peer.dispatch.borrow_mut().take();
            // dropping the queue cancels every probe buffered in it
            return;
        }
    };

    peer.state.set(PeerState::Active);
    debug!(peer = %peer.host, "connection established");

    if let Err(err) = service(&peer, sock, &mut probes).await {
        debug!(peer = %peer.host, error = %err, "recycling connection");
    }

    // Back to New, not Failed: the next probe reconnects lazily. Queued and
    // in-flight probes are dropped here, which the resolver observes as
    // cancellation and answers with the upstream fallback.
    peer.state.set(PeerState::New);
    peer.dispatch.borrow_mut().take();
}

async fn establish(peer: &Peer) -> io::Result<TcpStream> {
    let addrs = lookup_host((peer.host.as_str(), peer.port)).await?;
    let mut last_err = None;
    for addr in addrs {
        // record the address even if connect fails below
        peer.addr.set(Some(addr.ip()));
        match time::timeout(peer.probe_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(sock)) => return Ok(sock),
            Ok(Err(err)) => last_err = Some(err),
            Err(_) => {
                last_err = Some(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"))
            }
        }
    }
    Err(last_err
        .unwrap_or_else(|| io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")))
}

async fn service(
    peer: &Peer,
    sock: TcpStream,
    probes: &mut mpsc::UnboundedReceiver<Probe>,
) -> io::Result<()> {
    let (mut rd, mut wr) = sock.into_split();
    let mut in_flight: VecDeque<InFlight> = VecDeque::new();
    let mut buf = BoundedBuf::new();

    loop {
        // probes pipeline, so the head of the queue always has the earliest
        // deadline
        let deadline = in_flight.front().map(|pending| pending.deadline);

        tokio::select! {
            probe = probes.recv() => {
                let Probe { path, reply } = match probe {
                    Some(probe) => probe,
                    None => return Ok(()),
                };
                trace!(peer = %peer.host, path = %path, "sending probe");
                let head = format!(
                    "HEAD {} HTTP/1.1\r\nHost: {}:{}\r\n\r\n",
                    path, peer.host, peer.port
                );
                wr.write_all(head.as_bytes()).await?;
                in_flight.push_back(InFlight {
                    reply,
                    deadline: Instant::now() + peer.probe_timeout,
                });
            }
            read = buf.read_from(&mut rd) => {
                if read? == 0 {
                    return Err(io::ErrorKind::UnexpectedEof.into());
                }
                drain_responses(peer, &mut buf, &mut in_flight)?;
            }
            _ = expire(deadline) => {
                return Err(io::Error::new(io::ErrorKind::TimedOut, "probe went unanswered"));
            }
        }
    }
}

// One socket read may complete any number of pipelined responses.
fn drain_responses(
    peer: &Peer,
    buf: &mut BoundedBuf,
    in_flight: &mut VecDeque<InFlight>,
) -> io::Result<()> {
    loop {
        match parse::response(buf.bytes()) {
            Ok(Some((reply, len))) => {
                buf.consume(len);
                let pending = match in_flight.pop_front() {
                    Some(pending) => pending,
                    None => {
                        return Err(io::Error::new(
                            io::ErrorKind::InvalidData,
                            "response without an outstanding probe",
                        ))
                    }
                };
                debug!(peer = %peer.host, status = reply.status, "probe reply");
                // The requesting side may be gone already; drop the reply
                // silently in that case.
                let _ = pending.reply.send(reply);
            }
            Ok(None) => {
                if buf.is_full() {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "response headers exceed the buffer",
                    ));
                }
                return Ok(());
            }
            Err(err) => return Err(io::Error::new(io::ErrorKind::InvalidData, err)),
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
