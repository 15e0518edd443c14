//! Reliable, auto-reconnecting OpenFlow connection to the local switch.
//!
//! `Rconn` owns a non-blocking stream to the switch's management socket,
//! frames inbound bytes into OpenFlow messages, and transparently redials
//! with exponential backoff when the connection drops. Callers observe
//! reconnections through the connection sequence number, which increments
//! each time a fresh connection completes the hello handshake.
//!
//! The transport completes the handshake itself; everything else,
//! including echo requests from the switch, is surfaced through
//! [`Rconn::recv`]. Application messages are never retransmitted: a lost
//! connection loses whatever was queued, and the control state machine is
//! expected to rebuild switch state from scratch.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use vnet_ofproto::{next_xid, EchoRequest, Hello, OfpPacket, OFP13_VERSION, OFP_HEADER_LEN};

use crate::error::{FlowsyncError, Result};

/// Initial reconnect backoff; doubles up to the configured maximum.
const MIN_BACKOFF: Duration = Duration::from_secs(1);

/// Counter of messages queued but not yet written to the socket.
///
/// The reconciler declines to run while its counter is non-zero, bounding
/// how far the agent can run ahead of a slow switch.
#[derive(Clone, Debug, Default)]
pub struct PacketCounter(Arc<AtomicUsize>);

impl PacketCounter {
    /// Creates a counter at zero.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outstanding messages.
    pub fn count(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

enum Stream {
    Unix(UnixStream),
    Tcp(TcpStream),
}

impl Stream {
    /// Dials `target`, which must be `unix:<path>` or `tcp:<addr>`.
    fn dial(target: &str) -> io::Result<Self> {
        if let Some(path) = target.strip_prefix("unix:") {
            let stream = UnixStream::connect(path)?;
            stream.set_nonblocking(true)?;
            Ok(Self::Unix(stream))
        } else if let Some(addr) = target.strip_prefix("tcp:") {
            let stream = TcpStream::connect(addr)?;
            stream.set_nonblocking(true)?;
            stream.set_nodelay(true)?;
            Ok(Self::Tcp(stream))
        } else {
            Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                FlowsyncError::BadTarget(target.to_string()).to_string(),
            ))
        }
    }
}

impl Read for Stream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.read(buf),
            Self::Tcp(s) => s.read(buf),
        }
    }
}

impl Write for Stream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Self::Unix(s) => s.write(buf),
            Self::Tcp(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Self::Unix(s) => s.flush(),
            Self::Tcp(s) => s.flush(),
        }
    }
}

struct OutMsg {
    buf: Vec<u8>,
    offset: usize,
    counter: Option<PacketCounter>,
}

struct Connection {
    stream: Stream,
    inbuf: Vec<u8>,
    out: VecDeque<OutMsg>,
    hello_received: bool,
    version: u8,
    last_rx: Instant,
    probe_sent: bool,
}

impl Connection {
    fn new(stream: Stream) -> Self {
        Self {
            stream,
            inbuf: Vec::new(),
            out: VecDeque::new(),
            hello_received: false,
            version: OFP13_VERSION,
            last_rx: Instant::now(),
            probe_sent: false,
        }
    }

    fn queue(&mut self, buf: Vec<u8>, counter: Option<PacketCounter>) {
        self.out.push_back(OutMsg {
            buf,
            offset: 0,
            counter,
        });
    }

    /// Writes queued messages until the socket stops accepting bytes.
    fn flush(&mut self) -> io::Result<()> {
        while let Some(front) = self.out.front_mut() {
            match self.stream.write(&front.buf[front.offset..]) {
                Ok(n) => {
                    front.offset += n;
                    if front.offset == front.buf.len() {
                        if let Some(counter) = self.out.pop_front().and_then(|m| m.counter) {
                            counter.dec();
                        }
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Reads available bytes into the frame buffer.
    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "connection closed by switch",
                    ))
                }
                Ok(n) => {
                    self.inbuf.extend_from_slice(&chunk[..n]);
                    self.last_rx = Instant::now();
                    self.probe_sent = false;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Pops one complete frame off the buffer, if present.
    fn pop_frame(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.inbuf.len() < OFP_HEADER_LEN {
            return Ok(None);
        }
        let length = u16::from_be_bytes([self.inbuf[2], self.inbuf[3]]) as usize;
        if length < OFP_HEADER_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame with impossible length {}", length),
            ));
        }
        if self.inbuf.len() < length {
            return Ok(None);
        }
        Ok(Some(self.inbuf.drain(..length).collect()))
    }
}

/// Auto-reconnecting framed channel to the switch.
pub struct Rconn {
    target: Option<String>,
    conn: Option<Connection>,
    seqno: u32,
    backoff: Duration,
    max_backoff: Duration,
    probe_interval: Duration,
    next_attempt: Instant,
}

impl Rconn {
    /// Creates a disconnected transport.
    pub fn new(probe_interval: Duration, max_backoff: Duration) -> Self {
        Self {
            target: None,
            conn: None,
            seqno: 0,
            backoff: MIN_BACKOFF.min(max_backoff),
            max_backoff,
            probe_interval,
            next_attempt: Instant::now(),
        }
    }

    /// Starts (re)connecting to `target`. A no-op if already aimed there.
    pub fn connect(&mut self, target: &str) {
        if self.target.as_deref() == Some(target) {
            return;
        }
        self.teardown("target changed");
        self.target = Some(target.to_string());
        self.backoff = MIN_BACKOFF.min(self.max_backoff);
        self.next_attempt = Instant::now();
    }

    /// Drops the connection and stops reconnecting.
    pub fn disconnect(&mut self) {
        self.teardown("disconnect requested");
        self.target = None;
    }

    /// The target this transport is aimed at.
    pub fn current_target(&self) -> Option<&str> {
        self.target.as_deref()
    }

    /// True once the hello handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.hello_received)
    }

    /// Generation counter; bumps on every completed handshake.
    pub fn connection_seqno(&self) -> u32 {
        self.seqno
    }

    /// The negotiated protocol version.
    pub fn protocol_version(&self) -> u8 {
        self.conn
            .as_ref()
            .filter(|c| c.hello_received)
            .map_or(OFP13_VERSION, |c| c.version)
    }

    /// Queues `buf` for transmission, charging it to `counter`.
    ///
    /// The counter is released when the message is fully written to the
    /// socket, or when the connection is torn down with the message still
    /// queued.
    pub fn send(&mut self, buf: Vec<u8>, counter: &PacketCounter) -> Result<()> {
        if !self.is_connected() {
            return Err(FlowsyncError::NotConnected);
        }
        counter.inc();
        if let Some(conn) = self.conn.as_mut() {
            conn.queue(buf, Some(counter.clone()));
        }
        Ok(())
    }

    /// Returns the next complete inbound frame, if any.
    ///
    /// Non-blocking: socket reads happen in [`Rconn::run_once`].
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        let conn = self.conn.as_mut().filter(|c| c.hello_received)?;
        match conn.pop_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "bad framing from switch");
                self.teardown("framing error");
                None
            }
        }
    }

    /// Services the connection: dials, flushes, reads, and probes.
    pub fn run_once(&mut self) {
        if self.conn.is_none() {
            let Some(target) = self.target.clone() else {
                return;
            };
            if Instant::now() < self.next_attempt {
                return;
            }
            match Stream::dial(&target) {
                Ok(stream) => {
                    debug!(%target, "transport connected, sending hello");
                    let mut conn = Connection::new(stream);
                    conn.queue(Hello.marshal(next_xid()), None);
                    self.conn = Some(conn);
                }
                Err(e) => {
                    debug!(%target, error = %e, "connection attempt failed");
                    self.schedule_retry();
                    return;
                }
            }
        }

        if let Err(e) = self.service() {
            debug!(error = %e, "switch connection failed");
            self.teardown("connection error");
        }
    }

    /// How long until this transport next needs servicing.
    pub fn timeout_hint(&self) -> Option<Duration> {
        let now = Instant::now();
        match &self.conn {
            None => self
                .target
                .as_ref()
                .map(|_| self.next_attempt.saturating_duration_since(now)),
            Some(conn) if conn.hello_received => {
                let deadline = conn.last_rx + self.probe_interval;
                Some(deadline.saturating_duration_since(now))
            }
            Some(_) => Some(Duration::ZERO),
        }
    }

    fn service(&mut self) -> io::Result<()> {
        let Some(conn) = self.conn.as_mut() else {
            return Ok(());
        };

        conn.flush()?;
        conn.fill()?;

        if !conn.hello_received {
            if let Some(frame) = conn.pop_frame()? {
                if frame[1] != 0 {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("expected hello, got message type {}", frame[1]),
                    ));
                }
                let version = frame[0].min(OFP13_VERSION);
                if version != OFP13_VERSION {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("switch only speaks OpenFlow version {:#04x}", frame[0]),
                    ));
                }
                conn.hello_received = true;
                conn.version = version;
                self.seqno = self.seqno.wrapping_add(1);
                self.backoff = MIN_BACKOFF.min(self.max_backoff);
                info!(seqno = self.seqno, "switch connection established");
            }
            return Ok(());
        }

        // Inactivity probing: one echo after the idle interval, then give
        // up if the switch stays silent for another interval.
        let idle = conn.last_rx.elapsed();
        if conn.probe_sent && idle > self.probe_interval * 2 {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "switch unresponsive to echo probe",
            ));
        }
        if !conn.probe_sent && idle > self.probe_interval {
            debug!("sending inactivity probe");
            conn.queue(EchoRequest(Vec::new()).marshal(next_xid()), None);
            conn.probe_sent = true;
            conn.flush()?;
        }
        Ok(())
    }

    fn teardown(&mut self, reason: &str) {
        if let Some(conn) = self.conn.take() {
            info!(reason, "switch connection dropped");
            for msg in conn.out {
                if let Some(counter) = msg.counter {
                    counter.dec();
                }
            }
        }
        if self.target.is_some() {
            self.schedule_retry();
        }
    }

    fn schedule_retry(&mut self) {
        self.next_attempt = Instant::now() + self.backoff;
        self.backoff = (self.backoff * 2).min(self.max_backoff);
    }
}
