use std::collections::{BTreeMap, HashMap};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use rkyv::{rancor, Archive, Deserialize, Serialize};

use super::{ConnId, DeliveryClass, Transport, TransportEvent};

pub const MAX_DATAGRAM_SIZE: usize = 1200;

const HANDSHAKE_RESEND: Duration = Duration::from_millis(500);
const RELIABLE_RESEND: Duration = Duration::from_millis(200);

/// Wraparound-aware comparison over the u32 sequence space.
pub fn sequence_greater_than(a: u32, b: u32) -> bool {
    ((a > b) && (a - b <= u32::MAX / 2)) || ((a < b) && (b - a > u32::MAX / 2))
}

/// On-wire frame. Handshake frames carry the application identifier so a
/// listener can reject peers built against a different protocol before any
/// payload ever reaches the message layer.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
enum Frame {
    Connect { app_id: String },
    Accept,
    Deny { reason: String },
    Disconnect,
    Unreliable { data: Vec<u8> },
    Sequenced { seq: u32, data: Vec<u8> },
    Reliable { seq: u32, data: Vec<u8> },
    Ack { seq: u32 },
}

impl Frame {
    fn serialize(&self) -> io::Result<Vec<u8>> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn deserialize(data: &[u8]) -> Option<Frame> {
        rkyv::from_bytes::<Frame, rancor::Error>(data).ok()
    }
}

/// Receive side of the sequenced channel: newest wins, stale frames drop.
#[derive(Debug, Default)]
struct SequencedReceiver {
    latest: u32,
    primed: bool,
}

impl SequencedReceiver {
    fn accept(&mut self, seq: u32) -> bool {
        if !self.primed {
            self.primed = true;
            self.latest = seq;
            return true;
        }
        if sequence_greater_than(seq, self.latest) {
            self.latest = seq;
            true
        } else {
            false
        }
    }
}

/// Receive side of the reliable-ordered channel: buffers ahead-of-order
/// frames and releases contiguous runs starting at the next expected
/// sequence. Duplicates and already-delivered frames are discarded.
#[derive(Debug, Default)]
struct ReliableReceiver {
    next: u32,
    buffered: BTreeMap<u32, Vec<u8>>,
}

impl ReliableReceiver {
    fn accept(&mut self, seq: u32, data: Vec<u8>) -> Vec<Vec<u8>> {
        if seq != self.next && !sequence_greater_than(seq, self.next) {
            return Vec::new();
        }
        self.buffered.insert(seq, data);

        let mut ready = Vec::new();
        while let Some(data) = self.buffered.remove(&self.next) {
            ready.push(data);
            self.next = self.next.wrapping_add(1);
        }
        ready
    }
}

#[derive(Debug)]
struct PendingReliable {
    bytes: Vec<u8>,
    last_sent: Instant,
}

#[derive(Debug, Default)]
struct ReliableSender {
    next_seq: u32,
    pending: HashMap<u32, PendingReliable>,
}

impl ReliableSender {
    fn stage(&mut self, bytes: Vec<u8>) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(
            seq,
            PendingReliable {
                bytes,
                last_sent: Instant::now(),
            },
        );
        seq
    }

    fn ack(&mut self, seq: u32) {
        self.pending.remove(&seq);
    }

    fn due_for_resend(&mut self, now: Instant) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        for pending in self.pending.values_mut() {
            if now.duration_since(pending.last_sent) >= RELIABLE_RESEND {
                pending.last_sent = now;
                frames.push(pending.bytes.clone());
            }
        }
        frames
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectionState {
    Pending,
    Connected,
}

#[derive(Debug)]
struct Connection {
    addr: SocketAddr,
    state: ConnectionState,
    sequenced_send_seq: u32,
    sequenced_recv: SequencedReceiver,
    reliable_send: ReliableSender,
    reliable_recv: ReliableReceiver,
    last_receive: Instant,
    last_handshake: Instant,
}

impl Connection {
    fn new(addr: SocketAddr, state: ConnectionState) -> Self {
        Self {
            addr,
            state,
            sequenced_send_seq: 0,
            sequenced_recv: SequencedReceiver::default(),
            reliable_send: ReliableSender::default(),
            reliable_recv: ReliableReceiver::default(),
            last_receive: Instant::now(),
            last_handshake: Instant::now(),
        }
    }
}

/// Non-blocking UDP transport with an app-id handshake and three delivery
/// channels per connection. One instance serves either role: `connect` for
/// a client endpoint, `listen` for a server endpoint.
pub struct UdpTransport {
    app_id: String,
    timeout: Duration,
    socket: Option<UdpSocket>,
    listening: bool,
    conns: HashMap<ConnId, Connection>,
    by_addr: HashMap<SocketAddr, ConnId>,
    next_conn_id: ConnId,
    events: Vec<TransportEvent>,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
}

impl UdpTransport {
    pub fn new(app_id: &str, timeout: Duration) -> Self {
        Self {
            app_id: app_id.to_owned(),
            timeout,
            socket: None,
            listening: false,
            conns: HashMap::new(),
            by_addr: HashMap::new(),
            next_conn_id: 1,
            events: Vec::new(),
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn socket(&self) -> io::Result<&UdpSocket> {
        self.socket
            .as_ref()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "socket not bound"))
    }

    fn send_frame(&self, frame: &Frame, addr: SocketAddr) -> io::Result<()> {
        let bytes = frame.serialize()?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "frame exceeds datagram size",
            ));
        }
        self.socket()?.send_to(&bytes, addr)?;
        Ok(())
    }

    fn register(&mut self, addr: SocketAddr, state: ConnectionState) -> ConnId {
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        self.conns.insert(id, Connection::new(addr, state));
        self.by_addr.insert(addr, id);
        id
    }

    fn drop_connection(&mut self, id: ConnId) -> Option<Connection> {
        let conn = self.conns.remove(&id)?;
        self.by_addr.remove(&conn.addr);
        Some(conn)
    }

    fn handle_frame(&mut self, frame: Frame, addr: SocketAddr) -> io::Result<()> {
        let existing = self.by_addr.get(&addr).copied();

        match frame {
            Frame::Connect { app_id } => {
                if !self.listening {
                    return Ok(());
                }
                if app_id != self.app_id {
                    log::warn!("rejected {addr}: app id {app_id:?} does not match");
                    self.send_frame(
                        &Frame::Deny {
                            reason: format!("app id mismatch, expected {:?}", self.app_id),
                        },
                        addr,
                    )?;
                    return Ok(());
                }
                // Resent Connect frames re-ack without creating a new
                // connection.
                let id = match existing {
                    Some(id) => id,
                    None => {
                        let id = self.register(addr, ConnectionState::Connected);
                        log::info!("peer {addr} connected as conn {id}");
                        self.events.push(TransportEvent::PeerConnected(id));
                        id
                    }
                };
                if let Some(conn) = self.conns.get_mut(&id) {
                    conn.last_receive = Instant::now();
                }
                self.send_frame(&Frame::Accept, addr)?;
            }
            Frame::Accept => {
                if let Some(id) = existing {
                    let conn = self.conns.get_mut(&id).unwrap_or_else(|| unreachable!());
                    conn.last_receive = Instant::now();
                    if conn.state == ConnectionState::Pending {
                        conn.state = ConnectionState::Connected;
                        log::info!("connection to {addr} established");
                        self.events.push(TransportEvent::PeerConnected(id));
                    }
                }
            }
            Frame::Deny { reason } => {
                if let Some(id) = existing {
                    log::error!("connection to {addr} denied: {reason}");
                    self.drop_connection(id);
                    self.events.push(TransportEvent::PeerDisconnected(id));
                }
            }
            Frame::Disconnect => {
                if let Some(id) = existing {
                    log::info!("peer {addr} disconnected");
                    self.drop_connection(id);
                    self.events.push(TransportEvent::PeerDisconnected(id));
                }
            }
            Frame::Unreliable { data } => {
                if let Some(id) = existing {
                    let conn = self.conns.get_mut(&id).unwrap_or_else(|| unreachable!());
                    conn.last_receive = Instant::now();
                    self.events.push(TransportEvent::Data(id, data));
                }
            }
            Frame::Sequenced { seq, data } => {
                if let Some(id) = existing {
                    let conn = self.conns.get_mut(&id).unwrap_or_else(|| unreachable!());
                    conn.last_receive = Instant::now();
                    if conn.sequenced_recv.accept(seq) {
                        self.events.push(TransportEvent::Data(id, data));
                    }
                }
            }
            Frame::Reliable { seq, data } => {
                if let Some(id) = existing {
                    let ready = {
                        let conn = self.conns.get_mut(&id).unwrap_or_else(|| unreachable!());
                        conn.last_receive = Instant::now();
                        conn.reliable_recv.accept(seq, data)
                    };
                    self.send_frame(&Frame::Ack { seq }, addr)?;
                    for data in ready {
                        self.events.push(TransportEvent::Data(id, data));
                    }
                }
            }
            Frame::Ack { seq } => {
                if let Some(id) = existing {
                    let conn = self.conns.get_mut(&id).unwrap_or_else(|| unreachable!());
                    conn.last_receive = Instant::now();
                    conn.reliable_send.ack(seq);
                }
            }
        }
        Ok(())
    }

    fn pump_receive(&mut self) -> io::Result<()> {
        loop {
            let socket = match self.socket.as_ref() {
                Some(s) => s,
                None => return Ok(()),
            };
            match socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let Some(frame) = Frame::deserialize(&self.recv_buffer[..size]) else {
                        log::debug!("dropping malformed datagram from {addr}");
                        continue;
                    };
                    self.handle_frame(frame, addr)?;
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn pump_resend(&mut self) -> io::Result<()> {
        let now = Instant::now();
        let mut outgoing: Vec<(Vec<u8>, SocketAddr)> = Vec::new();

        for conn in self.conns.values_mut() {
            if conn.state == ConnectionState::Pending
                && now.duration_since(conn.last_handshake) >= HANDSHAKE_RESEND
            {
                conn.last_handshake = now;
                let frame = Frame::Connect {
                    app_id: self.app_id.clone(),
                };
                outgoing.push((frame.serialize()?, conn.addr));
            }
            for bytes in conn.reliable_send.due_for_resend(now) {
                outgoing.push((bytes, conn.addr));
            }
        }

        for (bytes, addr) in outgoing {
            self.socket()?.send_to(&bytes, addr)?;
        }
        Ok(())
    }

    fn pump_timeouts(&mut self) {
        let timed_out: Vec<ConnId> = self
            .conns
            .iter()
            .filter(|(_, c)| c.last_receive.elapsed() > self.timeout)
            .map(|(&id, _)| id)
            .collect();

        for id in timed_out {
            if let Some(conn) = self.drop_connection(id) {
                log::warn!("conn {id} ({}) timed out", conn.addr);
                self.events.push(TransportEvent::PeerDisconnected(id));
            }
        }
    }
}

impl Transport for UdpTransport {
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()> {
        let remote = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "address resolution failed"))?;

        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.set_nonblocking(true)?;
        self.socket = Some(socket);
        self.listening = false;

        self.register(remote, ConnectionState::Pending);
        self.send_frame(
            &Frame::Connect {
                app_id: self.app_id.clone(),
            },
            remote,
        )?;
        log::info!("connecting to {remote}");
        Ok(())
    }

    fn listen(&mut self, port: u16) -> io::Result<()> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        log::info!("listening on {}", socket.local_addr()?);
        self.socket = Some(socket);
        self.listening = true;
        Ok(())
    }

    fn send(&mut self, conn: ConnId, data: &[u8], class: DeliveryClass) -> io::Result<()> {
        let Some(connection) = self.conns.get_mut(&conn) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "unknown connection",
            ));
        };
        let addr = connection.addr;

        let frame = match class {
            DeliveryClass::Unreliable => Frame::Unreliable {
                data: data.to_vec(),
            },
            DeliveryClass::UnreliableSequenced => {
                let seq = connection.sequenced_send_seq;
                connection.sequenced_send_seq = seq.wrapping_add(1);
                Frame::Sequenced {
                    seq,
                    data: data.to_vec(),
                }
            }
            DeliveryClass::ReliableOrdered => {
                let frame = Frame::Reliable {
                    seq: connection.reliable_send.next_seq,
                    data: data.to_vec(),
                };
                let bytes = frame.serialize()?;
                connection.reliable_send.stage(bytes.clone());
                self.socket()?.send_to(&bytes, addr)?;
                return Ok(());
            }
        };
        self.send_frame(&frame, addr)
    }

    fn broadcast(&mut self, data: &[u8], class: DeliveryClass) -> io::Result<()> {
        for id in self.connection_ids() {
            self.send(id, data, class)?;
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        if let Err(e) = self.pump_receive() {
            log::error!("receive failed: {e}");
        }
        if let Err(e) = self.pump_resend() {
            log::error!("resend failed: {e}");
        }
        self.pump_timeouts();
        std::mem::take(&mut self.events)
    }

    fn disconnect(&mut self, conn: ConnId) {
        if let Some(connection) = self.drop_connection(conn) {
            // best effort; the remote also has a liveness timeout
            let _ = self.send_frame(&Frame::Disconnect, connection.addr);
        }
    }

    fn connection_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.conns.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn is_connected(&self) -> bool {
        self.conns
            .values()
            .any(|c| c.state == ConnectionState::Connected)
    }
}
