mod memory;
mod udp;

use std::io;

pub use memory::{MemoryNetwork, MemoryTransport};
pub use udp::UdpTransport;

/// Local identifier for one remote endpoint. Ids are allocated by the
/// transport and are only meaningful on the side that issued them.
pub type ConnId = u64;

/// Delivery guarantee requested for one outgoing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryClass {
    /// Delivered exactly once, in send order.
    ReliableOrdered,
    /// Best effort, but stale payloads arriving after a newer one are
    /// dropped rather than delivered.
    UnreliableSequenced,
    /// Fire and forget.
    Unreliable,
}

/// What a transport surfaces when polled.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    PeerConnected(ConnId),
    PeerDisconnected(ConnId),
    Data(ConnId, Vec<u8>),
}

/// Boundary between the replication layer and the network. Implementations
/// are single threaded and pumped by the owner; `poll_events` drains
/// everything that happened since the last pump.
pub trait Transport {
    /// Begin connecting to a remote listener. Completion is reported later
    /// as a `PeerConnected` event.
    fn connect(&mut self, host: &str, port: u16) -> io::Result<()>;

    /// Begin accepting remote connections on the given port.
    fn listen(&mut self, port: u16) -> io::Result<()>;

    fn send(&mut self, conn: ConnId, data: &[u8], class: DeliveryClass) -> io::Result<()>;

    fn broadcast(&mut self, data: &[u8], class: DeliveryClass) -> io::Result<()>;

    /// Pump the wire: flush retransmissions, detect timeouts, and return
    /// the events accumulated since the previous call.
    fn poll_events(&mut self) -> Vec<TransportEvent>;

    fn disconnect(&mut self, conn: ConnId);

    fn connection_ids(&self) -> Vec<ConnId>;

    fn is_connected(&self) -> bool;
}
