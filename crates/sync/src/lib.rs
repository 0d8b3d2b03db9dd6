pub mod body;
pub mod config;
pub mod interpolate;
pub mod peer;
pub mod queue;
pub mod time;
pub mod transport;
pub mod wire;

pub use body::{
    EntityHandle, InterpolationMode, KinematicSnapshot, SnapshotCache, StateFrame, SyncFields,
    SyncedBody, random_body_id, random_peer_id,
};
pub use config::{DEFAULT_PORT, SyncConfig};
pub use peer::{Peer, PeerDirectory};
pub use queue::RingQueue;
pub use transport::{
    ConnId, DeliveryClass, MemoryNetwork, MemoryTransport, Transport, TransportEvent, UdpTransport,
};
pub use wire::{
    BodyHeader, BodyKinematicUpdate, BodyLifetimeUpdate, DecodeError, EncodeError, Heartbeat,
    Message, MessageHandler, MessageKind, MessageRegistry, MessageRouter, Presence, RegistryError,
    RouteKey, UpdateHeader,
};
