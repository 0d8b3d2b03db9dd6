use glam::Vec2;
use rkyv::{Archive, Deserialize, Serialize};

use crate::body::KinematicSnapshot;
use crate::transport::DeliveryClass;

/// The closed set of message kinds this protocol speaks. Wire ids are
/// assigned from `PROTOCOL_ORDER`; that order is part of the protocol
/// version and must match on every communicating process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Presence,
    Heartbeat,
    BodyKinematicUpdate,
    BodyLifetimeUpdate,
}

impl MessageKind {
    pub const PROTOCOL_ORDER: [MessageKind; 4] = [
        MessageKind::Presence,
        MessageKind::Heartbeat,
        MessageKind::BodyKinematicUpdate,
        MessageKind::BodyLifetimeUpdate,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Presence => "Presence",
            MessageKind::Heartbeat => "Heartbeat",
            MessageKind::BodyKinematicUpdate => "BodyKinematicUpdate",
            MessageKind::BodyLifetimeUpdate => "BodyLifetimeUpdate",
        }
    }
}

/// Envelope fields shared by every message, embedded by value.
#[derive(Debug, Clone, Copy, PartialEq, Default, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct UpdateHeader {
    /// Sender-clock timestamp in milliseconds.
    pub sender_time: i64,
    pub source_peer_id: u32,
}

/// Fields shared by both body update kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct BodyHeader {
    pub body_id: u32,
    pub tag: u32,
}

/// Peer join/leave announcement. ReliableOrdered.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Presence {
    pub header: UpdateHeader,
    pub peer_id: u32,
    pub here: bool,
    pub nickname: String,
}

/// Server liveness beacon. Unreliable; losses are fine.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Heartbeat {
    pub header: UpdateHeader,
    pub alive: bool,
}

/// One kinematic sample for a body. UnreliableSequenced: stale duplicates
/// are superseded, gaps are acceptable.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct BodyKinematicUpdate {
    pub header: UpdateHeader,
    pub body: BodyHeader,
    pub position: [f32; 2],
    pub velocity: [f32; 2],
    pub angle: f32,
    pub angular_velocity: f32,
}

impl BodyKinematicUpdate {
    pub fn from_snapshot(
        header: UpdateHeader,
        tag: u32,
        snapshot: &KinematicSnapshot,
    ) -> Self {
        Self {
            header,
            body: BodyHeader {
                body_id: snapshot.body_id,
                tag,
            },
            position: snapshot.position.into(),
            velocity: snapshot.velocity.into(),
            angle: snapshot.angle,
            angular_velocity: snapshot.angular_velocity,
        }
    }

    pub fn to_snapshot(&self) -> KinematicSnapshot {
        KinematicSnapshot {
            body_id: self.body.body_id,
            source_time: self.header.sender_time,
            position: Vec2::from(self.position),
            velocity: Vec2::from(self.velocity),
            angle: self.angle,
            angular_velocity: self.angular_velocity,
        }
    }
}

/// Body spawn/despawn announcement. ReliableOrdered so spawn/despawn
/// sequencing is reconstructed correctly on every peer.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct BodyLifetimeUpdate {
    pub header: UpdateHeader,
    pub body: BodyHeader,
    pub exists: bool,
}

/// Decoded wire message.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Presence(Presence),
    Heartbeat(Heartbeat),
    BodyKinematic(BodyKinematicUpdate),
    BodyLifetime(BodyLifetimeUpdate),
}

impl Message {
    pub fn kind(&self) -> MessageKind {
        match self {
            Message::Presence(_) => MessageKind::Presence,
            Message::Heartbeat(_) => MessageKind::Heartbeat,
            Message::BodyKinematic(_) => MessageKind::BodyKinematicUpdate,
            Message::BodyLifetime(_) => MessageKind::BodyLifetimeUpdate,
        }
    }

    pub fn header(&self) -> &UpdateHeader {
        match self {
            Message::Presence(m) => &m.header,
            Message::Heartbeat(m) => &m.header,
            Message::BodyKinematic(m) => &m.header,
            Message::BodyLifetime(m) => &m.header,
        }
    }

    pub fn header_mut(&mut self) -> &mut UpdateHeader {
        match self {
            Message::Presence(m) => &mut m.header,
            Message::Heartbeat(m) => &mut m.header,
            Message::BodyKinematic(m) => &mut m.header,
            Message::BodyLifetime(m) => &mut m.header,
        }
    }

    pub fn delivery_class(&self) -> DeliveryClass {
        match self {
            Message::Presence(_) | Message::BodyLifetime(_) => DeliveryClass::ReliableOrdered,
            Message::BodyKinematic(_) => DeliveryClass::UnreliableSequenced,
            Message::Heartbeat(_) => DeliveryClass::Unreliable,
        }
    }

    /// Concrete routing key for this message.
    pub fn route_key(&self) -> RouteKey {
        match self {
            Message::Presence(_) => RouteKey::Presence,
            Message::Heartbeat(_) => RouteKey::Heartbeat,
            Message::BodyKinematic(_) => RouteKey::BodyKinematic,
            Message::BodyLifetime(_) => RouteKey::BodyLifetime,
        }
    }

    /// Shared supertype key, if any; lets one handler cover a family of
    /// related message kinds.
    pub fn group_key(&self) -> Option<RouteKey> {
        match self {
            Message::BodyKinematic(_) | Message::BodyLifetime(_) => Some(RouteKey::BodyUpdate),
            _ => None,
        }
    }
}

/// Handler registration key: a concrete message kind, or a shared supertype
/// covering several related kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteKey {
    Presence,
    Heartbeat,
    BodyKinematic,
    BodyLifetime,
    /// Covers both body update kinds.
    BodyUpdate,
}
