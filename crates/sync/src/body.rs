use glam::Vec2;

use crate::queue::RingQueue;
use crate::time::rand_u64;

/// Minimum frames required before interpolation can run.
pub const MIN_CACHE_DEPTH: usize = 2;

/// Opaque handle to a host-simulation entity backing a synced body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub u64);

/// Reconstruction method applied between two buffered keyframes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InterpolationMode {
    /// Apply snapshots directly as they arrive.
    #[default]
    None,
    Linear,
    Hermite,
}

bitflags::bitflags! {
    /// Which kinematic fields a body replicates.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SyncFields: u8 {
        const POS = 1 << 0;
        const VEL = 1 << 1;
        const ANGLE = 1 << 2;
        const ANGULAR_VEL = 1 << 3;
    }
}

impl Default for SyncFields {
    fn default() -> Self {
        SyncFields::all()
    }
}

/// One sender-authored sample of a body's kinematic state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KinematicSnapshot {
    pub body_id: u32,
    /// Sender-clock timestamp in milliseconds.
    pub source_time: i64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
    pub angular_velocity: f32,
}

/// A snapshot plus the local receipt timestamp, used as an interpolation
/// endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateFrame {
    pub snapshot: KinematicSnapshot,
    pub received_at: i64,
}

/// Fixed-depth ring of received keyframes for one remote body. The bounded
/// depth is what limits how much out-of-order tolerance exists for
/// unreliable-sequenced kinematic updates.
#[derive(Debug)]
pub struct SnapshotCache {
    frames: RingQueue<StateFrame>,
}

impl SnapshotCache {
    pub fn new(depth: usize) -> Self {
        Self {
            frames: RingQueue::new(depth.max(MIN_CACHE_DEPTH)),
        }
    }

    pub fn push(&self, frame: StateFrame) {
        self.frames.enqueue(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.frames.capacity()
    }

    /// The two newest buffered frames, older first. None until the cache
    /// holds a full interpolation window.
    pub fn newest_pair(&self) -> Option<(StateFrame, StateFrame)> {
        let len = self.frames.len();
        if len < MIN_CACHE_DEPTH {
            return None;
        }
        let f0 = self.frames.peek_at(len - 2)?;
        let f1 = self.frames.peek_at(len - 1)?;
        Some((f0, f1))
    }
}

/// A replicated kinematic body. Exactly one peer (the owner) authors
/// snapshots for it; every other peer only reads and applies.
#[derive(Debug, Clone)]
pub struct SyncedBody {
    pub body_id: u32,
    pub owner_id: u32,
    /// App-defined classification, passed to the host when spawning remote
    /// placeholders.
    pub tag: u32,
    pub interpolation: InterpolationMode,
    pub fields: SyncFields,
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
    pub angular_velocity: f32,
    /// Next time (ms) this body is due for a snapshot broadcast. Owner-side
    /// only.
    pub next_snapshot_at: i64,
    pub entity: EntityHandle,
}

impl SyncedBody {
    pub fn new(
        owner_id: u32,
        tag: u32,
        entity: EntityHandle,
        interpolation: InterpolationMode,
        fields: SyncFields,
    ) -> Self {
        Self {
            body_id: random_body_id(),
            owner_id,
            tag,
            interpolation,
            fields,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            angle: 0.0,
            angular_velocity: 0.0,
            next_snapshot_at: 0,
            entity,
        }
    }

    pub fn snapshot(&self, source_time: i64) -> KinematicSnapshot {
        KinematicSnapshot {
            body_id: self.body_id,
            source_time,
            position: self.position,
            velocity: self.velocity,
            angle: self.angle,
            angular_velocity: self.angular_velocity,
        }
    }

    /// Apply a snapshot directly, honoring the body's field mask.
    pub fn apply(&mut self, snapshot: &KinematicSnapshot) {
        if self.fields.contains(SyncFields::POS) {
            self.position = snapshot.position;
        }
        if self.fields.contains(SyncFields::VEL) {
            self.velocity = snapshot.velocity;
        }
        if self.fields.contains(SyncFields::ANGLE) {
            self.angle = snapshot.angle;
        }
        if self.fields.contains(SyncFields::ANGULAR_VEL) {
            self.angular_velocity = snapshot.angular_velocity;
        }
    }
}

/// Locally generated random body id. Collisions across a session are treated
/// as a latent, extremely unlikely condition rather than guarded against.
pub fn random_body_id() -> u32 {
    rand_u64() as u32
}

pub fn random_peer_id() -> u32 {
    rand_u64() as u32
}
