use kinsync::{EntityHandle, InterpolationMode, Peer, SyncFields};

/// How the host wants a remote-owned body represented locally.
#[derive(Debug, Clone, Copy)]
pub struct RemoteBodySpec {
    pub entity: EntityHandle,
    pub interpolation: InterpolationMode,
    pub fields: SyncFields,
}

impl RemoteBodySpec {
    pub fn new(entity: EntityHandle, interpolation: InterpolationMode) -> Self {
        Self {
            entity,
            interpolation,
            fields: SyncFields::default(),
        }
    }
}

/// The simulation the sync engine is embedded in. The engine never touches
/// entities directly; spawning and despawning remote placeholders goes
/// through this trait, as does the clock the engine schedules against.
pub trait HostSimulation {
    /// Spawn a local placeholder for a body owned by a remote peer. `tag` is
    /// the owner's app-defined classification. Returning None refuses the
    /// body; the engine drops it and its updates.
    fn create_remote_body(&mut self, tag: u32) -> Option<RemoteBodySpec>;

    /// Tear down a placeholder previously returned by `create_remote_body`,
    /// or a locally registered body whose owner vanished.
    fn destroy_body(&mut self, entity: EntityHandle);

    /// Current host-clock time in milliseconds. Must be the same timebase
    /// snapshots are stamped with.
    fn current_time(&self) -> i64;

    /// Duration of one simulation tick in seconds.
    fn tick_duration(&self) -> f64;
}

/// Connectivity notifications surfaced to the host via
/// [`crate::ClientSyncEngine::drain_events`].
#[derive(Debug, Clone)]
pub enum SyncEvent {
    PeerConnected(Peer),
    PeerDisconnected(Peer),
    ConnectionStatusChanged(bool),
    /// An echoed authoritative sample for a locally owned body deviated
    /// beyond tolerance from the local simulation.
    DesyncDetected {
        body_id: u32,
        position_error: f32,
        angle_error: f32,
    },
}
