pub mod engine;
pub mod handlers;
pub mod host;

pub use engine::{ClientSyncEngine, EngineError};
pub use host::{HostSimulation, RemoteBodySpec, SyncEvent};
