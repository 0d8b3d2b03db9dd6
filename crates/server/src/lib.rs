pub mod relay;
pub mod relays;
pub mod scene;
pub mod server;

pub use relay::{Outbound, OutboundTarget, ProcessResult, RelayHandler, ServerContext, ServerRelay};
pub use scene::{SceneDirectory, TrackedBody};
pub use server::SyncServer;
