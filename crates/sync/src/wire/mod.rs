mod codec;
mod message;
mod router;

pub use codec::{DecodeError, EncodeError, MessageRegistry, RegistryError, MAX_MESSAGE_TYPES};
pub use message::{
    BodyHeader, BodyKinematicUpdate, BodyLifetimeUpdate, Heartbeat, Message, MessageKind, Presence,
    RouteKey, UpdateHeader,
};
pub use router::{MessageHandler, MessageRouter};
