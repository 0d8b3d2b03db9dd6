use std::collections::HashMap;

use rkyv::rancor;
use rkyv::util::AlignedVec;
use thiserror::Error;

use crate::wire::message::{
    BodyKinematicUpdate, BodyLifetimeUpdate, Heartbeat, Message, MessageKind, Presence,
};

/// Wire ids are a single byte, so a protocol can carry at most this many
/// message types.
pub const MAX_MESSAGE_TYPES: usize = u8::MAX as usize;

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("message type capacity exhausted ({MAX_MESSAGE_TYPES} ids)")]
    Overflow,
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("message kind {} is not registered", .0.name())]
    UnregisteredKind(MessageKind),
    #[error("serialization failed: {0}")]
    Serialize(#[from] rancor::Error),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown wire type id {0}")]
    UnknownTypeId(u8),
    #[error("corrupt payload: {0}")]
    CorruptPayload(#[from] rancor::Error),
}

/// Maps message kinds to one-byte wire ids, assigned sequentially in
/// registration order. Every process in a session must register the same
/// kinds in the same order or decoding silently mismatches; the standard
/// entry point is [`MessageRegistry::with_protocol_order`].
#[derive(Debug, Default)]
pub struct MessageRegistry {
    ids: HashMap<MessageKind, u8>,
    kinds: Vec<MessageKind>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the full built-in protocol in its canonical order.
    pub fn with_protocol_order() -> Self {
        let mut registry = Self::new();
        registry
            .register_types(&MessageKind::PROTOCOL_ORDER)
            .unwrap_or_else(|_| unreachable!("built-in protocol fits in one byte"));
        registry
    }

    /// Assigns the next free wire ids to the given kinds in order. Kinds
    /// already registered keep their existing id and are skipped.
    pub fn register_types(&mut self, kinds: &[MessageKind]) -> Result<(), RegistryError> {
        for &kind in kinds {
            if self.ids.contains_key(&kind) {
                continue;
            }
            if self.kinds.len() >= MAX_MESSAGE_TYPES {
                return Err(RegistryError::Overflow);
            }
            let id = self.kinds.len() as u8;
            self.ids.insert(kind, id);
            self.kinds.push(kind);
            log::debug!("registered message type {} as id {id}", kind.name());
        }
        Ok(())
    }

    pub fn wire_id(&self, kind: MessageKind) -> Option<u8> {
        self.ids.get(&kind).copied()
    }

    pub fn kind_of(&self, wire_id: u8) -> Option<MessageKind> {
        self.kinds.get(wire_id as usize).copied()
    }

    pub fn len(&self) -> usize {
        self.kinds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds.is_empty()
    }

    /// Serializes a message as a one-byte wire id followed by its payload.
    pub fn encode(&self, message: &Message) -> Result<Vec<u8>, EncodeError> {
        let id = self
            .wire_id(message.kind())
            .ok_or(EncodeError::UnregisteredKind(message.kind()))?;

        let payload = match message {
            Message::Presence(m) => rkyv::to_bytes::<rancor::Error>(m)?,
            Message::Heartbeat(m) => rkyv::to_bytes::<rancor::Error>(m)?,
            Message::BodyKinematic(m) => rkyv::to_bytes::<rancor::Error>(m)?,
            Message::BodyLifetime(m) => rkyv::to_bytes::<rancor::Error>(m)?,
        };

        let mut bytes = Vec::with_capacity(1 + payload.len());
        bytes.push(id);
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Message, DecodeError> {
        let (&id, rest) = bytes.split_first().ok_or(DecodeError::Empty)?;
        let kind = self.kind_of(id).ok_or(DecodeError::UnknownTypeId(id))?;

        // the id byte knocks the payload off rkyv's required alignment
        let mut payload = AlignedVec::<16>::with_capacity(rest.len());
        payload.extend_from_slice(rest);
        let payload = payload.as_slice();

        let message = match kind {
            MessageKind::Presence => {
                Message::Presence(rkyv::from_bytes::<Presence, rancor::Error>(payload)?)
            }
            MessageKind::Heartbeat => {
                Message::Heartbeat(rkyv::from_bytes::<Heartbeat, rancor::Error>(payload)?)
            }
            MessageKind::BodyKinematicUpdate => Message::BodyKinematic(rkyv::from_bytes::<
                BodyKinematicUpdate,
                rancor::Error,
            >(payload)?),
            MessageKind::BodyLifetimeUpdate => Message::BodyLifetime(rkyv::from_bytes::<
                BodyLifetimeUpdate,
                rancor::Error,
            >(payload)?),
        };
        Ok(message)
    }
}
