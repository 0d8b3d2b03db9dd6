use std::collections::HashMap;

use crate::wire::message::{Message, RouteKey};

/// A message consumer bound to one route key. `ctx` is whatever mutable
/// state the owning side (client engine or server) threads through dispatch.
pub trait MessageHandler<C> {
    /// Returns false when the message was seen but rejected.
    fn handle(&mut self, ctx: &mut C, message: &Message) -> bool;
}

/// Dispatches decoded messages to registered handlers. A message first tries
/// its concrete key, then its group key; registering twice on one key
/// replaces the earlier handler.
pub struct MessageRouter<C> {
    handlers: HashMap<RouteKey, Box<dyn MessageHandler<C>>>,
}

impl<C> Default for MessageRouter<C> {
    fn default() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }
}

impl<C> MessageRouter<C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, key: RouteKey, handler: Box<dyn MessageHandler<C>>) {
        if self.handlers.insert(key, handler).is_some() {
            log::warn!("replaced existing handler for {key:?}");
        }
    }

    pub fn can_handle(&self, message: &Message) -> bool {
        self.handlers.contains_key(&message.route_key())
            || message
                .group_key()
                .is_some_and(|key| self.handlers.contains_key(&key))
    }

    /// Routes one message. Returns the handler's verdict, or false when no
    /// handler matched either key.
    pub fn dispatch(&mut self, ctx: &mut C, message: &Message) -> bool {
        let key = message.route_key();
        if let Some(handler) = self.handlers.get_mut(&key) {
            return handler.handle(ctx, message);
        }
        if let Some(group) = message.group_key() {
            if let Some(handler) = self.handlers.get_mut(&group) {
                return handler.handle(ctx, message);
            }
        }
        log::error!("no handler for message kind {}", message.kind().name());
        false
    }
}
