use std::collections::HashMap;

use kinsync::{ConnId, Message, MessageHandler, PeerDirectory};

use crate::scene::SceneDirectory;

/// Who an outbound message goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundTarget {
    All,
    Peer(u32),
}

#[derive(Debug, Clone)]
pub struct Outbound {
    pub target: OutboundTarget,
    pub message: Message,
}

/// Verdict of a relay's process step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessResult {
    /// Reject: the message is dropped and logged.
    Fail,
    /// Consumed: valid, but not forwarded to other peers.
    Done,
    /// Forward the message verbatim to every connected peer.
    Relay,
}

/// Server-side per-kind pipeline: validate, process, and (after any
/// relaying) postprocess. Relays mutate shared server state through
/// [`ServerContext`] and never touch the transport directly.
pub trait ServerRelay {
    fn validate(&mut self, _ctx: &ServerContext, _message: &Message) -> bool {
        true
    }

    fn process(&mut self, ctx: &mut ServerContext, message: &Message) -> ProcessResult;

    fn postprocess(&mut self, _ctx: &mut ServerContext, _message: &Message) {}
}

/// Shared state threaded through server dispatch, plus the outbox the tick
/// loop flushes after each message.
pub struct ServerContext {
    pub peers: PeerDirectory,
    pub scene: SceneDirectory,
    peer_conns: HashMap<u32, ConnId>,
    conn_peers: HashMap<ConnId, u32>,
    /// Connection the message currently being dispatched arrived on.
    pub current_conn: Option<ConnId>,
    /// Server-clock timestamp of the current tick, milliseconds.
    pub now: i64,
    pub outbox: Vec<Outbound>,
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerContext {
    pub fn new() -> Self {
        Self {
            peers: PeerDirectory::new(),
            scene: SceneDirectory::new(),
            peer_conns: HashMap::new(),
            conn_peers: HashMap::new(),
            current_conn: None,
            now: 0,
            outbox: Vec::new(),
        }
    }

    pub fn bind_peer(&mut self, peer_id: u32, conn: ConnId) {
        self.peer_conns.insert(peer_id, conn);
        self.conn_peers.insert(conn, peer_id);
    }

    pub fn unbind_peer(&mut self, peer_id: u32) {
        if let Some(conn) = self.peer_conns.remove(&peer_id) {
            self.conn_peers.remove(&conn);
        }
    }

    pub fn peer_of_conn(&self, conn: ConnId) -> Option<u32> {
        self.conn_peers.get(&conn).copied()
    }

    pub fn conn_of_peer(&self, peer_id: u32) -> Option<ConnId> {
        self.peer_conns.get(&peer_id).copied()
    }

    pub fn queue_all(&mut self, message: Message) {
        self.outbox.push(Outbound {
            target: OutboundTarget::All,
            message,
        });
    }

    pub fn queue_to_peer(&mut self, peer_id: u32, message: Message) {
        self.outbox.push(Outbound {
            target: OutboundTarget::Peer(peer_id),
            message,
        });
    }
}

/// Adapts a [`ServerRelay`] to the router's handler interface, running the
/// validate/process/relay/postprocess pipeline for each dispatched message.
pub struct RelayHandler<R: ServerRelay> {
    relay: R,
}

impl<R: ServerRelay> RelayHandler<R> {
    pub fn new(relay: R) -> Self {
        Self { relay }
    }

    pub fn boxed(relay: R) -> Box<Self> {
        Box::new(Self::new(relay))
    }
}

impl<R: ServerRelay> MessageHandler<ServerContext> for RelayHandler<R> {
    fn handle(&mut self, ctx: &mut ServerContext, message: &Message) -> bool {
        if !self.relay.validate(ctx, message) {
            log::warn!(
                "{} from peer {} failed validation",
                message.kind().name(),
                message.header().source_peer_id
            );
            return false;
        }

        match self.relay.process(ctx, message) {
            ProcessResult::Fail => {
                log::warn!(
                    "{} from peer {} rejected",
                    message.kind().name(),
                    message.header().source_peer_id
                );
                false
            }
            ProcessResult::Done => {
                self.relay.postprocess(ctx, message);
                true
            }
            ProcessResult::Relay => {
                ctx.queue_all(message.clone());
                self.relay.postprocess(ctx, message);
                true
            }
        }
    }
}
