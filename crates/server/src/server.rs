use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use kinsync::time::now_millis;
use kinsync::{
    ConnId, Heartbeat, Message, MessageRegistry, MessageRouter, Presence, RouteKey, SyncConfig,
    Transport, TransportEvent, UpdateHeader,
};

use crate::relay::{OutboundTarget, RelayHandler, ServerContext};
use crate::relays::{BodyKinematicRelay, BodyLifetimeRelay, PresenceRelay};

/// Peer id the server stamps on messages it originates (heartbeats).
/// Synthesized departures carry the departing peer's id instead.
pub const SERVER_PEER_ID: u32 = 0;

/// Relay server: accepts connections, routes each decoded message through
/// its relay pipeline, and fans accepted traffic back out. It never
/// simulates; clients own all body state.
pub struct SyncServer<T: Transport> {
    transport: T,
    registry: MessageRegistry,
    router: MessageRouter<ServerContext>,
    ctx: ServerContext,
    config: SyncConfig,
    running: Arc<AtomicBool>,
    next_heartbeat_at: i64,
}

impl<T: Transport> SyncServer<T> {
    pub fn new(transport: T, config: SyncConfig) -> Self {
        let mut router = MessageRouter::new();
        router.register(RouteKey::Presence, RelayHandler::boxed(PresenceRelay));
        router.register(
            RouteKey::BodyKinematic,
            RelayHandler::boxed(BodyKinematicRelay),
        );
        router.register(
            RouteKey::BodyLifetime,
            RelayHandler::boxed(BodyLifetimeRelay),
        );

        Self {
            transport,
            registry: MessageRegistry::with_protocol_order(),
            router,
            ctx: ServerContext::new(),
            config,
            running: Arc::new(AtomicBool::new(true)),
            next_heartbeat_at: 0,
        }
    }

    pub fn listen(&mut self) -> io::Result<()> {
        self.transport.listen(self.config.port)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn peer_count(&self) -> usize {
        self.ctx.peers.len()
    }

    pub fn body_count(&self) -> usize {
        self.ctx.scene.body_count()
    }

    /// One pass over the transport plus periodic work. Each inbound message
    /// is dispatched and its outbox flushed before the next is decoded, so
    /// relays observe the directory exactly as the message left it.
    pub fn tick_once(&mut self) {
        self.ctx.now = now_millis();

        for event in self.transport.poll_events() {
            match event {
                TransportEvent::PeerConnected(conn) => {
                    // identity arrives with the Presence announcement
                    log::debug!("conn {conn} established, awaiting presence");
                }
                TransportEvent::PeerDisconnected(conn) => {
                    self.handle_departure(conn);
                    self.flush_outbox();
                }
                TransportEvent::Data(conn, bytes) => {
                    match self.registry.decode(&bytes) {
                        Ok(message) => {
                            self.ctx.current_conn = Some(conn);
                            self.router.dispatch(&mut self.ctx, &message);
                            self.ctx.current_conn = None;
                        }
                        Err(e) => log::warn!("discarding undecodable payload from conn {conn}: {e}"),
                    }
                    self.flush_outbox();
                }
            }
        }

        if self.ctx.now >= self.next_heartbeat_at {
            self.next_heartbeat_at = self.ctx.now + self.config.heartbeat_interval_ms as i64;
            self.ctx.queue_all(Message::Heartbeat(Heartbeat {
                header: UpdateHeader {
                    sender_time: self.ctx.now,
                    source_peer_id: SERVER_PEER_ID,
                },
                alive: true,
            }));
            self.flush_outbox();
        }
    }

    /// Blocks until shutdown, pumping at the configured network rate.
    pub fn run(&mut self) {
        let interval = Duration::from_millis(1000 / self.config.net_rate.max(1) as u64);
        while self.running.load(Ordering::SeqCst) {
            self.tick_once();
            std::thread::sleep(interval);
        }
        log::info!("server stopped");
    }

    /// A peer's transport link went away: drop it and everything it owned,
    /// and tell the rest of the session on its behalf.
    fn handle_departure(&mut self, conn: ConnId) {
        let Some(peer_id) = self.ctx.peer_of_conn(conn) else {
            log::debug!("conn {conn} dropped before announcing presence");
            return;
        };
        let Some(peer) = self.ctx.peers.remove(peer_id) else {
            return;
        };
        self.ctx.unbind_peer(peer_id);
        let bodies = self.ctx.scene.remove_peer(peer_id);
        log::info!(
            "peer {peer_id} ({}) disconnected, dropping {} bodies",
            peer.nickname,
            bodies.len()
        );

        self.ctx.queue_all(Message::Presence(Presence {
            header: UpdateHeader {
                sender_time: self.ctx.now,
                source_peer_id: peer_id,
            },
            peer_id,
            here: false,
            nickname: peer.nickname,
        }));
    }

    fn flush_outbox(&mut self) {
        let outbox = std::mem::take(&mut self.ctx.outbox);
        for outbound in outbox {
            let bytes = match self.registry.encode(&outbound.message) {
                Ok(bytes) => bytes,
                Err(e) => {
                    log::error!(
                        "dropping outbound {}: {e}",
                        outbound.message.kind().name()
                    );
                    continue;
                }
            };
            let class = outbound.message.delivery_class();
            let result = match outbound.target {
                OutboundTarget::All => self.transport.broadcast(&bytes, class),
                OutboundTarget::Peer(peer_id) => match self.ctx.conn_of_peer(peer_id) {
                    Some(conn) => self.transport.send(conn, &bytes, class),
                    None => {
                        log::debug!("peer {peer_id} left before targeted send");
                        continue;
                    }
                },
            };
            if let Err(e) = result {
                log::error!("outbound send failed: {e}");
            }
        }
    }
}
