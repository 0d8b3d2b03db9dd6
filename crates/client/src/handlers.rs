use std::collections::VecDeque;

use kinsync::{
    BodyKinematicUpdate, BodyLifetimeUpdate, Message, MessageHandler, Peer, PeerDirectory,
    RingQueue,
};

use crate::host::SyncEvent;

/// Capacity of the inbound body update buffer. Kinematic traffic is the
/// dominant flow; when the simulation falls behind, the oldest samples are
/// the right ones to shed.
pub const INBOUND_QUEUE_DEPTH: usize = 256;

/// A buffered body update awaiting ingestion by the engine's tick.
#[derive(Debug, Clone)]
pub enum BodyUpdate {
    Kinematic(BodyKinematicUpdate),
    Lifetime(BodyLifetimeUpdate),
}

/// Mutable state threaded through message dispatch on the client side.
pub struct ClientContext {
    pub local_peer_id: u32,
    pub connected: bool,
    pub peers: PeerDirectory,
    pub inbound_updates: RingQueue<BodyUpdate>,
    pub events: VecDeque<SyncEvent>,
}

impl ClientContext {
    pub fn new(local_peer_id: u32) -> Self {
        Self {
            local_peer_id,
            connected: false,
            peers: PeerDirectory::new(),
            inbound_updates: RingQueue::new(INBOUND_QUEUE_DEPTH),
            events: VecDeque::new(),
        }
    }
}

/// Maintains the peer directory from presence announcements.
pub struct PresenceHandler;

impl MessageHandler<ClientContext> for PresenceHandler {
    fn handle(&mut self, ctx: &mut ClientContext, message: &Message) -> bool {
        let Message::Presence(presence) = message else {
            return false;
        };

        if presence.peer_id == ctx.local_peer_id {
            // our own announcement, relayed back: the server accepted us
            if presence.here != ctx.connected {
                ctx.connected = presence.here;
                ctx.events
                    .push_back(SyncEvent::ConnectionStatusChanged(presence.here));
            }
            return true;
        }

        if presence.here {
            let peer = Peer::new(
                presence.peer_id,
                &presence.nickname,
                presence.header.sender_time,
            );
            if ctx.peers.insert(peer.clone()) {
                log::info!("peer {} ({}) joined", peer.id, peer.nickname);
                ctx.events.push_back(SyncEvent::PeerConnected(peer));
            }
        } else if let Some(peer) = ctx.peers.remove(presence.peer_id) {
            log::info!("peer {} ({}) left", peer.id, peer.nickname);
            ctx.events.push_back(SyncEvent::PeerDisconnected(peer));
        }
        true
    }
}

/// Accepts server heartbeats. Receipt alone proves the link is alive; the
/// transport's liveness tracking does the rest.
pub struct HeartbeatHandler;

impl MessageHandler<ClientContext> for HeartbeatHandler {
    fn handle(&mut self, _ctx: &mut ClientContext, message: &Message) -> bool {
        if let Message::Heartbeat(beat) = message {
            log::trace!("heartbeat (alive={})", beat.alive);
            return true;
        }
        false
    }
}

/// Buffers body updates for the engine's next tick. Dispatch happens on the
/// network pump; ingestion happens on the simulation tick, and the bounded
/// queue between them sheds the oldest samples under pressure.
pub struct BodyUpdateHandler;

impl MessageHandler<ClientContext> for BodyUpdateHandler {
    fn handle(&mut self, ctx: &mut ClientContext, message: &Message) -> bool {
        match message {
            Message::BodyKinematic(update) => {
                ctx.inbound_updates
                    .enqueue(BodyUpdate::Kinematic(update.clone()));
                true
            }
            Message::BodyLifetime(update) => {
                ctx.inbound_updates
                    .enqueue(BodyUpdate::Lifetime(update.clone()));
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinsync::{BodyHeader, Presence, UpdateHeader};

    fn presence(peer_id: u32, here: bool) -> Message {
        Message::Presence(Presence {
            header: UpdateHeader {
                sender_time: 100,
                source_peer_id: peer_id,
            },
            peer_id,
            here,
            nickname: "n".into(),
        })
    }

    #[test]
    fn presence_tracks_remote_peers() {
        let mut ctx = ClientContext::new(1);
        let mut handler = PresenceHandler;

        assert!(handler.handle(&mut ctx, &presence(2, true)));
        assert!(ctx.peers.contains(2));
        assert!(matches!(
            ctx.events.pop_front(),
            Some(SyncEvent::PeerConnected(_))
        ));

        assert!(handler.handle(&mut ctx, &presence(2, false)));
        assert!(!ctx.peers.contains(2));
        assert!(matches!(
            ctx.events.pop_front(),
            Some(SyncEvent::PeerDisconnected(_))
        ));
    }

    #[test]
    fn own_presence_echo_flips_connected() {
        let mut ctx = ClientContext::new(1);
        let mut handler = PresenceHandler;

        handler.handle(&mut ctx, &presence(1, true));
        assert!(ctx.connected);
        assert!(!ctx.peers.contains(1));
        assert!(matches!(
            ctx.events.pop_front(),
            Some(SyncEvent::ConnectionStatusChanged(true))
        ));

        // repeated echo is a no-op
        handler.handle(&mut ctx, &presence(1, true));
        assert!(ctx.events.is_empty());
    }

    #[test]
    fn duplicate_join_announcement_is_ignored() {
        let mut ctx = ClientContext::new(1);
        let mut handler = PresenceHandler;

        handler.handle(&mut ctx, &presence(2, true));
        handler.handle(&mut ctx, &presence(2, true));

        assert_eq!(ctx.peers.len(), 1);
        assert_eq!(ctx.events.len(), 1);
    }

    #[test]
    fn body_updates_are_buffered_in_order() {
        let mut ctx = ClientContext::new(1);
        let mut handler = BodyUpdateHandler;

        let kinematic = Message::BodyKinematic(BodyKinematicUpdate {
            header: UpdateHeader::default(),
            body: BodyHeader { body_id: 5, tag: 0 },
            position: [1.0, 2.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
            angular_velocity: 0.0,
        });
        let lifetime = Message::BodyLifetime(BodyLifetimeUpdate {
            header: UpdateHeader::default(),
            body: BodyHeader { body_id: 5, tag: 0 },
            exists: true,
        });

        assert!(handler.handle(&mut ctx, &lifetime));
        assert!(handler.handle(&mut ctx, &kinematic));

        assert!(matches!(
            ctx.inbound_updates.try_dequeue(),
            Some(BodyUpdate::Lifetime(_))
        ));
        assert!(matches!(
            ctx.inbound_updates.try_dequeue(),
            Some(BodyUpdate::Kinematic(_))
        ));
    }
}
