use kinsync::{BodyLifetimeUpdate, Message, Peer, Presence, UpdateHeader};

use crate::relay::{ProcessResult, ServerContext, ServerRelay};
use crate::scene::TrackedBody;

/// Registers joining peers and introduces them to the session. Departure
/// broadcasts are synthesized on transport disconnect, not relayed from the
/// client's own goodbye, so a peer that vanishes without one behaves
/// identically to a peer that said goodbye.
pub struct PresenceRelay;

impl ServerRelay for PresenceRelay {
    fn validate(&mut self, ctx: &ServerContext, message: &Message) -> bool {
        let Message::Presence(presence) = message else {
            return false;
        };
        if presence.here {
            !ctx.peers.contains(presence.peer_id)
        } else {
            ctx.peers.contains(presence.peer_id)
        }
    }

    fn process(&mut self, ctx: &mut ServerContext, message: &Message) -> ProcessResult {
        let Message::Presence(presence) = message else {
            return ProcessResult::Fail;
        };
        if !presence.here {
            // departure is driven by the disconnect path
            return ProcessResult::Done;
        }

        let peer = Peer::new(presence.peer_id, &presence.nickname, ctx.now);
        log::info!("peer {} ({}) joined", peer.id, peer.nickname);
        ctx.peers.insert(peer);
        ctx.scene.add_peer(presence.peer_id);
        if let Some(conn) = ctx.current_conn {
            ctx.bind_peer(presence.peer_id, conn);
        }
        ProcessResult::Relay
    }

    /// Bring the joiner up to speed: re-introduce every existing peer, then
    /// announce every body currently tracked across the session.
    fn postprocess(&mut self, ctx: &mut ServerContext, message: &Message) {
        let Message::Presence(presence) = message else {
            return;
        };
        if !presence.here {
            return;
        }
        let joiner = presence.peer_id;

        let introductions: Vec<Message> = ctx
            .peers
            .iter()
            .filter(|peer| peer.id != joiner)
            .map(|peer| {
                Message::Presence(Presence {
                    header: UpdateHeader {
                        sender_time: ctx.now,
                        source_peer_id: peer.id,
                    },
                    peer_id: peer.id,
                    here: true,
                    nickname: peer.nickname.clone(),
                })
            })
            .collect();

        let catch_up: Vec<Message> = ctx
            .scene
            .iter_bodies()
            .filter(|body| body.owner_id != joiner)
            .map(|body| {
                Message::BodyLifetime(BodyLifetimeUpdate {
                    header: UpdateHeader {
                        sender_time: ctx.now,
                        source_peer_id: body.owner_id,
                    },
                    body: kinsync::BodyHeader {
                        body_id: body.body_id,
                        tag: body.tag,
                    },
                    exists: true,
                })
            })
            .collect();

        log::debug!(
            "catching up peer {joiner}: {} peers, {} bodies",
            introductions.len(),
            catch_up.len()
        );
        for message in introductions.into_iter().chain(catch_up) {
            ctx.queue_to_peer(joiner, message);
        }
    }
}

/// Records kinematic samples against tracked bodies and echoes them to the
/// session. Samples for bodies never announced by their sender are rejected.
pub struct BodyKinematicRelay;

impl ServerRelay for BodyKinematicRelay {
    fn process(&mut self, ctx: &mut ServerContext, message: &Message) -> ProcessResult {
        let Message::BodyKinematic(update) = message else {
            return ProcessResult::Fail;
        };
        if ctx.scene.update_body(update, ctx.now) {
            ProcessResult::Relay
        } else {
            ProcessResult::Fail
        }
    }
}

/// Tracks body spawn/despawn announcements. Duplicate creates and removals
/// of absent bodies are validation failures, not state changes.
pub struct BodyLifetimeRelay;

impl ServerRelay for BodyLifetimeRelay {
    fn process(&mut self, ctx: &mut ServerContext, message: &Message) -> ProcessResult {
        let Message::BodyLifetime(update) = message else {
            return ProcessResult::Fail;
        };
        let owner_id = update.header.source_peer_id;
        let body_id = update.body.body_id;

        let applied = if update.exists {
            ctx.scene
                .insert_body(TrackedBody::new(owner_id, body_id, update.body.tag))
        } else {
            ctx.scene.remove_body(owner_id, body_id)
        };

        if applied {
            log::debug!(
                "peer {owner_id} {} body {body_id}",
                if update.exists { "spawned" } else { "despawned" }
            );
            ProcessResult::Relay
        } else {
            ProcessResult::Fail
        }
    }
}
