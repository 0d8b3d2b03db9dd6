use std::collections::HashMap;
use std::io;

use kinsync::interpolate::{hermite, hermite_vec2, lerp, lerp_vec2};
use kinsync::{
    BodyKinematicUpdate, BodyLifetimeUpdate, ConnId, EncodeError, EntityHandle, InterpolationMode,
    Message, MessageRegistry, MessageRouter, Peer, Presence, RouteKey, SnapshotCache, StateFrame,
    SyncConfig, SyncFields, SyncedBody, Transport, TransportEvent, UpdateHeader, random_peer_id,
};
use thiserror::Error;

use crate::handlers::{BodyUpdate, BodyUpdateHandler, ClientContext, HeartbeatHandler, PresenceHandler};
use crate::host::{HostSimulation, SyncEvent};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("transport error: {0}")]
    Io(#[from] io::Error),
    #[error("encode error: {0}")]
    Encode(#[from] EncodeError),
}

/// Client-side replication engine. Owns the transport, the wire registry,
/// and the set of synced bodies; the host simulation drives it once per tick
/// via [`ClientSyncEngine::update`].
pub struct ClientSyncEngine<T: Transport> {
    transport: T,
    registry: MessageRegistry,
    router: MessageRouter<ClientContext>,
    ctx: ClientContext,
    config: SyncConfig,
    nickname: String,
    bodies: HashMap<u32, SyncedBody>,
    caches: HashMap<u32, SnapshotCache>,
    server_conn: Option<ConnId>,
    outbound: Vec<Message>,
}

impl<T: Transport> ClientSyncEngine<T> {
    pub fn new(transport: T, config: SyncConfig, nickname: &str) -> Self {
        let mut router = MessageRouter::new();
        router.register(RouteKey::Presence, Box::new(PresenceHandler));
        router.register(RouteKey::Heartbeat, Box::new(HeartbeatHandler));
        router.register(RouteKey::BodyUpdate, Box::new(BodyUpdateHandler));

        Self {
            transport,
            registry: MessageRegistry::with_protocol_order(),
            router,
            ctx: ClientContext::new(random_peer_id()),
            config,
            nickname: nickname.to_owned(),
            bodies: HashMap::new(),
            caches: HashMap::new(),
            server_conn: None,
            outbound: Vec::new(),
        }
    }

    pub fn local_peer_id(&self) -> u32 {
        self.ctx.local_peer_id
    }

    pub fn is_connected(&self) -> bool {
        self.ctx.connected
    }

    pub fn peers(&self) -> impl Iterator<Item = &Peer> {
        self.ctx.peers.iter()
    }

    pub fn body(&self, body_id: u32) -> Option<&SyncedBody> {
        self.bodies.get(&body_id)
    }

    pub fn body_mut(&mut self, body_id: u32) -> Option<&mut SyncedBody> {
        self.bodies.get_mut(&body_id)
    }

    pub fn bodies(&self) -> impl Iterator<Item = &SyncedBody> {
        self.bodies.values()
    }

    pub fn connect(&mut self, host: &str, port: u16) -> Result<(), EngineError> {
        self.transport.connect(host, port)?;
        Ok(())
    }

    /// Announce departure and drop the link. The server also removes peers
    /// on transport disconnect, so the announcement is a courtesy that makes
    /// departure immediate instead of timeout-bound.
    pub fn disconnect(&mut self, host: &impl HostSimulation) {
        if let Some(conn) = self.server_conn.take() {
            let goodbye = Message::Presence(Presence {
                header: self.stamp(host.current_time()),
                peer_id: self.ctx.local_peer_id,
                here: false,
                nickname: self.nickname.clone(),
            });
            self.send_message(conn, &goodbye);
            self.transport.disconnect(conn);
        }
        if self.ctx.connected {
            self.ctx.connected = false;
            self.ctx
                .events
                .push_back(SyncEvent::ConnectionStatusChanged(false));
        }
        self.ctx.peers.clear();
    }

    /// Put a locally owned body under replication. Its lifetime announcement
    /// goes out on the next update.
    pub fn register_body(
        &mut self,
        entity: EntityHandle,
        tag: u32,
        interpolation: InterpolationMode,
        fields: SyncFields,
    ) -> u32 {
        let body = SyncedBody::new(self.ctx.local_peer_id, tag, entity, interpolation, fields);
        let body_id = body.body_id;
        self.outbound.push(Message::BodyLifetime(BodyLifetimeUpdate {
            header: UpdateHeader::default(),
            body: kinsync::BodyHeader { body_id, tag },
            exists: true,
        }));
        self.bodies.insert(body_id, body);
        log::debug!("registered local body {body_id} (tag {tag})");
        body_id
    }

    /// Withdraw a locally owned body from replication. Remote peers get a
    /// despawn announcement; the local entity is the host's to clean up.
    pub fn deregister_body(&mut self, body_id: u32) {
        let Some(body) = self.bodies.remove(&body_id) else {
            log::debug!("deregister of unknown body {body_id} ignored");
            return;
        };
        self.caches.remove(&body_id);
        self.outbound.push(Message::BodyLifetime(BodyLifetimeUpdate {
            header: UpdateHeader::default(),
            body: kinsync::BodyHeader {
                body_id,
                tag: body.tag,
            },
            exists: false,
        }));
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.ctx.events.drain(..).collect()
    }

    /// One engine tick: pump the transport, ingest buffered updates, advance
    /// interpolation, broadcast due snapshots, and flush outbound traffic.
    pub fn update(&mut self, host: &mut impl HostSimulation) -> Result<(), EngineError> {
        self.pump_network(host);
        self.ingest_updates(host);
        self.advance_interpolation(host);
        self.broadcast_due_snapshots(host);
        self.sweep_orphans(host);
        self.flush_outbound(host);
        Ok(())
    }

    fn stamp(&self, now: i64) -> UpdateHeader {
        UpdateHeader {
            sender_time: now,
            source_peer_id: self.ctx.local_peer_id,
        }
    }

    fn send_message(&mut self, conn: ConnId, message: &Message) {
        let bytes = match self.registry.encode(message) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("dropping outbound {}: {e}", message.kind().name());
                return;
            }
        };
        if let Err(e) = self.transport.send(conn, &bytes, message.delivery_class()) {
            log::error!("send of {} failed: {e}", message.kind().name());
        }
    }

    fn pump_network(&mut self, host: &impl HostSimulation) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::PeerConnected(conn) => {
                    self.server_conn = Some(conn);
                    let hello = Message::Presence(Presence {
                        header: self.stamp(host.current_time()),
                        peer_id: self.ctx.local_peer_id,
                        here: true,
                        nickname: self.nickname.clone(),
                    });
                    self.send_message(conn, &hello);
                }
                TransportEvent::PeerDisconnected(_) => {
                    self.server_conn = None;
                    if self.ctx.connected {
                        self.ctx.connected = false;
                        self.ctx
                            .events
                            .push_back(SyncEvent::ConnectionStatusChanged(false));
                    }
                    self.ctx.peers.clear();
                }
                TransportEvent::Data(_, bytes) => match self.registry.decode(&bytes) {
                    Ok(message) => {
                        self.router.dispatch(&mut self.ctx, &message);
                    }
                    Err(e) => log::warn!("discarding undecodable payload: {e}"),
                },
            }
        }
    }

    fn ingest_updates(&mut self, host: &mut impl HostSimulation) {
        while let Some(update) = self.ctx.inbound_updates.try_dequeue() {
            match update {
                BodyUpdate::Kinematic(update) => self.ingest_kinematic(host, &update),
                BodyUpdate::Lifetime(update) => self.ingest_lifetime(host, &update),
            }
        }
    }

    fn ingest_kinematic(&mut self, host: &impl HostSimulation, update: &BodyKinematicUpdate) {
        let snapshot = update.to_snapshot();

        if update.header.source_peer_id == self.ctx.local_peer_id {
            self.check_desync(&snapshot);
            return;
        }

        let Some(body) = self.bodies.get_mut(&update.body.body_id) else {
            // spawn announcement not seen yet (or already despawned)
            log::debug!("kinematic update for unknown body {}", update.body.body_id);
            return;
        };

        let now = host.current_time();
        if snapshot.source_time > now {
            // clock skew; the sample is still the newest we have
            log::warn!(
                "body {} sample stamped {}ms in the future",
                body.body_id,
                snapshot.source_time - now
            );
        }
        if body.interpolation == InterpolationMode::None {
            body.apply(&snapshot);
            return;
        }

        let cache = self
            .caches
            .entry(body.body_id)
            .or_insert_with(|| SnapshotCache::new(self.config.cache_depth()));
        cache.push(StateFrame {
            snapshot,
            received_at: now,
        });
    }

    /// Compare an echoed authoritative sample for one of our own bodies
    /// against where the local simulation actually is.
    fn check_desync(&mut self, snapshot: &kinsync::KinematicSnapshot) {
        let Some(body) = self.bodies.get_mut(&snapshot.body_id) else {
            return;
        };
        let position_error = (body.position - snapshot.position).length();
        let angle_error = (body.angle - snapshot.angle).abs();

        if position_error > self.config.desync_position_tolerance
            || angle_error > self.config.desync_angle_tolerance
        {
            log::warn!(
                "body {} desynced: {position_error:.3} units, {angle_error:.3} rad",
                body.body_id
            );
            if self.config.snap_on_desync {
                body.apply(snapshot);
            }
            self.ctx.events.push_back(SyncEvent::DesyncDetected {
                body_id: body.body_id,
                position_error,
                angle_error,
            });
        }
    }

    fn ingest_lifetime(&mut self, host: &mut impl HostSimulation, update: &BodyLifetimeUpdate) {
        if update.header.source_peer_id == self.ctx.local_peer_id {
            return;
        }
        let body_id = update.body.body_id;

        if update.exists {
            if self.bodies.contains_key(&body_id) {
                log::debug!("duplicate spawn announcement for body {body_id} ignored");
                return;
            }
            let Some(spec) = host.create_remote_body(update.body.tag) else {
                log::info!(
                    "host refused remote body {body_id} (tag {})",
                    update.body.tag
                );
                return;
            };
            let body = SyncedBody {
                body_id,
                owner_id: update.header.source_peer_id,
                tag: update.body.tag,
                interpolation: spec.interpolation,
                fields: spec.fields,
                position: glam::Vec2::ZERO,
                velocity: glam::Vec2::ZERO,
                angle: 0.0,
                angular_velocity: 0.0,
                next_snapshot_at: 0,
                entity: spec.entity,
            };
            log::debug!(
                "spawned remote body {body_id} owned by {}",
                body.owner_id
            );
            self.bodies.insert(body_id, body);
        } else if let Some(body) = self.bodies.remove(&body_id) {
            self.caches.remove(&body_id);
            host.destroy_body(body.entity);
            log::debug!("despawned remote body {body_id}");
        } else {
            log::debug!("despawn of unknown body {body_id} ignored");
        }
    }

    fn advance_interpolation(&mut self, host: &impl HostSimulation) {
        let now = host.current_time();
        let tick = host.tick_duration() as f32;

        for body in self.bodies.values_mut() {
            if body.owner_id == self.ctx.local_peer_id
                || body.interpolation == InterpolationMode::None
            {
                continue;
            }
            let Some(cache) = self.caches.get(&body.body_id) else {
                continue;
            };
            let Some((f0, f1)) = cache.newest_pair() else {
                continue;
            };

            let frame_delta = (f1.snapshot.source_time - f0.snapshot.source_time) as f32 / 1000.0;
            if frame_delta <= 0.0 {
                continue;
            }
            // hold the last pose once the window is exhausted; extrapolation
            // is deliberately not attempted
            let depth_slack = tick * (cache.depth() as f32 - 2.0);
            let elapsed = (now - f1.received_at) as f32 / 1000.0 - depth_slack;
            if elapsed < 0.0 || elapsed > frame_delta {
                continue;
            }
            let t = (elapsed / frame_delta).clamp(0.0, 1.0);

            apply_interpolated(body, &f0, &f1, t, tick);
        }
    }

    fn broadcast_due_snapshots(&mut self, host: &impl HostSimulation) {
        if !self.ctx.connected {
            return;
        }
        let now = host.current_time();
        let interval = self.config.snapshot_interval_ms();

        for body in self.bodies.values_mut() {
            if body.owner_id != self.ctx.local_peer_id || now < body.next_snapshot_at {
                continue;
            }
            body.next_snapshot_at = now + interval;
            self.outbound.push(Message::BodyKinematic(
                BodyKinematicUpdate::from_snapshot(
                    UpdateHeader::default(),
                    body.tag,
                    &body.snapshot(now),
                ),
            ));
        }
    }

    /// Drop remote bodies whose owner is no longer in the peer directory.
    fn sweep_orphans(&mut self, host: &mut impl HostSimulation) {
        if !self.ctx.connected {
            return;
        }
        let local = self.ctx.local_peer_id;
        let orphaned: Vec<u32> = self
            .bodies
            .values()
            .filter(|b| b.owner_id != local && !self.ctx.peers.contains(b.owner_id))
            .map(|b| b.body_id)
            .collect();

        for body_id in orphaned {
            if let Some(body) = self.bodies.remove(&body_id) {
                log::info!("removing orphaned body {body_id} (owner {} gone)", body.owner_id);
                self.caches.remove(&body_id);
                host.destroy_body(body.entity);
            }
        }
    }

    fn flush_outbound(&mut self, host: &impl HostSimulation) {
        let Some(conn) = self.server_conn else {
            self.outbound.clear();
            return;
        };
        let now = host.current_time();
        let messages = std::mem::take(&mut self.outbound);
        for mut message in messages {
            *message.header_mut() = self.stamp(now);
            self.send_message(conn, &message);
        }
    }
}

/// Hermite tangents are the sender's velocities scaled by one simulation
/// tick, so curvature tracks the simulation rate rather than the snapshot
/// spacing.
fn apply_interpolated(body: &mut SyncedBody, f0: &StateFrame, f1: &StateFrame, t: f32, tick: f32) {
    let s0 = &f0.snapshot;
    let s1 = &f1.snapshot;

    let (position, angle) = match body.interpolation {
        InterpolationMode::Linear => (
            lerp_vec2(s0.position, s1.position, t),
            lerp(s0.angle, s1.angle, t),
        ),
        InterpolationMode::Hermite => (
            hermite_vec2(
                s0.position,
                s1.position,
                s0.velocity * tick,
                s1.velocity * tick,
                t,
            ),
            hermite(
                s0.angle,
                s1.angle,
                s0.angular_velocity * tick,
                s1.angular_velocity * tick,
                t,
            ),
        ),
        InterpolationMode::None => return,
    };

    if body.fields.contains(SyncFields::POS) {
        body.position = position;
    }
    if body.fields.contains(SyncFields::VEL) {
        body.velocity = lerp_vec2(s0.velocity, s1.velocity, t);
    }
    if body.fields.contains(SyncFields::ANGLE) {
        body.angle = angle;
    }
    if body.fields.contains(SyncFields::ANGULAR_VEL) {
        body.angular_velocity = lerp(s0.angular_velocity, s1.angular_velocity, t);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kinsync::KinematicSnapshot;

    fn frame(source_time: i64, received_at: i64, x: f32, vx: f32) -> StateFrame {
        StateFrame {
            snapshot: KinematicSnapshot {
                body_id: 1,
                source_time,
                position: glam::Vec2::new(x, 0.0),
                velocity: glam::Vec2::new(vx, 0.0),
                angle: 0.0,
                angular_velocity: 0.0,
            },
            received_at,
        }
    }

    fn test_body(mode: InterpolationMode) -> SyncedBody {
        SyncedBody {
            body_id: 1,
            owner_id: 2,
            tag: 0,
            interpolation: mode,
            fields: SyncFields::all(),
            position: glam::Vec2::ZERO,
            velocity: glam::Vec2::ZERO,
            angle: 0.0,
            angular_velocity: 0.0,
            next_snapshot_at: 0,
            entity: EntityHandle(1),
        }
    }

    #[test]
    fn linear_midpoint() {
        let mut body = test_body(InterpolationMode::Linear);
        let f0 = frame(0, 0, 0.0, 1.0);
        let f1 = frame(100, 10, 10.0, 1.0);

        apply_interpolated(&mut body, &f0, &f1, 0.5, 0.1);
        assert_eq!(body.position, glam::Vec2::new(5.0, 0.0));
        assert_eq!(body.velocity, glam::Vec2::new(1.0, 0.0));
    }

    #[test]
    fn hermite_tangents_use_tick_period() {
        let mut body = test_body(InterpolationMode::Hermite);
        // 100ms apart, decelerating from 60 units/s to rest at a 60Hz tick
        let f0 = frame(0, 0, 0.0, 60.0);
        let f1 = frame(100, 10, 10.0, 0.0);

        apply_interpolated(&mut body, &f0, &f1, 0.5, 1.0 / 60.0);
        // h10(0.5) = 0.125 applied to the single unit-length tangent
        assert!((body.position.x - 5.125).abs() < 1e-4);
    }

    #[test]
    fn hermite_endpoints_match_frames() {
        let mut body = test_body(InterpolationMode::Hermite);
        let f0 = frame(0, 0, 0.0, 5.0);
        let f1 = frame(100, 10, 10.0, 5.0);

        apply_interpolated(&mut body, &f0, &f1, 0.0, 0.1);
        assert!((body.position.x - 0.0).abs() < 1e-5);

        apply_interpolated(&mut body, &f0, &f1, 1.0, 0.1);
        assert!((body.position.x - 10.0).abs() < 1e-5);
    }

    #[test]
    fn interpolation_honors_field_mask() {
        let mut body = test_body(InterpolationMode::Linear);
        body.fields = SyncFields::POS;
        body.velocity = glam::Vec2::new(9.0, 9.0);

        let f0 = frame(0, 0, 0.0, 1.0);
        let f1 = frame(100, 10, 10.0, 3.0);
        apply_interpolated(&mut body, &f0, &f1, 0.5, 0.1);

        assert_eq!(body.position.x, 5.0);
        assert_eq!(body.velocity, glam::Vec2::new(9.0, 9.0));
    }
}
