use std::sync::atomic::{AtomicU16, Ordering};

use kinsync::{
    BodyHeader, BodyKinematicUpdate, BodyLifetimeUpdate, ConnId, DeliveryClass, EntityHandle,
    InterpolationMode, MemoryNetwork, MemoryTransport, Message, MessageRegistry, Presence,
    SyncConfig, SyncFields, Transport, TransportEvent, UpdateHeader,
};
use kinsync_client::{ClientSyncEngine, HostSimulation, RemoteBodySpec, SyncEvent};

static NEXT_PORT: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    NEXT_PORT.fetch_add(1, Ordering::SeqCst)
}

struct TestHost {
    now: i64,
    tick: f64,
    remote_mode: InterpolationMode,
    refuse_bodies: bool,
    next_entity: u64,
    created: Vec<EntityHandle>,
    destroyed: Vec<EntityHandle>,
}

impl TestHost {
    fn new() -> Self {
        Self {
            now: 1000,
            tick: 1.0 / 60.0,
            remote_mode: InterpolationMode::None,
            refuse_bodies: false,
            next_entity: 1,
            created: Vec::new(),
            destroyed: Vec::new(),
        }
    }
}

impl HostSimulation for TestHost {
    fn create_remote_body(&mut self, _tag: u32) -> Option<RemoteBodySpec> {
        if self.refuse_bodies {
            return None;
        }
        let entity = EntityHandle(self.next_entity);
        self.next_entity += 1;
        self.created.push(entity);
        Some(RemoteBodySpec::new(entity, self.remote_mode))
    }

    fn destroy_body(&mut self, entity: EntityHandle) {
        self.destroyed.push(entity);
    }

    fn current_time(&self) -> i64 {
        self.now
    }

    fn tick_duration(&self) -> f64 {
        self.tick
    }
}

/// Scripted stand-in for the relay server: decodes what the client sends and
/// replies with hand-built messages.
struct Puppet {
    transport: MemoryTransport,
    registry: MessageRegistry,
    conns: Vec<ConnId>,
    inbox: Vec<Message>,
}

impl Puppet {
    fn listen(network: &MemoryNetwork, port: u16) -> Self {
        let mut transport = MemoryTransport::new(network, "kinsync");
        transport.listen(port).unwrap();
        Self {
            transport,
            registry: MessageRegistry::with_protocol_order(),
            conns: Vec::new(),
            inbox: Vec::new(),
        }
    }

    fn pump(&mut self) {
        for event in self.transport.poll_events() {
            match event {
                TransportEvent::PeerConnected(conn) => self.conns.push(conn),
                TransportEvent::PeerDisconnected(conn) => self.conns.retain(|&c| c != conn),
                TransportEvent::Data(_, bytes) => {
                    self.inbox.push(self.registry.decode(&bytes).unwrap());
                }
            }
        }
    }

    fn send(&mut self, message: &Message) {
        let bytes = self.registry.encode(message).unwrap();
        self.transport
            .broadcast(&bytes, DeliveryClass::ReliableOrdered)
            .unwrap();
    }

    fn kinematics(&self) -> Vec<&BodyKinematicUpdate> {
        self.inbox
            .iter()
            .filter_map(|m| match m {
                Message::BodyKinematic(u) => Some(u),
                _ => None,
            })
            .collect()
    }
}

fn header(peer_id: u32, time: i64) -> UpdateHeader {
    UpdateHeader {
        sender_time: time,
        source_peer_id: peer_id,
    }
}

fn connect(
    network: &MemoryNetwork,
    host: &mut TestHost,
) -> (ClientSyncEngine<MemoryTransport>, Puppet) {
    let port = next_port();
    let mut puppet = Puppet::listen(network, port);

    let transport = MemoryTransport::new(network, "kinsync");
    let mut engine = ClientSyncEngine::new(transport, SyncConfig::default(), "tester");
    engine.connect("ignored", port).unwrap();

    // handshake, then presence announcement reaches the puppet
    engine.update(host).unwrap();
    puppet.pump();
    engine.update(host).unwrap();
    puppet.pump();

    // echo the join back so the engine flips to connected
    let own = Message::Presence(Presence {
        header: header(engine.local_peer_id(), host.now),
        peer_id: engine.local_peer_id(),
        here: true,
        nickname: "tester".into(),
    });
    puppet.send(&own);
    engine.update(host).unwrap();

    (engine, puppet)
}

/// Introduce a remote peer so bodies it owns survive the orphan sweep.
fn announce_peer(puppet: &mut Puppet, peer_id: u32, time: i64) {
    puppet.send(&Message::Presence(Presence {
        header: header(peer_id, time),
        peer_id,
        here: true,
        nickname: "other".into(),
    }));
}

#[test]
fn join_announces_presence_and_connects() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, puppet) = connect(&network, &mut host);

    let announced = puppet.inbox.iter().any(|m| {
        matches!(m, Message::Presence(p) if p.here && p.peer_id == engine.local_peer_id())
    });
    assert!(announced);
    assert!(engine.is_connected());
    assert!(
        engine
            .drain_events()
            .iter()
            .any(|e| matches!(e, SyncEvent::ConnectionStatusChanged(true)))
    );
}

#[test]
fn remote_body_lifecycle_is_exactly_once() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);
    announce_peer(&mut puppet, 77, host.now);

    let spawn = Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 5, tag: 3 },
        exists: true,
    });
    puppet.send(&spawn);
    puppet.send(&spawn);
    engine.update(&mut host).unwrap();
    assert_eq!(host.created.len(), 1);
    assert_eq!(engine.body(5).unwrap().owner_id, 77);

    let despawn = Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 5, tag: 3 },
        exists: false,
    });
    puppet.send(&despawn);
    puppet.send(&despawn);
    engine.update(&mut host).unwrap();
    assert_eq!(host.destroyed.len(), 1);
    assert!(engine.body(5).is_none());
}

#[test]
fn host_can_refuse_remote_bodies() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    host.refuse_bodies = true;
    let (mut engine, mut puppet) = connect(&network, &mut host);

    puppet.send(&Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 5, tag: 3 },
        exists: true,
    }));
    engine.update(&mut host).unwrap();

    assert!(host.created.is_empty());
    assert!(engine.body(5).is_none());

    // and its kinematic updates fall on the floor
    puppet.send(&Message::BodyKinematic(BodyKinematicUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 5, tag: 3 },
        position: [1.0, 1.0],
        velocity: [0.0, 0.0],
        angle: 0.0,
        angular_velocity: 0.0,
    }));
    engine.update(&mut host).unwrap();
    assert!(engine.body(5).is_none());
}

#[test]
fn direct_mode_applies_snapshots_immediately() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);
    announce_peer(&mut puppet, 77, host.now);

    puppet.send(&Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 9, tag: 0 },
        exists: true,
    }));
    puppet.send(&Message::BodyKinematic(BodyKinematicUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 9, tag: 0 },
        position: [4.0, -2.0],
        velocity: [1.0, 0.0],
        angle: 0.25,
        angular_velocity: 0.0,
    }));
    engine.update(&mut host).unwrap();

    let body = engine.body(9).unwrap();
    assert_eq!(body.position, glam::Vec2::new(4.0, -2.0));
    assert_eq!(body.angle, 0.25);
}

#[test]
fn linear_interpolation_hits_midpoint_then_holds() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    host.remote_mode = InterpolationMode::Linear;
    let (mut engine, mut puppet) = connect(&network, &mut host);
    announce_peer(&mut puppet, 77, host.now);

    puppet.send(&Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 9, tag: 0 },
        exists: true,
    }));
    engine.update(&mut host).unwrap();

    let sample = |time: i64, x: f32| {
        Message::BodyKinematic(BodyKinematicUpdate {
            header: header(77, time),
            body: BodyHeader { body_id: 9, tag: 0 },
            position: [x, 0.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
            angular_velocity: 0.0,
        })
    };

    // first frame received at t=1000, second at t=1100
    puppet.send(&sample(1000, 0.0));
    engine.update(&mut host).unwrap();
    host.now = 1100;
    puppet.send(&sample(1100, 10.0));
    engine.update(&mut host).unwrap();

    // halfway through the 100ms window
    host.now = 1150;
    engine.update(&mut host).unwrap();
    let x = engine.body(9).unwrap().position.x;
    assert!((x - 5.0).abs() < 1e-4, "expected midpoint, got {x}");

    // past the window: hold, never extrapolate
    host.now = 1400;
    engine.update(&mut host).unwrap();
    let held = engine.body(9).unwrap().position.x;
    assert!((held - x).abs() < 1e-4, "expected held pose, got {held}");
}

#[test]
fn future_stamped_sample_still_feeds_interpolation() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    host.remote_mode = InterpolationMode::Linear;
    let (mut engine, mut puppet) = connect(&network, &mut host);
    announce_peer(&mut puppet, 77, host.now);

    puppet.send(&Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 9, tag: 0 },
        exists: true,
    }));
    engine.update(&mut host).unwrap();

    let sample = |time: i64, x: f32| {
        Message::BodyKinematic(BodyKinematicUpdate {
            header: header(77, time),
            body: BodyHeader { body_id: 9, tag: 0 },
            position: [x, 0.0],
            velocity: [0.0, 0.0],
            angle: 0.0,
            angular_velocity: 0.0,
        })
    };

    puppet.send(&sample(1000, 0.0));
    engine.update(&mut host).unwrap();

    // the sender's clock runs 100ms ahead of ours
    host.now = 1100;
    puppet.send(&sample(1200, 10.0));
    engine.update(&mut host).unwrap();
    // buffered as a keyframe, not applied on the spot
    assert_eq!(engine.body(9).unwrap().position.x, 0.0);

    host.now = 1200;
    engine.update(&mut host).unwrap();
    let x = engine.body(9).unwrap().position.x;
    assert!((x - 5.0).abs() < 1e-4, "expected midpoint, got {x}");
}

#[test]
fn owned_bodies_broadcast_on_cadence() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);

    let body_id = engine.register_body(
        EntityHandle(50),
        1,
        InterpolationMode::None,
        SyncFields::all(),
    );
    engine.body_mut(body_id).unwrap().position = glam::Vec2::new(2.0, 3.0);

    // 500ms of ticks at 25ms; default snapshot rate is 20/s (50ms interval)
    for step in 0..20 {
        host.now = 1000 + step * 25;
        engine.update(&mut host).unwrap();
    }
    puppet.pump();

    let kinematics = puppet.kinematics();
    assert_eq!(kinematics.len(), 10);
    assert!(kinematics.iter().all(|u| u.body.body_id == body_id));
    assert_eq!(kinematics[0].position, [2.0, 3.0]);
}

#[test]
fn orphaned_bodies_are_destroyed_when_owner_leaves() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);

    puppet.send(&Message::Presence(Presence {
        header: header(77, host.now),
        peer_id: 77,
        here: true,
        nickname: "other".into(),
    }));
    puppet.send(&Message::BodyLifetime(BodyLifetimeUpdate {
        header: header(77, host.now),
        body: BodyHeader { body_id: 5, tag: 0 },
        exists: true,
    }));
    engine.update(&mut host).unwrap();
    assert_eq!(host.created.len(), 1);

    puppet.send(&Message::Presence(Presence {
        header: header(77, host.now),
        peer_id: 77,
        here: false,
        nickname: "other".into(),
    }));
    engine.update(&mut host).unwrap();

    assert_eq!(host.destroyed, host.created);
    assert!(engine.body(5).is_none());
    assert_eq!(engine.peers().count(), 0);
}

#[test]
fn echoed_sample_far_from_local_state_reports_desync() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);

    let body_id = engine.register_body(
        EntityHandle(50),
        0,
        InterpolationMode::None,
        SyncFields::all(),
    );
    engine.update(&mut host).unwrap();
    engine.drain_events();

    // authoritative echo places the body 10 units away
    puppet.send(&Message::BodyKinematic(BodyKinematicUpdate {
        header: header(engine.local_peer_id(), host.now),
        body: BodyHeader { body_id, tag: 0 },
        position: [10.0, 0.0],
        velocity: [0.0, 0.0],
        angle: 0.0,
        angular_velocity: 0.0,
    }));
    engine.update(&mut host).unwrap();

    let events = engine.drain_events();
    assert!(events.iter().any(|e| matches!(
        e,
        SyncEvent::DesyncDetected { body_id: id, position_error, .. }
            if *id == body_id && *position_error > 9.0
    )));
    // detection-only by default: local state untouched
    assert_eq!(engine.body(body_id).unwrap().position, glam::Vec2::ZERO);
}

#[test]
fn deregister_announces_despawn() {
    let network = MemoryNetwork::new();
    let mut host = TestHost::new();
    let (mut engine, mut puppet) = connect(&network, &mut host);

    let body_id = engine.register_body(
        EntityHandle(50),
        2,
        InterpolationMode::None,
        SyncFields::all(),
    );
    engine.update(&mut host).unwrap();
    engine.deregister_body(body_id);
    engine.update(&mut host).unwrap();
    puppet.pump();

    let lifetimes: Vec<bool> = puppet
        .inbox
        .iter()
        .filter_map(|m| match m {
            Message::BodyLifetime(u) if u.body.body_id == body_id => Some(u.exists),
            _ => None,
        })
        .collect();
    assert_eq!(lifetimes, vec![true, false]);
}
