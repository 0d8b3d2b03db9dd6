use std::collections::HashMap;

use glam::Vec2;
use kinsync::BodyKinematicUpdate;

/// Server-side record of one client-owned body. The server is a relay, not
/// a simulation; it keeps the last reported state so late joiners can be
/// caught up and monitoring has something to show.
#[derive(Debug, Clone)]
pub struct TrackedBody {
    pub owner_id: u32,
    pub body_id: u32,
    pub tag: u32,
    pub last_source_time: i64,
    pub last_received_at: i64,
    pub position: Vec2,
    pub velocity: Vec2,
    pub angle: f32,
    pub angular_velocity: f32,
}

impl TrackedBody {
    pub fn new(owner_id: u32, body_id: u32, tag: u32) -> Self {
        Self {
            owner_id,
            body_id,
            tag,
            last_source_time: 0,
            last_received_at: 0,
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            angle: 0.0,
            angular_velocity: 0.0,
        }
    }

    pub fn record(&mut self, update: &BodyKinematicUpdate, now: i64) {
        self.last_source_time = update.header.sender_time;
        self.last_received_at = now;
        self.position = Vec2::from(update.position);
        self.velocity = Vec2::from(update.velocity);
        self.angle = update.angle;
        self.angular_velocity = update.angular_velocity;
    }
}

/// Bodies grouped by owning peer. A peer must be added before bodies can be
/// attributed to it, and removing a peer yields its bodies for cleanup.
#[derive(Debug, Default)]
pub struct SceneDirectory {
    bodies_by_owner: HashMap<u32, Vec<TrackedBody>>,
}

impl SceneDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_peer(&mut self, owner_id: u32) {
        self.bodies_by_owner.entry(owner_id).or_default();
    }

    pub fn contains_peer(&self, owner_id: u32) -> bool {
        self.bodies_by_owner.contains_key(&owner_id)
    }

    /// Drops the peer and returns every body it owned.
    pub fn remove_peer(&mut self, owner_id: u32) -> Vec<TrackedBody> {
        self.bodies_by_owner.remove(&owner_id).unwrap_or_default()
    }

    /// Returns false when the owner is unknown or already has this body.
    pub fn insert_body(&mut self, body: TrackedBody) -> bool {
        let Some(bodies) = self.bodies_by_owner.get_mut(&body.owner_id) else {
            return false;
        };
        if bodies.iter().any(|b| b.body_id == body.body_id) {
            return false;
        }
        bodies.push(body);
        true
    }

    /// Returns false when the owner/body pair is unknown.
    pub fn remove_body(&mut self, owner_id: u32, body_id: u32) -> bool {
        let Some(bodies) = self.bodies_by_owner.get_mut(&owner_id) else {
            return false;
        };
        let before = bodies.len();
        bodies.retain(|b| b.body_id != body_id);
        bodies.len() < before
    }

    /// Records a kinematic sample against an existing body. Returns false
    /// for bodies never announced by this owner.
    pub fn update_body(&mut self, update: &BodyKinematicUpdate, now: i64) -> bool {
        let owner_id = update.header.source_peer_id;
        let Some(bodies) = self.bodies_by_owner.get_mut(&owner_id) else {
            return false;
        };
        match bodies.iter_mut().find(|b| b.body_id == update.body.body_id) {
            Some(body) => {
                body.record(update, now);
                true
            }
            None => false,
        }
    }

    pub fn bodies_of(&self, owner_id: u32) -> &[TrackedBody] {
        self.bodies_by_owner
            .get(&owner_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn iter_bodies(&self) -> impl Iterator<Item = &TrackedBody> {
        self.bodies_by_owner.values().flatten()
    }

    pub fn peer_count(&self) -> usize {
        self.bodies_by_owner.len()
    }

    pub fn body_count(&self) -> usize {
        self.bodies_by_owner.values().map(Vec::len).sum()
    }
}
