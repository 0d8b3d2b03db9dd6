use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{ConnId, DeliveryClass, Transport, TransportEvent};

type EndpointId = u64;

#[derive(Debug, Clone)]
enum Envelope {
    Connect { app_id: String },
    Accept,
    Deny,
    Disconnect,
    Data(Vec<u8>),
}

#[derive(Debug, Default)]
struct Endpoint {
    inbox: VecDeque<(EndpointId, Envelope)>,
}

#[derive(Debug, Default)]
struct NetworkInner {
    endpoints: HashMap<EndpointId, Endpoint>,
    listeners: HashMap<u16, EndpointId>,
    next_endpoint: EndpointId,
}

/// In-process message broker shared by a set of [`MemoryTransport`]
/// endpoints. Delivery is lossless and in order for every class, which makes
/// engine behavior deterministic under test.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    inner: Arc<Mutex<NetworkInner>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NetworkInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn register_endpoint(&self) -> EndpointId {
        let mut inner = self.lock();
        let id = inner.next_endpoint;
        inner.next_endpoint += 1;
        inner.endpoints.insert(id, Endpoint::default());
        id
    }

    fn post(&self, from: EndpointId, to: EndpointId, envelope: Envelope) {
        let mut inner = self.lock();
        if let Some(endpoint) = inner.endpoints.get_mut(&to) {
            endpoint.inbox.push_back((from, envelope));
        }
    }

    fn drain(&self, endpoint: EndpointId) -> Vec<(EndpointId, Envelope)> {
        let mut inner = self.lock();
        match inner.endpoints.get_mut(&endpoint) {
            Some(e) => e.inbox.drain(..).collect(),
            None => Vec::new(),
        }
    }
}

/// Transport over a [`MemoryNetwork`]. Mirrors the UDP transport's handshake
/// (app-id check, accept/deny) without sockets or loss.
pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: EndpointId,
    app_id: String,
    listening: bool,
    conns: HashMap<ConnId, EndpointId>,
    by_endpoint: HashMap<EndpointId, ConnId>,
    next_conn_id: ConnId,
    connected: bool,
}

impl MemoryTransport {
    pub fn new(network: &MemoryNetwork, app_id: &str) -> Self {
        Self {
            network: network.clone(),
            endpoint: network.register_endpoint(),
            app_id: app_id.to_owned(),
            listening: false,
            conns: HashMap::new(),
            by_endpoint: HashMap::new(),
            next_conn_id: 1,
            connected: false,
        }
    }

    fn map_conn(&mut self, endpoint: EndpointId) -> ConnId {
        if let Some(&id) = self.by_endpoint.get(&endpoint) {
            return id;
        }
        let id = self.next_conn_id;
        self.next_conn_id += 1;
        self.conns.insert(id, endpoint);
        self.by_endpoint.insert(endpoint, id);
        id
    }

    fn unmap_conn(&mut self, conn: ConnId) -> Option<EndpointId> {
        let endpoint = self.conns.remove(&conn)?;
        self.by_endpoint.remove(&endpoint);
        Some(endpoint)
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, _host: &str, port: u16) -> io::Result<()> {
        let listener = self.network.lock().listeners.get(&port).copied();
        let Some(listener) = listener else {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "no listener on that port",
            ));
        };
        self.map_conn(listener);
        self.network.post(
            self.endpoint,
            listener,
            Envelope::Connect {
                app_id: self.app_id.clone(),
            },
        );
        Ok(())
    }

    fn listen(&mut self, port: u16) -> io::Result<()> {
        let mut inner = self.network.lock();
        if inner.listeners.contains_key(&port) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                "port already has a listener",
            ));
        }
        inner.listeners.insert(port, self.endpoint);
        drop(inner);
        self.listening = true;
        Ok(())
    }

    fn send(&mut self, conn: ConnId, data: &[u8], _class: DeliveryClass) -> io::Result<()> {
        let Some(&endpoint) = self.conns.get(&conn) else {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "unknown connection",
            ));
        };
        self.network
            .post(self.endpoint, endpoint, Envelope::Data(data.to_vec()));
        Ok(())
    }

    fn broadcast(&mut self, data: &[u8], class: DeliveryClass) -> io::Result<()> {
        for id in self.connection_ids() {
            self.send(id, data, class)?;
        }
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        for (from, envelope) in self.network.drain(self.endpoint) {
            match envelope {
                Envelope::Connect { app_id } => {
                    if !self.listening {
                        continue;
                    }
                    if app_id != self.app_id {
                        self.network.post(self.endpoint, from, Envelope::Deny);
                        continue;
                    }
                    let fresh = !self.by_endpoint.contains_key(&from);
                    let id = self.map_conn(from);
                    if fresh {
                        events.push(TransportEvent::PeerConnected(id));
                    }
                    self.network.post(self.endpoint, from, Envelope::Accept);
                }
                Envelope::Accept => {
                    let id = self.map_conn(from);
                    if !self.connected {
                        self.connected = true;
                        events.push(TransportEvent::PeerConnected(id));
                    }
                }
                Envelope::Deny => {
                    if let Some(&id) = self.by_endpoint.get(&from) {
                        self.unmap_conn(id);
                        events.push(TransportEvent::PeerDisconnected(id));
                    }
                }
                Envelope::Disconnect => {
                    if let Some(&id) = self.by_endpoint.get(&from) {
                        self.unmap_conn(id);
                        events.push(TransportEvent::PeerDisconnected(id));
                    }
                }
                Envelope::Data(data) => {
                    if let Some(&id) = self.by_endpoint.get(&from) {
                        events.push(TransportEvent::Data(id, data));
                    }
                }
            }
        }
        events
    }

    fn disconnect(&mut self, conn: ConnId) {
        if let Some(endpoint) = self.unmap_conn(conn) {
            self.network
                .post(self.endpoint, endpoint, Envelope::Disconnect);
            self.connected = false;
        }
    }

    fn connection_ids(&self) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self.conns.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn is_connected(&self) -> bool {
        if self.listening {
            !self.conns.is_empty()
        } else {
            self.connected
        }
    }
}
