//! The event channel the game logic talks through.
//!
//! Both tiers see the network as a queue of arrived events that they drain
//! once per tick, plus a way to send typed [`Event`]s. Delivery is reliable
//! and ordered per connection; nothing is promised across connections.
//! Socket handling lives in the tier crates; [`memory`] provides an
//! in-process implementation for tests and local play.

use crate::error::ConnectionError;
use crate::protocol::{Event, Message};
use log::warn;
use std::fmt;

/// Server-side handle for one client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnId(pub u32);

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected { reason: String },
    Message(Message),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    ClientConnected(ConnId),
    ClientDisconnected(ConnId),
    Message(ConnId, Message),
}

pub trait ClientTransport {
    fn send(&mut self, event: &Event) -> Result<(), ConnectionError>;

    /// Everything that arrived since the previous call, in arrival order.
    fn poll_events(&mut self) -> Vec<ClientEvent>;
}

pub trait ServerTransport {
    fn send_to(&mut self, conn: ConnId, event: &Event) -> Result<(), ConnectionError>;

    fn connections(&self) -> Vec<ConnId>;

    /// Drops a connection from the server side. No disconnect event is
    /// queued for it; the caller already knows.
    fn disconnect(&mut self, conn: ConnId);

    /// Everything that arrived since the previous call, in arrival order.
    fn poll_events(&mut self) -> Vec<ServerEvent>;

    /// Sends to every connection except `exclude`. Individual failures are
    /// logged and skipped.
    fn broadcast(&mut self, event: &Event, exclude: Option<ConnId>) {
        for conn in self.connections() {
            if Some(conn) == exclude {
                continue;
            }
            if let Err(e) = self.send_to(conn, event) {
                warn!("Failed to send {} to {}: {}", event.name(), conn, e);
            }
        }
    }
}

pub mod memory {
    //! Channel-backed transport connecting clients and a server inside one
    //! process.

    use super::*;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc::error::TryRecvError;
    use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

    pub struct MemoryServer {
        inbox_tx: UnboundedSender<ServerEvent>,
        inbox: UnboundedReceiver<ServerEvent>,
        clients: BTreeMap<ConnId, UnboundedSender<ClientEvent>>,
        next_id: u32,
    }

    impl Default for MemoryServer {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MemoryServer {
        pub fn new() -> Self {
            let (inbox_tx, inbox) = unbounded_channel();
            Self {
                inbox_tx,
                inbox,
                clients: BTreeMap::new(),
                next_id: 1,
            }
        }

        /// Opens a new client connection to this server.
        pub fn connect(&mut self) -> MemoryClient {
            let id = ConnId(self.next_id);
            self.next_id += 1;

            let (tx, rx) = unbounded_channel();
            let _ = tx.send(ClientEvent::Connected);
            self.clients.insert(id, tx);
            let _ = self.inbox_tx.send(ServerEvent::ClientConnected(id));

            MemoryClient {
                id,
                server: self.inbox_tx.clone(),
                inbox: rx,
                closed: false,
            }
        }
    }

    impl ServerTransport for MemoryServer {
        fn send_to(&mut self, conn: ConnId, event: &Event) -> Result<(), ConnectionError> {
            let client = self
                .clients
                .get(&conn)
                .ok_or(ConnectionError::UnknownConnection(conn.0))?;
            client
                .send(ClientEvent::Message(event.to_message()))
                .map_err(|_| ConnectionError::Closed)
        }

        fn connections(&self) -> Vec<ConnId> {
            self.clients.keys().copied().collect()
        }

        fn disconnect(&mut self, conn: ConnId) {
            if let Some(client) = self.clients.remove(&conn) {
                let _ = client.send(ClientEvent::Disconnected {
                    reason: "closed by server".to_string(),
                });
            }
        }

        fn poll_events(&mut self) -> Vec<ServerEvent> {
            let mut events = Vec::new();
            while let Ok(event) = self.inbox.try_recv() {
                if let ServerEvent::ClientDisconnected(conn) = event {
                    if self.clients.remove(&conn).is_none() {
                        continue;
                    }
                }
                events.push(event);
            }
            events
        }
    }

    pub struct MemoryClient {
        id: ConnId,
        server: UnboundedSender<ServerEvent>,
        inbox: UnboundedReceiver<ClientEvent>,
        closed: bool,
    }

    impl MemoryClient {
        pub fn id(&self) -> ConnId {
            self.id
        }

        pub fn is_closed(&self) -> bool {
            self.closed
        }

        /// Sends an untyped message, bypassing [`Event`] construction.
        pub fn send_message(&mut self, message: Message) -> Result<(), ConnectionError> {
            if self.closed {
                return Err(ConnectionError::Closed);
            }
            self.server
                .send(ServerEvent::Message(self.id, message))
                .map_err(|_| ConnectionError::Closed)
        }
    }

    impl ClientTransport for MemoryClient {
        fn send(&mut self, event: &Event) -> Result<(), ConnectionError> {
            self.send_message(event.to_message())
        }

        fn poll_events(&mut self) -> Vec<ClientEvent> {
            let mut events = Vec::new();
            loop {
                match self.inbox.try_recv() {
                    Ok(event) => {
                        if matches!(event, ClientEvent::Disconnected { .. }) {
                            self.closed = true;
                        }
                        events.push(event);
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        if !self.closed {
                            self.closed = true;
                            events.push(ClientEvent::Disconnected {
                                reason: "server gone".to_string(),
                            });
                        }
                        break;
                    }
                }
            }
            events
        }
    }

    impl Drop for MemoryClient {
        fn drop(&mut self) {
            if !self.closed {
                let _ = self.server.send(ServerEvent::ClientDisconnected(self.id));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryServer;
    use super::*;

    fn hi(name: &str) -> Event {
        Event::Hi {
            name: name.to_string(),
        }
    }

    #[test]
    fn test_connect_emits_events_on_both_sides() {
        let mut server = MemoryServer::new();
        let mut client = server.connect();

        assert_eq!(
            server.poll_events(),
            vec![ServerEvent::ClientConnected(client.id())]
        );
        assert_eq!(client.poll_events(), vec![ClientEvent::Connected]);
    }

    #[test]
    fn test_per_connection_order_is_kept() {
        let mut server = MemoryServer::new();
        let mut client = server.connect();
        server.poll_events();

        client.send(&hi("a")).unwrap();
        client.send(&hi("b")).unwrap();

        let events = server.poll_events();
        assert_eq!(
            events,
            vec![
                ServerEvent::Message(client.id(), hi("a").to_message()),
                ServerEvent::Message(client.id(), hi("b").to_message()),
            ]
        );
    }

    #[test]
    fn test_broadcast_excludes_sender() {
        let mut server = MemoryServer::new();
        let mut a = server.connect();
        let mut b = server.connect();
        a.poll_events();
        b.poll_events();

        server.broadcast(&Event::NickInUse, Some(a.id()));

        assert!(a.poll_events().is_empty());
        assert_eq!(
            b.poll_events(),
            vec![ClientEvent::Message(Event::NickInUse.to_message())]
        );
    }

    #[test]
    fn test_dropping_client_reports_disconnect() {
        let mut server = MemoryServer::new();
        let client = server.connect();
        let id = client.id();
        drop(client);

        let events = server.poll_events();
        assert_eq!(
            events,
            vec![
                ServerEvent::ClientConnected(id),
                ServerEvent::ClientDisconnected(id)
            ]
        );
        assert!(server.connections().is_empty());
    }

    #[test]
    fn test_server_disconnect_closes_client() {
        let mut server = MemoryServer::new();
        let mut client = server.connect();
        server.disconnect(client.id());

        let events = client.poll_events();
        assert!(matches!(
            events.last(),
            Some(ClientEvent::Disconnected { .. })
        ));
        assert!(client.send(&hi("late")).is_err());
        assert!(matches!(
            server.send_to(client.id(), &Event::NickInUse),
            Err(ConnectionError::UnknownConnection(_))
        ));
    }
}
