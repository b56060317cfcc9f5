//! Connection and nickname registry for the race server
//!
//! This module tracks every open connection and the player name it claimed:
//! - Connection lifecycle (connect, name registration, disconnect)
//! - Nickname uniqueness across connections
//! - Client capacity management
//!
//! A connection only becomes a player once it has registered a name with
//! `hi`; until then the game ignores everything it sends.

use log::info;
use shared::ConnId;
use std::collections::BTreeMap;
use std::time::Instant;

/// Represents one open connection
#[derive(Debug)]
pub struct Client {
    /// Transport handle for sending responses
    pub id: ConnId,
    /// Player name, once `hi` was accepted
    pub name: Option<String>,
    /// When the connection was opened
    pub connected_at: Instant,
}

impl Client {
    /// Creates an unregistered client for the given connection
    pub fn new(id: ConnId) -> Self {
        Self {
            id,
            name: None,
            connected_at: Instant::now(),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.name.is_some()
    }
}

/// Outcome of a name registration attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The name is now bound to the connection
    Registered,
    /// Another connection already uses the name
    NickInUse,
    /// The connection already has a name; it keeps it
    AlreadyRegistered(String),
    /// The connection is not known
    UnknownConnection,
}

/// Manages all open connections and the names they registered
///
/// The ClientManager enforces the server capacity limit and guarantees that
/// no two connections share a player name.
pub struct ClientManager {
    /// Open connections indexed by handle
    clients: BTreeMap<ConnId, Client>,
    /// Maximum number of concurrent connections allowed
    max_clients: usize,
}

impl ClientManager {
    /// Creates a new client manager with the specified capacity limit
    pub fn new(max_clients: usize) -> Self {
        Self {
            clients: BTreeMap::new(),
            max_clients,
        }
    }

    /// Accepts a new connection
    ///
    /// Returns false if the server is at capacity; the caller is expected
    /// to say goodbye and drop the connection.
    pub fn add_client(&mut self, id: ConnId) -> bool {
        if self.clients.len() >= self.max_clients {
            return false;
        }

        info!("Client {} connected", id);
        self.clients.insert(id, Client::new(id));
        true
    }

    /// Removes a connection
    ///
    /// Returns the removed client so the caller can announce the player
    /// leaving, or None if it was already gone.
    pub fn remove_client(&mut self, id: &ConnId) -> Option<Client> {
        let client = self.clients.remove(id)?;
        match &client.name {
            Some(name) => info!("Client {} ({}) disconnected", id, name),
            None => info!("Client {} disconnected", id),
        }
        Some(client)
    }

    /// Binds a player name to a connection
    ///
    /// Names are unique across connections. A connection that already has
    /// a name keeps it and the request is ignored.
    pub fn register_name(&mut self, id: ConnId, name: &str) -> Registration {
        if self.find_by_name(name).is_some_and(|owner| owner != id) {
            return Registration::NickInUse;
        }

        let Some(client) = self.clients.get_mut(&id) else {
            return Registration::UnknownConnection;
        };
        if let Some(existing) = &client.name {
            return Registration::AlreadyRegistered(existing.clone());
        }

        info!("Client {} registered as {}", id, name);
        client.name = Some(name.to_string());
        Registration::Registered
    }

    /// Player name of a connection, if it registered one
    pub fn name_of(&self, id: ConnId) -> Option<&str> {
        self.clients.get(&id).and_then(|c| c.name.as_deref())
    }

    /// Finds the connection a player name is bound to
    pub fn find_by_name(&self, name: &str) -> Option<ConnId> {
        self.clients
            .values()
            .find(|client| client.name.as_deref() == Some(name))
            .map(|client| client.id)
    }

    /// All registered players in connection order
    pub fn registered(&self) -> Vec<(ConnId, String)> {
        self.clients
            .values()
            .filter_map(|client| client.name.clone().map(|name| (client.id, name)))
            .collect()
    }

    /// Number of connections that completed `hi`
    pub fn registered_count(&self) -> usize {
        self.clients.values().filter(|c| c.is_registered()).count()
    }

    /// Returns the number of open connections
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns true if no connections are open
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Tests cover connection lifecycle, capacity enforcement and nickname
/// uniqueness.
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = Client::new(ConnId(1));
        assert_eq!(client.id, ConnId(1));
        assert!(!client.is_registered());
    }

    #[test]
    fn test_client_manager_creation() {
        let manager = ClientManager::new(5);
        assert_eq!(manager.max_clients, 5);
        assert!(manager.is_empty());
        assert_eq!(manager.len(), 0);
    }

    #[test]
    fn test_add_client_max_capacity() {
        let mut manager = ClientManager::new(1);

        assert!(manager.add_client(ConnId(1)));
        assert_eq!(manager.len(), 1);

        assert!(!manager.add_client(ConnId(2)));
        assert_eq!(manager.len(), 1);
    }

    #[test]
    fn test_register_name() {
        let mut manager = ClientManager::new(4);
        manager.add_client(ConnId(1));

        assert_eq!(
            manager.register_name(ConnId(1), "Alice"),
            Registration::Registered
        );
        assert_eq!(manager.name_of(ConnId(1)), Some("Alice"));
        assert_eq!(manager.find_by_name("Alice"), Some(ConnId(1)));
        assert_eq!(manager.registered_count(), 1);
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut manager = ClientManager::new(4);
        manager.add_client(ConnId(1));
        manager.add_client(ConnId(2));

        manager.register_name(ConnId(1), "Alice");
        assert_eq!(
            manager.register_name(ConnId(2), "Alice"),
            Registration::NickInUse
        );
        assert_eq!(manager.name_of(ConnId(2)), None);
        assert_eq!(manager.registered_count(), 1);
    }

    #[test]
    fn test_second_hi_keeps_first_name() {
        let mut manager = ClientManager::new(4);
        manager.add_client(ConnId(1));
        manager.register_name(ConnId(1), "Alice");

        assert_eq!(
            manager.register_name(ConnId(1), "Bob"),
            Registration::AlreadyRegistered("Alice".to_string())
        );
        assert_eq!(
            manager.register_name(ConnId(1), "Alice"),
            Registration::AlreadyRegistered("Alice".to_string())
        );
    }

    #[test]
    fn test_register_unknown_connection() {
        let mut manager = ClientManager::new(4);
        assert_eq!(
            manager.register_name(ConnId(9), "Ghost"),
            Registration::UnknownConnection
        );
    }

    #[test]
    fn test_remove_client_frees_name() {
        let mut manager = ClientManager::new(4);
        manager.add_client(ConnId(1));
        manager.add_client(ConnId(2));
        manager.register_name(ConnId(1), "Alice");

        let removed = manager.remove_client(&ConnId(1)).unwrap();
        assert_eq!(removed.name.as_deref(), Some("Alice"));
        assert!(manager.remove_client(&ConnId(1)).is_none());

        assert_eq!(
            manager.register_name(ConnId(2), "Alice"),
            Registration::Registered
        );
    }

    #[test]
    fn test_registered_in_connection_order() {
        let mut manager = ClientManager::new(4);
        for id in [3, 1, 2] {
            manager.add_client(ConnId(id));
        }
        manager.register_name(ConnId(3), "Carol");
        manager.register_name(ConnId(1), "Alice");

        assert_eq!(
            manager.registered(),
            vec![
                (ConnId(1), "Alice".to_string()),
                (ConnId(3), "Carol".to_string())
            ]
        );
    }
}
