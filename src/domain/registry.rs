//! Live connection registry
//!
//! Process-local mapping from identity (resident or visitor) to active
//! transport connections. Entries are created on connect and destroyed on
//! disconnect; they never outlive the process and carry no ownership over
//! call records. The registry is an injectable instance created at startup
//! and drained at shutdown; a multi-process deployment would back these
//! maps with a shared keyed store instead.

use crate::domain::shared::value_objects::{SocketId, UserId, VisitorId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

/// Identity resolved for a connection at handshake time
///
/// A verified bearer token yields `User`; a missing or invalid token
/// downgrades the connection to `Visitor` - connections are never refused
/// for bad credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ConnectionIdentity {
    User { id: UserId, name: String },
    Visitor { id: VisitorId },
}

impl ConnectionIdentity {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            ConnectionIdentity::User { id, .. } => Some(*id),
            ConnectionIdentity::Visitor { .. } => None,
        }
    }

    pub fn visitor_id(&self) -> Option<&VisitorId> {
        match self {
            ConnectionIdentity::User { .. } => None,
            ConnectionIdentity::Visitor { id } => Some(id),
        }
    }

    pub fn display_name(&self) -> &str {
        match self {
            ConnectionIdentity::User { name, .. } => name,
            ConnectionIdentity::Visitor { .. } => "visitor",
        }
    }
}

/// Result of removing a socket from the registry
#[derive(Debug, Clone)]
pub struct Disconnection {
    pub identity: ConnectionIdentity,
    /// True when this was the user's last connection - the user is now
    /// offline, an observable side effect for presence
    pub user_went_offline: bool,
}

/// Registry summary, exposed for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total_connections: usize,
    pub online_users: usize,
    pub connected_visitors: usize,
}

/// Connection registry
///
/// One forward index (socket -> identity) and two reverse indexes: users
/// may hold several simultaneous connections (multiple devices), visitors
/// exactly one.
pub struct ConnectionRegistry {
    sockets: Mutex<HashMap<SocketId, ConnectionIdentity>>,
    user_sockets: Mutex<HashMap<UserId, HashSet<SocketId>>>,
    visitor_sockets: Mutex<HashMap<VisitorId, SocketId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            sockets: Mutex::new(HashMap::new()),
            user_sockets: Mutex::new(HashMap::new()),
            visitor_sockets: Mutex::new(HashMap::new()),
        }
    }

    /// Register a connection under its resolved identity
    pub fn register(&self, socket_id: SocketId, identity: ConnectionIdentity) {
        let mut sockets = self.sockets.lock().unwrap();
        sockets.insert(socket_id, identity.clone());

        match identity {
            ConnectionIdentity::User { id, .. } => {
                let mut user_sockets = self.user_sockets.lock().unwrap();
                user_sockets
                    .entry(id)
                    .or_insert_with(HashSet::new)
                    .insert(socket_id);
            }
            ConnectionIdentity::Visitor { id } => {
                // A visitor holds a single connection; a reconnect under the
                // same ephemeral id supersedes the previous socket.
                let mut visitor_sockets = self.visitor_sockets.lock().unwrap();
                visitor_sockets.insert(id, socket_id);
            }
        }
    }

    /// Remove a socket from every index
    pub fn unregister(&self, socket_id: &SocketId) -> Option<Disconnection> {
        let mut sockets = self.sockets.lock().unwrap();
        let identity = sockets.remove(socket_id)?;

        let user_went_offline = match &identity {
            ConnectionIdentity::User { id, .. } => {
                let mut user_sockets = self.user_sockets.lock().unwrap();
                if let Some(set) = user_sockets.get_mut(id) {
                    set.remove(socket_id);
                    if set.is_empty() {
                        user_sockets.remove(id);
                        true
                    } else {
                        false
                    }
                } else {
                    false
                }
            }
            ConnectionIdentity::Visitor { id } => {
                let mut visitor_sockets = self.visitor_sockets.lock().unwrap();
                // Only drop the reverse entry if it still points at this
                // socket; a reconnect may have superseded it.
                if visitor_sockets.get(id) == Some(socket_id) {
                    visitor_sockets.remove(id);
                }
                false
            }
        };

        Some(Disconnection {
            identity,
            user_went_offline,
        })
    }

    /// All live connections for a user (multi-device)
    pub fn connections_for(&self, user_id: &UserId) -> Vec<SocketId> {
        let user_sockets = self.user_sockets.lock().unwrap();
        user_sockets
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The visitor's single live connection, if any
    pub fn connection_for(&self, visitor_id: &VisitorId) -> Option<SocketId> {
        let visitor_sockets = self.visitor_sockets.lock().unwrap();
        visitor_sockets.get(visitor_id).copied()
    }

    /// Identity registered for a socket
    pub fn identity_of(&self, socket_id: &SocketId) -> Option<ConnectionIdentity> {
        let sockets = self.sockets.lock().unwrap();
        sockets.get(socket_id).cloned()
    }

    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        let user_sockets = self.user_sockets.lock().unwrap();
        user_sockets.contains_key(user_id)
    }

    pub fn online_user_count(&self) -> usize {
        let user_sockets = self.user_sockets.lock().unwrap();
        user_sockets.len()
    }

    pub fn statistics(&self) -> RegistryStatistics {
        let sockets = self.sockets.lock().unwrap();
        let user_sockets = self.user_sockets.lock().unwrap();
        let visitor_sockets = self.visitor_sockets.lock().unwrap();

        RegistryStatistics {
            total_connections: sockets.len(),
            online_users: user_sockets.len(),
            connected_visitors: visitor_sockets.len(),
        }
    }

    /// Drop every entry; used at shutdown. Returns the number of
    /// connections that were still registered.
    pub fn drain(&self) -> usize {
        let mut sockets = self.sockets.lock().unwrap();
        let mut user_sockets = self.user_sockets.lock().unwrap();
        let mut visitor_sockets = self.visitor_sockets.lock().unwrap();

        let count = sockets.len();
        sockets.clear();
        user_sockets.clear();
        visitor_sockets.clear();
        count
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user_identity(id: UserId) -> ConnectionIdentity {
        ConnectionIdentity::User {
            id,
            name: "Alice".to_string(),
        }
    }

    #[test]
    fn test_register_and_resolve_user() {
        let registry = ConnectionRegistry::new();
        let user_id = UserId::new();
        let socket = SocketId::new();

        registry.register(socket, user_identity(user_id));

        assert!(registry.is_user_online(&user_id));
        assert_eq!(registry.connections_for(&user_id), vec![socket]);
        assert_eq!(
            registry.identity_of(&socket).unwrap().user_id(),
            Some(user_id)
        );
    }

    #[test]
    fn test_multi_device_user() {
        let registry = ConnectionRegistry::new();
        let user_id = UserId::new();
        let phone = SocketId::new();
        let tablet = SocketId::new();

        registry.register(phone, user_identity(user_id));
        registry.register(tablet, user_identity(user_id));

        let connections = registry.connections_for(&user_id);
        assert_eq!(connections.len(), 2);
        assert!(connections.contains(&phone));
        assert!(connections.contains(&tablet));
    }

    #[test]
    fn test_last_disconnect_takes_user_offline() {
        let registry = ConnectionRegistry::new();
        let user_id = UserId::new();
        let phone = SocketId::new();
        let tablet = SocketId::new();

        registry.register(phone, user_identity(user_id));
        registry.register(tablet, user_identity(user_id));

        let first = registry.unregister(&phone).unwrap();
        assert!(!first.user_went_offline);
        assert!(registry.is_user_online(&user_id));

        let second = registry.unregister(&tablet).unwrap();
        assert!(second.user_went_offline);
        assert!(!registry.is_user_online(&user_id));
    }

    #[test]
    fn test_unregister_removes_from_every_index() {
        let registry = ConnectionRegistry::new();
        let visitor = VisitorId::from_raw("lobby-kiosk");
        let socket = SocketId::new();

        registry.register(socket, ConnectionIdentity::Visitor { id: visitor.clone() });
        registry.unregister(&socket);

        assert!(registry.identity_of(&socket).is_none());
        assert!(registry.connection_for(&visitor).is_none());
        assert_eq!(registry.statistics().total_connections, 0);
    }

    #[test]
    fn test_unregister_unknown_socket() {
        let registry = ConnectionRegistry::new();
        assert!(registry.unregister(&SocketId::new()).is_none());
    }

    #[test]
    fn test_visitor_reconnect_supersedes_old_socket() {
        let registry = ConnectionRegistry::new();
        let visitor = VisitorId::from_raw("gate");
        let old = SocketId::new();
        let new = SocketId::new();

        registry.register(old, ConnectionIdentity::Visitor { id: visitor.clone() });
        registry.register(new, ConnectionIdentity::Visitor { id: visitor.clone() });

        assert_eq!(registry.connection_for(&visitor), Some(new));

        // The stale socket's late disconnect must not clobber the new entry
        registry.unregister(&old);
        assert_eq!(registry.connection_for(&visitor), Some(new));
    }

    #[test]
    fn test_reconnect_is_independent_of_stale_entry() {
        let registry = ConnectionRegistry::new();
        let user_id = UserId::new();
        let old = SocketId::new();

        registry.register(old, user_identity(user_id));
        registry.unregister(&old);

        let new = SocketId::new();
        registry.register(new, user_identity(user_id));

        assert_eq!(registry.connections_for(&user_id), vec![new]);
        assert!(registry.identity_of(&old).is_none());
    }

    #[test]
    fn test_statistics() {
        let registry = ConnectionRegistry::new();
        registry.register(SocketId::new(), user_identity(UserId::new()));
        registry.register(SocketId::new(), user_identity(UserId::new()));
        registry.register(
            SocketId::new(),
            ConnectionIdentity::Visitor { id: VisitorId::new() },
        );

        let stats = registry.statistics();
        assert_eq!(stats.total_connections, 3);
        assert_eq!(stats.online_users, 2);
        assert_eq!(stats.connected_visitors, 1);
    }

    #[test]
    fn test_drain() {
        let registry = ConnectionRegistry::new();
        registry.register(SocketId::new(), user_identity(UserId::new()));
        registry.register(
            SocketId::new(),
            ConnectionIdentity::Visitor { id: VisitorId::new() },
        );

        assert_eq!(registry.drain(), 2);
        assert_eq!(registry.statistics().total_connections, 0);
        assert_eq!(registry.online_user_count(), 0);
    }
}
