use crate::connection::{Connection, ConnectionId, ConnectionState};
use crate::error::{registry_error, Error, RegistryErrorKind};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::authorization::AccessControl;
use events::protocol::{SubscriptionKey, SubscriptionTarget};
use events::{Event, ResourceType};
use log::*;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Concurrent connection registry with dual indices.
///
/// Sessions register, subscribe and unregister; consumers only read. Lookups for
/// fan-out hold a shard lock just long enough to copy the matching connection ids.
pub struct ConnectionRegistry {
    /// Primary storage: lookup by connection_id for registration/cleanup - O(1)
    connections: DashMap<ConnectionId, Arc<Connection>>,

    /// Secondary index: subscription key → subscribed connections, for routing - O(1)
    subscription_index: DashMap<SubscriptionKey, HashSet<ConnectionId>>,

    access: Arc<dyn AccessControl>,
}

impl ConnectionRegistry {
    pub fn new(access: Arc<dyn AccessControl>) -> Self {
        Self {
            connections: DashMap::new(),
            subscription_index: DashMap::new(),
            access,
        }
    }

    /// Add a freshly authenticated connection and move it to `Open`.
    /// Fails if a connection with the same id is still registered.
    pub fn register(&self, connection: Arc<Connection>) -> Result<(), Error> {
        match self.connections.entry(connection.id().clone()) {
            Entry::Occupied(_) => {
                warn!("Rejecting duplicate registration of connection {}", connection.id());
                Err(registry_error(
                    RegistryErrorKind::DuplicateConnection,
                    "connection id is already registered",
                ))
            }
            Entry::Vacant(entry) => {
                connection.set_state(ConnectionState::Open);
                info!(
                    "Registered connection {} for user {}",
                    connection.id(),
                    connection.user_id()
                );
                entry.insert(connection);
                Ok(())
            }
        }
    }

    /// Remove a connection, drop its subscriptions and discard anything still
    /// queued for it. Unregistering an unknown id is a no-op.
    pub fn unregister(&self, connection_id: &ConnectionId) -> bool {
        let Some((_, connection)) = self.connections.remove(connection_id) else {
            return false;
        };

        connection.set_state(ConnectionState::Closing);
        for key in connection.take_subscriptions() {
            self.remove_from_index(&key, connection_id);
        }
        connection.close_outbound();
        connection.set_state(ConnectionState::Closed);

        info!(
            "Unregistered connection {} for user {} after {:?}",
            connection_id,
            connection.user_id(),
            connection.age()
        );
        true
    }

    /// Add a subscription to a connection. Returns `Ok(false)` if it was already
    /// present.
    pub fn subscribe(
        &self,
        connection_id: &ConnectionId,
        target: SubscriptionTarget,
    ) -> Result<bool, Error> {
        let connection = self.require(connection_id)?;
        let key = target.key();
        if !connection.add_subscription(target) {
            debug!("Connection {connection_id} already subscribed to {key}");
            return Ok(false);
        }

        self.subscription_index
            .entry(key.clone())
            .or_default()
            .insert(connection_id.clone());

        // Lost a race with unregister: its cleanup may have run before our insert.
        if !connection.is_open() {
            self.remove_from_index(&key, connection_id);
            return Err(registry_error(
                RegistryErrorKind::UnknownConnection,
                "connection closed while subscribing",
            ));
        }

        debug!("Connection {connection_id} subscribed to {key}");
        Ok(true)
    }

    /// Remove a subscription. Returns `Ok(false)` if it was not present.
    pub fn unsubscribe(
        &self,
        connection_id: &ConnectionId,
        target: &SubscriptionTarget,
    ) -> Result<bool, Error> {
        let connection = self.require(connection_id)?;
        let key = target.key();
        if !connection.remove_subscription(&key) {
            return Ok(false);
        }

        self.remove_from_index(&key, connection_id);
        debug!("Connection {connection_id} unsubscribed from {key}");
        Ok(true)
    }

    /// Open connections subscribed to the resource itself or to every resource of
    /// its type, whose user may see resources owned by `owner_id`. Each
    /// connection appears at most once.
    pub fn matching_connections(
        &self,
        resource_type: ResourceType,
        resource_id: &str,
        owner_id: &str,
    ) -> Vec<Arc<Connection>> {
        let keys = [
            SubscriptionKey::for_resource(resource_type, Some(resource_id)),
            SubscriptionKey::for_resource(resource_type, None),
        ];
        self.collect_matches(&keys, resource_type, resource_id, owner_id)
    }

    /// Like [`Self::matching_connections`], additionally matching subscriptions
    /// to the event's name.
    pub fn matching_connections_for(&self, event: &Event) -> Vec<Arc<Connection>> {
        let keys = [
            SubscriptionKey::for_resource(event.resource_type, Some(&event.resource_id)),
            SubscriptionKey::for_resource(event.resource_type, None),
            SubscriptionKey::for_event_type(&event.event_type),
        ];
        self.collect_matches(
            &keys,
            event.resource_type,
            &event.resource_id,
            &event.user_id,
        )
    }

    fn collect_matches(
        &self,
        keys: &[SubscriptionKey],
        resource_type: ResourceType,
        resource_id: &str,
        owner_id: &str,
    ) -> Vec<Arc<Connection>> {
        let mut ids: HashSet<ConnectionId> = HashSet::new();
        for key in keys {
            if let Some(subscribers) = self.subscription_index.get(key) {
                ids.extend(subscribers.iter().cloned());
            }
        }

        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).map(|entry| entry.value().clone()))
            .filter(|connection| connection.is_open())
            .filter(|connection| {
                self.access
                    .can_view(connection.user_id(), owner_id, resource_type, resource_id)
            })
            .collect()
    }

    /// Unregister every connection silent for longer than `idle_timeout`.
    pub fn evict_idle(&self, idle_timeout: Duration) -> Vec<ConnectionId> {
        let idle: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().idle_for() > idle_timeout)
            .map(|entry| entry.key().clone())
            .collect();

        for connection_id in &idle {
            warn!("Evicting connection {connection_id}: idle for more than {idle_timeout:?}");
            self.unregister(connection_id);
        }
        idle
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<Arc<Connection>> {
        self.connections
            .get(connection_id)
            .map(|entry| entry.value().clone())
    }

    pub fn subscriptions_of(&self, connection_id: &ConnectionId) -> Vec<SubscriptionTarget> {
        self.get(connection_id)
            .map(|connection| connection.subscriptions())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    fn require(&self, connection_id: &ConnectionId) -> Result<Arc<Connection>, Error> {
        self.get(connection_id).ok_or_else(|| {
            registry_error(
                RegistryErrorKind::UnknownConnection,
                "connection is not registered",
            )
        })
    }

    fn remove_from_index(&self, key: &SubscriptionKey, connection_id: &ConnectionId) {
        if let Some(mut entry) = self.subscription_index.get_mut(key) {
            entry.remove(connection_id);

            // Clean up empty subscription entries
            if entry.is_empty() {
                drop(entry); // Release lock before removal
                self.subscription_index
                    .remove_if(key, |_, subscribers| subscribers.is_empty());
            }
        }
    }
}
