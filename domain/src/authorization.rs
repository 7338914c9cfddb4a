//! Access-control collaborators consulted during fan-out.
//!
//! The registry asks [`AccessControl::can_view`] for every candidate connection
//! before delivering an event, so implementations must be cheap and must not block.

use crate::{ResourceType, UserId};
use dashmap::DashMap;
use log::*;
use std::collections::HashSet;

/// Decides whether `viewer` may see events about a resource owned by `owner`.
pub trait AccessControl: Send + Sync {
    fn can_view(
        &self,
        viewer: &str,
        owner: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> bool;
}

/// Users only ever see their own resources.
#[derive(Debug, Default, Clone, Copy)]
pub struct OwnerOnly;

impl AccessControl for OwnerOnly {
    fn can_view(&self, viewer: &str, owner: &str, _: ResourceType, _: &str) -> bool {
        viewer == owner
    }
}

/// Owners always see their resources; other users need an explicit grant on the
/// specific resource.
#[derive(Debug, Default)]
pub struct SharingGrants {
    grants: DashMap<(ResourceType, String), HashSet<UserId>>,
}

impl SharingGrants {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share a resource with a user. Idempotent.
    pub fn grant(&self, resource_type: ResourceType, resource_id: &str, user_id: &str) {
        self.grants
            .entry((resource_type, resource_id.to_string()))
            .or_default()
            .insert(user_id.to_string());
        debug!("Granted {user_id} access to {resource_type} {resource_id}");
    }

    /// Withdraw a share. Idempotent.
    pub fn revoke(&self, resource_type: ResourceType, resource_id: &str, user_id: &str) {
        let key = (resource_type, resource_id.to_string());
        if let Some(mut users) = self.grants.get_mut(&key) {
            users.remove(user_id);
            if users.is_empty() {
                drop(users); // Release lock before removal
                self.grants.remove(&key);
            }
        }
        debug!("Revoked {user_id} access to {resource_type} {resource_id}");
    }
}

impl AccessControl for SharingGrants {
    fn can_view(
        &self,
        viewer: &str,
        owner: &str,
        resource_type: ResourceType,
        resource_id: &str,
    ) -> bool {
        if viewer == owner {
            return true;
        }
        self.grants
            .get(&(resource_type, resource_id.to_string()))
            .is_some_and(|users| users.contains(viewer))
    }
}
