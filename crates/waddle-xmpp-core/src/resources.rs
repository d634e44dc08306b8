//! Resource binding registry.
//!
//! Tracks which resources are bound to which session and to which bare
//! address. The protocol worker consults it to check that a client only
//! sends from resources it actually bound.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::addressing::Entity;

#[derive(Debug, Clone)]
struct BoundResource {
    session_id: Uuid,
    bare: Entity,
}

#[derive(Debug, Default)]
struct Inner {
    by_resource: HashMap<String, BoundResource>,
    by_entity: HashMap<Entity, Vec<String>>,
    by_session: HashMap<Uuid, Vec<String>>,
}

/// Registry of bound resources.
///
/// The three indexes are updated together under one lock so a lookup never
/// sees a resource bound in one index and missing from another.
#[derive(Debug)]
pub struct ResourceRegistry {
    inner: RwLock<Inner>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        info!("Creating resource registry");
        Self {
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Bind a freshly generated resource for `session_id` under the bare
    /// form of `entity`. A session may bind several resources.
    #[instrument(skip(self), fields(session_id = %session_id, entity = %entity))]
    pub fn bind_session(&self, session_id: Uuid, entity: &Entity) -> String {
        let resource = Uuid::new_v4().to_string();
        let bare = entity.bare();

        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner.by_resource.insert(
            resource.clone(),
            BoundResource {
                session_id,
                bare: bare.clone(),
            },
        );
        inner.by_entity.entry(bare).or_default().push(resource.clone());
        inner.by_session.entry(session_id).or_default().push(resource.clone());

        debug!(resource = %resource, "Bound resource");
        resource
    }

    /// Remove one resource. Returns `true` when its session has no bound
    /// resources left; unknown resources return `false`.
    pub fn unbind_resource(&self, resource: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(bound) = inner.by_resource.remove(resource) else {
            return false;
        };

        if let Some(list) = inner.by_entity.get_mut(&bound.bare) {
            list.retain(|r| r != resource);
            if list.is_empty() {
                inner.by_entity.remove(&bound.bare);
            }
        }

        let none_left = match inner.by_session.get_mut(&bound.session_id) {
            Some(list) => {
                list.retain(|r| r != resource);
                list.is_empty()
            }
            None => true,
        };
        if none_left {
            inner.by_session.remove(&bound.session_id);
        }

        debug!(resource = %resource, "Unbound resource");
        none_left
    }

    /// Remove every resource bound by `session_id`.
    pub fn unbind_session(&self, session_id: Uuid) {
        for resource in self.resources_for_session(session_id) {
            self.unbind_resource(&resource);
        }
    }

    /// Resources bound for `entity`.
    ///
    /// A bare `entity`, or `consider_bare`, yields every resource of the
    /// bare address. Otherwise the result is the entity's own resource if it
    /// is bound, or nothing.
    pub fn bound_resources(&self, entity: &Entity, consider_bare: bool) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let Some(list) = inner.by_entity.get(&entity.bare()) else {
            return Vec::new();
        };
        match entity.resource() {
            Some(resource) if !consider_bare => list
                .iter()
                .filter(|r| r.as_str() == resource)
                .cloned()
                .collect(),
            _ => list.clone(),
        }
    }

    pub fn resources_for_session(&self, session_id: Uuid) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_session.get(&session_id).cloned().unwrap_or_default()
    }

    /// The session's resource if it bound exactly one.
    pub fn unique_resource_for_session(&self, session_id: Uuid) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        match inner.by_session.get(&session_id).map(Vec::as_slice) {
            Some([only]) => Some(only.clone()),
            _ => None,
        }
    }

    /// The session owning `resource`.
    pub fn session_for_resource(&self, resource: &str) -> Option<Uuid> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.by_resource.get(resource).map(|bound| bound.session_id)
    }

    /// Number of bound resources across all sessions.
    pub fn resource_count(&self) -> usize {
        self.inner
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .by_resource
            .len()
    }
}

impl Default for ResourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entity(s: &str) -> Entity {
        Entity::parse(s).unwrap()
    }

    #[test]
    fn test_bind_session() {
        let registry = ResourceRegistry::new();
        let session = Uuid::new_v4();
        let resource = registry.bind_session(session, &entity("me@test"));

        assert_eq!(registry.resources_for_session(session), vec![resource.clone()]);
        assert_eq!(registry.session_for_resource(&resource), Some(session));
    }

    #[test]
    fn test_multiple_sessions_same_entity() {
        let registry = ResourceRegistry::new();
        let (s1, s2) = (Uuid::new_v4(), Uuid::new_v4());
        let r1 = registry.bind_session(s1, &entity("me@test/xy"));
        let r2 = registry.bind_session(s2, &entity("me@test/ab"));
        assert_ne!(r1, r2);

        let bound = registry.bound_resources(&entity("me@test"), false);
        assert_eq!(bound.len(), 2);
        assert!(bound.contains(&r1));
        assert!(bound.contains(&r2));
    }

    #[test]
    fn test_bound_resources_full_address() {
        let registry = ResourceRegistry::new();
        let session = Uuid::new_v4();
        let r1 = registry.bind_session(session, &entity("me@test"));
        registry.bind_session(session, &entity("me@test"));

        let full = entity("me@test").with_resource(&r1);
        assert_eq!(registry.bound_resources(&full, false), vec![r1.clone()]);
        assert_eq!(registry.bound_resources(&full, true).len(), 2);

        let unknown = entity("me@test/nope");
        assert!(registry.bound_resources(&unknown, false).is_empty());
    }

    #[test]
    fn test_unbind_resource() {
        let registry = ResourceRegistry::new();
        let session = Uuid::new_v4();
        let r1 = registry.bind_session(session, &entity("me@test"));
        let r2 = registry.bind_session(session, &entity("me@test"));

        assert!(!registry.unbind_resource(&r1));
        assert!(registry.unbind_resource(&r2));
        assert!(registry.bound_resources(&entity("me@test"), false).is_empty());
        assert!(!registry.unbind_resource("missing"));
    }

    #[test]
    fn test_unbind_session() {
        let registry = ResourceRegistry::new();
        let session = Uuid::new_v4();
        let resource = registry.bind_session(session, &entity("me@test"));
        registry.unbind_session(session);

        assert_eq!(registry.session_for_resource(&resource), None);
        assert_eq!(registry.resource_count(), 0);
    }

    #[test]
    fn test_unique_resource() {
        let registry = ResourceRegistry::new();
        let session = Uuid::new_v4();
        let r1 = registry.bind_session(session, &entity("me@test"));
        assert_eq!(registry.unique_resource_for_session(session), Some(r1));

        registry.bind_session(session, &entity("me@test"));
        assert_eq!(registry.unique_resource_for_session(session), None);
    }
}
