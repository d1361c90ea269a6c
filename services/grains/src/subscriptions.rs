//! Subscription Registry
//!
//! Cluster-wide bookkeeping of which stream subscriptions belong to which
//! caller identity. A single activation under [`REGISTRY_KEY`] holds the
//! whole table. A handle belongs to at most one identity; adding it under a
//! new identity moves it.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use tracing::debug;
use virtual_actors::{ActorContext, ActorRef, ActorResult, HandleId, Reply, VirtualActor};

/// Key of the one registry activation
pub const REGISTRY_KEY: &str = "chat-cluster";

/// Requests accepted by [`SubscriptionRegistry`]
#[derive(Debug)]
pub enum SubscriptionRequest {
    Add {
        identity: String,
        handle_id: HandleId,
        reply: Reply<()>,
    },
    Remove {
        identity: String,
        handle_id: HandleId,
        reply: Reply<()>,
    },
    GetHandleIds {
        identity: String,
        reply: Reply<HashSet<HandleId>>,
    },
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    handles_by_identity: HashMap<String, HashSet<HandleId>>,
    identity_by_handle: HashMap<HandleId, String>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, identity: String, handle_id: HandleId) {
        if let Some(previous) = self.identity_by_handle.get(&handle_id) {
            if *previous == identity {
                return;
            }
            let previous = previous.clone();
            self.detach(&previous, &handle_id);
        }
        self.identity_by_handle.insert(handle_id, identity.clone());
        self.handles_by_identity
            .entry(identity)
            .or_default()
            .insert(handle_id);
    }

    fn remove(&mut self, identity: &str, handle_id: &HandleId) {
        if self.detach(identity, handle_id) {
            self.identity_by_handle.remove(handle_id);
        }
    }

    /// Drop `handle_id` from `identity`'s set, removing the set once empty
    fn detach(&mut self, identity: &str, handle_id: &HandleId) -> bool {
        let Some(handles) = self.handles_by_identity.get_mut(identity) else {
            return false;
        };
        let removed = handles.remove(handle_id);
        if handles.is_empty() {
            self.handles_by_identity.remove(identity);
        }
        removed
    }

    fn handle_ids(&self, identity: &str) -> HashSet<HandleId> {
        self.handles_by_identity
            .get(identity)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl VirtualActor for SubscriptionRegistry {
    type Key = String;
    type Request = SubscriptionRequest;

    async fn handle(
        &mut self,
        request: SubscriptionRequest,
        _ctx: &ActorContext<String>,
    ) -> ActorResult<()> {
        match request {
            SubscriptionRequest::Add {
                identity,
                handle_id,
                reply,
            } => {
                debug!(identity = %identity, handle_id = %handle_id, "Subscription recorded");
                self.add(identity, handle_id);
                reply.ok(());
            }
            SubscriptionRequest::Remove {
                identity,
                handle_id,
                reply,
            } => {
                self.remove(&identity, &handle_id);
                reply.ok(());
            }
            SubscriptionRequest::GetHandleIds { identity, reply } => {
                reply.ok(self.handle_ids(&identity));
            }
        }
        Ok(())
    }
}

/// Typed calls on the registry reference
#[async_trait]
pub trait SubscriptionRegistryApi {
    async fn add_subscription(&self, identity: &str, handle_id: HandleId) -> ActorResult<()>;

    /// No-op when the pair is not recorded
    async fn remove_subscription(&self, identity: &str, handle_id: HandleId) -> ActorResult<()>;

    /// Empty for an unknown identity
    async fn get_handle_ids(&self, identity: &str) -> ActorResult<HashSet<HandleId>>;
}

#[async_trait]
impl SubscriptionRegistryApi for ActorRef<SubscriptionRegistry> {
    async fn add_subscription(&self, identity: &str, handle_id: HandleId) -> ActorResult<()> {
        let identity = identity.to_string();
        self.call(|reply| SubscriptionRequest::Add {
            identity,
            handle_id,
            reply,
        })
        .await
    }

    async fn remove_subscription(&self, identity: &str, handle_id: HandleId) -> ActorResult<()> {
        let identity = identity.to_string();
        self.call(|reply| SubscriptionRequest::Remove {
            identity,
            handle_id,
            reply,
        })
        .await
    }

    async fn get_handle_ids(&self, identity: &str) -> ActorResult<HashSet<HandleId>> {
        let identity = identity.to_string();
        self.call(|reply| SubscriptionRequest::GetHandleIds { identity, reply })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use virtual_actors::{ActorSystem, HostConfig};

    #[test]
    fn test_add_is_idempotent() {
        let mut registry = SubscriptionRegistry::new();
        let handle = HandleId::new();
        registry.add("alice".to_string(), handle);
        registry.add("alice".to_string(), handle);
        assert_eq!(registry.handle_ids("alice"), HashSet::from([handle]));
    }

    #[test]
    fn test_handle_moves_between_identities() {
        let mut registry = SubscriptionRegistry::new();
        let handle = HandleId::new();
        registry.add("alice".to_string(), handle);
        registry.add("bob".to_string(), handle);

        assert!(registry.handle_ids("alice").is_empty());
        assert_eq!(registry.handle_ids("bob"), HashSet::from([handle]));
        assert!(!registry.handles_by_identity.contains_key("alice"));
    }

    #[test]
    fn test_remove_is_safe_to_repeat() {
        let mut registry = SubscriptionRegistry::new();
        let kept = HandleId::new();
        let dropped = HandleId::new();
        registry.add("alice".to_string(), kept);
        registry.add("alice".to_string(), dropped);

        registry.remove("alice", &dropped);
        registry.remove("alice", &dropped);
        registry.remove("nobody", &kept);

        assert_eq!(registry.handle_ids("alice"), HashSet::from([kept]));
        assert_eq!(registry.identity_by_handle.len(), 1);
    }

    #[test]
    fn test_remove_under_wrong_identity_keeps_owner() {
        let mut registry = SubscriptionRegistry::new();
        let handle = HandleId::new();
        registry.add("alice".to_string(), handle);

        registry.remove("bob", &handle);
        assert_eq!(registry.handle_ids("alice"), HashSet::from([handle]));
    }

    #[tokio::test]
    async fn test_registry_actor_calls() {
        let system = ActorSystem::new();
        system
            .register::<SubscriptionRegistry, _>(HostConfig::default(), |_key: &String| {
                SubscriptionRegistry::new()
            })
            .unwrap();
        let registry = system
            .actor_ref::<SubscriptionRegistry>(REGISTRY_KEY.to_string())
            .unwrap();

        assert!(registry.get_handle_ids("alice").await.unwrap().is_empty());

        let handle = HandleId::new();
        registry.add_subscription("alice", handle).await.unwrap();
        assert!(registry.get_handle_ids("alice").await.unwrap().contains(&handle));

        registry.remove_subscription("alice", handle).await.unwrap();
        registry.remove_subscription("alice", handle).await.unwrap();
        assert!(registry.get_handle_ids("alice").await.unwrap().is_empty());
    }
}
