//! Activation Directory
//!
//! Location-transparent lookup from an actor key to its current activation.
//! Entries are created lazily on first dispatch and removed by the activation
//! itself when it retires.

use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Bound for anything usable as a virtual actor key
pub trait ActorKey: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static {}

impl<T> ActorKey for T where
    T: Clone + Eq + Hash + fmt::Display + fmt::Debug + Send + Sync + 'static
{
}

/// Identifies one activation (one in-memory incarnation) of a keyed actor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ActivationId {
    id: Uuid,
}

impl ActivationId {
    /// Create new activation ID
    pub fn new() -> Self {
        Self { id: Uuid::new_v4() }
    }

    /// Get UUID
    pub fn uuid(&self) -> Uuid {
        self.id
    }
}

impl fmt::Display for ActivationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "activation-{}", self.id.simple())
    }
}

impl Default for ActivationId {
    fn default() -> Self {
        Self::new()
    }
}

/// What travels through an activation's mailbox
#[derive(Debug)]
pub(crate) enum Envelope<R> {
    /// Application request
    Request(R),
    /// Ask the activation to retire once its mailbox drains
    Deactivate,
}

/// Directory entry for a live activation
#[derive(Debug)]
pub(crate) struct Activation<R> {
    pub(crate) id: ActivationId,
    pub(crate) mailbox: mpsc::UnboundedSender<Envelope<R>>,
}

impl<R> Activation<R> {
    /// A mailbox whose receiver is gone belongs to a dead activation
    pub(crate) fn is_alive(&self) -> bool {
        !self.mailbox.is_closed()
    }
}

/// Key → activation map for one actor type
///
/// Sends to an activation happen while holding the entry's shard guard, and
/// an activation only removes itself through [`ActorDirectory::retire`] under
/// the write guard. Together these guarantee that once an entry is gone no
/// request can still reach the retired activation.
#[derive(Debug)]
pub(crate) struct ActorDirectory<K: ActorKey, R> {
    entries: DashMap<K, Activation<R>>,
}

impl<K: ActorKey, R> ActorDirectory<K, R> {
    pub(crate) fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Deliver to the current activation, creating one with `activate` if the
    /// key has none. Returns the envelope back if the activation found is dead.
    pub(crate) fn deliver<F>(
        &self,
        key: &K,
        envelope: Envelope<R>,
        activate: F,
    ) -> Result<(), Envelope<R>>
    where
        F: FnOnce() -> Activation<R>,
    {
        let outcome = match self.entries.get(key) {
            Some(activation) => activation.mailbox.send(envelope),
            None => self
                .entries
                .entry(key.clone())
                .or_insert_with(activate)
                .mailbox
                .send(envelope),
        };
        outcome.map_err(|mpsc::error::SendError(returned)| returned)
    }

    /// Deliver only if an activation already exists; never activates
    pub(crate) fn deliver_existing(&self, key: &K, envelope: Envelope<R>) -> bool {
        match self.entries.get(key) {
            Some(activation) => activation.mailbox.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Drop the entry for `key` if its activation is dead
    pub(crate) fn evict_dead(&self, key: &K) -> bool {
        self.entries
            .remove_if(key, |_, activation| !activation.is_alive())
            .is_some()
    }

    /// Remove the entry owned by `id`, provided `can_retire` still holds
    /// while the shard is write-locked
    pub(crate) fn retire<P>(&self, key: &K, id: ActivationId, can_retire: P) -> bool
    where
        P: FnOnce() -> bool,
    {
        self.entries
            .remove_if(key, |_, activation| activation.id == id && can_retire())
            .is_some()
    }

    pub(crate) fn is_active(&self, key: &K) -> bool {
        self.entries
            .get(key)
            .map(|activation| activation.is_alive())
            .unwrap_or(false)
    }

    pub(crate) fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().is_alive())
            .count()
    }

    pub(crate) fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn activation<R>() -> (Activation<R>, mpsc::UnboundedReceiver<Envelope<R>>) {
        let (mailbox, receiver) = mpsc::unbounded_channel();
        (
            Activation {
                id: ActivationId::new(),
                mailbox,
            },
            receiver,
        )
    }

    #[test]
    fn test_activation_id_display() {
        let id = ActivationId::new();
        assert!(id.to_string().starts_with("activation-"));
        assert_ne!(id, ActivationId::new());
    }

    #[tokio::test]
    async fn test_deliver_activates_once() {
        let directory: ActorDirectory<String, u32> = ActorDirectory::new();
        let (first, mut receiver) = activation();
        let mut slot = Some(first);

        let key = "general".to_string();
        assert!(directory
            .deliver(&key, Envelope::Request(1), || slot.take().unwrap())
            .is_ok());
        assert!(directory
            .deliver(&key, Envelope::Request(2), || panic!("already active"))
            .is_ok());

        assert!(matches!(receiver.recv().await, Some(Envelope::Request(1))));
        assert!(matches!(receiver.recv().await, Some(Envelope::Request(2))));
        assert_eq!(directory.active_count(), 1);
    }

    #[test]
    fn test_dead_activation_returns_envelope() {
        let directory: ActorDirectory<String, u32> = ActorDirectory::new();
        let (dead, receiver) = activation();
        drop(receiver);

        let key = "general".to_string();
        let mut slot = Some(dead);
        let returned = directory.deliver(&key, Envelope::Request(7), || slot.take().unwrap());
        assert!(matches!(returned, Err(Envelope::Request(7))));
        assert!(!directory.is_active(&key));
        assert!(directory.evict_dead(&key));
        assert!(!directory.evict_dead(&key));
    }

    #[test]
    fn test_retire_requires_matching_id() {
        let directory: ActorDirectory<String, u32> = ActorDirectory::new();
        let (live, _receiver) = activation();
        let id = live.id;
        let key = "general".to_string();
        let mut slot = Some(live);
        directory
            .deliver(&key, Envelope::Deactivate, || slot.take().unwrap())
            .unwrap();

        assert!(!directory.retire(&key, ActivationId::new(), || true));
        assert!(!directory.retire(&key, id, || false));
        assert!(directory.retire(&key, id, || true));
        assert!(!directory.is_active(&key));
        assert!(!directory.deliver_existing(&key, Envelope::Deactivate));
    }
}
