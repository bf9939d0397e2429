//! Shared-memory brokering.
//!
//! Regions are created by one endpoint, announced to the peer through
//! a reserved out-of-band message, and thereafter referred to only by
//! identity. The create path is split in two: the descriptor message
//! must be on the wire *before* the local registry learns the id, and
//! likewise a destroy notice is sent before the local reference is
//! released, so the peer never sees an id it cannot resolve.
//!
//! Handle transfer inside a declared message is one-shot: writing a
//! handle revokes the sender's rights and forgets the region; reading
//! one reconstructs it from the receiver's registry and fails the
//! message on a miss.

use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use accord_types::Side;

use crate::actor::IdAllocator;

/// Identity of one shared region. Same half-space scheme as actor
/// identities, in an independent namespace.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ShmemId(pub i64);

impl std::fmt::Display for ShmemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "shmem:{}", self.0)
    }
}

/// Protection class of a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionKind {
    /// Access rights follow the handle; the broker polices them.
    Protected,
    /// Both sides may touch the region at any time.
    Unsafe,
}

/// A shared region as seen by one endpoint.
///
/// Cloning the `Rc` hands out another reference to the same storage;
/// the broker's registry entry is itself one such reference, which is
/// what keeps a region alive across a destroy handshake until every
/// user handle is gone.
#[derive(Debug)]
pub struct SharedRegion {
    id: ShmemId,
    kind: RegionKind,
    bytes: std::cell::RefCell<Vec<u8>>,
}

impl SharedRegion {
    fn new(id: ShmemId, kind: RegionKind, bytes: Vec<u8>) -> Rc<Self> {
        Rc::new(SharedRegion {
            id,
            kind,
            bytes: std::cell::RefCell::new(bytes),
        })
    }

    /// The region's identity.
    #[must_use]
    pub fn id(&self) -> ShmemId {
        self.id
    }

    /// The region's protection class.
    #[must_use]
    pub fn kind(&self) -> RegionKind {
        self.kind
    }

    /// The region's size in bytes.
    #[must_use]
    pub fn size(&self) -> usize {
        self.bytes.borrow().len()
    }

    /// Read access to the backing bytes.
    #[must_use]
    pub fn bytes(&self) -> std::cell::Ref<'_, Vec<u8>> {
        self.bytes.borrow()
    }

    /// Write access to the backing bytes.
    #[must_use]
    pub fn bytes_mut(&self) -> std::cell::RefMut<'_, Vec<u8>> {
        self.bytes.borrow_mut()
    }
}

/// Shared-memory failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShmemError {
    /// The id resolves to nothing in this endpoint's registry.
    #[error("no shared region registered under {0}")]
    NotRegistered(ShmemId),
    /// A handle was written after its transfer rights were spent.
    #[error("transfer rights for {0} already revoked")]
    RightsRevoked(ShmemId),
    /// A zero-byte region is never useful and always a caller bug.
    #[error("refusing to create empty shared region")]
    EmptyRegion,
}

/// A region allocated but not yet announced. Produced by
/// [`ShmemBroker::prepare_create`]; committed only after the
/// descriptor message is safely on the wire.
#[derive(Debug)]
pub struct PendingRegion {
    region: Rc<SharedRegion>,
}

impl PendingRegion {
    /// The identity the committed region will carry.
    #[must_use]
    pub fn id(&self) -> ShmemId {
        self.region.id
    }
}

/// Per-endpoint shared-memory registry.
#[derive(Debug)]
pub struct ShmemBroker {
    ids: IdAllocator,
    registry: BTreeMap<ShmemId, Rc<SharedRegion>>,
    rights: BTreeSet<ShmemId>,
}

impl ShmemBroker {
    /// An empty broker allocating identities for `side`.
    #[must_use]
    pub fn new(side: Side) -> Self {
        ShmemBroker {
            ids: IdAllocator::new(side),
            registry: BTreeMap::new(),
            rights: BTreeSet::new(),
        }
    }

    /// Allocate a fresh zeroed region, unregistered.
    ///
    /// # Errors
    ///
    /// Rejects zero sizes.
    pub fn prepare_create(
        &mut self,
        size: usize,
        kind: RegionKind,
    ) -> Result<PendingRegion, ShmemError> {
        if size == 0 {
            return Err(ShmemError::EmptyRegion);
        }
        let id = ShmemId(self.ids.next());
        Ok(PendingRegion {
            region: SharedRegion::new(id, kind, vec![0; size]),
        })
    }

    /// Wrap caller-provided bytes as a region, unregistered. The
    /// adoption path skips allocation but shares the same handshake.
    ///
    /// # Errors
    ///
    /// Rejects empty buffers.
    pub fn prepare_adopt(
        &mut self,
        bytes: Vec<u8>,
        kind: RegionKind,
    ) -> Result<PendingRegion, ShmemError> {
        if bytes.is_empty() {
            return Err(ShmemError::EmptyRegion);
        }
        let id = ShmemId(self.ids.next());
        Ok(PendingRegion {
            region: SharedRegion::new(id, kind, bytes),
        })
    }

    /// Register a prepared region and grant this endpoint its transfer
    /// rights. Call only once the descriptor message has been sent.
    pub fn commit(&mut self, pending: PendingRegion) -> Rc<SharedRegion> {
        let id = pending.region.id;
        self.registry.insert(id, Rc::clone(&pending.region));
        self.rights.insert(id);
        pending.region
    }

    /// Peer announced a region: mirror it into the local registry.
    pub fn on_created(&mut self, id: ShmemId, size: usize, kind: RegionKind) {
        self.registry.insert(id, SharedRegion::new(id, kind, vec![0; size]));
    }

    /// Peer destroyed a region: drop the registry entry. User handles
    /// cloned from it stay valid until their owners let go.
    pub fn on_destroyed(&mut self, id: ShmemId) {
        self.registry.remove(&id);
        self.rights.remove(&id);
    }

    /// Release the local registry entry for `id`. Call only after the
    /// destroy notice is on the wire.
    ///
    /// # Errors
    ///
    /// Fails when the id is not registered here.
    pub fn release(&mut self, id: ShmemId) -> Result<(), ShmemError> {
        if self.registry.remove(&id).is_none() {
            return Err(ShmemError::NotRegistered(id));
        }
        self.rights.remove(&id);
        Ok(())
    }

    /// Drop every registration. Channel teardown path.
    pub fn release_all(&mut self) {
        self.registry.clear();
        self.rights.clear();
    }

    /// The registered region for `id`, if any.
    #[must_use]
    pub fn get(&self, id: ShmemId) -> Option<Rc<SharedRegion>> {
        self.registry.get(&id).map(Rc::clone)
    }

    /// Spend the one-shot transfer rights for `id` so its handle can
    /// ride inside an outgoing message. The sender forgets the region.
    ///
    /// # Errors
    ///
    /// Fails when the region is unknown or the rights were already
    /// spent.
    pub fn transfer_out(&mut self, id: ShmemId) -> Result<(), ShmemError> {
        if !self.registry.contains_key(&id) {
            return Err(ShmemError::NotRegistered(id));
        }
        if !self.rights.remove(&id) {
            return Err(ShmemError::RightsRevoked(id));
        }
        self.registry.remove(&id);
        Ok(())
    }

    /// Reconstruct a handle arriving inside a message, acquiring its
    /// transfer rights.
    ///
    /// # Errors
    ///
    /// Fails the message when the id misses the registry.
    pub fn transfer_in(&mut self, id: ShmemId) -> Result<Rc<SharedRegion>, ShmemError> {
        let region = self
            .registry
            .get(&id)
            .map(Rc::clone)
            .ok_or(ShmemError::NotRegistered(id))?;
        self.rights.insert(id);
        Ok(region)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn create_commits_only_after_the_descriptor_step() {
        let mut broker = ShmemBroker::new(Side::Parent);
        let pending = broker.prepare_create(64, RegionKind::Protected).unwrap();
        let id = pending.id();
        assert!(broker.get(id).is_none());
        let handle = broker.commit(pending);
        assert_eq!(broker.get(id).unwrap().id(), handle.id());
    }

    #[test]
    fn remote_destroy_clears_registry_while_user_handle_lives() {
        let mut broker = ShmemBroker::new(Side::Parent);
        let pending = broker.prepare_create(4096, RegionKind::Protected).unwrap();
        let id = pending.id();
        let handle = broker.commit(pending);

        broker.on_destroyed(id);
        assert!(broker.get(id).is_none());
        // The registry reference is gone but ours still works.
        assert_eq!(Rc::strong_count(&handle), 1);
        assert_eq!(handle.size(), 4096);
    }

    #[test]
    fn transfer_rights_are_one_shot() {
        let mut broker = ShmemBroker::new(Side::Child);
        let pending = broker.prepare_create(16, RegionKind::Unsafe).unwrap();
        let id = pending.id();
        broker.commit(pending);

        broker.transfer_out(id).unwrap();
        assert_matches!(
            broker.transfer_out(id),
            Err(ShmemError::NotRegistered(_))
        );
    }

    #[test]
    fn reading_an_unknown_handle_fails() {
        let mut broker = ShmemBroker::new(Side::Parent);
        assert_matches!(
            broker.transfer_in(ShmemId(7)),
            Err(ShmemError::NotRegistered(_))
        );
    }

    #[test]
    fn shmem_ids_live_in_their_own_namespace() {
        let mut broker = ShmemBroker::new(Side::Parent);
        let first = broker.prepare_create(8, RegionKind::Protected).unwrap();
        assert_eq!(first.id(), ShmemId(2));
    }

    #[test]
    fn empty_regions_are_rejected() {
        let mut broker = ShmemBroker::new(Side::Parent);
        assert_matches!(
            broker.prepare_create(0, RegionKind::Protected),
            Err(ShmemError::EmptyRegion)
        );
    }
}
