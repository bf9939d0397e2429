//! Actor identities, the per-endpoint actor table, and subtree
//! destruction.
//!
//! Identities are plain integers with two reserved sentinels. The
//! parent side allocates ascending from above FREED, the child side
//! descending from below NULL, so both endpoints can mint identities
//! independently without ever colliding. The identity chosen by the
//! creating side is the registration key on *both* sides; the wire
//! only ever carries these identities, never addresses.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use accord_types::{Side, State};

use crate::error::LifecycleError;

/// Identity of one actor within a toplevel tree.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ActorId(pub i64);

impl ActorId {
    /// The null reference. Also the routing identity of the toplevel
    /// actor, which is therefore never itself encodable as a
    /// reference.
    pub const NULL: ActorId = ActorId(0);
    /// Sentinel carried by references to destroyed actors. Seeing it
    /// on the wire means the peer's bookkeeping is corrupt.
    pub const FREED: ActorId = ActorId(1);

    /// Whether this is one of the two reserved values.
    #[must_use]
    pub fn is_sentinel(self) -> bool {
        self == ActorId::NULL || self == ActorId::FREED
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "actor:{}", self.0)
    }
}

/// Mints identities for one side of one namespace (actors and shared
/// memory regions each get their own allocator).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdAllocator {
    side: Side,
    last: i64,
}

impl IdAllocator {
    /// An allocator positioned just inside `side`'s half-space.
    #[must_use]
    pub fn new(side: Side) -> Self {
        let last = match side {
            Side::Parent => ActorId::FREED.0,
            Side::Child => ActorId::NULL.0,
        };
        IdAllocator { side, last }
    }

    /// The next unused identity: 2, 3, 4, … on the parent side,
    /// -1, -2, -3, … on the child side.
    pub fn next(&mut self) -> i64 {
        match self.side {
            Side::Parent => self.last += 1,
            Side::Child => self.last -= 1,
        }
        self.last
    }
}

/// Why an actor is being torn down. Delivered to the
/// "about to be destroyed" notification before the actor is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DestroyReason {
    /// Its destructor message was sent or received.
    Deletion,
    /// An ancestor in the manager tree was deleted.
    AncestorDeletion,
    /// The channel closed in an orderly fashion.
    NormalShutdown,
    /// The channel died underneath us.
    AbnormalShutdown,
    /// Its constructor was rejected.
    FailedConstructor,
}

impl DestroyReason {
    /// The reason propagated to managees when an actor dies for this
    /// reason.
    #[must_use]
    pub fn for_subtree(self) -> DestroyReason {
        match self {
            DestroyReason::Deletion | DestroyReason::FailedConstructor => {
                DestroyReason::AncestorDeletion
            }
            other => other,
        }
    }
}

/// One live actor's bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorEntry {
    /// The actor's identity, as chosen by its creating side.
    pub id: ActorId,
    /// The protocol it speaks.
    pub protocol: String,
    /// Its manager's identity; `None` for the toplevel.
    pub manager: Option<ActorId>,
    /// Current transition-machine state.
    pub state: State,
    /// Managees, grouped by protocol, each group ordered by identity.
    children: BTreeMap<String, BTreeSet<ActorId>>,
}

impl ActorEntry {
    /// A fresh entry with no managees.
    #[must_use]
    pub fn new(id: ActorId, protocol: impl Into<String>, manager: Option<ActorId>, state: State) -> Self {
        ActorEntry {
            id,
            protocol: protocol.into(),
            manager,
            state,
            children: BTreeMap::new(),
        }
    }

    /// All managees, grouped by protocol in name order.
    #[must_use]
    pub fn managees(&self) -> Vec<ActorId> {
        self.children.values().flatten().copied().collect()
    }

    /// The managees of one protocol.
    #[must_use]
    pub fn managees_of(&self, protocol: &str) -> Vec<ActorId> {
        self.children
            .get(protocol)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Slot {
    Live(ActorEntry),
    /// Destroyed but not yet deallocated; the entry is retained so the
    /// bottom-up dealloc pass can still walk the tree.
    Destroyed(ActorEntry),
    /// Fully retired. The identity is never reused.
    Freed,
}

/// The endpoint's actor registry and manager tree.
///
/// The tree holds no owning references between actors; edges are
/// identities into this table, so destruction order is explicit
/// rather than a side effect of drop order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorTable {
    slots: BTreeMap<ActorId, Slot>,
    ids: IdAllocator,
}

impl ActorTable {
    /// An empty table allocating identities for `side`.
    #[must_use]
    pub fn new(side: Side) -> Self {
        ActorTable {
            slots: BTreeMap::new(),
            ids: IdAllocator::new(side),
        }
    }

    /// Mint a fresh local identity.
    pub fn allocate_id(&mut self) -> ActorId {
        ActorId(self.ids.next())
    }

    /// Register an actor under its identity.
    ///
    /// # Errors
    ///
    /// Fails if the identity is already occupied or retired.
    pub fn insert(&mut self, entry: ActorEntry) -> Result<(), LifecycleError> {
        match self.slots.get(&entry.id) {
            None => {
                self.slots.insert(entry.id, Slot::Live(entry));
                Ok(())
            }
            Some(_) => Err(LifecycleError::IdInUse(entry.id)),
        }
    }

    /// The live entry for `id`, if any.
    #[must_use]
    pub fn get(&self, id: ActorId) -> Option<&ActorEntry> {
        match self.slots.get(&id) {
            Some(Slot::Live(e)) => Some(e),
            _ => None,
        }
    }

    /// The live entry for `id`, distinguishing "never existed" from
    /// "already destroyed".
    ///
    /// # Errors
    ///
    /// [`LifecycleError::FreedActor`] for destroyed identities,
    /// [`LifecycleError::UnknownActor`] otherwise.
    pub fn lookup(&self, id: ActorId) -> Result<&ActorEntry, LifecycleError> {
        match self.slots.get(&id) {
            Some(Slot::Live(e)) => Ok(e),
            Some(Slot::Destroyed(_)) | Some(Slot::Freed) => Err(LifecycleError::FreedActor(id)),
            None => Err(LifecycleError::UnknownActor(id)),
        }
    }

    /// Whether `id` once existed and has been destroyed.
    #[must_use]
    pub fn is_freed(&self, id: ActorId) -> bool {
        matches!(
            self.slots.get(&id),
            Some(Slot::Destroyed(_)) | Some(Slot::Freed)
        )
    }

    /// Record a new transition-machine state for a live actor.
    ///
    /// # Errors
    ///
    /// Fails when the actor is not live.
    pub fn set_state(&mut self, id: ActorId, state: State) -> Result<(), LifecycleError> {
        match self.slots.get_mut(&id) {
            Some(Slot::Live(e)) => {
                e.state = state;
                Ok(())
            }
            Some(_) => Err(LifecycleError::FreedActor(id)),
            None => Err(LifecycleError::UnknownActor(id)),
        }
    }

    /// Link a freshly registered managee under its manager.
    ///
    /// # Errors
    ///
    /// Fails when either endpoint of the edge is not live.
    pub fn attach(&mut self, manager: ActorId, managee: ActorId) -> Result<(), LifecycleError> {
        let protocol = self.lookup(managee)?.protocol.clone();
        match self.slots.get_mut(&manager) {
            Some(Slot::Live(e)) => {
                e.children.entry(protocol).or_default().insert(managee);
                Ok(())
            }
            Some(_) => Err(LifecycleError::FreedActor(manager)),
            None => Err(LifecycleError::UnknownActor(manager)),
        }
    }

    /// Unlink a destroyed managee from its manager's collection,
    /// verifying it was actually a member.
    ///
    /// # Errors
    ///
    /// Fails when the manager is gone from the table entirely or the
    /// managee was not in its collection.
    pub fn remove_managee(
        &mut self,
        manager: ActorId,
        protocol: &str,
        managee: ActorId,
    ) -> Result<(), LifecycleError> {
        let entry = match self.slots.get_mut(&manager) {
            Some(Slot::Live(e)) | Some(Slot::Destroyed(e)) => e,
            _ => return Err(LifecycleError::UnknownActor(manager)),
        };
        let present = entry
            .children
            .get_mut(protocol)
            .map(|s| s.remove(&managee))
            .unwrap_or(false);
        if present {
            Ok(())
        } else {
            Err(LifecycleError::NotManagee {
                manager,
                managee,
            })
        }
    }

    /// Destroy `id` and its whole managee subtree.
    ///
    /// Each actor is unregistered first (so any message arriving
    /// mid-teardown sees a freed identity), then its managees are
    /// destroyed recursively, and only then is `notify` invoked, so
    /// the notification observes a world in which the subtree below it
    /// is already gone. Managees die with [`DestroyReason::for_subtree`]
    /// of the original reason.
    ///
    /// # Errors
    ///
    /// Fails when `id` is not live.
    pub fn destroy_subtree(
        &mut self,
        id: ActorId,
        reason: DestroyReason,
        notify: &mut dyn FnMut(&ActorEntry, DestroyReason),
    ) -> Result<(), LifecycleError> {
        let entry = match self.slots.get(&id) {
            Some(Slot::Live(e)) => e.clone(),
            Some(_) => return Err(LifecycleError::FreedActor(id)),
            None => return Err(LifecycleError::UnknownActor(id)),
        };
        self.slots.insert(id, Slot::Destroyed(entry.clone()));
        let subtree_reason = reason.for_subtree();
        for child in entry.managees() {
            // The snapshot may name managees already torn down by an
            // overlapping teardown; skip those.
            if self.get(child).is_some() {
                self.destroy_subtree(child, subtree_reason, notify)?;
            }
        }
        notify(&entry, reason);
        Ok(())
    }

    /// Deallocate a destroyed subtree bottom-up, retiring each
    /// identity after its `dealloc` callback runs, then unlink `id`
    /// from its manager.
    ///
    /// # Errors
    ///
    /// Fails when `id` was never destroyed, or manager bookkeeping is
    /// inconsistent.
    pub fn dealloc_subtree(
        &mut self,
        id: ActorId,
        dealloc: &mut dyn FnMut(&str, ActorId),
    ) -> Result<(), LifecycleError> {
        self.dealloc_below(id, dealloc)?;
        let entry = match self.slots.get(&id) {
            Some(Slot::Destroyed(e)) => e.clone(),
            Some(Slot::Freed) => return Err(LifecycleError::FreedActor(id)),
            _ => return Err(LifecycleError::UnknownActor(id)),
        };
        dealloc(&entry.protocol, id);
        self.slots.insert(id, Slot::Freed);
        if let Some(manager) = entry.manager {
            self.remove_managee(manager, &entry.protocol, id)?;
        }
        Ok(())
    }

    fn dealloc_below(
        &mut self,
        id: ActorId,
        dealloc: &mut dyn FnMut(&str, ActorId),
    ) -> Result<(), LifecycleError> {
        let children = match self.slots.get(&id) {
            Some(Slot::Destroyed(e)) => e.managees(),
            _ => return Ok(()),
        };
        for child in children {
            if matches!(self.slots.get(&child), Some(Slot::Destroyed(_))) {
                self.dealloc_below(child, dealloc)?;
                let protocol = match self.slots.get(&child) {
                    Some(Slot::Destroyed(e)) => e.protocol.clone(),
                    _ => continue,
                };
                dealloc(&protocol, child);
                self.slots.insert(child, Slot::Freed);
            }
        }
        // Children unlink lazily: the parent entry is itself about to
        // be retired, so its collections die with it.
        Ok(())
    }

    /// Identities of every live actor, in table order.
    #[must_use]
    pub fn live_ids(&self) -> Vec<ActorId> {
        self.slots
            .iter()
            .filter(|(_, s)| matches!(s, Slot::Live(_)))
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn table_with_tree() -> (ActorTable, ActorId, ActorId, ActorId) {
        let mut t = ActorTable::new(Side::Parent);
        let top = ActorId::NULL;
        t.insert(ActorEntry::new(top, "Top", None, State::Null)).unwrap();
        let mid = t.allocate_id();
        t.insert(ActorEntry::new(mid, "Mid", Some(top), State::Null))
            .unwrap();
        t.attach(top, mid).unwrap();
        let leaf = t.allocate_id();
        t.insert(ActorEntry::new(leaf, "Leaf", Some(mid), State::Null))
            .unwrap();
        t.attach(mid, leaf).unwrap();
        (t, top, mid, leaf)
    }

    #[test]
    fn parent_ids_ascend_from_above_freed() {
        let mut ids = IdAllocator::new(Side::Parent);
        assert_eq!(ids.next(), 2);
        assert_eq!(ids.next(), 3);
    }

    #[test]
    fn child_ids_descend_from_below_null() {
        let mut ids = IdAllocator::new(Side::Child);
        assert_eq!(ids.next(), -1);
        assert_eq!(ids.next(), -2);
    }

    #[test]
    fn destroy_notifies_depth_first_with_ancestor_reason() {
        let (mut t, _top, mid, leaf) = table_with_tree();
        let mut order = Vec::new();
        t.destroy_subtree(mid, DestroyReason::Deletion, &mut |e, why| {
            order.push((e.id, why));
        })
        .unwrap();
        assert_eq!(
            order,
            vec![
                (leaf, DestroyReason::AncestorDeletion),
                (mid, DestroyReason::Deletion),
            ]
        );
        assert_matches!(t.lookup(leaf), Err(LifecycleError::FreedActor(_)));
    }

    #[test]
    fn shutdown_reasons_propagate_unchanged() {
        let (mut t, top, _mid, leaf) = table_with_tree();
        let mut reasons = Vec::new();
        t.destroy_subtree(top, DestroyReason::NormalShutdown, &mut |e, why| {
            reasons.push((e.id, why));
        })
        .unwrap();
        assert!(reasons
            .iter()
            .all(|(_, why)| *why == DestroyReason::NormalShutdown));
        assert_eq!(reasons.first().map(|(id, _)| *id), Some(leaf));
    }

    #[test]
    fn dealloc_runs_bottom_up_and_unlinks_from_manager() {
        let (mut t, top, mid, leaf) = table_with_tree();
        t.destroy_subtree(mid, DestroyReason::Deletion, &mut |_, _| {})
            .unwrap();
        let mut order = Vec::new();
        t.dealloc_subtree(mid, &mut |protocol, id| {
            order.push((protocol.to_string(), id));
        })
        .unwrap();
        assert_eq!(
            order,
            vec![("Leaf".to_string(), leaf), ("Mid".to_string(), mid)]
        );
        assert!(t.get(top).unwrap().managees().is_empty());
    }

    #[test]
    fn identities_are_never_reused() {
        let (mut t, _top, mid, _leaf) = table_with_tree();
        t.destroy_subtree(mid, DestroyReason::Deletion, &mut |_, _| {})
            .unwrap();
        t.dealloc_subtree(mid, &mut |_, _| {}).unwrap();
        assert_matches!(
            t.insert(ActorEntry::new(mid, "Mid", None, State::Null)),
            Err(LifecycleError::IdInUse(_))
        );
    }

    #[test]
    fn removal_verifies_membership() {
        let (mut t, top, _mid, leaf) = table_with_tree();
        assert_matches!(
            t.remove_managee(top, "Leaf", leaf),
            Err(LifecycleError::NotManagee { .. })
        );
    }
}
