//! Both sides mint identities independently; the two half-spaces must
//! never meet and never produce a reserved sentinel.

use accord_runtime::{ActorId, IdAllocator};
use accord_types::Side;
use proptest::prelude::*;

proptest! {
    #[test]
    fn half_spaces_never_collide(parent_n in 0usize..512, child_n in 0usize..512) {
        let mut parent = IdAllocator::new(Side::Parent);
        let mut child = IdAllocator::new(Side::Child);
        let parent_ids: Vec<i64> = (0..parent_n).map(|_| parent.next()).collect();
        let child_ids: Vec<i64> = (0..child_n).map(|_| child.next()).collect();

        for id in &parent_ids {
            prop_assert!(*id > ActorId::FREED.0);
            prop_assert!(!child_ids.contains(id));
        }
        for id in &child_ids {
            prop_assert!(*id < ActorId::NULL.0);
        }
    }

    #[test]
    fn allocation_is_dense_and_monotonic(n in 1usize..256) {
        let mut ids = IdAllocator::new(Side::Parent);
        let minted: Vec<i64> = (0..n).map(|_| ids.next()).collect();
        for (i, id) in minted.iter().enumerate() {
            prop_assert_eq!(*id, 2 + i as i64);
        }
    }
}
