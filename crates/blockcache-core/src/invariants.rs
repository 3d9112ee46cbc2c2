//! Invariant checks for use in this crate's own tests and, via the `testing` feature,
//! in an embedding engine's test suite: `check(&manager)` after any sequence of public
//! operations should always return `Ok(())`.

use crate::block_manager::BlockManager;
use crate::error::{Error, Result};

/// Runs the quantified invariants: block accounting balances, every block backing a
/// live cache node is actually reference-counted, and the tree is a well-formed
/// compressed trie.
pub fn check(manager: &BlockManager) -> Result<()> {
    if manager.free_block_count() > manager.config().num_blocks as usize {
        return Err(Error::invariant("free block count exceeds pool size"));
    }

    manager
        .tree
        .debug_check_structure()
        .map_err(Error::invariant)?;

    // Property 2: every block named by a live (ref_count > 0) cache node must itself
    // carry a nonzero pool ref-count.
    for node in manager.tree.live_cache_nodes() {
        if node.ref_count > 0 {
            for &block in &node.block_table {
                if manager.block_ref_count(block) == 0 {
                    return Err(Error::invariant(format!(
                        "node {} is live but block {block} has ref_count 0",
                        node.node_id
                    )));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BlockManagerConfig;
    use crate::sequence::{Sequence, Turn};

    #[test]
    fn fresh_manager_satisfies_invariants() {
        let manager = BlockManager::new(BlockManagerConfig::new(8, 4).unwrap()).unwrap();
        check(&manager).unwrap();
    }

    #[test]
    fn invariants_hold_after_allocate_and_deallocate() {
        let mut manager = BlockManager::new(BlockManagerConfig::new(8, 4).unwrap()).unwrap();
        let mut seq = Sequence::new(vec![Turn { token_ids: vec![1, 2, 3, 4, 5] }], None);
        assert!(manager.match_and_allocate(&mut seq));
        check(&manager).unwrap();
        manager.deallocate(&mut seq);
        check(&manager).unwrap();
        assert_eq!(manager.free_block_count(), 8);
    }
}
