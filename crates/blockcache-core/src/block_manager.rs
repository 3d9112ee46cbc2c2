use crate::config::BlockManagerConfig;
use crate::error::Result;
use crate::planner::plan_match;
use crate::pool::{BlockId, PhysicalBlockPool};
use crate::sequence::Sequence;
use crate::tree::{CacheNode, NodeId, RadixTree, ROOT_ID};

/// Maps multi-turn token sequences onto a fixed pool of physical KV-cache blocks,
/// deduplicating storage across requests that share prefixes.
///
/// This type is single-threaded and non-reentrant by design: the host scheduler is
/// expected to serialize every call into it. None of its operations suspend, and it
/// holds no internal lock — adding one would only mask a reentrancy bug rather than
/// make the type safe to share.
#[derive(Debug)]
pub struct BlockManager {
    config: BlockManagerConfig,
    pub(crate) tree: RadixTree,
    pool: PhysicalBlockPool,
}

impl BlockManager {
    pub fn new(config: BlockManagerConfig) -> Result<Self> {
        Ok(Self {
            config,
            tree: RadixTree::new(),
            pool: PhysicalBlockPool::new(config.num_blocks),
        })
    }

    pub fn config(&self) -> BlockManagerConfig {
        self.config
    }

    pub fn free_block_count(&self) -> usize {
        self.pool.free_count()
    }

    /// A block's current ref-count, for the invariant checker.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn block_ref_count(&self, id: BlockId) -> u32 {
        self.pool.ref_count(id)
    }

    /// Attempts to reserve blocks for every turn of `seq`, reusing whatever prefix is
    /// already cached. Returns `false` (with no side effects at all) if the free-block
    /// budget can't cover the turns that aren't already cached.
    pub fn match_and_allocate(&mut self, seq: &mut Sequence) -> bool {
        let plan = plan_match(&self.tree, seq);
        tracing::trace!(
            turns = seq.turns.len(),
            cache_group_id = seq.cache_group_id.as_deref(),
            sequential = plan.is_sequential_match,
            "planned match"
        );

        struct TurnDetail {
            parent: NodeId,
            tokens_cached_from: usize,
            num_new_blocks: usize,
            cached_prefix_blocks: Vec<BlockId>,
        }

        let mut details = Vec::with_capacity(seq.turns.len());
        let mut total_new_blocks = 0usize;
        let mut total_matched = 0usize;

        for (i, turn) in seq.turns.iter().enumerate() {
            let mut parent = plan.turns[i].parent;
            let mut matched_len = plan.turns[i].matched_len;

            let cached_blocks = self.blocks_for_chain(&self.ancestor_chain_root_first(parent));
            let mut blocks_for_prefix = self.config.blocks_for(matched_len);

            if matched_len % self.config.block_size as usize != 0 {
                let tail_contended = if blocks_for_prefix == 0 {
                    true
                } else {
                    self.pool.ref_count(cached_blocks[blocks_for_prefix - 1]) > 0
                };
                if tail_contended {
                    let aligned = matched_len - (matched_len % self.config.block_size as usize);
                    tracing::debug!(turn = i, from = matched_len, to = aligned, "alignment demotion: shared tail block in use");
                    matched_len = aligned;
                    blocks_for_prefix = self.config.blocks_for(matched_len);
                    if matched_len == 0 {
                        parent = ROOT_ID;
                    }
                }
            }

            let cached_prefix_blocks = cached_blocks[..blocks_for_prefix].to_vec();
            let blocks_for_full_turn = self.config.blocks_for(turn.token_ids.len());
            let num_new_blocks = blocks_for_full_turn - blocks_for_prefix;

            total_new_blocks += num_new_blocks;
            total_matched += matched_len;
            details.push(TurnDetail {
                parent,
                tokens_cached_from: matched_len,
                num_new_blocks,
                cached_prefix_blocks,
            });
        }

        if total_new_blocks > self.pool.free_count() {
            tracing::debug!(
                needed = total_new_blocks,
                free = self.pool.free_count(),
                "match_and_allocate: insufficient free blocks, refusing"
            );
            return false;
        }

        seq.num_cached_tokens = total_matched;
        let mut final_block_table = Vec::new();
        let mut leaf_nodes = Vec::with_capacity(seq.turns.len());

        for (i, detail) in details.into_iter().enumerate() {
            let turn = &seq.turns[i];
            let tokens_to_cache = &turn.token_ids[detail.tokens_cached_from..];
            let mut turn_block_table = detail.cached_prefix_blocks;

            let leaf_id = if tokens_to_cache.is_empty() {
                detail.parent
            } else {
                let mut new_blocks = Vec::with_capacity(detail.num_new_blocks);
                for _ in 0..detail.num_new_blocks {
                    new_blocks.push(
                        self.pool
                            .allocate()
                            .expect("budget precheck guaranteed availability"),
                    );
                }
                let cache_node = CacheNode {
                    node_id: 0,
                    parent: Some(detail.parent),
                    block_table: new_blocks.clone(),
                    token_count: tokens_to_cache.len(),
                    ref_count: 0,
                    cache_group_ids: Default::default(),
                };
                let leaf_id = self.tree.insert(&turn.token_ids, cache_node);
                turn_block_table.extend(new_blocks);
                tracing::trace!(turn = i, leaf = leaf_id, new_blocks = detail.num_new_blocks, "grafted new cache node");
                leaf_id
            };

            self.acquire(leaf_id);
            if let Some(group) = seq.cache_group_id.clone() {
                for ancestor in self.ancestor_chain_root_first(leaf_id) {
                    if let Some(node) = self.tree.cache_node_mut(ancestor) {
                        node.cache_group_ids.insert(group.clone());
                    }
                }
            }

            seq.turn_cache_nodes[i] = Some(leaf_id);
            leaf_nodes.push(leaf_id);
            final_block_table.extend(turn_block_table);
        }

        if plan.is_sequential_match {
            let mut current = ROOT_ID;
            for leaf in leaf_nodes {
                if leaf != ROOT_ID {
                    self.tree.add_sequential_child(current, leaf);
                    current = leaf;
                }
            }
        }

        seq.block_table = final_block_table;
        true
    }

    /// Releases every turn's cache node and clears the sequence's bookkeeping. Safe to
    /// call on an already-cleared sequence (a no-op).
    pub fn deallocate(&mut self, seq: &mut Sequence) {
        for slot in std::mem::take(&mut seq.turn_cache_nodes) {
            if let Some(node_id) = slot {
                self.release(node_id);
            }
        }
        seq.turn_cache_nodes = vec![None; seq.turns.len()];
        seq.block_table.clear();
    }

    /// Whether one more decode token can be appended without running out of blocks.
    pub fn can_append(&self, seq: &Sequence) -> bool {
        let len = seq.total_len();
        let needs_block = len % self.config.block_size as usize == 0;
        !needs_block || self.pool.free_count() >= 1
    }

    /// Grows the sequence's block table by one block if the token about to be
    /// appended would start a new block. The new block is exclusively owned by this
    /// sequence (ref-count 1) and is not yet visible to the radix tree.
    pub fn may_append(&mut self, seq: &mut Sequence) -> Result<()> {
        let len = seq.total_len();
        if len > 0 && len % self.config.block_size as usize == 0 {
            let block_id = self.pool.allocate()?;
            self.pool.set_ref_count(block_id, 1);
            seq.block_table.push(block_id);
            tracing::trace!(block_id, "allocated decode tail block");
        }
        Ok(())
    }

    fn ancestor_chain_root_first(&self, start: NodeId) -> Vec<NodeId> {
        let mut chain = Vec::new();
        let mut cur = Some(start);
        while let Some(id) = cur {
            chain.push(id);
            cur = self.tree.cache_node(id).and_then(|n| n.parent);
        }
        chain.reverse();
        chain
    }

    fn blocks_for_chain(&self, chain: &[NodeId]) -> Vec<BlockId> {
        chain
            .iter()
            .flat_map(|id| self.tree.cache_node(*id).map(|n| n.block_table.clone()).unwrap_or_default())
            .collect()
    }

    /// Walks from `start` up through `CacheNode::parent` (all the way to, and
    /// including, the root), bumping each block on a node's 0→1 ref-count transition.
    fn acquire(&mut self, start: NodeId) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let Some(node) = self.tree.cache_node_mut(id) else { break };
            if node.ref_count == 0 {
                let blocks = node.block_table.clone();
                for b in blocks {
                    self.pool.bump(b);
                }
            }
            node.ref_count += 1;
            cur = node.parent;
        }
    }

    /// Walks from `start` up through `CacheNode::parent`, stopping before the root,
    /// decrementing each ancestor's ref-count and purging it out of the tree (freeing
    /// its blocks) the moment it reaches zero.
    fn release(&mut self, start: NodeId) {
        let mut cur = Some(start);
        while let Some(id) = cur {
            let Some(node) = self.tree.cache_node(id) else { break };
            if node.parent.is_none() {
                break; // reached the root; never released.
            }
            let parent = node.parent;

            let (ref_count, blocks) = {
                let node = self.tree.cache_node_mut(id).unwrap();
                node.ref_count -= 1;
                (node.ref_count, node.block_table.clone())
            };

            if ref_count == 0 {
                for b in blocks {
                    if self.pool.decrement(b) == 0 {
                        tracing::trace!(block = b, "freed block back to pool");
                    }
                }
                tracing::trace!(node = id, "cache node reached zero refs, purging");
                self.tree.remove_and_purge(id);
            }

            cur = parent;
        }
    }
}
