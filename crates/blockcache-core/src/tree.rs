//! The prefix index: a compressed trie (radix tree) over token-id sequences, with a
//! reference-counted [`CacheNode`] hosted at the nodes that actually carry cached
//! blocks. Nodes live in a flat arena keyed by [`NodeId`] rather than behind `Rc`/`Arc`
//! cycles, following the handle-based style the design notes call for.

use hashbrown::{HashMap, HashSet};
use rustc_hash::FxBuildHasher;

use crate::pool::BlockId;

pub type NodeId = u32;
pub type TokenId = u32;

/// The handle of the immortal root node. Its `CacheNode` is pinned and never freed.
pub const ROOT_ID: NodeId = 0;

type FxHashMap<K, V> = HashMap<K, V, FxBuildHasher>;
type FxHashSet<T> = HashSet<T, FxBuildHasher>;

/// Per-node cache metadata: the blocks a node's own edge fragment occupies, and the
/// ref-counted holders that keep them alive.
#[derive(Debug, Clone)]
pub(crate) struct CacheNode {
    /// The node this one is hosted on, kept only for debug output.
    pub node_id: NodeId,
    /// Nearest ancestor node that itself hosts a `CacheNode`. `None` only for the root.
    pub parent: Option<NodeId>,
    pub block_table: Vec<BlockId>,
    pub token_count: usize,
    pub ref_count: u32,
    pub cache_group_ids: FxHashSet<String>,
}

impl CacheNode {
    fn root() -> Self {
        Self {
            node_id: ROOT_ID,
            parent: None,
            block_table: Vec::new(),
            token_count: 0,
            ref_count: 1,
            cache_group_ids: FxHashSet::default(),
        }
    }
}

#[derive(Debug)]
struct RadixNode {
    /// Structural parent, i.e. the node this one is directly hooked under via
    /// `children`. Distinct from `CacheNode::parent`, which may skip over dataless
    /// branch nodes created by a split.
    parent: NodeId,
    key_fragment: Vec<TokenId>,
    children: FxHashMap<TokenId, NodeId>,
    data: Option<CacheNode>,
    sequential_children: FxHashSet<NodeId>,
}

impl RadixNode {
    fn root() -> Self {
        Self {
            parent: ROOT_ID,
            key_fragment: Vec::new(),
            children: FxHashMap::default(),
            data: Some(CacheNode::root()),
            sequential_children: FxHashSet::default(),
        }
    }
}

/// A compressed trie over token-id sequences. Each edge is labeled with a non-empty
/// fragment of token-ids; a node's key is the concatenation of fragments from the root.
#[derive(Debug)]
pub(crate) struct RadixTree {
    nodes: FxHashMap<NodeId, RadixNode>,
    next_id: NodeId,
}

impl RadixTree {
    pub fn new() -> Self {
        let mut nodes = FxHashMap::default();
        nodes.insert(ROOT_ID, RadixNode::root());
        Self { nodes, next_id: ROOT_ID + 1 }
    }

    fn alloc_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn cache_node(&self, id: NodeId) -> Option<&CacheNode> {
        self.nodes.get(&id)?.data.as_ref()
    }

    pub fn cache_node_mut(&mut self, id: NodeId) -> Option<&mut CacheNode> {
        self.nodes.get_mut(&id)?.data.as_mut()
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn sequential_children(&self, id: NodeId) -> &FxHashSet<NodeId> {
        static EMPTY: std::sync::OnceLock<FxHashSet<NodeId>> = std::sync::OnceLock::new();
        self.nodes
            .get(&id)
            .map(|n| &n.sequential_children)
            .unwrap_or_else(|| EMPTY.get_or_init(FxHashSet::default))
    }

    pub fn add_sequential_child(&mut self, parent: NodeId, child: NodeId) {
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.sequential_children.insert(child);
        }
    }

    /// Descends from the root following `tokens`, returning the deepest node that
    /// carries a `CacheNode` together with how many tokens were matched down to it.
    /// Stale handles dangling in `sequential_children` are never dereferenced here;
    /// this only ever walks live structural edges.
    pub fn find_longest_prefix_node(&self, tokens: &[TokenId]) -> (NodeId, usize) {
        if tokens.is_empty() {
            return (ROOT_ID, 0);
        }
        let mut node_id = ROOT_ID;
        let mut pos = 0usize;
        let mut last_match = ROOT_ID;
        let mut matched_len = 0usize;

        loop {
            if pos >= tokens.len() {
                break;
            }
            let Some(node) = self.nodes.get(&node_id) else { break };
            let Some(&child_id) = node.children.get(&tokens[pos]) else { break };
            let Some(child) = self.nodes.get(&child_id) else { break };

            let fragment = &child.key_fragment;
            let mut common = 0usize;
            while common < fragment.len()
                && pos + common < tokens.len()
                && fragment[common] == tokens[pos + common]
            {
                common += 1;
            }
            pos += common;
            node_id = child_id;
            if child.data.is_some() {
                last_match = node_id;
                matched_len = pos;
            }
            if common < fragment.len() {
                break;
            }
        }

        (last_match, matched_len)
    }

    /// Inserts `tokens` with `data` hosted at the resulting leaf, splitting an
    /// existing edge if `tokens` diverges from it partway through. Reinserting an
    /// exact existing key is a no-op on that node's existing `CacheNode` (it is not
    /// overwritten) and simply returns the node.
    ///
    /// `data.parent` is trusted as given (the caller already knows the nearest
    /// cache-bearing ancestor from its match plan); this only fills in `node_id` and,
    /// when a split interposes a new ancestor, reparents the node that used to sit
    /// directly below it.
    pub fn insert(&mut self, tokens: &[TokenId], mut data: CacheNode) -> NodeId {
        let mut node_id = ROOT_ID;
        let mut pos = 0usize;

        while pos < tokens.len() {
            let token = tokens[pos];
            let child_id = self.nodes[&node_id].children.get(&token).copied();

            let Some(child_id) = child_id else {
                let new_id = self.alloc_id();
                data.node_id = new_id;
                let new_node = RadixNode {
                    parent: node_id,
                    key_fragment: tokens[pos..].to_vec(),
                    children: FxHashMap::default(),
                    data: Some(data),
                    sequential_children: FxHashSet::default(),
                };
                self.nodes.get_mut(&node_id).unwrap().children.insert(token, new_id);
                self.nodes.insert(new_id, new_node);
                return new_id;
            };

            let fragment_len = self.nodes[&child_id].key_fragment.len();
            let mut common = 0usize;
            while common < fragment_len
                && pos + common < tokens.len()
                && self.nodes[&child_id].key_fragment[common] == tokens[pos + common]
            {
                common += 1;
            }

            if common == fragment_len {
                pos += common;
                node_id = child_id;
                continue;
            }

            // Divergence mid-fragment: split the edge.
            let common_fragment = self.nodes[&child_id].key_fragment[..common].to_vec();
            let common_id = self.alloc_id();

            let child_first_token = {
                let child = self.nodes.get_mut(&child_id).unwrap();
                child.key_fragment = child.key_fragment[common..].to_vec();
                child.parent = common_id;
                child.key_fragment[0]
            };

            let mut common_node = RadixNode {
                parent: node_id,
                key_fragment: common_fragment,
                children: FxHashMap::default(),
                data: None,
                sequential_children: FxHashSet::default(),
            };
            common_node.children.insert(child_first_token, child_id);
            self.nodes.insert(common_id, common_node);
            self.nodes.get_mut(&node_id).unwrap().children.insert(token, common_id);

            let remaining = &tokens[pos + common..];
            if !remaining.is_empty() {
                let new_id = self.alloc_id();
                data.node_id = new_id;
                // `data.parent` is left as the caller supplied it: the common node
                // created by this split is dataless, and `acquire`/`release` stop the
                // instant they hit a node with no `CacheNode`, so the cascade must
                // still point at the real nearest cache-bearing ancestor.
                let new_node = RadixNode {
                    parent: common_id,
                    key_fragment: remaining.to_vec(),
                    children: FxHashMap::default(),
                    data: Some(data),
                    sequential_children: FxHashSet::default(),
                };
                self.nodes
                    .get_mut(&common_id)
                    .unwrap()
                    .children
                    .insert(remaining[0], new_id);
                self.nodes.insert(new_id, new_node);
                return new_id;
            }

            // The new key ends exactly at the split point: common_node hosts it, and
            // the old child's CacheNode is reparented to it (a new ancestor layer now
            // sits between it and whatever used to be its nearest cached ancestor).
            data.node_id = common_id;
            if let Some(child_data) = self.nodes.get_mut(&child_id).unwrap().data.as_mut() {
                child_data.parent = Some(common_id);
            }
            self.nodes.get_mut(&common_id).unwrap().data = Some(data);
            return common_id;
        }

        // Exhausted tokens exactly at a structural node boundary.
        if self.nodes[&node_id].data.is_none() {
            data.node_id = node_id;
            self.nodes.get_mut(&node_id).unwrap().data = Some(data);
        }
        node_id
    }

    /// Detaches `id` from its structural parent and recursively drops its entire
    /// (now-unreachable) subtree out of the arena. Only called once a `CacheNode`'s
    /// ref-count has hit zero, at which point — because `acquire` cascades every live
    /// descendant's count up through `CacheNode::parent` to the root — nothing beneath
    /// `id` can still be live.
    pub fn remove_and_purge(&mut self, id: NodeId) {
        debug_assert_ne!(id, ROOT_ID, "the root is never removed");
        if let Some(node) = self.nodes.get(&id) {
            let parent_id = node.parent;
            if let Some(first_token) = node.key_fragment.first().copied() {
                if let Some(parent) = self.nodes.get_mut(&parent_id) {
                    parent.children.remove(&first_token);
                }
            }
        }
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            if let Some(node) = self.nodes.remove(&cur) {
                stack.extend(node.children.values().copied());
            }
        }
    }

    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn debug_check_structure(&self) -> Result<(), String> {
        for (&id, node) in &self.nodes {
            if id != ROOT_ID && node.key_fragment.is_empty() {
                return Err(format!("non-root node {id} has an empty key fragment"));
            }
            let mut seen_first_tokens = FxHashSet::default();
            for (&tok, _) in &node.children {
                if !seen_first_tokens.insert(tok) {
                    return Err(format!("node {id} has duplicate child first-token {tok}"));
                }
            }
        }
        Ok(())
    }

    /// Every live `CacheNode`, for the invariant checker: property (2)/(3) of the
    /// design notes are about the relationship between a node's own ref-count and the
    /// blocks it names, so the checker needs to see every node, not just the root.
    #[cfg(any(test, feature = "testing"))]
    pub(crate) fn live_cache_nodes(&self) -> impl Iterator<Item = &CacheNode> {
        self.nodes.values().filter_map(|n| n.data.as_ref())
    }
}
