//! Turn-by-turn match planning: decides, for each turn of a sequence, how much of it
//! is already cached and where in the tree that cached prefix lives, without mutating
//! anything. The allocator turns this plan into actual block reservations.

use crate::sequence::Sequence;
use crate::tree::{NodeId, RadixTree, ROOT_ID};

#[derive(Debug, Clone, Copy)]
pub(crate) struct TurnPlan {
    pub parent: NodeId,
    pub matched_len: usize,
}

impl TurnPlan {
    fn unmatched() -> Self {
        Self { parent: ROOT_ID, matched_len: 0 }
    }
}

pub(crate) struct MatchPlan {
    pub turns: Vec<TurnPlan>,
    pub is_sequential_match: bool,
}

/// Runs group-affinity matching first (if the sequence carries a `cache_group_id`),
/// falling back to sequential same-conversation matching otherwise.
pub(crate) fn plan_match(tree: &RadixTree, seq: &Sequence) -> MatchPlan {
    let mut plans: Vec<TurnPlan> = seq.turns.iter().map(|_| TurnPlan::unmatched()).collect();

    if let Some(group) = seq.cache_group_id.as_deref() {
        let mut matched_any = false;
        for (i, turn) in seq.turns.iter().enumerate() {
            let (node_id, matched_len) = tree.find_longest_prefix_node(&turn.token_ids);
            if matched_len == 0 {
                continue;
            }
            let mut cur = Some(node_id);
            while let Some(id) = cur {
                let Some(cache_node) = tree.cache_node(id) else { break };
                if cache_node.cache_group_ids.contains(group) {
                    plans[i] = TurnPlan { parent: node_id, matched_len };
                    matched_any = true;
                    break;
                }
                cur = cache_node.parent;
            }
        }
        if matched_any {
            return MatchPlan { turns: plans, is_sequential_match: false };
        }
    }

    let mut last_matched = ROOT_ID;
    for (i, turn) in seq.turns.iter().enumerate() {
        let (prefix_node, matched_len) = tree.find_longest_prefix_node(&turn.token_ids);
        let is_valid_successor =
            prefix_node == ROOT_ID || tree.sequential_children(last_matched).contains(&prefix_node);

        if matched_len == 0 || !is_valid_successor {
            break;
        }

        plans[i] = TurnPlan { parent: prefix_node, matched_len };
        if matched_len == turn.token_ids.len() {
            last_matched = prefix_node;
        } else {
            break;
        }
    }

    MatchPlan { turns: plans, is_sequential_match: true }
}
