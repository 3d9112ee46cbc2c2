use crate::pool::BlockId;
use crate::tree::{NodeId, TokenId};

/// One conversational exchange: a contiguous run of token-ids. The final turn of a
/// sequence is the one that grows token-by-token during decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Turn {
    pub token_ids: Vec<TokenId>,
}

/// An opaque handle to the `CacheNode` hosting a turn's cached tokens, recorded on the
/// sequence so `deallocate` can release it later. Callers should treat this as opaque;
/// its only valid uses are round-tripping through the manager.
pub type CacheNodeHandle = NodeId;

/// A multi-turn request as the block manager sees it: an ordered list of turns plus
/// the bookkeeping slots the manager writes on a successful `match_and_allocate`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Sequence {
    pub turns: Vec<Turn>,
    /// Opaque identifier enabling cross-conversation prefix reuse independent of
    /// arrival order. `None` disables group-affinity matching for this sequence.
    pub cache_group_id: Option<String>,
    /// Written by `match_and_allocate`: total tokens served from the cache.
    pub num_cached_tokens: usize,
    /// Written by `match_and_allocate`: the full physical block table, concatenated
    /// across turns in order.
    pub block_table: Vec<BlockId>,
    #[serde(skip)]
    pub(crate) turn_cache_nodes: Vec<Option<CacheNodeHandle>>,
}

impl Sequence {
    pub fn new(turns: Vec<Turn>, cache_group_id: Option<String>) -> Self {
        let turn_cache_nodes = vec![None; turns.len()];
        Self {
            turns,
            cache_group_id,
            num_cached_tokens: 0,
            block_table: Vec::new(),
            turn_cache_nodes,
        }
    }

    /// Total number of tokens across all turns, i.e. `len(seq)` in the append-path
    /// sense: it grows by one every time a decode token is appended to the last turn.
    pub fn total_len(&self) -> usize {
        self.turns.iter().map(|t| t.token_ids.len()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_sequence_has_no_cache_nodes_yet() {
        let seq = Sequence::new(vec![Turn { token_ids: vec![1, 2, 3] }, Turn { token_ids: vec![4] }], None);
        assert_eq!(seq.turn_cache_nodes, vec![None, None]);
        assert_eq!(seq.total_len(), 4);
    }
}
