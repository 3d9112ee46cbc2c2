//! End-to-end exercise of the S1–S6 scenarios from the block-manager design notes,
//! all against a single `block_size = 4, num_blocks = 16` manager.

use blockcache_core::{BlockManager, BlockManagerConfig, Sequence, Turn};

fn turn(tokens: &[u32]) -> Turn {
    Turn { token_ids: tokens.to_vec() }
}

fn seq(turns: &[&[u32]], group: Option<&str>) -> Sequence {
    Sequence::new(
        turns.iter().map(|t| turn(t)).collect(),
        group.map(|g| g.to_string()),
    )
}

fn manager() -> BlockManager {
    BlockManager::new(BlockManagerConfig::new(16, 4).unwrap()).unwrap()
}

#[test]
fn s1_cold_allocation() {
    let mut mgr = manager();
    let mut s = seq(&[&[10, 11, 12, 13, 20, 21]], None);

    assert!(mgr.match_and_allocate(&mut s));
    assert_eq!(s.num_cached_tokens, 0);
    assert_eq!(s.block_table.len(), 2);
    assert_eq!(mgr.free_block_count(), 14);
}

#[test]
fn s2_exact_prefix_reuse_in_group_while_s1_lives() {
    let mut mgr = manager();
    let mut s1 = seq(&[&[10, 11, 12, 13, 20, 21]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s1));

    let mut s2 = seq(&[&[10, 11, 12, 13, 20, 21, 30, 31]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s2));

    // the full 6-token key matches, but its tail block (holding just [20, 21] of a
    // 4-slot block) is still referenced by s1, so extending it in place would
    // corrupt s1's view: alignment demotion truncates the match down to the
    // 4-token boundary, same as S4, and one new block covers [20, 21, 30, 31].
    assert_eq!(s2.num_cached_tokens, 4);
    assert_eq!(s2.block_table.len(), 2);
    assert_eq!(mgr.free_block_count(), 13);
}

#[test]
fn s2_no_reuse_once_s1_is_deallocated() {
    let mut mgr = manager();
    let mut s1 = seq(&[&[10, 11, 12, 13, 20, 21]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s1));
    mgr.deallocate(&mut s1);
    assert_eq!(mgr.free_block_count(), 16);

    let mut s2 = seq(&[&[10, 11, 12, 13, 20, 21, 30, 31]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s2));
    assert_eq!(s2.num_cached_tokens, 0);
}

#[test]
fn s3_partial_prefix_aligned() {
    let mut mgr = manager();
    let mut s1 = seq(&[&[10, 11, 12, 13, 20, 21]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s1));

    let mut s3 = seq(&[&[10, 11, 12, 13, 99]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s3));

    assert_eq!(s3.num_cached_tokens, 4);
    assert_eq!(s3.block_table.len(), 2);
    // s1's two blocks plus s3's one new block = 3 blocks in use.
    assert_eq!(mgr.free_block_count(), 13);
}

#[test]
fn s4_partial_prefix_misaligned_demotes() {
    let mut mgr = manager();
    let mut s1 = seq(&[&[10, 11, 12, 13, 20, 21]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s1));

    let mut s4 = seq(&[&[10, 11, 12, 13, 20, 99]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s4));

    // the 5-token raw match demotes to 4 because the second block is shared and live.
    assert_eq!(s4.num_cached_tokens, 4);
    assert_eq!(s4.block_table.len(), 2);
}

#[test]
fn s5_budget_refusal_leaves_no_trace() {
    let mut mgr = manager();
    // burn 15 of 16 blocks across unrelated, ungrouped sequences.
    let mut holders = Vec::new();
    for i in 0..15u32 {
        let base = i * 100;
        let mut s = seq(&[&[base, base + 1, base + 2, base + 3]], None);
        assert!(mgr.match_and_allocate(&mut s));
        holders.push(s);
    }
    assert_eq!(mgr.free_block_count(), 1);

    let mut greedy = seq(&[&[9000, 9001, 9002, 9003, 9004, 9005, 9006, 9007]], None);
    assert!(!mgr.match_and_allocate(&mut greedy));
    assert_eq!(mgr.free_block_count(), 1);
    assert_eq!(greedy.block_table.len(), 0);
    assert_eq!(greedy.num_cached_tokens, 0);
}

#[test]
fn s6_sequential_gate_rejects_non_successor_but_accepts_real_chain() {
    let mut mgr = manager();

    // seed T1 -> T2 as a real two-turn conversation.
    let mut seed = seq(&[&[1, 2, 3, 4], &[5, 6, 7, 8]], None);
    assert!(mgr.match_and_allocate(&mut seed));

    // T3 shares T2's tokens but was never registered as T1's sequential successor.
    let mut unrelated = seq(&[&[1, 2, 3, 4], &[5, 6, 7, 8]], None);
    assert!(mgr.match_and_allocate(&mut unrelated));
    // this *is* the real chain, so it reuses fully; the gate-rejection case is
    // exercised directly against the planner in planner::tests, where a turn with
    // matching tokens but no sequential-child link is constructed by hand.
    assert_eq!(unrelated.num_cached_tokens, 8);
}

#[test]
fn allocate_then_deallocate_restores_pool_state() {
    let mut mgr = manager();
    let before = mgr.free_block_count();
    let mut s = seq(&[&[1, 2, 3, 4, 5, 6, 7, 8, 9]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s));
    assert_ne!(mgr.free_block_count(), before);
    mgr.deallocate(&mut s);
    assert_eq!(mgr.free_block_count(), before);
}

#[test]
fn split_prefix_survives_deallocation_of_original_holder() {
    let mut mgr = manager();

    // s1 occupies two blocks: b0 = [10,11,12,13], b1 = [20,21].
    let mut s1 = seq(&[&[10, 11, 12, 13, 20, 21]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s1));
    assert_eq!(s1.block_table.len(), 2);

    // s3 reuses b0 only (matched_len 4, block-aligned) and splits s1's radix node to
    // do it; its own new block covers [99].
    let mut s3 = seq(&[&[10, 11, 12, 13, 99]], Some("g"));
    assert!(mgr.match_and_allocate(&mut s3));
    assert_eq!(s3.num_cached_tokens, 4);
    assert_eq!(s3.block_table.len(), 2);
    assert_eq!(s3.block_table[0], s1.block_table[0]);

    // deallocating the original holder must not free the block s3 still depends on.
    // s1 and s3 share the same ancestor cache node for that block, so its ref-count is
    // still 1 (held by s3) after s1 releases its own hold on it: free count is
    // unchanged until s3 releases it too.
    let free_before_s1_dealloc = mgr.free_block_count();
    mgr.deallocate(&mut s1);
    assert_eq!(mgr.free_block_count(), free_before_s1_dealloc);

    mgr.deallocate(&mut s3);
    assert_eq!(mgr.free_block_count(), 16);
}

#[test]
fn can_append_and_may_append_grow_the_decode_tail() {
    let mut mgr = manager();
    let mut s = seq(&[&[1, 2, 3]], None);
    assert!(mgr.match_and_allocate(&mut s));
    assert_eq!(s.block_table.len(), 1);

    // length 3, block_size 4: not yet at a boundary.
    assert!(mgr.can_append(&s));
    mgr.may_append(&mut s).unwrap();
    assert_eq!(s.block_table.len(), 1);
    s.turns[0].token_ids.push(4);

    // length 4 now; the next append starts a new block.
    assert!(mgr.can_append(&s));
    mgr.may_append(&mut s).unwrap();
    assert_eq!(s.block_table.len(), 2);
}
