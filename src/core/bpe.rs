//! Byte-pair merge loop.
//!
//! Symbols live in a flat array threaded into a doubly-linked list, so a
//! merge unlinks one node in O(1). Candidate pairs wait in a min-heap keyed by
//! `(rank, left position)`; each merge costs O(log n) instead of rescanning
//! the whole word, which keeps pathological inputs (long runs of one
//! character) linear-logarithmic.
//!
//! Ordering is fully determined by the rule table: the lowest rank merges
//! first and equal ranks resolve to the leftmost pair. Node indices never
//! move, so a smaller index always means further left.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use super::merges::{MergeTable, Rank};
use super::vocab::TokenId;

const NONE: usize = usize::MAX;

/// One segment of a chunk during merging.
///
/// `start..end` is the byte range of the chunk text the symbol covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symbol {
    pub id: TokenId,
    pub start: usize,
    pub end: usize,
    /// Stands in for out-of-vocabulary text; never takes part in a merge.
    pub unknown: bool,
}

struct Node {
    symbol: Symbol,
    prev: usize,
    next: usize,
    alive: bool,
}

/// Apply merge rules to `symbols` until no rule matches.
///
/// Returns the surviving symbols in text order.
pub fn merge_symbols(symbols: Vec<Symbol>, merges: &MergeTable) -> Vec<Symbol> {
    let n = symbols.len();
    if n < 2 || merges.is_empty() {
        return symbols;
    }

    let mut nodes: Vec<Node> = symbols
        .into_iter()
        .enumerate()
        .map(|(i, symbol)| Node {
            symbol,
            prev: if i > 0 { i - 1 } else { NONE },
            next: if i + 1 < n { i + 1 } else { NONE },
            alive: true,
        })
        .collect();

    let mut heap: BinaryHeap<Reverse<(Rank, usize, usize)>> = BinaryHeap::with_capacity(n);
    for i in 0..n - 1 {
        if let Some((rank, _)) = pair_rule(&nodes, i, i + 1, merges) {
            heap.push(Reverse((rank, i, i + 1)));
        }
    }

    while let Some(Reverse((rank, left, right))) = heap.pop() {
        // Entries go stale once either side has been merged away or changed.
        if !nodes[left].alive || nodes[left].next != right {
            continue;
        }
        let Some((current, merged_id)) = pair_rule(&nodes, left, right, merges) else {
            continue;
        };
        if current != rank {
            continue;
        }

        let right_end = nodes[right].symbol.end;
        let after = nodes[right].next;
        nodes[right].alive = false;

        let node = &mut nodes[left];
        node.symbol.id = merged_id;
        node.symbol.end = right_end;
        node.next = after;
        if after != NONE {
            nodes[after].prev = left;
        }

        let before = nodes[left].prev;
        if before != NONE {
            if let Some((r, _)) = pair_rule(&nodes, before, left, merges) {
                heap.push(Reverse((r, before, left)));
            }
        }
        if after != NONE {
            if let Some((r, _)) = pair_rule(&nodes, left, after, merges) {
                heap.push(Reverse((r, left, after)));
            }
        }
    }

    let mut out = Vec::with_capacity(n);
    let mut cur = 0;
    while cur != NONE {
        out.push(nodes[cur].symbol);
        cur = nodes[cur].next;
    }
    out
}

#[inline]
fn pair_rule(
    nodes: &[Node],
    left: usize,
    right: usize,
    merges: &MergeTable,
) -> Option<(Rank, TokenId)> {
    let (l, r) = (&nodes[left].symbol, &nodes[right].symbol);
    if l.unknown || r.unknown {
        return None;
    }
    merges.get(l.id, r.id)
}
