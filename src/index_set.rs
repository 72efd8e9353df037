//! Sorted rule-index sets and the merge-join algebra the matcher runs on.
//!
//! A set is an ascending, duplicate-free slice of rule ids. Both operations
//! walk the two inputs with a pair of cursors, O(|a| + |b|).

use std::cmp::Ordering;

/// Ascending merge of two sets.
#[must_use]
pub fn union(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}

/// Partial intersection of two per-key candidate sets.
///
/// Ids present in both inputs are kept. An id found only in `a` is kept iff
/// none of the keys it is indexed on were queried by `b` (`indexed_mask(id) &
/// b_mask == 0`): had `b` queried one of them and the id were compatible, `b`
/// would have found it. Symmetrically for ids found only in `b`.
pub fn intersect(
    a: &[u32],
    b: &[u32],
    a_mask: u64,
    b_mask: u64,
    indexed_mask: impl Fn(u32) -> u64,
) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len().max(b.len()));
    let (mut i, mut j) = (0, 0);
    loop {
        let next_a = a.get(i).copied();
        let next_b = b.get(j).copied();
        match (next_a, next_b) {
            (None, None) => break,
            (Some(x), Some(y)) if x == y => {
                out.push(x);
                i += 1;
                j += 1;
            }
            (Some(x), Some(y)) if x < y => {
                if indexed_mask(x) & b_mask == 0 {
                    out.push(x);
                }
                i += 1;
            }
            (Some(x), None) => {
                if indexed_mask(x) & b_mask == 0 {
                    out.push(x);
                }
                i += 1;
            }
            (_, Some(y)) => {
                if indexed_mask(y) & a_mask == 0 {
                    out.push(y);
                }
                j += 1;
            }
        }
    }
    out
}

/// Insert `id` keeping the set sorted and duplicate-free.
pub fn insert(set: &mut Vec<u32>, id: u32) {
    match set.last() {
        Some(&last) if last < id => set.push(id),
        None => set.push(id),
        _ => {
            if let Err(pos) = set.binary_search(&id) {
                set.insert(pos, id);
            }
        }
    }
}
