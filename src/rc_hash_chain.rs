//! Hash Chain Module
//!
//! Expands a seed into a long BLAKE3 hash chain and finds preimages on it
//! again while only a sparse subset of the chain is stored.
//!
//! # Layout
//!
//! ```text
//! seed = H^0 -> H^1 -> ... -> H^B -> ... -> H^2B -> ... -> H^N (head)
//!        [*]                  [*]            [*]            [*]
//! ```
//!
//! Only the marked points (every `B`-th element plus the head) are kept.
//! Finding the preimage of any element costs at most `B` hash evaluations:
//! walk the stored boundaries from the end towards the root and hash forward
//! from each until the target shows up.

use crate::rc_errors::StoreError;
use crate::rc_interface::{Hash, Intermediate, IntermediateLookup, IteratedHash};

/// Expand `seed` into a chain of `total_iterations` steps
///
/// Records `H^i(seed)` for every `i` that is a multiple of `block_size`
/// (up to `total_iterations`) plus the head `H^N(seed)`. With
/// `total_iterations == 0` the seed is both root and head and is recorded once.
/// CPU-bound; callers on an async runtime should run it on a blocking thread.
///
/// # Panics
/// Panics if `block_size` is zero (`CommitmentConfig::validate` rejects that)
pub fn iterate_hash(seed: &[u8; 32], total_iterations: usize, block_size: usize) -> IteratedHash {
    assert!(block_size > 0, "block size must be positive");

    let mut current = Hash::new(*seed);

    if total_iterations == 0 {
        return IteratedHash {
            intermediates: vec![Intermediate {
                iteration: 0,
                intermediate: current,
            }],
            hash: current,
        };
    }

    let mut intermediates = Vec::with_capacity(total_iterations / block_size + 2);
    for iteration in 0..total_iterations {
        if iteration % block_size == 0 {
            intermediates.push(Intermediate {
                iteration,
                intermediate: current,
            });
        }
        current = current.hash();
    }

    // head is always persisted, whether or not N falls on a block boundary
    intermediates.push(Intermediate {
        iteration: total_iterations,
        intermediate: current,
    });

    IteratedHash {
        intermediates,
        hash: current,
    }
}

/// Find `x` with `H(x) == hash_value` using the stored boundaries
///
/// Boundaries are visited from `floor(N / B) * B` down to `0`; `index_hint`,
/// when given, is tried first. Boundaries missing from `lookup` are skipped,
/// so a partially damaged store can still answer from the boundaries left.
///
/// Returns `Ok(None)` when no stored boundary reaches `hash_value` within one
/// block, which means the value does not belong to this chain (or the chain
/// was never stored).
pub async fn recover_iterated_hash<L>(
    hash_value: &Hash,
    lookup: &L,
    total_iterations: usize,
    block_size: usize,
    index_hint: Option<usize>,
) -> Result<Option<Intermediate>, StoreError>
where
    L: IntermediateLookup + ?Sized,
{
    if block_size == 0 {
        return Ok(None);
    }

    let closest_boundary = total_iterations - (total_iterations % block_size);
    let hint = index_hint.filter(|i| i % block_size == 0 && *i <= closest_boundary);

    if let Some(start) = hint {
        if let Some(found) = search_from(hash_value, lookup, start, block_size).await? {
            return Ok(Some(found));
        }
    }

    for start in (0..=closest_boundary).rev().step_by(block_size) {
        if Some(start) == hint {
            continue;
        }
        if let Some(found) = search_from(hash_value, lookup, start, block_size).await? {
            return Ok(Some(found));
        }
    }

    Ok(None)
}

/// Hash forward from the boundary at `start` for up to one block
async fn search_from<L>(
    hash_value: &Hash,
    lookup: &L,
    start: usize,
    block_size: usize,
) -> Result<Option<Intermediate>, StoreError>
where
    L: IntermediateLookup + ?Sized,
{
    let Some(mut intermediate) = lookup.lookup(start).await? else {
        log::trace!("no stored intermediate at iteration {}", start);
        return Ok(None);
    };

    for step in 0..block_size {
        let next = intermediate.hash();
        if next == *hash_value {
            return Ok(Some(Intermediate {
                iteration: start + step,
                intermediate,
            }));
        }
        intermediate = next;
    }

    Ok(None)
}
