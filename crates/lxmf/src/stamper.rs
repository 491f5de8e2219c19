//! Proof-of-work stamping (spec §4.2): workblock derivation, stamp search,
//! and stamp validation. Regular messages are stamped against their own
//! `hash`; propagation-node submissions are stamped against `transient_id`
//! with a shorter workblock, which prevents a stamp minted for one node
//! from being replayed against another.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use hkdf::Hkdf;
use rand_core::CryptoRngCore;
use sha2::{Digest, Sha256};

use crate::constants::{STAMP_CANCEL_CHECK_INTERVAL, STAMP_SIZE};

const BLOCK_SIZE: usize = 256;

/// A thin, cloneable cancel flag checked periodically by `generate_stamp`.
/// Not tied to any particular runtime — the host decides what triggers it
/// (a dropped channel, a user abort, a shutdown signal).
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Derives the `expand_rounds * 256`-byte search surface for `id` (a
/// `message_id` for DIRECT stamps, a `transient_id` for propagation-node
/// stamps). Each round's 256-byte block is an HKDF-SHA256 expansion keyed
/// by the round index and the previous block, so a workblock with `n`
/// rounds shares its first `k * 256` bytes with one of `k` rounds for any
/// `k <= n` (spec §8 invariant 5) — later rounds only ever look backward,
/// never forward.
pub fn stamp_workblock(id: &[u8], expand_rounds: usize) -> Vec<u8> {
    let hk = Hkdf::<Sha256>::new(None, id);
    let mut out = Vec::with_capacity(expand_rounds * BLOCK_SIZE);
    let mut previous = Vec::new();
    for round in 0..expand_rounds {
        let mut info = Vec::with_capacity(4 + previous.len());
        info.extend_from_slice(&(round as u32).to_be_bytes());
        info.extend_from_slice(&previous);
        let mut block = [0u8; BLOCK_SIZE];
        hk.expand(&info, &mut block)
            .expect("256-byte okm is within HKDF-SHA256's output range");
        out.extend_from_slice(&block);
        previous = block.to_vec();
    }
    out
}

/// Number of leading zero bits of `SHA-256(workblock ‖ stamp)`, i.e. `256 -
/// bit_length` of the digest read as a big-endian integer.
pub fn stamp_value(workblock: &[u8], stamp: &[u8]) -> u32 {
    let mut hasher = Sha256::new();
    hasher.update(workblock);
    hasher.update(stamp);
    let digest = hasher.finalize();
    leading_zero_bits(&digest)
}

fn leading_zero_bits(digest: &[u8]) -> u32 {
    let mut bits = 0u32;
    for byte in digest {
        if *byte == 0 {
            bits += 8;
            continue;
        }
        bits += byte.leading_zeros();
        break;
    }
    bits
}

/// `valid(stamp, target_cost, workblock)` (spec §4.2). Cost 0 accepts any
/// well-formed stamp; anything shorter than `STAMP_SIZE` is rejected
/// without hashing.
pub fn stamp_valid(workblock: &[u8], stamp: &[u8], target_cost: u32) -> bool {
    if stamp.len() < STAMP_SIZE {
        return false;
    }
    if target_cost == 0 {
        return true;
    }
    stamp_value(workblock, stamp) >= target_cost
}

/// Searches for a 32-byte stamp over `workblock` meeting `cost`, using
/// fresh random bytes per trial (spec §4.2's "search is randomized"). Polls
/// `cancel` every [`STAMP_CANCEL_CHECK_INTERVAL`] trials and returns `None`
/// if it fires, releasing the workblock without a result.
pub fn generate_stamp<R: CryptoRngCore>(
    workblock: &[u8],
    cost: u32,
    cancel: &CancellationToken,
    rng: &mut R,
) -> Option<[u8; STAMP_SIZE]> {
    let mut trial: u64 = 0;
    loop {
        if trial % STAMP_CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
            log::debug!("stamp search cancelled after {trial} trials");
            return None;
        }
        let mut stamp = [0u8; STAMP_SIZE];
        rng.fill_bytes(&mut stamp);
        if stamp_value(workblock, &stamp) >= cost {
            return Some(stamp);
        }
        trial = trial.wrapping_add(1);
    }
}

/// Validates a propagation-node stamp bound to `transient_id` rather than
/// a `message_id`, using the shorter `WORKBLOCK_EXPAND_ROUNDS_PN` search
/// surface (spec §4.2, §4.5 "Stamp requirement").
pub fn validate_pn_stamp(transient_id: &[u8], stamp: &[u8], target_cost: u32) -> bool {
    let workblock = stamp_workblock(transient_id, crate::constants::WORKBLOCK_EXPAND_ROUNDS_PN);
    stamp_valid(&workblock, stamp, target_cost)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_core::OsRng;

    #[test]
    fn workblock_prefix_is_stable_across_round_counts() {
        let id = [7u8; 32];
        let small = stamp_workblock(&id, 4);
        let large = stamp_workblock(&id, 9);
        assert_eq!(&large[..4 * BLOCK_SIZE], &small[..]);
    }

    #[test]
    fn workblock_is_deterministic() {
        let id = [3u8; 32];
        assert_eq!(stamp_workblock(&id, 5), stamp_workblock(&id, 5));
    }

    #[test]
    fn generated_stamp_validates_at_and_below_its_cost_not_above() {
        let id = [1u8; 32];
        let workblock = stamp_workblock(&id, 25);
        let cancel = CancellationToken::new();
        let stamp = generate_stamp(&workblock, 8, &cancel, &mut OsRng)
            .expect("search must terminate for a modest cost");
        let value = stamp_value(&workblock, &stamp);
        assert!(value >= 8);
        assert!(stamp_valid(&workblock, &stamp, 8));
        assert!(stamp_valid(&workblock, &stamp, 4));
        assert!(!stamp_valid(&workblock, &stamp, value + 1));
    }

    #[test]
    fn cost_zero_accepts_any_well_formed_stamp() {
        let workblock = stamp_workblock(&[9u8; 32], 2);
        assert!(stamp_valid(&workblock, &[0u8; STAMP_SIZE], 0));
    }

    #[test]
    fn short_stamp_is_rejected_before_hashing() {
        let workblock = stamp_workblock(&[9u8; 32], 2);
        assert!(!stamp_valid(&workblock, &[0u8; 16], 0));
    }

    #[test]
    fn cancellation_stops_the_search_and_yields_none() {
        let id = [42u8; 32];
        let workblock = stamp_workblock(&id, 25);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(generate_stamp(&workblock, 255, &cancel, &mut OsRng).is_none());
    }

    #[test]
    fn pn_stamp_validates_against_transient_id_workblock() {
        let transient_id = [5u8; 32];
        let workblock =
            stamp_workblock(&transient_id, crate::constants::WORKBLOCK_EXPAND_ROUNDS_PN);
        let cancel = CancellationToken::new();
        let stamp = generate_stamp(&workblock, 6, &cancel, &mut OsRng).unwrap();
        assert!(validate_pn_stamp(&transient_id, &stamp, 6));
        assert!(!validate_pn_stamp(&transient_id, &stamp, 255));
    }
}
