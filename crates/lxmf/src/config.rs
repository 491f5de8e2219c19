use std::time::Duration;

use crate::constants;

/// Plain, host-constructed configuration (SPEC_FULL §2 "Configuration").
/// No file/env parsing lives in this crate — out of scope per spec.md,
/// consumed-by-contract; the embedding application builds this however it
/// likes and may override any field after `Default::default()`.
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
    /// Proof-of-work cost this router's propagation-node submissions target
    /// when a node doesn't advertise its own (or for a node registered
    /// out-of-band without a cost hint).
    pub default_stamp_cost: u32,
    /// Accepted slack below a node's advertised `stamp_cost`.
    pub stamp_cost_flexibility: u32,
    /// Cap on messages requested per `/get` sync round.
    pub sync_limit: u32,
    /// Cap on a single submission's size in KB, mirrored to the node via
    /// the `/get` `limit_kb` parameter on retrieval.
    pub per_transfer_limit_kb: u32,
    /// Bounded attempt count for OPPORTUNISTIC delivery (spec §4.4).
    pub opportunistic_max_attempts: u32,
    /// Base delay for OPPORTUNISTIC's capped exponential backoff.
    pub opportunistic_retry_base: Duration,
    /// Ceiling for OPPORTUNISTIC's capped exponential backoff.
    pub opportunistic_retry_cap: Duration,
    /// Link establishment timeout (spec §5: "typical 6s x hop_count").
    pub link_establishment_timeout: Duration,
    /// Overall deadline for one propagation sync.
    pub sync_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_stamp_cost: constants::PROPAGATION_COST,
            stamp_cost_flexibility: constants::PROPAGATION_COST_FLEX,
            sync_limit: constants::SYNC_LIMIT,
            per_transfer_limit_kb: constants::PROPAGATION_LIMIT,
            opportunistic_max_attempts: constants::OPPORTUNISTIC_MAX_ATTEMPTS,
            opportunistic_retry_base: Duration::from_secs(5),
            opportunistic_retry_cap: Duration::from_secs(120),
            link_establishment_timeout: Duration::from_secs(6),
            sync_timeout: Duration::from_secs(60),
        }
    }
}
