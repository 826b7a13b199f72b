use alloy_primitives::Address;

#[derive(Debug, Clone)]
pub struct TokenCandidate {
    pub address: Address,
    pub first_seen_block: u64,
}

#[derive(Debug, Clone)]
pub struct SellRecord {
    pub token: Address,
    pub last_sold: u64,
}

/// Aggregate view over all three store tables for one wallet.
#[derive(Debug, Clone)]
pub struct StoreStats {
    pub tokens_tracked: usize,
    pub checkpoint: Option<u64>,
    pub sales_recorded: usize,
}
