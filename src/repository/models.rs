use crate::chain::Chain;
use crate::provider::Provider;
use alloy_primitives::U256;
use chrono::{DateTime, Utc};

/// One token transfer sent by a monitored facilitator address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferEvent {
    /// Token contract (EVM) or mint (Solana).
    pub address: String,
    pub transaction_from: String,
    pub sender: String,
    pub recipient: String,
    /// Integer amount in the token's smallest unit.
    pub amount: U256,
    pub block_timestamp: DateTime<Utc>,
    pub tx_hash: String,
    pub chain: Chain,
    pub provider: Provider,
    pub decimals: u8,
    pub facilitator_id: String,
    pub log_index: u64,
}

#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    pub chain: Option<Chain>,
    pub facilitator_id: Option<String>,
    pub transaction_from: Option<String>,
    pub recipient: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct FacilitatorStats {
    pub facilitator_id: String,
    pub chain: Chain,
    pub token: String,
    pub decimals: u8,
    pub transfers: usize,
    pub volume: U256,
    pub first_seen: Option<DateTime<Utc>>,
    pub last_seen: Option<DateTime<Utc>>,
}

/// Latest stored event per (chain, sender, provider) key.
#[derive(Debug, Clone)]
pub struct SenderWatermark {
    pub chain: Chain,
    pub transaction_from: String,
    pub provider: Provider,
    pub transfers: usize,
    pub latest: DateTime<Utc>,
}
