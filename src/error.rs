use thiserror::Error;

/// Failure classes that keep their identity across the engine. Per-token
/// skips are not errors and travel as `SkipReason` in swap outcomes;
/// everything else is wrapped in `anyhow::Error` context at the call site.
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("rpc unreachable: {0}")]
    Connectivity(String),

    #[error("balance read failed for {token}: {reason}")]
    BalanceRead { token: String, reason: String },

    #[error("transaction failed: {0}")]
    Transaction(String),

    #[error("configuration: {0}")]
    Configuration(String),
}
