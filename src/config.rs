use crate::error::SweepError;
use alloy_primitives::Address;
use anyhow::{Context, Result};
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    pub json_rpc_urls: Vec<String>,
    pub wallet_address: Address,
    pub chain_id: u64,
    pub database_url: String,
    pub native_symbol: String,

    /// Quoting contract. Classification and execution need it; discovery
    /// and store inspection work without it.
    pub lens_address: Option<Address>,
    pub private_key: Option<String>,
    pub safe_mode: bool,

    pub dust_threshold_native: f64,
    pub dust_threshold_usd: f64,
    pub dust_threshold_usd_stable: f64,
    pub stable_token_addresses: Vec<Address>,
    pub min_swap_native: f64,
    pub max_candidates: usize,
    pub max_swaps_per_run: usize,
    pub slippage_bps: u32,
    pub swap_fraction_bps: u32,
    pub deadline_secs: u64,
    pub cooldown_secs: u64,
    pub inter_swap_delay_secs: u64,

    pub discovery_chunk_size: u64,
    pub discovery_max_chunks: u64,

    pub holdings_api_url: Option<String>,
    pub holdings_api_key: Option<String>,
    pub holdings_cache_path: String,
    pub explorer_api_url: Option<String>,
    pub explorer_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let urls_raw = std::env::var("JSON_RPC_URLS")
            .or_else(|_| std::env::var("JSON_RPC_URL"))
            .context("JSON_RPC_URLS must be set in .env")?;
        let json_rpc_urls: Vec<String> = urls_raw
            .split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        if json_rpc_urls.is_empty() {
            anyhow::bail!("JSON_RPC_URLS must contain at least one URL");
        }

        let wallet_str =
            std::env::var("WALLET_ADDRESS").context("WALLET_ADDRESS must be set in .env")?;
        let wallet_address =
            Address::from_str(&wallet_str).context("Invalid WALLET_ADDRESS format")?;

        let lens_address = match var_opt("LENS_ADDRESS") {
            Some(s) => Some(Address::from_str(&s).context("Invalid LENS_ADDRESS format")?),
            None => None,
        };

        let database_url =
            std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:./sweeper.db".to_string());

        let mut stable_token_addresses = Vec::new();
        if let Some(raw) = var_opt("STABLE_TOKEN_ADDRESSES") {
            for part in raw.split(',') {
                let part = part.trim();
                if part.is_empty() {
                    continue;
                }
                let address = Address::from_str(part)
                    .with_context(|| format!("Invalid STABLE_TOKEN_ADDRESSES entry: {part}"))?;
                stable_token_addresses.push(address);
            }
        }

        Ok(Config {
            json_rpc_urls,
            wallet_address,
            chain_id: var_or("CHAIN_ID", 143)?,
            database_url,
            native_symbol: std::env::var("NATIVE_SYMBOL").unwrap_or_else(|_| "MON".to_string()),
            lens_address,
            private_key: var_opt("PRIVATE_KEY"),
            safe_mode: var_bool("SAFE_MODE", true),
            dust_threshold_native: var_or("DUST_THRESHOLD_NATIVE", 0.1)?,
            dust_threshold_usd: var_or("DUST_THRESHOLD_USD", 2.0)?,
            dust_threshold_usd_stable: var_or("DUST_THRESHOLD_USD_STABLE", 2.0)?,
            stable_token_addresses,
            min_swap_native: var_or("MIN_SWAP_NATIVE", 0.02)?,
            max_candidates: var_or("MAX_CANDIDATES", 250)?,
            max_swaps_per_run: var_or("MAX_SWAPS_PER_RUN", 2)?,
            slippage_bps: var_or("SLIPPAGE_BPS", 300)?,
            swap_fraction_bps: var_or("SWAP_FRACTION_BPS", 10_000)?,
            deadline_secs: var_or("DEADLINE_SECS", 300)?,
            cooldown_secs: var_or("COOLDOWN_SECS", 600)?,
            inter_swap_delay_secs: var_or("INTER_SWAP_DELAY_SECS", 10)?,
            discovery_chunk_size: var_or("DISCOVERY_CHUNK_SIZE", 2000)?,
            discovery_max_chunks: var_or("DISCOVERY_MAX_CHUNKS", 10)?,
            holdings_api_url: var_opt("HOLDINGS_API_URL"),
            holdings_api_key: var_opt("HOLDINGS_API_KEY"),
            holdings_cache_path: std::env::var("HOLDINGS_CACHE_PATH")
                .unwrap_or_else(|_| "./holdings_cache.json".to_string()),
            explorer_api_url: var_opt("EXPLORER_API_URL"),
            explorer_api_key: var_opt("EXPLORER_API_KEY"),
        })
    }

    /// Everything a live (non-preview) run needs beyond the read path.
    pub fn validate_for_execution(&self) -> Result<(), SweepError> {
        if self.private_key.is_none() {
            return Err(SweepError::Configuration(
                "PRIVATE_KEY must be set for live swaps".to_string(),
            ));
        }
        if self.lens_address.is_none() {
            return Err(SweepError::Configuration(
                "LENS_ADDRESS must be set for live swaps".to_string(),
            ));
        }
        if self.slippage_bps >= 10_000 {
            return Err(SweepError::Configuration(format!(
                "SLIPPAGE_BPS must be below 10000, got {}",
                self.slippage_bps
            )));
        }
        if self.swap_fraction_bps == 0 || self.swap_fraction_bps > 10_000 {
            return Err(SweepError::Configuration(format!(
                "SWAP_FRACTION_BPS must be within 1..=10000, got {}",
                self.swap_fraction_bps
            )));
        }
        Ok(())
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid {} value: {}", key, raw)),
        Err(_) => Ok(default),
    }
}

fn var_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn var_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_lowercase();
            v == "true" || v == "1" || v == "yes"
        }
        Err(_) => default,
    }
}
