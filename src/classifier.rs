use crate::config::Config;
use crate::contracts::IERC20;
use crate::error::SweepError;
use crate::oracle::Valuation;
use crate::report::{DustItem, SweepReport};
use crate::rpc::RpcClient;
use crate::store::TokenCandidate;
use crate::verified::{HoldingsSource, VerifiedHolding};
use alloy_primitives::{Address, U256, utils::format_units};
use async_trait::async_trait;
use regex::Regex;
use std::collections::HashMap;
use tracing::debug;

pub const NATIVE_DECIMALS: u8 = 18;

/// Symbols that trade at a dollar by construction. Used only by the
/// face-value fallback path and always flagged as an unverified estimate.
const STABLE_SYMBOLS: [&str; 6] = ["USDC", "USDT", "USDT0", "AUSD", "DAI", "USD1"];

/// Per-token chain reads the classifier depends on.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn balance_and_decimals(
        &self,
        token: Address,
        wallet: Address,
    ) -> Result<(U256, u8), SweepError>;

    /// Sanitized upper-case symbol, or None when the contract has no
    /// readable symbol.
    async fn symbol(&self, token: Address) -> Option<String>;
}

/// TokenSource over live RPC. Balance failures are hard (non-ERC20), a
/// missing decimals() falls back to 18 like most wallets assume.
pub struct RpcTokenSource {
    client: RpcClient,
}

impl RpcTokenSource {
    pub fn new(client: RpcClient) -> Self {
        RpcTokenSource { client }
    }
}

#[async_trait]
impl TokenSource for RpcTokenSource {
    async fn balance_and_decimals(
        &self,
        token: Address,
        wallet: Address,
    ) -> Result<(U256, u8), SweepError> {
        let balance = self
            .client
            .call_contract(token, &IERC20::balanceOfCall { owner: wallet })
            .await
            .map_err(|e| SweepError::BalanceRead {
                token: format!("{:?}", token),
                reason: e.to_string(),
            })?;

        let decimals = match self.client.call_contract(token, &IERC20::decimalsCall {}).await {
            Ok(decimals) => decimals,
            Err(e) => {
                debug!("decimals() failed for {:?}, assuming 18: {}", token, e);
                18
            }
        };

        Ok((balance, decimals))
    }

    async fn symbol(&self, token: Address) -> Option<String> {
        match self.client.call_contract(token, &IERC20::symbolCall {}).await {
            Ok(symbol) => Some(sanitize_symbol(&symbol)),
            Err(e) => {
                debug!("symbol() failed for {:?}: {}", token, e);
                None
            }
        }
    }
}

/// Upper-cases and strips control characters and emoji from token symbols
/// before they reach logs and reports.
pub fn sanitize_symbol(raw: &str) -> String {
    let upper = raw.to_uppercase();
    let cleaned = match Regex::new(r"[^A-Z0-9$._\- ]") {
        Ok(re) => re.replace_all(&upper, "").to_string(),
        Err(_) => upper,
    };

    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        return "TOKEN".to_string();
    }

    trimmed.chars().take(24).collect()
}

#[derive(Debug, Clone)]
pub struct ClassifierSettings {
    pub native_symbol: String,
    pub dust_threshold_native: f64,
    pub dust_threshold_usd: f64,
    pub dust_threshold_usd_stable: f64,
    pub min_swap_native: f64,
    pub max_candidates: usize,
    pub stable_token_addresses: Vec<Address>,
}

impl ClassifierSettings {
    pub fn from_config(config: &Config) -> Self {
        ClassifierSettings {
            native_symbol: config.native_symbol.clone(),
            dust_threshold_native: config.dust_threshold_native,
            dust_threshold_usd: config.dust_threshold_usd,
            dust_threshold_usd_stable: config.dust_threshold_usd_stable,
            min_swap_native: config.min_swap_native,
            max_candidates: config.max_candidates,
            stable_token_addresses: config.stable_token_addresses.clone(),
        }
    }
}

/// Stateless pass over the candidate set. Each token resolves through the
/// first pricing path that can value it: the verified holdings registry,
/// then an on-chain sell quote, then stablecoin face value. Tokens no
/// path can price are excluded with a note.
pub struct DustClassifier<'a> {
    valuation: &'a dyn Valuation,
    tokens: &'a dyn TokenSource,
    holdings: Option<&'a dyn HoldingsSource>,
    settings: ClassifierSettings,
}

impl<'a> DustClassifier<'a> {
    pub fn new(
        valuation: &'a dyn Valuation,
        tokens: &'a dyn TokenSource,
        holdings: Option<&'a dyn HoldingsSource>,
        settings: ClassifierSettings,
    ) -> Self {
        DustClassifier {
            valuation,
            tokens,
            holdings,
            settings,
        }
    }

    pub async fn classify(&self, wallet: Address, candidates: &[TokenCandidate]) -> SweepReport {
        let mut report = SweepReport::new("sweep_engine", wallet);
        report.push_note(format!(
            "DUST_THRESHOLD_NATIVE={}",
            self.settings.dust_threshold_native
        ));
        report.push_note(format!("MIN_SWAP_NATIVE={}", self.settings.min_swap_native));
        report.push_note(format!("MAX_CANDIDATES={}", self.settings.max_candidates));

        // Sort by address before capping so every run keeps the same set
        // no matter how the caller ordered the candidates
        let mut ordered: Vec<&TokenCandidate> = candidates.iter().collect();
        ordered.sort_by_key(|c| c.address);
        if ordered.len() > self.settings.max_candidates {
            report.push_note(format!(
                "Dropped {} candidates over the per-run cap",
                ordered.len() - self.settings.max_candidates
            ));
            ordered.truncate(self.settings.max_candidates);
        }
        report.push_note(format!("Candidates={}", ordered.len()));

        let holdings_map = self.fetch_holdings(wallet, &mut report).await;

        let mut dust = Vec::new();
        for candidate in ordered {
            if let Some(item) = self
                .classify_token(wallet, candidate.address, holdings_map.as_ref(), &mut report)
                .await
            {
                dust.push(item);
            }
        }

        report.set_dust(dust);
        report
    }

    async fn fetch_holdings(
        &self,
        wallet: Address,
        report: &mut SweepReport,
    ) -> Option<HashMap<Address, VerifiedHolding>> {
        let source = self.holdings?;

        match source.wallet_holdings(&wallet).await {
            Ok(list) => Some(list.into_iter().map(|h| (h.contract, h)).collect()),
            Err(e) => {
                report.push_note(format!("Holdings source unavailable: {e:#}"));
                None
            }
        }
    }

    async fn classify_token(
        &self,
        wallet: Address,
        token: Address,
        holdings: Option<&HashMap<Address, VerifiedHolding>>,
        report: &mut SweepReport,
    ) -> Option<DustItem> {
        if token == Address::ZERO {
            return None;
        }

        let (raw_balance, decimals) = match self.tokens.balance_and_decimals(token, wallet).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!("Skipping {:?}: {}", token, e);
                return None;
            }
        };
        if raw_balance.is_zero() {
            return None;
        }

        let holding = holdings.and_then(|map| map.get(&token));

        // Prefer the registry symbol when present, saving one RPC call
        let symbol = match holding {
            Some(h) if !h.symbol.is_empty() => h.symbol.clone(),
            _ => self
                .tokens
                .symbol(token)
                .await
                .unwrap_or_else(|| "TOKEN".to_string()),
        };

        // The native asset itself is never dust
        if symbol == self.settings.native_symbol {
            return None;
        }

        let amount = units_to_f64(raw_balance, decimals);
        debug!(
            "Balance check {:?} raw={} decimals={} amount={}",
            token, raw_balance, decimals, amount
        );

        // Path 1: verified registry pricing
        if let Some(holding) = holding {
            if holding.verified && !holding.scam && holding.usd_value > 0.0 {
                if holding.usd_value < self.settings.dust_threshold_usd {
                    return Some(DustItem {
                        symbol,
                        contract: token,
                        amount,
                        decimals,
                        raw_balance: raw_balance.to_string(),
                        native_value: None,
                        usd_value: Some(holding.usd_value),
                    });
                }
                // Priced above the threshold: resolved, just not dust
                return None;
            }
        }

        // Path 2: on-chain sell quote
        if self.valuation.probe_liquidity(token).await {
            let mut quoted = self.valuation.quote_to_native(token, raw_balance).await;
            if quoted.is_zero() {
                quoted = self.sample_quote(token, raw_balance, decimals).await;
            }

            if !quoted.is_zero() {
                let native_value = units_to_f64(quoted, NATIVE_DECIMALS);

                if native_value < self.settings.min_swap_native {
                    debug!(
                        "Skipping {} ({:?}): {} below minimum swap size",
                        symbol, token, native_value
                    );
                    return None;
                }
                if native_value >= self.settings.dust_threshold_native {
                    return None;
                }

                return Some(DustItem {
                    symbol,
                    contract: token,
                    amount,
                    decimals,
                    raw_balance: raw_balance.to_string(),
                    native_value: Some(native_value),
                    usd_value: None,
                });
            }
        }

        // Path 3: stablecoin face value, explicitly an unverified estimate
        if self.looks_like_stable(&symbol, token, decimals) {
            if amount > 0.0 && amount < self.settings.dust_threshold_usd_stable {
                report.push_note(format!(
                    "{} included at face value without a native quote",
                    symbol
                ));
                return Some(DustItem {
                    symbol,
                    contract: token,
                    amount,
                    decimals,
                    raw_balance: raw_balance.to_string(),
                    native_value: None,
                    usd_value: Some(amount),
                });
            }
            return None;
        }

        report.push_note(format!(
            "No native quote for {} ({:?}) amount={}",
            symbol, token, amount
        ));
        None
    }

    /// Quote a one-token sample and extrapolate linearly when the
    /// full-balance quote comes back zero (some curves overflow on large
    /// inputs they could still fill in pieces).
    async fn sample_quote(&self, token: Address, raw_balance: U256, decimals: u8) -> U256 {
        let mut sample = U256::from(10u64).pow(U256::from(decimals));
        if raw_balance < sample {
            sample = raw_balance;
        }
        if sample.is_zero() {
            return U256::ZERO;
        }

        let sample_out = self.valuation.quote_to_native(token, sample).await;
        if sample_out.is_zero() {
            return U256::ZERO;
        }

        sample_out.saturating_mul(raw_balance) / sample
    }

    fn looks_like_stable(&self, symbol: &str, token: Address, decimals: u8) -> bool {
        STABLE_SYMBOLS.contains(&symbol)
            || self.settings.stable_token_addresses.contains(&token)
            || decimals == 6
    }
}

pub fn units_to_f64(value: U256, decimals: u8) -> f64 {
    format_units(value, decimals)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(0.0)
}
