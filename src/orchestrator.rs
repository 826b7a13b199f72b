use crate::classifier::{NATIVE_DECIMALS, TokenSource, units_to_f64};
use crate::config::Config;
use crate::contracts::{IERC20, IRouter};
use crate::error::SweepError;
use crate::oracle::Valuation;
use crate::report::{DustItem, SweepReport};
use crate::rpc::RpcClient;
use crate::store::SellStateRepository;
use alloy::eips::eip2718::Encodable2718;
use alloy::network::{EthereumWallet, TransactionBuilder};
use alloy::rpc::types::TransactionRequest;
use alloy::signers::local::PrivateKeySigner;
use alloy::sol_types::SolCall;
use alloy_primitives::{Address, B256, U256};
use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CooldownActive,
    NativeAsset,
    NotLiquid,
    ZeroBalance,
    QuoteUnavailable,
    BelowMinimum,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SkipReason::CooldownActive => "cooldown active",
            SkipReason::NativeAsset => "native asset placeholder",
            SkipReason::NotLiquid => "no liquidity",
            SkipReason::ZeroBalance => "zero balance",
            SkipReason::QuoteUnavailable => "no route to native",
            SkipReason::BelowMinimum => "below minimum swap size",
        };
        f.write_str(text)
    }
}

/// Terminal state of one swap pipeline run for one token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwapOutcome {
    Sold {
        tx_hash: B256,
    },
    /// Safe-mode preview of the trade that would have been submitted.
    WouldSell {
        amount_in: U256,
        min_out: U256,
        router: Address,
    },
    Skipped(SkipReason),
    Failed(String),
}

/// Trade parameters carried from quote to submission, then discarded.
#[derive(Debug, Clone)]
struct SwapAttempt {
    token: Address,
    symbol: String,
    router: Address,
    amount_in: U256,
    quoted_out: U256,
    min_out: U256,
    deadline: u64,
}

#[derive(Debug, Clone)]
pub struct SwapSettings {
    pub safe_mode: bool,
    pub chain_id: u64,
    pub min_swap_native: f64,
    pub slippage_bps: u32,
    pub swap_fraction_bps: u32,
    pub deadline_secs: u64,
    pub cooldown_secs: u64,
    pub inter_swap_delay_secs: u64,
    pub max_swaps_per_run: usize,
}

impl SwapSettings {
    pub fn from_config(config: &Config) -> Self {
        SwapSettings {
            safe_mode: config.safe_mode,
            chain_id: config.chain_id,
            min_swap_native: config.min_swap_native,
            slippage_bps: config.slippage_bps,
            swap_fraction_bps: config.swap_fraction_bps,
            deadline_secs: config.deadline_secs,
            cooldown_secs: config.cooldown_secs,
            inter_swap_delay_secs: config.inter_swap_delay_secs,
            max_swaps_per_run: config.max_swaps_per_run,
        }
    }
}

/// Applies the slippage bound with integer floor division.
pub fn compute_min_out(quoted_out: U256, slippage_bps: u32) -> U256 {
    let keep = 10_000u32.saturating_sub(slippage_bps);
    quoted_out.saturating_mul(U256::from(keep)) / U256::from(10_000u32)
}

/// Portion of the live balance to sell. Never exceeds the balance itself.
pub fn fraction_of_balance(balance: U256, fraction_bps: u32) -> U256 {
    let fraction = U256::from(fraction_bps.min(10_000));
    let scaled = balance.saturating_mul(fraction) / U256::from(10_000u32);
    scaled.min(balance)
}

pub fn cooldown_active(last_sold: Option<u64>, now: u64, cooldown_secs: u64) -> bool {
    match last_sold {
        Some(last) => now.saturating_sub(last) < cooldown_secs,
        None => false,
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Transaction-side chain surface: fees, nonce, allowance, submission and
/// confirmation status.
#[async_trait]
pub trait ExecutionChain: Send + Sync {
    async fn gas_price(&self) -> Result<u128>;

    async fn nonce(&self, account: Address) -> Result<u64>;

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256>;

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64>;

    async fn send_raw(&self, encoded: &[u8]) -> Result<B256>;

    /// True when the transaction confirmed with success status.
    async fn wait_confirmed(&self, tx_hash: B256, timeout: Duration) -> Result<bool>;
}

#[async_trait]
impl ExecutionChain for RpcClient {
    async fn gas_price(&self) -> Result<u128> {
        self.get_gas_price().await
    }

    async fn nonce(&self, account: Address) -> Result<u64> {
        self.get_nonce(account).await
    }

    async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256> {
        self.call_contract(token, &IERC20::allowanceCall { owner, spender })
            .await
    }

    async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
        RpcClient::estimate_gas(self, tx.clone()).await
    }

    async fn send_raw(&self, encoded: &[u8]) -> Result<B256> {
        self.send_raw_transaction(encoded).await
    }

    async fn wait_confirmed(&self, tx_hash: B256, timeout: Duration) -> Result<bool> {
        Ok(self.wait_for_receipt(tx_hash, timeout).await?.status())
    }
}

/// Runs each dust item through the guarded swap pipeline:
/// cooldown check, liquidity probe, fresh quote, then either a safe-mode
/// preview or the approve+sell transaction pair.
pub struct SwapOrchestrator<'a> {
    chain: &'a dyn ExecutionChain,
    valuation: &'a dyn Valuation,
    tokens: &'a dyn TokenSource,
    wallet: Address,
    signer: Option<PrivateKeySigner>,
    settings: SwapSettings,
}

impl<'a> SwapOrchestrator<'a> {
    pub fn new(
        chain: &'a dyn ExecutionChain,
        valuation: &'a dyn Valuation,
        tokens: &'a dyn TokenSource,
        wallet: Address,
        signer: Option<PrivateKeySigner>,
        settings: SwapSettings,
    ) -> Self {
        SwapOrchestrator {
            chain,
            valuation,
            tokens,
            wallet,
            signer,
            settings,
        }
    }

    /// Processes dust items in order until the per-run attempt cap is hit.
    /// Failures are recorded in the report notes and never stop the run.
    /// `swaps_done` counts confirmed sales only, previews are not sales.
    pub async fn run(
        &self,
        items: &[DustItem],
        sell_state: &SellStateRepository<'_>,
        report: &mut SweepReport,
    ) {
        let mut swaps_done = 0usize;
        let mut attempts = 0usize;

        for (index, item) in items.iter().enumerate() {
            if attempts >= self.settings.max_swaps_per_run {
                info!(
                    "Swap cap reached, leaving {} items for the next run",
                    items.len() - index
                );
                break;
            }

            let outcome = self.swap_token(item, sell_state).await;
            let attempted = match &outcome {
                SwapOutcome::Sold { tx_hash } => {
                    info!("Sold {} in {:?}", item.symbol, tx_hash);
                    swaps_done += 1;
                    true
                }
                SwapOutcome::WouldSell {
                    amount_in,
                    min_out,
                    router,
                } => {
                    info!(
                        "Would sell {} {} for at least {} wei via {:?}",
                        amount_in, item.symbol, min_out, router
                    );
                    true
                }
                SwapOutcome::Failed(reason) => {
                    report.push_note(format!("Swap failed {}: {}", item.symbol, reason));
                    true
                }
                SwapOutcome::Skipped(reason) => {
                    info!("Skipping {}: {}", item.symbol, reason);
                    false
                }
            };

            if attempted {
                attempts += 1;
                // Pause between attempts so providers don't throttle the run
                if index + 1 < items.len() && self.settings.inter_swap_delay_secs > 0 {
                    tokio::time::sleep(Duration::from_secs(self.settings.inter_swap_delay_secs))
                        .await;
                }
            }
        }

        report.swaps_done = Some(swaps_done);
    }

    /// One pass of the per-token state machine. The cooldown check is the
    /// only step allowed to run before any chain call.
    pub async fn swap_token(
        &self,
        item: &DustItem,
        sell_state: &SellStateRepository<'_>,
    ) -> SwapOutcome {
        let now = unix_now();
        let last_sold = match sell_state.last_sold(&item.contract) {
            Ok(last) => last,
            Err(e) => return SwapOutcome::Failed(format!("sell state read: {e:#}")),
        };
        if cooldown_active(last_sold, now, self.settings.cooldown_secs) {
            return SwapOutcome::Skipped(SkipReason::CooldownActive);
        }

        if item.contract == Address::ZERO {
            return SwapOutcome::Skipped(SkipReason::NativeAsset);
        }

        if !self.valuation.probe_liquidity(item.contract).await {
            return SwapOutcome::Skipped(SkipReason::NotLiquid);
        }

        // Quote from the freshest balance, never the classified amount
        let balance = match self.tokens.balance_and_decimals(item.contract, self.wallet).await {
            Ok((balance, _)) => balance,
            Err(e) => return SwapOutcome::Failed(e.to_string()),
        };
        let amount_in = fraction_of_balance(balance, self.settings.swap_fraction_bps);
        if amount_in.is_zero() {
            return SwapOutcome::Skipped(SkipReason::ZeroBalance);
        }

        let quote = match self.valuation.quote_route(item.contract, amount_in).await {
            Some(quote) if quote.router != Address::ZERO => quote,
            _ => return SwapOutcome::Skipped(SkipReason::QuoteUnavailable),
        };

        let native_out = units_to_f64(quote.amount_out, NATIVE_DECIMALS);
        if native_out < self.settings.min_swap_native {
            return SwapOutcome::Skipped(SkipReason::BelowMinimum);
        }

        let attempt = SwapAttempt {
            token: item.contract,
            symbol: item.symbol.clone(),
            router: quote.router,
            amount_in,
            quoted_out: quote.amount_out,
            min_out: compute_min_out(quote.amount_out, self.settings.slippage_bps),
            deadline: now + self.settings.deadline_secs,
        };

        if self.settings.safe_mode {
            info!(
                "Safe mode: would sell {} {} expecting {} wei, floor {}",
                attempt.amount_in, attempt.symbol, attempt.quoted_out, attempt.min_out
            );
            return SwapOutcome::WouldSell {
                amount_in: attempt.amount_in,
                min_out: attempt.min_out,
                router: attempt.router,
            };
        }

        let signer = match &self.signer {
            Some(signer) => signer.clone(),
            None => return SwapOutcome::Failed("no signing key configured".to_string()),
        };

        match self.execute(&attempt, signer, sell_state).await {
            Ok(outcome) => outcome,
            Err(e) => SwapOutcome::Failed(SweepError::Transaction(format!("{e:#}")).to_string()),
        }
    }

    async fn execute(
        &self,
        attempt: &SwapAttempt,
        signer: PrivateKeySigner,
        sell_state: &SellStateRepository<'_>,
    ) -> Result<SwapOutcome> {
        let signing_wallet = EthereumWallet::from(signer);
        // One nonce read covers both transactions, keeping approve and
        // sell strictly ordered even if something else races the account
        let mut nonce = self.chain.nonce(self.wallet).await?;

        let allowance = self
            .chain
            .allowance(attempt.token, self.wallet, attempt.router)
            .await
            .context("allowance read")?;

        if allowance < attempt.amount_in {
            let call = IERC20::approveCall {
                spender: attempt.router,
                amount: attempt.amount_in,
            };
            let approve_hash = self
                .submit(&signing_wallet, attempt.token, call.abi_encode(), nonce)
                .await
                .context("approve")?;
            info!("Approval sent for {}: {:?}", attempt.symbol, approve_hash);

            let confirmed = self
                .chain
                .wait_confirmed(approve_hash, CONFIRMATION_TIMEOUT)
                .await
                .context("approve confirmation")?;
            if !confirmed {
                bail!("approve reverted in {:?}", approve_hash);
            }
            nonce += 1;
        }

        let call = IRouter::sellCall {
            p: IRouter::SellParams {
                amountIn: attempt.amount_in,
                amountOutMin: attempt.min_out,
                token: attempt.token,
                to: self.wallet,
                deadline: U256::from(attempt.deadline),
            },
        };
        let sell_hash = self
            .submit(&signing_wallet, attempt.router, call.abi_encode(), nonce)
            .await
            .context("sell")?;
        info!("Sell sent for {}: {:?}", attempt.symbol, sell_hash);

        match self.chain.wait_confirmed(sell_hash, CONFIRMATION_TIMEOUT).await {
            Ok(true) => {
                self.record_sale(attempt, sell_state);
                info!("Sell confirmed for {}: {:?}", attempt.symbol, sell_hash);
                Ok(SwapOutcome::Sold { tx_hash: sell_hash })
            }
            Ok(false) => Ok(SwapOutcome::Failed(format!(
                "sell reverted in {:?}",
                sell_hash
            ))),
            Err(e) => {
                // The transaction may still land. Start the cooldown now so
                // the next run cannot submit a duplicate right away.
                self.record_sale(attempt, sell_state);
                Ok(SwapOutcome::Failed(format!(
                    "no confirmation for {:?}: {e:#}",
                    sell_hash
                )))
            }
        }
    }

    fn record_sale(&self, attempt: &SwapAttempt, sell_state: &SellStateRepository<'_>) {
        if let Err(e) = sell_state.record(&attempt.token, unix_now()) {
            warn!("Failed to record sale of {}: {}", attempt.symbol, e);
        }
    }

    async fn submit(
        &self,
        signing_wallet: &EthereumWallet,
        to: Address,
        input: Vec<u8>,
        nonce: u64,
    ) -> Result<B256> {
        // Fee and gas limit are resolved per submission, never reused
        // across the approve/sell pair
        let gas_price = self.chain.gas_price().await.context("gas price read")?;

        let mut tx = TransactionRequest::default()
            .with_from(self.wallet)
            .with_to(to)
            .with_input(input)
            .with_nonce(nonce)
            .with_chain_id(self.settings.chain_id)
            .with_gas_price(gas_price);

        let gas = self
            .chain
            .estimate_gas(&tx)
            .await
            .context("gas estimation")?;
        tx = tx.with_gas_limit(gas);

        let envelope = tx
            .build(signing_wallet)
            .await
            .context("transaction signing")?;
        self.chain.send_raw(&envelope.encoded_2718()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SweepError;
    use crate::oracle::Quote;
    use crate::store::Database;
    use alloy_primitives::keccak256;
    use async_trait::async_trait;
    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn settings() -> SwapSettings {
        SwapSettings {
            safe_mode: true,
            chain_id: 143,
            min_swap_native: 0.02,
            slippage_bps: 300,
            swap_fraction_bps: 10_000,
            deadline_secs: 300,
            cooldown_secs: 600,
            inter_swap_delay_secs: 0,
            max_swaps_per_run: 2,
        }
    }

    fn offline_client() -> RpcClient {
        RpcClient::new(&["http://localhost:1".to_string()]).unwrap()
    }

    fn item(token: Address, symbol: &str) -> DustItem {
        DustItem {
            symbol: symbol.to_string(),
            contract: token,
            amount: 0.000001,
            decimals: 18,
            raw_balance: "1000000".to_string(),
            native_value: Some(0.05),
            usd_value: None,
        }
    }

    #[derive(Default)]
    struct FakeValuation {
        liquid: HashSet<Address>,
        quotes: HashMap<Address, U256>,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl Valuation for FakeValuation {
        async fn probe_liquidity(&self, token: Address) -> bool {
            self.probes.fetch_add(1, Ordering::SeqCst);
            self.liquid.contains(&token)
        }

        async fn quote_to_native(&self, token: Address, _amount_in: U256) -> U256 {
            self.quotes.get(&token).copied().unwrap_or(U256::ZERO)
        }

        async fn quote_route(&self, token: Address, amount_in: U256) -> Option<Quote> {
            let out = self.quote_to_native(token, amount_in).await;
            (!out.is_zero()).then(|| Quote {
                router: addr(0x77),
                amount_out: out,
            })
        }
    }

    #[derive(Default)]
    struct FakeTokens {
        balances: HashMap<Address, U256>,
        reads: AtomicUsize,
    }

    #[async_trait]
    impl TokenSource for FakeTokens {
        async fn balance_and_decimals(
            &self,
            token: Address,
            _wallet: Address,
        ) -> Result<(U256, u8), SweepError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Ok((self.balances.get(&token).copied().unwrap_or(U256::ZERO), 18))
        }

        async fn symbol(&self, _token: Address) -> Option<String> {
            None
        }
    }

    const WEI_PER_NATIVE: u64 = 1_000_000_000_000_000_000;

    /// Scripted execution chain: serves gas prices in order, records every
    /// estimated and submitted transaction, and pops one confirmation
    /// result per wait.
    struct FakeExec {
        gas_prices: Vec<u128>,
        gas_calls: AtomicUsize,
        start_nonce: u64,
        allowance: U256,
        confirmations: Mutex<VecDeque<Result<bool>>>,
        estimated: Mutex<Vec<TransactionRequest>>,
        sent: Mutex<Vec<B256>>,
    }

    impl FakeExec {
        fn new(allowance: U256, confirmations: Vec<Result<bool>>) -> Self {
            FakeExec {
                gas_prices: vec![100, 250],
                gas_calls: AtomicUsize::new(0),
                start_nonce: 7,
                allowance,
                confirmations: Mutex::new(confirmations.into()),
                estimated: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ExecutionChain for FakeExec {
        async fn gas_price(&self) -> Result<u128> {
            let call = self.gas_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.gas_prices[call.min(self.gas_prices.len() - 1)])
        }

        async fn nonce(&self, _account: Address) -> Result<u64> {
            Ok(self.start_nonce)
        }

        async fn allowance(
            &self,
            _token: Address,
            _owner: Address,
            _spender: Address,
        ) -> Result<U256> {
            Ok(self.allowance)
        }

        async fn estimate_gas(&self, tx: &TransactionRequest) -> Result<u64> {
            self.estimated.lock().unwrap().push(tx.clone());
            Ok(60_000)
        }

        async fn send_raw(&self, encoded: &[u8]) -> Result<B256> {
            let hash = keccak256(encoded);
            self.sent.lock().unwrap().push(hash);
            Ok(hash)
        }

        async fn wait_confirmed(&self, _tx_hash: B256, _timeout: Duration) -> Result<bool> {
            self.confirmations
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(true))
        }
    }

    fn liquid_pair(token: Address) -> (FakeValuation, FakeTokens) {
        let mut valuation = FakeValuation::default();
        valuation.liquid.insert(token);
        valuation
            .quotes
            .insert(token, U256::from(WEI_PER_NATIVE / 20));

        let mut tokens = FakeTokens::default();
        tokens.balances.insert(token, U256::from(1_000_000u64));

        (valuation, tokens)
    }

    fn live_settings() -> SwapSettings {
        let mut live = settings();
        live.safe_mode = false;
        live
    }

    #[test]
    fn test_min_out_applies_slippage_floor() {
        assert_eq!(
            compute_min_out(U256::from(10_000u64), 300),
            U256::from(9_700u64)
        );
        assert_eq!(compute_min_out(U256::ZERO, 300), U256::ZERO);
        assert_eq!(
            compute_min_out(U256::from(10_000u64), 0),
            U256::from(10_000u64)
        );
        // Floor division: 10001 * 9700 / 10000 = 9700.97 -> 9700
        assert_eq!(
            compute_min_out(U256::from(10_001u64), 300),
            U256::from(9_700u64)
        );
        // 3 * 9999 / 10000 floors to 2
        assert_eq!(compute_min_out(U256::from(3u64), 1), U256::from(2u64));
    }

    #[test]
    fn test_fraction_of_balance_caps_and_floors() {
        let balance = U256::from(1_000u64);
        assert_eq!(fraction_of_balance(balance, 10_000), balance);
        assert_eq!(fraction_of_balance(balance, 5_000), U256::from(500u64));
        assert_eq!(fraction_of_balance(U256::from(3u64), 5_000), U256::from(1u64));
        // Values over 100% clamp to the full balance
        assert_eq!(fraction_of_balance(balance, 20_000), balance);
    }

    #[test]
    fn test_cooldown_window() {
        assert!(cooldown_active(Some(1_000), 1_200, 600));
        assert!(!cooldown_active(Some(1_000), 1_700, 600));
        assert!(!cooldown_active(Some(1_000), 1_600, 600));
        assert!(!cooldown_active(None, 1_200, 600));
    }

    #[tokio::test]
    async fn test_safe_mode_previews_without_touching_sell_state() {
        let token = addr(0xaa);
        let client = offline_client();

        let mut valuation = FakeValuation::default();
        valuation.liquid.insert(token);
        valuation
            .quotes
            .insert(token, U256::from(WEI_PER_NATIVE / 20));

        let mut tokens = FakeTokens::default();
        tokens.balances.insert(token, U256::from(1_000_000u64));

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let orchestrator = SwapOrchestrator::new(
            &client,
            &valuation,
            &tokens,
            addr(0x01),
            None,
            settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        match outcome {
            SwapOutcome::WouldSell {
                amount_in, min_out, ..
            } => {
                assert_eq!(amount_in, U256::from(1_000_000u64));
                let quoted = U256::from(WEI_PER_NATIVE / 20);
                assert_eq!(min_out, compute_min_out(quoted, 300));
            }
            other => panic!("expected preview, got {:?}", other),
        }

        assert_eq!(sell_state.last_sold(&token).unwrap(), None);
    }

    #[tokio::test]
    async fn test_cooldown_skip_makes_no_chain_calls() {
        let token = addr(0xab);
        let client = offline_client();
        let valuation = FakeValuation::default();
        let tokens = FakeTokens::default();

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);
        sell_state.record(&token, unix_now() - 200).unwrap();

        let orchestrator = SwapOrchestrator::new(
            &client,
            &valuation,
            &tokens,
            addr(0x01),
            None,
            settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        assert_eq!(outcome, SwapOutcome::Skipped(SkipReason::CooldownActive));
        assert_eq!(valuation.probes.load(Ordering::SeqCst), 0);
        assert_eq!(tokens.reads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_respects_attempt_cap() {
        let client = offline_client();
        let mut valuation = FakeValuation::default();
        let mut tokens = FakeTokens::default();
        let mut items = Vec::new();

        for byte in [0xa1u8, 0xa2, 0xa3] {
            let token = addr(byte);
            valuation.liquid.insert(token);
            valuation
                .quotes
                .insert(token, U256::from(WEI_PER_NATIVE / 20));
            tokens.balances.insert(token, U256::from(1_000u64));
            items.push(item(token, "DEGEN"));
        }

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let orchestrator = SwapOrchestrator::new(
            &client,
            &valuation,
            &tokens,
            addr(0x01),
            None,
            settings(),
        );

        let mut report = SweepReport::new("sweep_engine", addr(0x01));
        orchestrator.run(&items, &sell_state, &mut report).await;

        // Two previews, third item left for the next run
        assert_eq!(valuation.probes.load(Ordering::SeqCst), 2);
        // Previews are never real sales
        assert_eq!(report.swaps_done, Some(0));
    }

    #[tokio::test]
    async fn test_quote_gaps_and_small_quotes_are_skipped() {
        let no_route = addr(0xb1);
        let tiny = addr(0xb2);
        let client = offline_client();

        let mut valuation = FakeValuation::default();
        valuation.liquid.insert(no_route);
        valuation.liquid.insert(tiny);
        // 0.01 native, under the 0.02 minimum
        valuation
            .quotes
            .insert(tiny, U256::from(WEI_PER_NATIVE / 100));

        let mut tokens = FakeTokens::default();
        tokens.balances.insert(no_route, U256::from(1_000u64));
        tokens.balances.insert(tiny, U256::from(1_000u64));

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let orchestrator = SwapOrchestrator::new(
            &client,
            &valuation,
            &tokens,
            addr(0x01),
            None,
            settings(),
        );

        let outcome = orchestrator
            .swap_token(&item(no_route, "GHOST"), &sell_state)
            .await;
        assert_eq!(outcome, SwapOutcome::Skipped(SkipReason::QuoteUnavailable));

        let outcome = orchestrator.swap_token(&item(tiny, "TINY"), &sell_state).await;
        assert_eq!(outcome, SwapOutcome::Skipped(SkipReason::BelowMinimum));
    }

    #[tokio::test]
    async fn test_live_mode_without_signer_fails_before_submitting() {
        let token = addr(0xc1);
        let client = offline_client();

        let mut valuation = FakeValuation::default();
        valuation.liquid.insert(token);
        valuation
            .quotes
            .insert(token, U256::from(WEI_PER_NATIVE / 20));

        let mut tokens = FakeTokens::default();
        tokens.balances.insert(token, U256::from(1_000u64));

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let mut live = settings();
        live.safe_mode = false;

        let orchestrator =
            SwapOrchestrator::new(&client, &valuation, &tokens, addr(0x01), None, live);

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        assert_eq!(
            outcome,
            SwapOutcome::Failed("no signing key configured".to_string())
        );
        assert_eq!(sell_state.last_sold(&token).unwrap(), None);
    }

    #[tokio::test]
    async fn test_sell_reprices_gas_after_approval() {
        let token = addr(0xd1);
        let (valuation, tokens) = liquid_pair(token);
        let chain = FakeExec::new(U256::ZERO, vec![Ok(true), Ok(true)]);

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let signer = PrivateKeySigner::random();
        let orchestrator = SwapOrchestrator::new(
            &chain,
            &valuation,
            &tokens,
            signer.address(),
            Some(signer),
            live_settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        assert!(matches!(outcome, SwapOutcome::Sold { .. }), "got {outcome:?}");

        // Approve at nonce 7, sell at nonce 8, each priced at its own
        // submission so the sell reflects fee drift during the approve wait
        assert_eq!(chain.gas_calls.load(Ordering::SeqCst), 2);
        let estimated = chain.estimated.lock().unwrap();
        assert_eq!(estimated.len(), 2);
        assert_eq!(estimated[0].nonce, Some(7));
        assert_eq!(estimated[1].nonce, Some(8));
        assert_eq!(estimated[0].gas_price, Some(100));
        assert_eq!(estimated[1].gas_price, Some(250));
        assert_eq!(estimated[0].to, Some(token.into()));
        assert_eq!(estimated[1].to, Some(addr(0x77).into()));
        drop(estimated);

        assert_eq!(chain.sent.lock().unwrap().len(), 2);
        assert!(sell_state.last_sold(&token).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_existing_allowance_skips_approval() {
        let token = addr(0xd2);
        let (valuation, tokens) = liquid_pair(token);
        let chain = FakeExec::new(U256::MAX, vec![Ok(true)]);

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let signer = PrivateKeySigner::random();
        let orchestrator = SwapOrchestrator::new(
            &chain,
            &valuation,
            &tokens,
            signer.address(),
            Some(signer),
            live_settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        assert!(matches!(outcome, SwapOutcome::Sold { .. }), "got {outcome:?}");

        assert_eq!(chain.gas_calls.load(Ordering::SeqCst), 1);
        let estimated = chain.estimated.lock().unwrap();
        assert_eq!(estimated.len(), 1);
        assert_eq!(estimated[0].nonce, Some(7));
        drop(estimated);
        assert_eq!(chain.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sell_revert_does_not_record_a_sale() {
        let token = addr(0xd3);
        let (valuation, tokens) = liquid_pair(token);
        let chain = FakeExec::new(U256::MAX, vec![Ok(false)]);

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let signer = PrivateKeySigner::random();
        let orchestrator = SwapOrchestrator::new(
            &chain,
            &valuation,
            &tokens,
            signer.address(),
            Some(signer),
            live_settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        match outcome {
            SwapOutcome::Failed(reason) => {
                assert!(reason.contains("sell reverted"), "{reason}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(sell_state.last_sold(&token).unwrap(), None);
    }

    #[tokio::test]
    async fn test_confirmation_timeout_still_starts_cooldown() {
        let token = addr(0xd4);
        let (valuation, tokens) = liquid_pair(token);
        let chain = FakeExec::new(
            U256::MAX,
            vec![Err(anyhow::anyhow!("No receipt after 120 seconds"))],
        );

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let signer = PrivateKeySigner::random();
        let orchestrator = SwapOrchestrator::new(
            &chain,
            &valuation,
            &tokens,
            signer.address(),
            Some(signer),
            live_settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        match outcome {
            SwapOutcome::Failed(reason) => {
                assert!(reason.contains("no confirmation"), "{reason}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // Fate unknown: the cooldown starts so the next run cannot double-sell
        assert!(sell_state.last_sold(&token).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_approve_revert_stops_before_the_sell() {
        let token = addr(0xd5);
        let (valuation, tokens) = liquid_pair(token);
        let chain = FakeExec::new(U256::ZERO, vec![Ok(false)]);

        let db = Database::open_in_memory().unwrap();
        let sell_state = SellStateRepository::new(&db.conn);

        let signer = PrivateKeySigner::random();
        let orchestrator = SwapOrchestrator::new(
            &chain,
            &valuation,
            &tokens,
            signer.address(),
            Some(signer),
            live_settings(),
        );

        let outcome = orchestrator.swap_token(&item(token, "DEGEN"), &sell_state).await;
        match outcome {
            SwapOutcome::Failed(reason) => {
                assert!(reason.contains("approve reverted"), "{reason}")
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(chain.sent.lock().unwrap().len(), 1, "sell must never be submitted");
        assert_eq!(sell_state.last_sold(&token).unwrap(), None);
    }
}
