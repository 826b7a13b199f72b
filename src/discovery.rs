use crate::contracts::{Transfer as EventTransfer, decode_transfer_event};
use crate::rpc::RpcClient;
use crate::store::{CheckpointRepository, Database, RegistryRepository, TokenCandidate};
use alloy::rpc::types::Log;
use alloy::sol_types::SolEvent;
use alloy_primitives::{Address, B256};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{info, warn};

const RATE_LIMIT_DELAY_MS: u64 = 200; // 200ms between requests = 5 requests per second
const EXPLORER_MAX_PAGES: usize = 5;
const EXPLORER_PAGE_SIZE: usize = 200;

/// Read side of the chain the backward sweep depends on: the head number
/// and filtered Transfer logs for one inclusive block range.
#[async_trait]
pub trait LogSource: Send + Sync {
    async fn latest_block(&self) -> Result<u64>;

    async fn transfer_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
        recipient: Address,
    ) -> Result<Vec<Log>>;
}

#[async_trait]
impl LogSource for RpcClient {
    async fn latest_block(&self) -> Result<u64> {
        self.get_latest_block().await
    }

    async fn transfer_logs(
        &self,
        from_block: u64,
        to_block: u64,
        topic0: B256,
        recipient: Address,
    ) -> Result<Vec<Log>> {
        self.get_logs(from_block, to_block, topic0, recipient).await
    }
}

/// Walks Transfer logs backward from the chain head in fixed-size block
/// ranges, recording every contract that ever sent tokens to the wallet.
/// One invocation scans at most `max_chunks_per_run` ranges; the lower
/// bound is persisted per range so the next invocation resumes below it.
pub struct TokenDiscovery<'a> {
    client: &'a dyn LogSource,
    wallet: Address,
    chunk_size: u64,
    max_chunks_per_run: u64,
    transfer_topic: B256,
}

#[derive(Debug, Default, Clone)]
pub struct ScanOutcome {
    pub new_tokens: usize,
    pub chunks_scanned: usize,
    pub failed_ranges: usize,
    pub checkpoint: Option<u64>,
    pub sweep_completed: bool,
}

impl<'a> TokenDiscovery<'a> {
    pub fn new(
        client: &'a dyn LogSource,
        wallet: Address,
        chunk_size: u64,
        max_chunks_per_run: u64,
    ) -> Self {
        TokenDiscovery {
            client,
            wallet,
            chunk_size,
            max_chunks_per_run,
            transfer_topic: EventTransfer::SIGNATURE_HASH,
        }
    }

    /// One bounded backward sweep. Unreachable chain surfaces as an empty
    /// outcome rather than an error; a failed range is treated as scanned
    /// so the sweep always makes forward progress.
    pub async fn run(&self, db: &Database) -> Result<ScanOutcome> {
        let mut outcome = ScanOutcome::default();

        let latest_block = match self.client.latest_block().await {
            Ok(block) => block,
            Err(e) => {
                warn!("Chain head unavailable, skipping discovery: {}", e);
                return Ok(outcome);
            }
        };

        let checkpoint_repo = CheckpointRepository::new(&db.conn);
        let registry = RegistryRepository::new(&db.conn);

        let start_upper = match checkpoint_repo.get(&self.wallet)? {
            Some(checkpoint) if checkpoint > 0 => checkpoint - 1,
            Some(_) => latest_block,
            None => latest_block,
        };

        info!(
            "Scanning for incoming transfers to {:?} from block {} downward",
            self.wallet, start_upper
        );

        for (lower, upper) in plan_ranges(start_upper, self.chunk_size, self.max_chunks_per_run) {
            let loop_start = Instant::now();

            match self.fetch_range(lower, upper).await {
                Ok(logs) => {
                    let candidates = collect_candidates(&logs, lower);

                    if !candidates.is_empty() {
                        let inserted = registry.insert_batch(&candidates)?;
                        if inserted > 0 {
                            info!(
                                "Found {} new token contracts in blocks {}-{}",
                                inserted, lower, upper
                            );
                        }
                        outcome.new_tokens += inserted;
                    }
                }
                Err(e) => {
                    warn!(
                        "Blocks {}-{} failed ({}), treating range as scanned",
                        lower, upper, e
                    );
                    outcome.failed_ranges += 1;
                }
            }

            checkpoint_repo.set(&self.wallet, lower)?;
            outcome.checkpoint = Some(lower);
            outcome.chunks_scanned += 1;

            if lower == 0 {
                info!("Backward sweep reached genesis, next scan restarts from head");
                checkpoint_repo.clear(&self.wallet)?;
                outcome.checkpoint = None;
                outcome.sweep_completed = true;
                break;
            }

            // Smart rate limiting: ensure minimum time between loop iterations
            let loop_duration = loop_start.elapsed();
            let target_duration = Duration::from_millis(RATE_LIMIT_DELAY_MS);
            if loop_duration < target_duration {
                sleep(target_duration - loop_duration).await;
            }
        }

        Ok(outcome)
    }

    async fn fetch_range(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        match self
            .client
            .transfer_logs(from_block, to_block, self.transfer_topic, self.wallet)
            .await
        {
            Ok(logs) => Ok(logs),
            Err(e) if e.to_string().contains("429") => {
                warn!("Rate limited, waiting 1 second before retry...");
                sleep(Duration::from_secs(1)).await;
                self.client
                    .transfer_logs(from_block, to_block, self.transfer_topic, self.wallet)
                    .await
            }
            Err(e) => Err(e),
        }
    }
}

/// Descending inclusive block ranges covering at most `max_chunks` chunks
/// below `start_upper`, never crossing 0.
fn plan_ranges(start_upper: u64, chunk_size: u64, max_chunks: u64) -> Vec<(u64, u64)> {
    let chunk = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut upper = start_upper;

    for _ in 0..max_chunks {
        let lower = upper.saturating_sub(chunk - 1);
        ranges.push((lower, upper));

        if lower == 0 {
            break;
        }
        upper = lower - 1;
    }

    ranges
}

fn collect_candidates(logs: &[Log], range_lower: u64) -> Vec<TokenCandidate> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();

    for log in logs {
        match decode_transfer_event(log) {
            Ok(_) => {
                let token = log.address();
                if seen.insert(token) {
                    candidates.push(TokenCandidate {
                        address: token,
                        first_seen_block: log.block_number.unwrap_or(range_lower),
                    });
                }
            }
            Err(e) => {
                warn!("Failed to decode transfer event: {}", e);
            }
        }
    }

    candidates
}

/// Blockscout-style explorer shortcut: asks the API for the wallet's ERC-20
/// transfer history instead of walking raw logs. Falls back to an
/// Etherscan-style endpoint when an API key is configured.
pub struct ExplorerScan {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl ExplorerScan {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(ExplorerScan {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub async fn fetch_token_contracts(&self, wallet: &Address) -> Result<Vec<Address>> {
        let mut found = HashSet::new();

        if let Err(e) = self.fetch_blockscout(wallet, &mut found).await {
            warn!("Blockscout-style lookup failed: {}", e);
        }

        if found.is_empty() && self.api_key.is_some() {
            if let Err(e) = self.fetch_etherscan(wallet, &mut found).await {
                warn!("Etherscan-style lookup failed: {}", e);
            }
        }

        let mut contracts: Vec<Address> = found.into_iter().collect();
        contracts.sort();
        Ok(contracts)
    }

    async fn fetch_blockscout(&self, wallet: &Address, found: &mut HashSet<Address>) -> Result<()> {
        let url = format!(
            "{}/api/v2/addresses/{:?}/token-transfers",
            self.base_url, wallet
        );
        let mut params: Vec<(String, String)> = vec![("type".to_string(), "ERC-20".to_string())];

        for _ in 0..EXPLORER_MAX_PAGES {
            let response = self.http.get(&url).query(&params).send().await?;
            if !response.status().is_success() {
                anyhow::bail!("explorer returned {}", response.status());
            }

            let body: serde_json::Value = response.json().await?;
            let items = match body.get("items").and_then(|v| v.as_array()) {
                Some(items) if !items.is_empty() => items,
                _ => break,
            };

            for row in items {
                // Instances disagree on the field name for the token address
                let token = &row["token"];
                let raw = token
                    .get("address")
                    .or_else(|| token.get("address_hash"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("");

                if let Ok(address) = Address::from_str(raw) {
                    found.insert(address);
                }
            }

            match body.get("next_page_params").and_then(|v| v.as_object()) {
                Some(next) if !next.is_empty() => {
                    params = vec![("type".to_string(), "ERC-20".to_string())];
                    for (key, value) in next {
                        let value = match value {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        params.push((key.clone(), value));
                    }
                }
                _ => break,
            }
        }

        Ok(())
    }

    async fn fetch_etherscan(&self, wallet: &Address, found: &mut HashSet<Address>) -> Result<()> {
        let url = format!("{}/api", self.base_url);
        let api_key = self.api_key.clone().unwrap_or_default();

        for page in 1..=EXPLORER_MAX_PAGES {
            let response = self
                .http
                .get(&url)
                .query(&[
                    ("module", "account"),
                    ("action", "tokentx"),
                    ("address", &format!("{:?}", wallet)),
                    ("page", &page.to_string()),
                    ("offset", &EXPLORER_PAGE_SIZE.to_string()),
                    ("sort", "desc"),
                    ("apikey", &api_key),
                ])
                .send()
                .await?;
            if !response.status().is_success() {
                anyhow::bail!("explorer returned {}", response.status());
            }

            let body: serde_json::Value = response.json().await?;
            let status = body.get("status").and_then(|v| v.as_str()).unwrap_or("");
            let result = match body.get("result").and_then(|v| v.as_array()) {
                Some(rows) if status == "1" && !rows.is_empty() => rows,
                _ => break,
            };

            for row in result {
                let raw = row
                    .get("contractAddress")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");

                if let Ok(address) = Address::from_str(raw) {
                    found.insert(address);
                }
            }
        }

        Ok(())
    }
}
