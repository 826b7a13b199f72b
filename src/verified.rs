use alloy_primitives::Address;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tokio_retry::Retry;
use tokio_retry::strategy::FixedInterval;
use tracing::{debug, warn};

const HOLDINGS_ATTEMPTS: usize = 3;
const HOLDINGS_RETRY_DELAY: Duration = Duration::from_secs(2);
const HOLDINGS_TIMEOUT: Duration = Duration::from_secs(45);

/// One wallet holding as reported by the token API, normalized from the
/// provider's shape-shifting payloads into a single canonical record.
#[derive(Debug, Clone)]
pub struct VerifiedHolding {
    pub contract: Address,
    pub symbol: String,
    pub amount: f64,
    pub usd_value: f64,
    pub decimals: u8,
    pub verified: bool,
    pub scam: bool,
}

/// Off-chain source of priced wallet holdings. Failing here only disables
/// the USD pricing path; classification falls back to on-chain quotes.
#[async_trait]
pub trait HoldingsSource: Send + Sync {
    async fn wallet_holdings(&self, wallet: &Address) -> Result<Vec<VerifiedHolding>>;
}

/// Token API client with a JSON file cache. A stale snapshot beats an
/// empty answer when the provider has an outage.
pub struct WalletTokenApi {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    cache_path: PathBuf,
}

impl WalletTokenApi {
    pub fn new(base_url: &str, api_key: &str, cache_path: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(HOLDINGS_TIMEOUT)
            .build()?;

        Ok(WalletTokenApi {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            cache_path: PathBuf::from(cache_path),
        })
    }

    async fn fetch_raw(&self, wallet: &Address) -> Result<Value> {
        let url = format!("{}/account/tokens", self.base_url);
        let address = format!("{:?}", wallet);

        let strategy = FixedInterval::new(HOLDINGS_RETRY_DELAY).take(HOLDINGS_ATTEMPTS - 1);
        let body = Retry::spawn(strategy, || async {
            let response = self
                .http
                .get(&url)
                .header("X-API-KEY", &self.api_key)
                .query(&[("address", address.as_str())])
                .send()
                .await?;

            if !response.status().is_success() {
                anyhow::bail!("token API returned {}", response.status());
            }

            let body: Value = response.json().await?;
            Ok(body)
        })
        .await?;

        self.save_cache(&body);
        Ok(body)
    }

    fn save_cache(&self, body: &Value) {
        match serde_json::to_string_pretty(body) {
            Ok(serialized) => {
                if let Err(e) = std::fs::write(&self.cache_path, serialized) {
                    debug!("Could not write holdings cache: {}", e);
                }
            }
            Err(e) => debug!("Could not serialize holdings cache: {}", e),
        }
    }

    fn load_cache(&self) -> Option<Value> {
        let raw = std::fs::read_to_string(&self.cache_path).ok()?;
        serde_json::from_str(&raw).ok()
    }
}

#[async_trait]
impl HoldingsSource for WalletTokenApi {
    async fn wallet_holdings(&self, wallet: &Address) -> Result<Vec<VerifiedHolding>> {
        match self.fetch_raw(wallet).await {
            Ok(body) => Ok(normalize_holdings(&body)),
            Err(e) => match self.load_cache() {
                Some(cached) => {
                    warn!("Token API unavailable ({}), using cached holdings", e);
                    Ok(normalize_holdings(&cached))
                }
                None => Err(e).context("token API unavailable and no cache present"),
            },
        }
    }
}

/// Flattens both known response envelopes (`{"result":{"data":[...]}}` and
/// `{"data":[...]}`) and both spellings of the per-item fields into
/// canonical records. Items without a parseable contract address are
/// dropped.
pub fn normalize_holdings(body: &Value) -> Vec<VerifiedHolding> {
    let items = body
        .get("result")
        .and_then(|r| r.get("data"))
        .or_else(|| body.get("data"))
        .and_then(|d| d.as_array());

    let Some(items) = items else {
        return Vec::new();
    };

    let mut holdings = Vec::new();

    for item in items {
        let raw_contract = item
            .get("contractAddress")
            .or_else(|| item.get("contract"))
            .and_then(|v| v.as_str())
            .unwrap_or("");

        let Ok(contract) = Address::from_str(raw_contract) else {
            continue;
        };

        let symbol = item
            .get("symbol")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_uppercase();

        let decimals = item
            .get("decimal")
            .or_else(|| item.get("decimals"))
            .and_then(|v| v.as_u64())
            .unwrap_or(18) as u8;

        holdings.push(VerifiedHolding {
            contract,
            symbol,
            amount: value_to_f64(item.get("balance")),
            usd_value: value_to_f64(item.get("usdValue")),
            decimals,
            verified: item
                .get("verified")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            scam: item
                .get("scamFlag")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        });
    }

    holdings
}

// Providers flip-flop between numbers and numeric strings
fn value_to_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}
