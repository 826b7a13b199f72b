use alloy::signers::local::PrivateKeySigner;
use anyhow::Result;
use clap::Parser;
use dust_sweeper::classifier::{ClassifierSettings, DustClassifier, RpcTokenSource};
use dust_sweeper::config::Config;
use dust_sweeper::discovery::{ExplorerScan, TokenDiscovery};
use dust_sweeper::error::SweepError;
use dust_sweeper::oracle::LensOracle;
use dust_sweeper::orchestrator::{SwapOrchestrator, SwapSettings};
use dust_sweeper::output::{self, OutputFormat};
use dust_sweeper::report::SweepReport;
use dust_sweeper::rpc::RpcClient;
use dust_sweeper::store::{Database, RegistryRepository, SellStateRepository, TokenCandidate};
use dust_sweeper::verified::{HoldingsSource, WalletTokenApi};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "sweeper")]
#[command(about = "Sweep dust token balances out of a wallet", long_about = None)]
struct Cli {
    /// Output format: table, json, csv
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Update the token registry and exit
    #[arg(long)]
    discover_only: bool,

    /// Classify dust without running the swap pipeline
    #[arg(long)]
    scan_only: bool,

    /// Keep running, one sweep per interval
    #[arg(long)]
    watch: bool,

    /// Seconds between sweeps in watch mode
    #[arg(long, default_value_t = 300)]
    interval_secs: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    info!("Starting dust sweeper");

    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("Wallet address: {:?}", config.wallet_address);
    info!(
        "RPC URLs: {} endpoint(s) configured",
        config.json_rpc_urls.len()
    );
    info!("Safe mode: {}", config.safe_mode);

    let signer = if config.safe_mode || cli.scan_only || cli.discover_only {
        None
    } else {
        match live_signer(&config) {
            Ok(signer) => Some(signer),
            Err(e) => {
                let report =
                    SweepReport::error("error_configuration", config.wallet_address, e.to_string());
                println!("{}", output::format_report(&report, &format));
                return Ok(());
            }
        }
    };

    let db = Database::new(&config.database_url)?;
    info!("Database initialized");

    let client = RpcClient::new(&config.json_rpc_urls)?;
    info!("RPC client connected");

    if cli.watch {
        loop {
            run_once(&cli, &config, &db, &client, &signer, &format).await;
            info!("Sleeping {}s until the next sweep", cli.interval_secs);
            tokio::time::sleep(Duration::from_secs(cli.interval_secs)).await;
        }
    }

    run_once(&cli, &config, &db, &client, &signer, &format).await;
    Ok(())
}

fn live_signer(config: &Config) -> Result<PrivateKeySigner> {
    config.validate_for_execution()?;
    let key = config
        .private_key
        .as_deref()
        .unwrap_or_default()
        .trim_start_matches("0x");
    key.parse::<PrivateKeySigner>()
        .map_err(|e| anyhow::anyhow!("PRIVATE_KEY is not a valid signing key: {e}"))
}

async fn run_once(
    cli: &Cli,
    config: &Config,
    db: &Database,
    client: &RpcClient,
    signer: &Option<PrivateKeySigner>,
    format: &OutputFormat,
) {
    // Connectivity gate: abort before any side effects when the chain is down
    let head = match client.get_latest_block().await {
        Ok(block) => block,
        Err(e) => {
            let fault = SweepError::Connectivity(format!("{e:#}"));
            let report = SweepReport::error(
                "error_rpc_unreachable",
                config.wallet_address,
                fault.to_string(),
            );
            println!("{}", output::format_report(&report, format));
            return;
        }
    };
    info!("Chain head at block {}", head);

    let discovery = TokenDiscovery::new(
        client,
        config.wallet_address,
        config.discovery_chunk_size,
        config.discovery_max_chunks,
    );
    let mut discovery_note = None;
    match discovery.run(db).await {
        Ok(outcome) => {
            info!(
                "Discovery: {} new tokens, {} ranges scanned, {} ranges failed",
                outcome.new_tokens, outcome.chunks_scanned, outcome.failed_ranges
            );
            if outcome.failed_ranges > 0 {
                discovery_note = Some(format!(
                    "Discovery skipped {} failed block ranges",
                    outcome.failed_ranges
                ));
            }
        }
        Err(e) => {
            warn!("Discovery failed: {e:#}");
            discovery_note = Some(format!("Discovery failed: {e:#}"));
        }
    }

    if config.explorer_api_url.is_some() {
        match merge_explorer_candidates(config, db).await {
            Ok(inserted) => info!("Explorer scan added {} token contracts", inserted),
            Err(e) => warn!("Explorer scan failed: {e:#}"),
        }
    }

    let registry = RegistryRepository::new(&db.conn);

    if cli.discover_only {
        match registry.count() {
            Ok(count) => println!("Token registry holds {} contracts", count),
            Err(e) => warn!("Registry count failed: {e:#}"),
        }
        return;
    }

    let lens = match config.lens_address {
        Some(lens) => lens,
        None => {
            let report = SweepReport::error(
                "error_configuration",
                config.wallet_address,
                "LENS_ADDRESS must be set in .env",
            );
            println!("{}", output::format_report(&report, format));
            return;
        }
    };

    let candidates = match registry.all() {
        Ok(candidates) => candidates,
        Err(e) => {
            let report = SweepReport::error(
                "error_registry",
                config.wallet_address,
                format!("{e:#}"),
            );
            println!("{}", output::format_report(&report, format));
            return;
        }
    };

    let oracle = LensOracle::new(client.clone(), lens);
    let tokens = RpcTokenSource::new(client.clone());
    let holdings_api = build_holdings_source(config);
    let holdings_ref = holdings_api
        .as_ref()
        .map(|api| api as &dyn HoldingsSource);

    let classifier = DustClassifier::new(
        &oracle,
        &tokens,
        holdings_ref,
        ClassifierSettings::from_config(config),
    );
    let mut report = classifier.classify(config.wallet_address, &candidates).await;
    if let Some(note) = discovery_note {
        report.push_note(note);
    }
    info!(
        "Classified {} dust tokens from {} candidates",
        report.dust_count,
        candidates.len()
    );

    if !cli.scan_only {
        let orchestrator = SwapOrchestrator::new(
            client,
            &oracle,
            &tokens,
            config.wallet_address,
            signer.clone(),
            SwapSettings::from_config(config),
        );
        let items = report.dust.clone();
        let sell_state = SellStateRepository::new(&db.conn);
        orchestrator.run(&items, &sell_state, &mut report).await;
    }

    println!("{}", output::format_report(&report, format));
}

fn build_holdings_source(config: &Config) -> Option<WalletTokenApi> {
    let url = config.holdings_api_url.as_ref()?;
    let Some(key) = config.holdings_api_key.as_ref() else {
        warn!("HOLDINGS_API_URL set without HOLDINGS_API_KEY, skipping the verified registry");
        return None;
    };

    match WalletTokenApi::new(url, key, &config.holdings_cache_path) {
        Ok(api) => Some(api),
        Err(e) => {
            warn!("Holdings client init failed: {e:#}");
            None
        }
    }
}

async fn merge_explorer_candidates(config: &Config, db: &Database) -> Result<usize> {
    let Some(url) = &config.explorer_api_url else {
        return Ok(0);
    };

    let scan = ExplorerScan::new(url, config.explorer_api_key.clone())?;
    let contracts = scan.fetch_token_contracts(&config.wallet_address).await?;

    // Explorer results carry no block numbers, zero marks an unknown origin
    let candidates: Vec<TokenCandidate> = contracts
        .into_iter()
        .map(|address| TokenCandidate {
            address,
            first_seen_block: 0,
        })
        .collect();

    let registry = RegistryRepository::new(&db.conn);
    registry.insert_batch(&candidates)
}
