use anyhow::Result;
use clap::{Parser, Subcommand};
use dust_sweeper::config::Config;
use dust_sweeper::output::{
    OutputFormat, format_sell_state, format_stats, format_tokens,
};
use dust_sweeper::store::{
    CheckpointRepository, Database, RegistryRepository, SellStateRepository, StoreStats,
};

#[derive(Parser)]
#[command(name = "query")]
#[command(about = "Inspect the sweeper's token registry and swap history", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "table")]
    format: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List every token contract the scanner has recorded
    Tokens,
    /// Show the wallet's backward-scan checkpoint
    Checkpoint,
    /// List tokens with their last sale timestamps
    SellState,
    /// Summarize all store tables
    Stats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let format = OutputFormat::from(cli.format.as_str());

    let config = Config::from_env()?;
    let db = Database::new(&config.database_url)?;

    let registry = RegistryRepository::new(&db.conn);
    let checkpoints = CheckpointRepository::new(&db.conn);
    let sell_state = SellStateRepository::new(&db.conn);

    match cli.command {
        Commands::Tokens => {
            let tokens = registry.all()?;
            println!("{}", format_tokens(&tokens, &format));
        }
        Commands::Checkpoint => {
            match checkpoints.get(&config.wallet_address)? {
                Some(block) => println!(
                    "Wallet {:?} scanned down to block {}",
                    config.wallet_address, block
                ),
                None => println!(
                    "No checkpoint for wallet {:?}, next scan starts at the chain head",
                    config.wallet_address
                ),
            }
        }
        Commands::SellState => {
            let records = sell_state.all()?;
            println!("{}", format_sell_state(&records, &format));
        }
        Commands::Stats => {
            let stats = StoreStats {
                tokens_tracked: registry.count()?,
                checkpoint: checkpoints.get(&config.wallet_address)?,
                sales_recorded: sell_state.all()?.len(),
            };
            println!("{}", format_stats(&stats, &format));
        }
    }

    Ok(())
}
