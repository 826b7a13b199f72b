use anyhow::{Context, Result};
use rusqlite::Connection;

pub struct Database {
    pub conn: Connection,
}

impl Database {
    pub fn new(db_path: &str) -> Result<Self> {
        let db_path = db_path.strip_prefix("sqlite:").unwrap_or(db_path);
        let conn = Connection::open(db_path).context("Failed to open database")?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    /// In-memory store for tests and throwaway preview runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;

        let db = Database { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<()> {
        // Append-only union of every token ever seen transferring to a wallet
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS known_tokens (
                address TEXT PRIMARY KEY,
                first_seen_block INTEGER NOT NULL
            )",
            [],
        )?;

        // Lower bound of the backward sweep, one row per wallet
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS scan_state (
                wallet TEXT PRIMARY KEY,
                last_scanned_block INTEGER NOT NULL
            )",
            [],
        )?;

        // Cooldown bookkeeping, one row per token ever sold
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS sell_state (
                token_address TEXT PRIMARY KEY,
                last_sold INTEGER NOT NULL
            )",
            [],
        )?;

        Ok(())
    }
}
