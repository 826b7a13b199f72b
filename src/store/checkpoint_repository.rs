use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};

/// Lower bound of the backward log sweep, one checkpoint per wallet.
pub struct CheckpointRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> CheckpointRepository<'a> {
    const UPSERT_CHECKPOINT: &'static str =
        "INSERT OR REPLACE INTO scan_state (wallet, last_scanned_block) VALUES (?1, ?2)";

    const GET_CHECKPOINT: &'static str =
        "SELECT last_scanned_block FROM scan_state WHERE wallet = ?1";

    const CLEAR_CHECKPOINT: &'static str = "DELETE FROM scan_state WHERE wallet = ?1";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn get(&self, wallet: &Address) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(
                Self::GET_CHECKPOINT,
                params![format!("{:?}", wallet)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block)
    }

    pub fn set(&self, wallet: &Address, block: u64) -> Result<()> {
        self.conn.execute(
            Self::UPSERT_CHECKPOINT,
            params![format!("{:?}", wallet), block],
        )?;
        Ok(())
    }

    /// Forget the sweep position so the next scan restarts from chain head.
    pub fn clear(&self, wallet: &Address) -> Result<()> {
        self.conn
            .execute(Self::CLEAR_CHECKPOINT, params![format!("{:?}", wallet)])?;
        Ok(())
    }
}
