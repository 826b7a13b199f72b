use super::models::SellRecord;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use std::str::FromStr;

/// Per-token timestamp of the last completed sell, read before every swap
/// attempt to enforce the cooldown window.
pub struct SellStateRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> SellStateRepository<'a> {
    const RECORD_SALE: &'static str =
        "INSERT OR REPLACE INTO sell_state (token_address, last_sold) VALUES (?1, ?2)";

    const GET_LAST_SOLD: &'static str =
        "SELECT last_sold FROM sell_state WHERE token_address = ?1";

    const SELECT_ALL: &'static str =
        "SELECT token_address, last_sold FROM sell_state ORDER BY last_sold DESC";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    pub fn last_sold(&self, token: &Address) -> Result<Option<u64>> {
        let ts: Option<u64> = self
            .conn
            .query_row(Self::GET_LAST_SOLD, params![format!("{:?}", token)], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(ts)
    }

    pub fn record(&self, token: &Address, unix_time: u64) -> Result<()> {
        self.conn.execute(
            Self::RECORD_SALE,
            params![format!("{:?}", token), unix_time],
        )?;
        Ok(())
    }

    pub fn all(&self) -> Result<Vec<SellRecord>> {
        let mut stmt = self.conn.prepare(Self::SELECT_ALL)?;
        let records = stmt
            .query_map([], |row| {
                let token = Address::from_str(&row.get::<_, String>(0)?).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;

                Ok(SellRecord {
                    token,
                    last_sold: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }
}
