use super::models::TokenCandidate;
use alloy_primitives::Address;
use anyhow::Result;
use rusqlite::{OptionalExtension, params};
use std::str::FromStr;

/// Append-only set of token contracts ever seen transferring to a wallet.
/// Addresses are stored lowercase, so lookups are case-insensitive.
pub struct RegistryRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> RegistryRepository<'a> {
    const INSERT_CANDIDATE: &'static str =
        "INSERT OR IGNORE INTO known_tokens (address, first_seen_block) VALUES (?1, ?2)";

    const SELECT_ALL: &'static str =
        "SELECT address, first_seen_block FROM known_tokens ORDER BY address";

    const SELECT_FIRST_SEEN: &'static str =
        "SELECT first_seen_block FROM known_tokens WHERE address = ?1";

    const COUNT_TOKENS: &'static str = "SELECT COUNT(*) FROM known_tokens";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Returns true if the candidate was new to the registry.
    pub fn insert(&self, candidate: &TokenCandidate) -> Result<bool> {
        let inserted = self.conn.execute(
            Self::INSERT_CANDIDATE,
            params![
                format!("{:?}", candidate.address),
                candidate.first_seen_block
            ],
        )?;
        Ok(inserted > 0)
    }

    /// Returns how many of the given candidates were new.
    pub fn insert_batch(&self, candidates: &[TokenCandidate]) -> Result<usize> {
        let tx = self.conn.unchecked_transaction()?;
        let mut inserted = 0;

        {
            let mut stmt = tx.prepare(Self::INSERT_CANDIDATE)?;

            for candidate in candidates {
                inserted += stmt.execute(params![
                    format!("{:?}", candidate.address),
                    candidate.first_seen_block
                ])?;
            }
        }

        tx.commit()?;
        Ok(inserted)
    }

    pub fn first_seen_block(&self, address: &Address) -> Result<Option<u64>> {
        let block: Option<u64> = self
            .conn
            .query_row(
                Self::SELECT_FIRST_SEEN,
                params![format!("{:?}", address)],
                |row| row.get(0),
            )
            .optional()?;
        Ok(block)
    }

    /// Every known candidate, in address order.
    pub fn all(&self) -> Result<Vec<TokenCandidate>> {
        let mut stmt = self.conn.prepare(Self::SELECT_ALL)?;
        let candidates = stmt
            .query_map([], |row| {
                let address = Address::from_str(&row.get::<_, String>(0)?).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(
                        0,
                        rusqlite::types::Type::Text,
                        Box::new(e),
                    )
                })?;

                Ok(TokenCandidate {
                    address,
                    first_seen_block: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(candidates)
    }

    pub fn count(&self) -> Result<usize> {
        let count = self
            .conn
            .query_row(Self::COUNT_TOKENS, [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Database;

    fn candidate(addr: &str, block: u64) -> TokenCandidate {
        TokenCandidate {
            address: Address::from_str(addr).unwrap(),
            first_seen_block: block,
        }
    }

    #[test]
    fn test_insert_deduplicates_by_address() {
        let db = Database::open_in_memory().unwrap();
        let repo = RegistryRepository::new(&db.conn);

        let first = candidate("0x00000000000000000000000000000000000000aa", 100);
        assert!(repo.insert(&first).unwrap());
        assert!(!repo.insert(&first).unwrap());

        // Same address spelled with different case is still the same entry
        let recased = candidate("0x00000000000000000000000000000000000000AA", 50);
        assert!(!repo.insert(&recased).unwrap());

        assert_eq!(repo.count().unwrap(), 1);
        assert_eq!(
            repo.first_seen_block(&first.address).unwrap(),
            Some(100)
        );
    }

    #[test]
    fn test_insert_batch_counts_only_new_entries() {
        let db = Database::open_in_memory().unwrap();
        let repo = RegistryRepository::new(&db.conn);

        repo.insert(&candidate("0x00000000000000000000000000000000000000aa", 10))
            .unwrap();

        let batch = vec![
            candidate("0x00000000000000000000000000000000000000aa", 20),
            candidate("0x00000000000000000000000000000000000000bb", 30),
            candidate("0x00000000000000000000000000000000000000cc", 40),
        ];
        assert_eq!(repo.insert_batch(&batch).unwrap(), 2);
        assert_eq!(repo.count().unwrap(), 3);
    }

    #[test]
    fn test_all_returns_address_order() {
        let db = Database::open_in_memory().unwrap();
        let repo = RegistryRepository::new(&db.conn);

        repo.insert(&candidate("0x00000000000000000000000000000000000000cc", 1))
            .unwrap();
        repo.insert(&candidate("0x00000000000000000000000000000000000000aa", 2))
            .unwrap();
        repo.insert(&candidate("0x00000000000000000000000000000000000000bb", 3))
            .unwrap();

        let all = repo.all().unwrap();
        let addresses: Vec<String> = all.iter().map(|c| format!("{:?}", c.address)).collect();

        let mut sorted = addresses.clone();
        sorted.sort();
        assert_eq!(addresses, sorted);
        assert_eq!(all.len(), 3);
    }
}
