use super::models::{EventFilter, FacilitatorStats, SenderWatermark, TransferEvent};
use crate::chain::Chain;
use crate::error::StoreError;
use crate::provider::Provider;
use alloy_primitives::U256;
use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, ToSql, params, params_from_iter};
use std::collections::BTreeMap;
use std::str::FromStr;

pub struct TransferEventRepository<'a> {
    conn: &'a rusqlite::Connection,
}

impl<'a> TransferEventRepository<'a> {
    const INSERT_EVENT: &'static str = "INSERT OR IGNORE INTO transfer_event (
            address, transaction_from, sender, recipient, amount, block_timestamp,
            tx_hash, chain, provider, decimals, facilitator_id, log_index
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)";

    const SELECT_EVENT: &'static str = "SELECT address, transaction_from, sender, recipient, amount, \
        block_timestamp, tx_hash, chain, provider, decimals, facilitator_id, log_index \
        FROM transfer_event";

    const SELECT_LATEST_FOR_SENDER: &'static str = " WHERE chain = ?1 AND transaction_from = ?2 AND provider = ?3 \
        ORDER BY block_timestamp DESC LIMIT 1";

    const SELECT_AMOUNTS_BY_FACILITATOR: &'static str =
        "SELECT facilitator_id, chain, address, decimals, amount, block_timestamp FROM transfer_event";

    const SELECT_WATERMARKS: &'static str = "SELECT chain, transaction_from, provider, COUNT(*), MAX(block_timestamp) \
        FROM transfer_event \
        GROUP BY chain, transaction_from, provider \
        ORDER BY chain, transaction_from, provider";

    pub fn new(conn: &'a rusqlite::Connection) -> Self {
        Self { conn }
    }

    /// Insert all events in one transaction, skipping rows that collide with
    /// the identity index. Returns how many rows were actually written.
    pub fn insert_batch(&self, events: &[TransferEvent]) -> Result<usize, StoreError> {
        if events.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.unchecked_transaction()?;
        let mut count = 0;

        {
            let mut stmt = tx.prepare_cached(Self::INSERT_EVENT)?;

            for event in events {
                count += stmt.execute(params![
                    event.address,
                    event.transaction_from,
                    event.sender,
                    event.recipient,
                    event.amount.to_string(),
                    event.block_timestamp.timestamp_millis(),
                    event.tx_hash,
                    event.chain.as_str(),
                    event.provider.as_str(),
                    event.decimals,
                    event.facilitator_id,
                    event.log_index,
                ])?;
            }
        }

        tx.commit()?;
        Ok(count)
    }

    /// Most recent event for a (chain, sender, provider) key. `transaction_from`
    /// must already be normalised for `chain`.
    pub fn latest_for_sender(
        &self,
        chain: Chain,
        transaction_from: &str,
        provider: Provider,
    ) -> Result<Option<TransferEvent>, StoreError> {
        let query = format!("{}{}", Self::SELECT_EVENT, Self::SELECT_LATEST_FOR_SENDER);
        let event = self
            .conn
            .query_row(
                &query,
                params![chain.as_str(), transaction_from, provider.as_str()],
                Self::row_to_event,
            )
            .optional()?;
        Ok(event)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let count = self
            .conn
            .query_row("SELECT COUNT(*) FROM transfer_event", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Events matching `filter`, newest first.
    pub fn query_events(
        &self,
        filter: &EventFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TransferEvent>, StoreError> {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(chain) = filter.chain {
            conditions.push("chain = ?");
            params.push(Box::new(chain.as_str()));
        }

        if let Some(id) = &filter.facilitator_id {
            conditions.push("facilitator_id = ?");
            params.push(Box::new(id.clone()));
        }

        if let Some(from) = &filter.transaction_from {
            conditions.push("transaction_from = ?");
            params.push(Box::new(from.clone()));
        }

        if let Some(to) = &filter.recipient {
            conditions.push("recipient = ?");
            params.push(Box::new(to.clone()));
        }

        if let Some(since) = filter.since {
            conditions.push("block_timestamp >= ?");
            params.push(Box::new(since.timestamp_millis()));
        }

        if let Some(until) = filter.until {
            conditions.push("block_timestamp < ?");
            params.push(Box::new(until.timestamp_millis()));
        }

        let mut query = Self::SELECT_EVENT.to_string();
        if !conditions.is_empty() {
            query.push_str(" WHERE ");
            query.push_str(&conditions.join(" AND "));
        }
        query.push_str(&format!(
            " ORDER BY block_timestamp DESC, log_index DESC LIMIT {limit} OFFSET {offset}"
        ));

        let mut stmt = self.conn.prepare(&query)?;
        let events = stmt
            .query_map(params_from_iter(params), Self::row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Transfer count and volume per (facilitator, chain, token).
    ///
    /// Amounts are 256-bit and stored as text, so the sum happens here rather
    /// than in SQL.
    pub fn facilitator_stats(&self, chain: Option<Chain>) -> Result<Vec<FacilitatorStats>, StoreError> {
        let mut query = Self::SELECT_AMOUNTS_BY_FACILITATOR.to_string();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        if let Some(chain) = chain {
            query.push_str(" WHERE chain = ?");
            params.push(Box::new(chain.as_str()));
        }

        let mut stmt = self.conn.prepare(&query)?;
        let mut rows = stmt.query(params_from_iter(params))?;

        let mut grouped: BTreeMap<(String, Chain, String), FacilitatorStats> = BTreeMap::new();
        while let Some(row) = rows.next()? {
            let facilitator_id: String = row.get(0)?;
            let chain = parse_column::<Chain>(row, 1)?;
            let token: String = row.get(2)?;
            let decimals: u8 = row.get(3)?;
            let amount = parse_amount(row, 4)?;
            let ts = parse_timestamp(row, 5)?;

            let stats = grouped
                .entry((facilitator_id.clone(), chain, token.clone()))
                .or_insert_with(|| FacilitatorStats {
                    facilitator_id,
                    chain,
                    token,
                    decimals,
                    transfers: 0,
                    volume: U256::ZERO,
                    first_seen: None,
                    last_seen: None,
                });

            stats.transfers += 1;
            stats.volume = stats
                .volume
                .checked_add(amount)
                .ok_or_else(|| StoreError::InvalidRow("overflow summing volume".to_string()))?;
            stats.first_seen = Some(stats.first_seen.map_or(ts, |f| f.min(ts)));
            stats.last_seen = Some(stats.last_seen.map_or(ts, |l| l.max(ts)));
        }

        Ok(grouped.into_values().collect())
    }

    pub fn watermarks(&self) -> Result<Vec<SenderWatermark>, StoreError> {
        let mut stmt = self.conn.prepare(Self::SELECT_WATERMARKS)?;
        let marks = stmt
            .query_map([], |row| {
                Ok(SenderWatermark {
                    chain: parse_column(row, 0)?,
                    transaction_from: row.get(1)?,
                    provider: parse_column(row, 2)?,
                    transfers: row.get(3)?,
                    latest: parse_timestamp(row, 4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(marks)
    }

    fn row_to_event(row: &Row) -> rusqlite::Result<TransferEvent> {
        Ok(TransferEvent {
            address: row.get(0)?,
            transaction_from: row.get(1)?,
            sender: row.get(2)?,
            recipient: row.get(3)?,
            amount: parse_amount(row, 4)?,
            block_timestamp: parse_timestamp(row, 5)?,
            tx_hash: row.get(6)?,
            chain: parse_column(row, 7)?,
            provider: parse_column(row, 8)?,
            decimals: row.get(9)?,
            facilitator_id: row.get(10)?,
            log_index: row.get(11)?,
        })
    }
}

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

#[derive(Debug)]
struct ColumnError(String);

impl std::fmt::Display for ColumnError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ColumnError {}

fn parse_column<T: FromStr<Err = String>>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    row.get::<_, String>(idx)?
        .parse::<T>()
        .map_err(|e| conversion_error(idx, ColumnError(e)))
}

fn parse_amount(row: &Row, idx: usize) -> rusqlite::Result<U256> {
    U256::from_str(&row.get::<_, String>(idx)?).map_err(|e| conversion_error(idx, e))
}

fn parse_timestamp(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| conversion_error(idx, ColumnError(format!("timestamp out of range: {millis}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::Database;

    fn event(tx_hash: &str, log_index: u64, ts: &str, amount: u64) -> TransferEvent {
        TransferEvent {
            address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
            transaction_from: "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6".to_string(),
            sender: "0x1111111111111111111111111111111111111111".to_string(),
            recipient: "0x2222222222222222222222222222222222222222".to_string(),
            amount: U256::from(amount),
            block_timestamp: ts.parse().unwrap(),
            tx_hash: tx_hash.to_string(),
            chain: Chain::Base,
            provider: Provider::Cdp,
            decimals: 6,
            facilitator_id: "coinbase".to_string(),
            log_index,
        }
    }

    #[test]
    fn test_identity_constraint_rejects_duplicates() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = TransferEventRepository::new(conn);
            let first = event("0xaa", 1, "2025-06-01T00:00:00Z", 100);

            assert_eq!(repo.insert_batch(std::slice::from_ref(&first))?, 1);

            // Same identity, different payload: still ignored.
            let mut replay = first.clone();
            replay.amount = U256::from(999u64);
            replay.provider = Provider::Bitquery;
            assert_eq!(repo.insert_batch(&[replay])?, 0);

            // Direct insert bypassing OR IGNORE must hit the unique index.
            let raw = conn.execute(
                "INSERT INTO transfer_event (address, transaction_from, sender, recipient, amount,
                    block_timestamp, tx_hash, chain, provider, decimals, facilitator_id, log_index)
                 VALUES ('a', ?1, 's', 'r', '1', 0, '0xaa', 'base', 'cdp', 6, 'x', 1)",
                params![first.transaction_from],
            );
            assert!(raw.is_err());

            // A different log index in the same transaction is a new transfer.
            assert_eq!(repo.insert_batch(&[event("0xaa", 2, "2025-06-01T00:00:00Z", 5)])?, 1);
            assert_eq!(repo.count()?, 2);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_insert_batch_counts_only_new_rows() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = TransferEventRepository::new(conn);
            let batch = vec![
                event("0x01", 0, "2025-06-01T00:00:00Z", 1),
                event("0x02", 0, "2025-06-01T00:01:00Z", 2),
            ];
            assert_eq!(repo.insert_batch(&batch)?, 2);

            let overlapping = vec![
                event("0x02", 0, "2025-06-01T00:01:00Z", 2),
                event("0x03", 0, "2025-06-01T00:02:00Z", 3),
            ];
            assert_eq!(repo.insert_batch(&overlapping)?, 1);
            assert_eq!(repo.insert_batch(&[])?, 0);
            assert_eq!(repo.count()?, 3);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_latest_for_sender_round_trips_event() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = TransferEventRepository::new(conn);
            let older = event("0x01", 0, "2025-06-01T00:00:00Z", 1);
            let newer = event("0x02", 3, "2025-06-03T00:00:00.123Z", 2);
            repo.insert_batch(&[newer.clone(), older])?;

            let latest = repo
                .latest_for_sender(Chain::Base, &newer.transaction_from, Provider::Cdp)?
                .unwrap();
            assert_eq!(latest, newer);

            assert!(
                repo.latest_for_sender(Chain::Base, &newer.transaction_from, Provider::Bitquery)?
                    .is_none()
            );
            assert!(
                repo.latest_for_sender(Chain::Polygon, &newer.transaction_from, Provider::Cdp)?
                    .is_none()
            );
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_query_and_stats() {
        let db = Database::open_in_memory().unwrap();
        db.with_conn(|conn| {
            let repo = TransferEventRepository::new(conn);
            let mut other = event("0x09", 0, "2025-06-05T00:00:00Z", 7);
            other.facilitator_id = "payai".to_string();
            repo.insert_batch(&[
                event("0x01", 0, "2025-06-01T00:00:00Z", 1_000_000),
                event("0x02", 0, "2025-06-02T00:00:00Z", 500_000),
                other,
            ])?;

            let filter = EventFilter {
                facilitator_id: Some("coinbase".to_string()),
                ..Default::default()
            };
            let events = repo.query_events(&filter, 10, 0)?;
            assert_eq!(events.len(), 2);
            assert_eq!(events[0].tx_hash, "0x02");

            let windowed = EventFilter {
                since: Some("2025-06-02T00:00:00Z".parse().unwrap()),
                until: Some("2025-06-05T00:00:00Z".parse().unwrap()),
                ..Default::default()
            };
            assert_eq!(repo.query_events(&windowed, 10, 0)?.len(), 1);

            let stats = repo.facilitator_stats(Some(Chain::Base))?;
            assert_eq!(stats.len(), 2);
            let coinbase = stats.iter().find(|s| s.facilitator_id == "coinbase").unwrap();
            assert_eq!(coinbase.transfers, 2);
            assert_eq!(coinbase.volume, U256::from(1_500_000u64));
            assert_eq!(
                coinbase.last_seen.unwrap(),
                "2025-06-02T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
            );

            let marks = repo.watermarks()?;
            assert_eq!(marks.len(), 1);
            assert_eq!(marks[0].transfers, 3);
            Ok(())
        })
        .unwrap();
    }
}
