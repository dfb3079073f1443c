use crate::chain::Chain;
use crate::error::StoreError;
use crate::provider::Provider;
use crate::repository::{Database, TransferEventRepository};
use chrono::{DateTime, TimeDelta, Utc};

/// Start of the next fetch window for `(chain, address, provider)`: one
/// millisecond past the newest stored event, or `sync_start_date` when no
/// event has been stored yet.
///
/// The lookup uses the chain's address normalisation, so a mixed-case EVM
/// address finds rows stored lower-cased while Solana matches exactly.
pub fn resolve_since(
    db: &Database,
    chain: Chain,
    address: &str,
    provider: Provider,
    sync_start_date: DateTime<Utc>,
) -> Result<DateTime<Utc>, StoreError> {
    let sender = chain.normalize_address(address);
    let latest = db.with_conn(|conn| {
        TransferEventRepository::new(conn).latest_for_sender(chain, &sender, provider)
    })?;

    Ok(match latest {
        Some(event) => event.block_timestamp + TimeDelta::milliseconds(1),
        None => sync_start_date,
    })
}

/// [`resolve_since`] on the blocking pool.
pub async fn resolve_since_async(
    db: &Database,
    chain: Chain,
    address: &str,
    provider: Provider,
    sync_start_date: DateTime<Utc>,
) -> Result<DateTime<Utc>, StoreError> {
    let db_clone = db.clone();
    let address = address.to_string();
    tokio::task::spawn_blocking(move || {
        resolve_since(&db_clone, chain, &address, provider, sync_start_date)
    })
    .await?
}
