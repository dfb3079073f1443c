//! Coinbase CDP SQL API over the decoded `<chain>.events` table.
//!
//! Amounts are the raw `uint256` event parameter, so no scaling happens here.
//! Addresses are validated against the chain's format when the registry is
//! loaded, which is what allows them to be embedded as SQL literals.

use super::amount::parse_raw_amount;
use super::{FetchContext, Provider, QueryRequest, parse_timestamp, value_as_text};
use crate::chain::Chain;
use crate::error::FetchError;
use crate::facilitators::FacilitatorAddressConfig;
use crate::repository::TransferEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

const PROVIDER: Provider = Provider::Cdp;

const TRANSFER_SIGNATURE: &str = "Transfer(address,address,uint256)";

pub fn transfers_sql(
    chain: Chain,
    address: &FacilitatorAddressConfig,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
    offset: usize,
) -> QueryRequest {
    let sql = format!(
        "SELECT \
            address, \
            transaction_from, \
            parameters['from']::String AS sender, \
            parameters['to']::String AS recipient, \
            parameters['value']::String AS amount, \
            block_timestamp, \
            transaction_hash, \
            log_index \
        FROM {table}.events \
        WHERE event_signature = '{TRANSFER_SIGNATURE}' \
            AND address = '{token}' \
            AND transaction_from = '{from}' \
            AND block_timestamp >= '{since}' \
            AND block_timestamp < '{until}' \
        ORDER BY block_timestamp ASC, log_index ASC \
        LIMIT {limit} OFFSET {offset}",
        table = chain.as_str(),
        token = address.token.address,
        from = address.address,
        since = sql_instant(since),
        until = sql_instant(until),
    );
    QueryRequest::Sql { sql }
}

fn sql_instant(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S%.3f").to_string()
}

#[derive(Debug, Deserialize)]
struct SqlResponse {
    result: Option<Vec<EventRow>>,
}

#[derive(Debug, Deserialize)]
struct EventRow {
    address: String,
    transaction_from: String,
    sender: String,
    recipient: String,
    amount: Value,
    block_timestamp: String,
    transaction_hash: String,
    log_index: Value,
}

pub fn transform(raw: &Value, ctx: &FetchContext<'_>) -> Result<Vec<TransferEvent>, FetchError> {
    let response: SqlResponse = serde_json::from_value(raw.clone())
        .map_err(|e| FetchError::decode(PROVIDER, format!("unexpected result set: {e}")))?;

    let chain = ctx.chain;
    let decimals = ctx.address.token.decimals;

    response
        .result
        .unwrap_or_default()
        .into_iter()
        .map(|row| {
            let amount_text = value_as_text(&row.amount)
                .ok_or_else(|| FetchError::decode(PROVIDER, "amount is not numeric"))?;
            let amount = parse_raw_amount(&amount_text).map_err(|e| FetchError::decode(PROVIDER, e))?;

            let log_index = value_as_text(&row.log_index)
                .and_then(|s| s.parse::<u64>().ok())
                .ok_or_else(|| {
                    FetchError::decode(PROVIDER, format!("bad log_index: {}", row.log_index))
                })?;

            Ok(TransferEvent {
                address: chain.normalize_address(&row.address),
                transaction_from: chain.normalize_address(&row.transaction_from),
                sender: chain.normalize_address(&row.sender),
                recipient: chain.normalize_address(&row.recipient),
                amount,
                block_timestamp: parse_timestamp(PROVIDER, &row.block_timestamp)?,
                tx_hash: row.transaction_hash.to_lowercase(),
                chain,
                provider: PROVIDER,
                decimals,
                facilitator_id: ctx.facilitator_id.to_string(),
                log_index,
            })
        })
        .collect()
}
