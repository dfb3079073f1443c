//! Bitquery streaming GraphQL queries for EVM chains and Solana.
//!
//! Bitquery already divides amounts by the token precision, so amounts come
//! back as decimal strings and are re-scaled here.

use super::amount::scale_decimal_amount;
use super::{FetchContext, Provider, QueryRequest, format_instant, parse_timestamp, value_as_text};
use crate::chain::Chain;
use crate::error::FetchError;
use crate::facilitators::FacilitatorAddressConfig;
use crate::repository::TransferEvent;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};

const PROVIDER: Provider = Provider::Bitquery;

const EVM_TRANSFERS: &str = r#"query ($from: String!, $token: String!, $since: DateTime!, $before: DateTime!, $limit: Int!, $offset: Int!) {
  EVM(network: {network}, dataset: combined) {
    Transfers(
      where: {
        Block: { Time: { since: $since, before: $before } }
        Transaction: { From: { is: $from } }
        Transfer: { Currency: { SmartContract: { is: $token } } }
      }
      limit: { count: $limit, offset: $offset }
      orderBy: [{ ascending: Block_Time }, { ascending: Transaction_Index }, { ascending: Log_Index }]
    ) {
      Block { Time }
      Transaction { Hash From }
      Log { Index }
      Transfer {
        Amount
        Sender
        Receiver
        Currency { SmartContract }
      }
    }
  }
}"#;

const SOLANA_TRANSFERS: &str = r#"query ($from: String!, $token: String!, $since: DateTime!, $before: DateTime!, $limit: Int!, $offset: Int!) {
  Solana(dataset: combined) {
    Transfers(
      where: {
        Block: { Time: { since: $since, before: $before } }
        Transaction: { FeePayer: { is: $from } }
        Transfer: { Currency: { MintAddress: { is: $token } } }
      }
      limit: { count: $limit, offset: $offset }
      orderBy: [{ ascending: Block_Time }, { ascending: Transaction_Index }, { ascending: Instruction_Index }]
    ) {
      Block { Time }
      Transaction { Signature FeePayer }
      Instruction { Index }
      Transfer {
        Amount
        Sender { Address Owner }
        Receiver { Address Owner }
        Currency { MintAddress }
      }
    }
  }
}"#;

/// Bitquery's EVM network enum literal for a chain.
fn network_literal(chain: Chain) -> &'static str {
    match chain {
        Chain::Base => "base",
        Chain::Polygon => "matic",
        Chain::Avalanche => "avalanche",
        Chain::Solana => "solana",
    }
}

fn variables(
    address: &FacilitatorAddressConfig,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
    offset: usize,
) -> Value {
    json!({
        "from": address.address,
        "token": address.token.address,
        "since": format_instant(since),
        "before": format_instant(until),
        "limit": limit,
        "offset": offset,
    })
}

pub fn evm_query(
    chain: Chain,
    address: &FacilitatorAddressConfig,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
    offset: usize,
) -> QueryRequest {
    QueryRequest::GraphQl {
        query: EVM_TRANSFERS.replace("{network}", network_literal(chain)),
        variables: variables(address, since, until, limit, offset),
    }
}

pub fn solana_query(
    address: &FacilitatorAddressConfig,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
    limit: usize,
    offset: usize,
) -> QueryRequest {
    QueryRequest::GraphQl {
        query: SOLANA_TRANSFERS.to_string(),
        variables: variables(address, since, until, limit, offset),
    }
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct BlockTime {
    time: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct IndexField {
    index: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EvmTransaction {
    hash: String,
    from: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EvmCurrency {
    smart_contract: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EvmTransferFields {
    amount: Value,
    sender: String,
    receiver: String,
    currency: EvmCurrency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct EvmTransferRow {
    block: BlockTime,
    transaction: EvmTransaction,
    log: Option<IndexField>,
    transfer: EvmTransferFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SolanaTransaction {
    signature: String,
    fee_payer: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SolanaAccount {
    address: String,
    owner: Option<String>,
}

impl SolanaAccount {
    /// Token accounts are owned by the wallet we actually care about.
    fn wallet(&self) -> &str {
        match self.owner.as_deref() {
            Some(owner) if !owner.is_empty() => owner,
            _ => &self.address,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SolanaCurrency {
    mint_address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SolanaTransferFields {
    amount: Value,
    sender: SolanaAccount,
    receiver: SolanaAccount,
    currency: SolanaCurrency,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct SolanaTransferRow {
    block: BlockTime,
    transaction: SolanaTransaction,
    instruction: Option<IndexField>,
    transfer: SolanaTransferFields,
}

/// Surface GraphQL `errors` and dig out `data.<root>.Transfers`.
fn transfer_rows<T: DeserializeOwned>(raw: &Value, root: &str) -> Result<Vec<T>, FetchError> {
    if let Some(errors) = raw.get("errors").filter(|e| !e.is_null()) {
        let errors: Vec<GraphQlError> = serde_json::from_value(errors.clone())
            .map_err(|e| FetchError::decode(PROVIDER, format!("malformed errors field: {e}")))?;
        if !errors.is_empty() {
            let message = errors
                .into_iter()
                .map(|e| e.message)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FetchError::Provider {
                provider: PROVIDER,
                message,
            });
        }
    }

    let rows = raw
        .get("data")
        .and_then(|d| d.get(root))
        .and_then(|r| r.get("Transfers"))
        .ok_or_else(|| FetchError::decode(PROVIDER, format!("missing data.{root}.Transfers")))?;

    if rows.is_null() {
        return Ok(Vec::new());
    }

    serde_json::from_value(rows.clone())
        .map_err(|e| FetchError::decode(PROVIDER, format!("unexpected transfer row: {e}")))
}

fn scaled_amount(amount: &Value, decimals: u8) -> Result<alloy_primitives::U256, FetchError> {
    let text = value_as_text(amount)
        .ok_or_else(|| FetchError::decode(PROVIDER, format!("amount is not numeric: {amount}")))?;
    scale_decimal_amount(&text, decimals).map_err(|e| FetchError::decode(PROVIDER, e))
}

pub fn transform_evm(raw: &Value, ctx: &FetchContext<'_>) -> Result<Vec<TransferEvent>, FetchError> {
    let chain = ctx.chain;
    let decimals = ctx.address.token.decimals;

    transfer_rows::<EvmTransferRow>(raw, "EVM")?
        .into_iter()
        .map(|row| {
            Ok(TransferEvent {
                address: chain.normalize_address(&row.transfer.currency.smart_contract),
                transaction_from: chain.normalize_address(&row.transaction.from),
                sender: chain.normalize_address(&row.transfer.sender),
                recipient: chain.normalize_address(&row.transfer.receiver),
                amount: scaled_amount(&row.transfer.amount, decimals)?,
                block_timestamp: parse_timestamp(PROVIDER, &row.block.time)?,
                tx_hash: row.transaction.hash.to_lowercase(),
                chain,
                provider: PROVIDER,
                decimals,
                facilitator_id: ctx.facilitator_id.to_string(),
                log_index: row
                    .log
                    .map(|l| l.index)
                    .ok_or_else(|| FetchError::decode(PROVIDER, "transfer row has no Log.Index"))?,
            })
        })
        .collect()
}

pub fn transform_solana(
    raw: &Value,
    ctx: &FetchContext<'_>,
) -> Result<Vec<TransferEvent>, FetchError> {
    let chain = ctx.chain;
    let decimals = ctx.address.token.decimals;

    transfer_rows::<SolanaTransferRow>(raw, "Solana")?
        .into_iter()
        .map(|row| {
            Ok(TransferEvent {
                address: chain.normalize_address(&row.transfer.currency.mint_address),
                transaction_from: chain.normalize_address(&row.transaction.fee_payer),
                sender: chain.normalize_address(row.transfer.sender.wallet()),
                recipient: chain.normalize_address(row.transfer.receiver.wallet()),
                amount: scaled_amount(&row.transfer.amount, decimals)?,
                block_timestamp: parse_timestamp(PROVIDER, &row.block.time)?,
                tx_hash: row.transaction.signature,
                chain,
                provider: PROVIDER,
                decimals,
                facilitator_id: ctx.facilitator_id.to_string(),
                log_index: row.instruction.map(|i| i.index).ok_or_else(|| {
                    FetchError::decode(PROVIDER, "transfer row has no Instruction.Index")
                })?,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facilitators::Token;
    use alloy_primitives::U256;

    fn evm_address() -> FacilitatorAddressConfig {
        FacilitatorAddressConfig {
            address: "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6".to_string(),
            token: Token {
                address: "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913".to_string(),
                decimals: 6,
            },
            sync_start_date: "2025-05-01T00:00:00Z".parse().unwrap(),
            enabled: true,
        }
    }

    fn solana_address() -> FacilitatorAddressConfig {
        FacilitatorAddressConfig {
            address: "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4".to_string(),
            token: Token {
                address: "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v".to_string(),
                decimals: 6,
            },
            sync_start_date: "2025-05-01T00:00:00Z".parse().unwrap(),
            enabled: true,
        }
    }

    #[test]
    fn evm_query_inlines_network_and_binds_range() {
        let since = "2025-06-01T00:00:00Z".parse().unwrap();
        let until = "2025-06-08T00:00:00Z".parse().unwrap();
        let QueryRequest::GraphQl { query, variables } =
            evm_query(Chain::Polygon, &evm_address(), since, until, 500, 1000)
        else {
            panic!("expected a GraphQL request");
        };

        assert!(query.contains("EVM(network: matic"));
        assert!(!query.contains("{network}"));
        assert_eq!(variables["since"], "2025-06-01T00:00:00.000Z");
        assert_eq!(variables["before"], "2025-06-08T00:00:00.000Z");
        assert_eq!(variables["limit"], 500);
        assert_eq!(variables["offset"], 1000);
        assert_eq!(variables["from"], "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6");
        // Rows within one block second need a stable order across offsets.
        assert!(query.contains(
            "orderBy: [{ ascending: Block_Time }, { ascending: Transaction_Index }, { ascending: Log_Index }]"
        ));
    }

    #[test]
    fn solana_query_orders_by_instruction_and_binds_fee_payer() {
        let since = "2025-06-01T00:00:00Z".parse().unwrap();
        let until = "2025-06-02T00:00:00Z".parse().unwrap();
        let QueryRequest::GraphQl { query, variables } =
            solana_query(&solana_address(), since, until, 5000, 10000)
        else {
            panic!("expected a GraphQL request");
        };

        assert!(query.contains("FeePayer: { is: $from }"));
        assert!(query.contains(
            "orderBy: [{ ascending: Block_Time }, { ascending: Transaction_Index }, { ascending: Instruction_Index }]"
        ));
        assert_eq!(variables["from"], "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4");
        assert_eq!(variables["token"], "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v");
        assert_eq!(variables["since"], "2025-06-01T00:00:00.000Z");
        assert_eq!(variables["before"], "2025-06-02T00:00:00.000Z");
        assert_eq!(variables["limit"], 5000);
        assert_eq!(variables["offset"], 10000);
    }

    #[test]
    fn rows_without_an_index_are_decode_errors() {
        let address = evm_address();
        let ctx = FetchContext {
            chain: Chain::Base,
            facilitator_id: "coinbase",
            address: &address,
        };
        let raw = json!({
            "data": { "EVM": { "Transfers": [{
                "Block": { "Time": "2025-06-01T12:00:00Z" },
                "Transaction": { "Hash": "0xabc", "From": "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6" },
                "Log": null,
                "Transfer": {
                    "Amount": "1",
                    "Sender": "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
                    "Receiver": "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
                    "Currency": { "SmartContract": "0x833589fcd6edb6e08f4c7c32d4f71b54bda02913" }
                }
            }]}}
        });
        assert!(matches!(
            transform_evm(&raw, &ctx),
            Err(FetchError::Decode { ref message, .. }) if message.contains("Log.Index")
        ));

        let solana = solana_address();
        let ctx = FetchContext {
            chain: Chain::Solana,
            facilitator_id: "payai",
            address: &solana,
        };
        let raw = json!({
            "data": { "Solana": { "Transfers": [{
                "Block": { "Time": "2025-06-01T12:00:00Z" },
                "Transaction": { "Signature": "sig", "FeePayer": "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4" },
                "Transfer": {
                    "Amount": "1",
                    "Sender": { "Address": "A" },
                    "Receiver": { "Address": "B" },
                    "Currency": { "MintAddress": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v" }
                }
            }]}}
        });
        assert!(matches!(
            transform_solana(&raw, &ctx),
            Err(FetchError::Decode { ref message, .. }) if message.contains("Instruction.Index")
        ));
    }

    #[test]
    fn transforms_evm_rows() {
        let address = evm_address();
        let ctx = FetchContext {
            chain: Chain::Base,
            facilitator_id: "coinbase",
            address: &address,
        };
        let raw = json!({
            "data": { "EVM": { "Transfers": [{
                "Block": { "Time": "2025-06-01T12:00:00Z" },
                "Transaction": {
                    "Hash": "0xABC123",
                    "From": "0xDBDF3D8ED80F84C35D01C6C9F9271761BAD90BA6"
                },
                "Log": { "Index": 7 },
                "Transfer": {
                    "Amount": "12.345678",
                    "Sender": "0xAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAaAa",
                    "Receiver": "0xBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBbBb",
                    "Currency": { "SmartContract": "0x833589fCD6eDb6E08f4c7C32D4f71b54bdA02913" }
                }
            }]}}
        });

        let events = transform_evm(&raw, &ctx).unwrap();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.amount, U256::from(12_345_678u64));
        assert_eq!(event.transaction_from, "0xdbdf3d8ed80f84c35d01c6c9f9271761bad90ba6");
        assert_eq!(event.sender, "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(event.tx_hash, "0xabc123");
        assert_eq!(event.log_index, 7);
        assert_eq!(event.facilitator_id, "coinbase");
        assert_eq!(event.decimals, 6);
        assert_eq!(event.provider, Provider::Bitquery);
    }

    #[test]
    fn transforms_solana_rows_preserving_case() {
        let address = solana_address();
        let ctx = FetchContext {
            chain: Chain::Solana,
            facilitator_id: "payai",
            address: &address,
        };
        let raw = json!({
            "data": { "Solana": { "Transfers": [{
                "Block": { "Time": "2025-06-01T12:00:00Z" },
                "Transaction": {
                    "Signature": "5VfYmGC8Kp2cQk9uvBSmWyTn1LfuEJ6ZLjdv",
                    "FeePayer": "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4"
                },
                "Instruction": { "Index": 2 },
                "Transfer": {
                    "Amount": 0.5,
                    "Sender": { "Address": "TokenAcctA", "Owner": "WalletSenderAbc" },
                    "Receiver": { "Address": "TokenAcctB", "Owner": "" },
                    "Currency": { "MintAddress": "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v" }
                }
            }]}}
        });

        let events = transform_solana(&raw, &ctx).unwrap();
        assert_eq!(events[0].transaction_from, "2wKupLR9q6wXYppw8Gr2NvWxKBUqm4PPJKkQfoxHDBg4");
        assert_eq!(events[0].sender, "WalletSenderAbc");
        assert_eq!(events[0].recipient, "TokenAcctB");
        assert_eq!(events[0].amount, U256::from(500_000u64));
        assert_eq!(events[0].log_index, 2);
    }

    #[test]
    fn graphql_errors_become_provider_errors() {
        let address = evm_address();
        let ctx = FetchContext {
            chain: Chain::Base,
            facilitator_id: "coinbase",
            address: &address,
        };
        let raw = json!({ "errors": [{ "message": "points limit exceeded" }] });
        let err = transform_evm(&raw, &ctx).unwrap_err();
        assert!(matches!(err, FetchError::Provider { ref message, .. } if message == "points limit exceeded"));
    }

    #[test]
    fn missing_data_is_a_decode_error() {
        let address = evm_address();
        let ctx = FetchContext {
            chain: Chain::Base,
            facilitator_id: "coinbase",
            address: &address,
        };
        let err = transform_evm(&json!({ "data": {} }), &ctx).unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));

        let bad_row = json!({ "data": { "EVM": { "Transfers": [{ "Block": {} }] } } });
        assert!(matches!(
            transform_evm(&bad_row, &ctx),
            Err(FetchError::Decode { .. })
        ));
    }
}
