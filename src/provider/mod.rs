pub mod amount;
pub mod bitquery;
pub mod cdp;
pub mod client;

use crate::chain::Chain;
use crate::error::{ConfigError, FetchError};
use crate::facilitators::FacilitatorAddressConfig;
use crate::repository::TransferEvent;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

pub use client::{HttpTransport, ProviderTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Bitquery,
    Cdp,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Bitquery => "bitquery",
            Provider::Cdp => "cdp",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bitquery" => Ok(Provider::Bitquery),
            "cdp" => Ok(Provider::Cdp),
            _ => Err(format!("unknown provider: {s}")),
        }
    }
}

/// A provider-native request body.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    GraphQl { query: String, variables: Value },
    Sql { sql: String },
}

impl QueryRequest {
    pub fn to_body(&self) -> Value {
        match self {
            QueryRequest::GraphQl { query, variables } => {
                serde_json::json!({ "query": query, "variables": variables })
            }
            QueryRequest::Sql { sql } => serde_json::json!({ "sql": sql }),
        }
    }
}

/// Identifies whose rows a response belongs to; the provider payload does
/// not carry the facilitator or the token precision.
#[derive(Debug, Clone, Copy)]
pub struct FetchContext<'a> {
    pub chain: Chain,
    pub facilitator_id: &'a str,
    pub address: &'a FacilitatorAddressConfig,
}

/// Query builder and response transformer for one (chain, provider) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adapter {
    BitqueryEvm(Chain),
    BitquerySolana,
    CdpSql(Chain),
}

impl Adapter {
    pub fn for_pair(chain: Chain, provider: Provider) -> Result<Self, ConfigError> {
        match (chain, provider) {
            (Chain::Solana, Provider::Bitquery) => Ok(Adapter::BitquerySolana),
            (chain, Provider::Bitquery) => Ok(Adapter::BitqueryEvm(chain)),
            (Chain::Base, Provider::Cdp) => Ok(Adapter::CdpSql(Chain::Base)),
            (chain, provider) => Err(ConfigError::UnsupportedProvider { chain, provider }),
        }
    }

    pub fn provider(&self) -> Provider {
        match self {
            Adapter::BitqueryEvm(_) | Adapter::BitquerySolana => Provider::Bitquery,
            Adapter::CdpSql(_) => Provider::Cdp,
        }
    }

    /// Build the request for rows sent by `address` in `[since, until)`,
    /// at most `limit` rows starting from `offset`.
    pub fn build_query(
        &self,
        address: &FacilitatorAddressConfig,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
        offset: usize,
    ) -> QueryRequest {
        match self {
            Adapter::BitqueryEvm(chain) => {
                bitquery::evm_query(*chain, address, since, until, limit, offset)
            }
            Adapter::BitquerySolana => bitquery::solana_query(address, since, until, limit, offset),
            Adapter::CdpSql(chain) => cdp::transfers_sql(*chain, address, since, until, limit, offset),
        }
    }

    pub fn transform_response(
        &self,
        raw: &Value,
        ctx: &FetchContext<'_>,
    ) -> Result<Vec<TransferEvent>, FetchError> {
        match self {
            Adapter::BitqueryEvm(_) => bitquery::transform_evm(raw, ctx),
            Adapter::BitquerySolana => bitquery::transform_solana(raw, ctx),
            Adapter::CdpSql(_) => cdp::transform(raw, ctx),
        }
    }
}

/// Provider timestamps arrive either as RFC 3339 or as a bare UTC
/// `YYYY-MM-DD HH:MM:SS[.fff]`.
pub(crate) fn parse_timestamp(provider: Provider, text: &str) -> Result<DateTime<Utc>, FetchError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|e| FetchError::decode(provider, format!("bad timestamp {text:?}: {e}")))
}

/// Numbers are sometimes quoted, sometimes not.
pub(crate) fn value_as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// SQL and GraphQL over the wire both use millisecond UTC instants.
pub(crate) fn format_instant(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}
