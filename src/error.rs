use crate::chain::Chain;
use crate::provider::Provider;
use crate::sync::RunSummary;
use thiserror::Error;

/// Problems in the static configuration. All of these are raised while the
/// process is starting, before any job runs.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("facilitator '{facilitator}' has no sync_start_date for {address} on {chain}")]
    MissingStartDate {
        facilitator: String,
        chain: Chain,
        address: String,
    },

    #[error("facilitator '{facilitator}' has an invalid {chain} address: {address}")]
    InvalidAddress {
        facilitator: String,
        chain: Chain,
        address: String,
    },

    #[error("facilitator '{0}' is defined more than once")]
    DuplicateFacilitator(String),

    #[error("job '{job}' references unknown facilitator '{facilitator}'")]
    UnknownFacilitator { job: String, facilitator: String },

    #[error("job '{0}' is defined more than once")]
    DuplicateJob(String),

    #[error("no job named '{0}'")]
    UnknownJob(String),

    #[error("{provider} does not serve transfer data for {chain}")]
    UnsupportedProvider { chain: Chain, provider: Provider },

    #[error("job '{job}' has invalid pagination: {reason}")]
    InvalidPagination { job: String, reason: String },

    #[error("missing credential {0} for provider")]
    MissingCredential(&'static str),
}

/// A provider request that did not yield usable rows.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("{provider} request failed: {source}")]
    Network {
        provider: Provider,
        #[source]
        source: reqwest::Error,
    },

    #[error("{provider} returned HTTP {status}: {body}")]
    Status {
        provider: Provider,
        status: u16,
        body: String,
    },

    #[error("{provider} returned an unparsable payload: {message}")]
    Decode { provider: Provider, message: String },

    #[error("{provider} reported errors: {message}")]
    Provider { provider: Provider, message: String },
}

impl FetchError {
    pub fn decode(provider: Provider, message: impl Into<String>) -> Self {
        FetchError::Decode {
            provider,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("store connection lock poisoned")]
    Poisoned,

    #[error("invalid stored row: {0}")]
    InvalidRow(String),
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("job '{}' finished with {} failed address(es)", .0.job, .0.failures.len())]
    PartialFailure(Box<RunSummary>),
}
