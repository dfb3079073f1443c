use crate::chain::Chain;
use crate::error::ConfigError;
use crate::facilitators::{FacilitatorRegistry, Token};
use crate::pagination::Pagination;
use crate::provider::{Adapter, Provider};
use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_BITQUERY_URL: &str = "https://streaming.bitquery.io/graphql";
const DEFAULT_CDP_SQL_URL: &str = "https://api.cdp.coinbase.com/platform/v2/data/query/run";

/// Process environment: paths, endpoints and provider credentials.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub sync_config_path: String,
    pub bitquery_url: String,
    pub bitquery_api_key: Option<String>,
    pub cdp_sql_url: String,
    pub cdp_api_token: Option<String>,
    pub provider_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite:./facilitator-sync.db".to_string());

        let sync_config_path =
            std::env::var("SYNC_CONFIG").unwrap_or_else(|_| "config/sync.toml".to_string());

        let bitquery_url =
            std::env::var("BITQUERY_URL").unwrap_or_else(|_| DEFAULT_BITQUERY_URL.to_string());
        let cdp_sql_url =
            std::env::var("CDP_SQL_URL").unwrap_or_else(|_| DEFAULT_CDP_SQL_URL.to_string());

        let provider_timeout = match std::env::var("PROVIDER_TIMEOUT_SECS") {
            Ok(raw) => Duration::from_secs(
                raw.parse()
                    .context("PROVIDER_TIMEOUT_SECS must be a whole number of seconds")?,
            ),
            Err(_) => Duration::from_secs(120),
        };

        Ok(Config {
            database_url,
            sync_config_path,
            bitquery_url,
            bitquery_api_key: std::env::var("BITQUERY_API_KEY").ok(),
            cdp_sql_url,
            cdp_api_token: std::env::var("CDP_API_TOKEN").ok(),
            provider_timeout,
        })
    }
}

/// Contents of the static TOML file: facilitators and the jobs that scan them.
#[derive(Debug, Deserialize, Clone)]
pub struct SyncFile {
    pub facilitators: Vec<RawFacilitator>,
    #[serde(default)]
    pub jobs: Vec<RawJob>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawFacilitator {
    pub id: String,
    #[serde(default)]
    pub addresses: Vec<RawAddressConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawAddressConfig {
    pub chain: Chain,
    pub address: String,
    pub token: Token,
    pub sync_start_date: Option<DateTime<Utc>>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct RawJob {
    pub name: String,
    pub chain: Chain,
    pub provider: Provider,
    pub pagination: RawPagination,
    #[serde(default = "default_cron")]
    pub cron: String,
    #[serde(default = "default_max_duration_secs")]
    pub max_duration_secs: u64,
    #[serde(default)]
    pub facilitators: Vec<String>,
}

fn default_cron() -> String {
    "*/30 * * * *".to_string()
}

fn default_max_duration_secs() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum RawPagination {
    Offset {
        limit: usize,
    },
    TimeWindow {
        window_secs: Option<u64>,
        window_days: Option<u64>,
        limit: usize,
    },
}

/// One schedulable job after validation against the facilitator registry.
#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    pub chain: Chain,
    pub provider: Provider,
    pub adapter: Adapter,
    pub pagination: Pagination,
    pub cron: String,
    pub max_duration: Duration,
    /// Facilitator ids to scan; empty selects every facilitator on the chain.
    pub facilitators: Vec<String>,
}

impl SyncFile {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::parse(&content, path)
    }

    pub fn parse(content: &str, path: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })
    }

    pub fn registry(&self) -> Result<FacilitatorRegistry, ConfigError> {
        FacilitatorRegistry::from_config(&self.facilitators)
    }

    pub fn jobs(&self, registry: &FacilitatorRegistry) -> Result<Vec<JobConfig>, ConfigError> {
        let mut seen = HashSet::new();
        let mut jobs = Vec::with_capacity(self.jobs.len());

        for raw in &self.jobs {
            if !seen.insert(raw.name.as_str()) {
                return Err(ConfigError::DuplicateJob(raw.name.clone()));
            }

            let adapter = Adapter::for_pair(raw.chain, raw.provider)?;
            let pagination = raw.pagination.validate(&raw.name)?;

            for id in &raw.facilitators {
                if registry.get(id).is_none() {
                    return Err(ConfigError::UnknownFacilitator {
                        job: raw.name.clone(),
                        facilitator: id.clone(),
                    });
                }
            }

            jobs.push(JobConfig {
                name: raw.name.clone(),
                chain: raw.chain,
                provider: raw.provider,
                adapter,
                pagination,
                cron: raw.cron.clone(),
                max_duration: Duration::from_secs(raw.max_duration_secs),
                facilitators: raw.facilitators.clone(),
            });
        }

        Ok(jobs)
    }
}

impl RawPagination {
    fn validate(&self, job: &str) -> Result<Pagination, ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidPagination {
            job: job.to_string(),
            reason: reason.to_string(),
        };

        match *self {
            RawPagination::Offset { limit } => {
                if limit == 0 {
                    return Err(invalid("limit must be greater than zero"));
                }
                Ok(Pagination::Offset { limit })
            }
            RawPagination::TimeWindow {
                window_secs,
                window_days,
                limit,
            } => {
                if limit == 0 {
                    return Err(invalid("limit must be greater than zero"));
                }
                let window = match (window_secs, window_days) {
                    (Some(secs), None) => TimeDelta::try_seconds(secs as i64),
                    (None, Some(days)) => TimeDelta::try_days(days as i64),
                    _ => return Err(invalid("set exactly one of window_secs or window_days")),
                }
                .filter(|w| *w > TimeDelta::zero())
                .ok_or_else(|| invalid("window must be a positive duration"))?;
                Ok(Pagination::TimeWindow { window, limit })
            }
        }
    }
}
