//! Static registry of known facilitators and the addresses monitored for each.
//!
//! The registry is built once from the TOML file at process start and handed
//! to each job; nothing here performs I/O.

use crate::chain::Chain;
use crate::config::RawFacilitator;
use crate::error::ConfigError;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Token {
    pub address: String,
    pub decimals: u8,
}

/// One monitored (address, token) pair on one chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacilitatorAddressConfig {
    pub address: String,
    pub token: Token,
    pub sync_start_date: DateTime<Utc>,
    pub enabled: bool,
}

#[derive(Debug, Clone)]
pub struct Facilitator {
    pub id: String,
    pub addresses: BTreeMap<Chain, Vec<FacilitatorAddressConfig>>,
}

impl Facilitator {
    /// All address configurations on `chain`, including disabled ones.
    pub fn addresses_on(&self, chain: Chain) -> &[FacilitatorAddressConfig] {
        self.addresses.get(&chain).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn enabled_addresses(&self, chain: Chain) -> impl Iterator<Item = &FacilitatorAddressConfig> {
        self.addresses_on(chain).iter().filter(|a| a.enabled)
    }

    pub fn is_active_on(&self, chain: Chain) -> bool {
        self.enabled_addresses(chain).next().is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct FacilitatorRegistry {
    facilitators: Vec<Facilitator>,
}

impl FacilitatorRegistry {
    /// Validate raw configuration entries and group addresses by chain.
    ///
    /// Every address must carry a start date and be well formed for its
    /// chain; addresses are stored normalised for that chain.
    pub fn from_config(raw: &[RawFacilitator]) -> Result<Self, ConfigError> {
        let mut ids = HashSet::new();
        let mut facilitators = Vec::with_capacity(raw.len());

        for entry in raw {
            if !ids.insert(entry.id.as_str()) {
                return Err(ConfigError::DuplicateFacilitator(entry.id.clone()));
            }

            let mut addresses: BTreeMap<Chain, Vec<FacilitatorAddressConfig>> = BTreeMap::new();
            for addr in &entry.addresses {
                let chain = addr.chain;
                for candidate in [&addr.address, &addr.token.address] {
                    if !chain.is_valid_address(candidate.trim()) {
                        return Err(ConfigError::InvalidAddress {
                            facilitator: entry.id.clone(),
                            chain,
                            address: candidate.clone(),
                        });
                    }
                }

                let sync_start_date =
                    addr.sync_start_date
                        .ok_or_else(|| ConfigError::MissingStartDate {
                            facilitator: entry.id.clone(),
                            chain,
                            address: addr.address.clone(),
                        })?;

                addresses
                    .entry(chain)
                    .or_default()
                    .push(FacilitatorAddressConfig {
                        address: chain.normalize_address(&addr.address),
                        token: Token {
                            address: chain.normalize_address(&addr.token.address),
                            decimals: addr.token.decimals,
                        },
                        sync_start_date,
                        enabled: addr.enabled,
                    });
            }

            facilitators.push(Facilitator {
                id: entry.id.clone(),
                addresses,
            });
        }

        Ok(Self { facilitators })
    }

    pub fn get(&self, id: &str) -> Option<&Facilitator> {
        self.facilitators.iter().find(|f| f.id == id)
    }

    pub fn all(&self) -> &[Facilitator] {
        &self.facilitators
    }

    /// Facilitators with at least one enabled address on `chain`.
    pub fn facilitators_for_chain(&self, chain: Chain) -> Vec<&Facilitator> {
        self.facilitators
            .iter()
            .filter(|f| f.is_active_on(chain))
            .collect()
    }
}
