use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static EVM_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("static regex"));

// Base58 alphabet, 32 byte keys encode to 32..=44 characters
static SOLANA_ADDRESS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[1-9A-HJ-NP-Za-km-z]{32,44}$").expect("static regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Base,
    Polygon,
    Avalanche,
    Solana,
}

impl Chain {
    pub const ALL: [Chain; 4] = [Chain::Base, Chain::Polygon, Chain::Avalanche, Chain::Solana];

    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::Base => "base",
            Chain::Polygon => "polygon",
            Chain::Avalanche => "avalanche",
            Chain::Solana => "solana",
        }
    }

    pub fn is_evm(&self) -> bool {
        !matches!(self, Chain::Solana)
    }

    /// Canonical form of an address on this chain, as written to and looked
    /// up in the store. EVM addresses are hex and compared lower-cased;
    /// Solana addresses are base58 and case is significant.
    pub fn normalize_address(&self, address: &str) -> String {
        let trimmed = address.trim();
        if self.is_evm() {
            trimmed.to_lowercase()
        } else {
            trimmed.to_string()
        }
    }

    pub fn is_valid_address(&self, address: &str) -> bool {
        if self.is_evm() {
            EVM_ADDRESS.is_match(address)
        } else {
            SOLANA_ADDRESS.is_match(address)
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .into_iter()
            .find(|chain| chain.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown chain: {s}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evm_addresses_are_lower_cased() {
        let mixed = "0xD8dA6BF26964aF9D7eEd9e03E53415D37aA96045";
        assert_eq!(
            Chain::Base.normalize_address(mixed),
            "0xd8da6bf26964af9d7eed9e03e53415d37aa96045"
        );
    }

    #[test]
    fn solana_addresses_keep_case() {
        let addr = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        assert_eq!(Chain::Solana.normalize_address(addr), addr);
    }

    #[test]
    fn address_format_is_chain_specific() {
        assert!(Chain::Polygon.is_valid_address("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"));
        assert!(!Chain::Polygon.is_valid_address("0x3c499c"));
        assert!(!Chain::Solana.is_valid_address("0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359"));
        assert!(Chain::Solana.is_valid_address("EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v"));
    }

    #[test]
    fn parses_chain_names() {
        assert_eq!("Base".parse::<Chain>().unwrap(), Chain::Base);
        assert!("ethereum".parse::<Chain>().is_err());
    }
}
