//! Syntactic validation of Bitcoin addresses.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::bech32;

static MAINNET_LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[13][a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("static regex")
});

static TESTNET_LEGACY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[nm2][a-km-zA-HJ-NP-Z1-9]{25,34}$").expect("static regex")
});

/// Bitcoin network an address belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Network {
    Mainnet,
    Testnet,
}

impl Network {
    /// Bech32 human-readable part.
    pub fn hrp(self) -> &'static str {
        match self {
            Network::Mainnet => "bc",
            Network::Testnet => "tb",
        }
    }

    /// Base58 version byte for pay-to-pubkey-hash.
    pub fn p2pkh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x00,
            Network::Testnet => 0x6f,
        }
    }

    /// Base58 version byte for pay-to-script-hash.
    pub fn p2sh_version(self) -> u8 {
        match self {
            Network::Mainnet => 0x05,
            Network::Testnet => 0xc4,
        }
    }
}

/// Classify an address, returning its network when it is well formed.
pub fn validate_address(address: &str) -> Option<Network> {
    if MAINNET_LEGACY.is_match(address) {
        return Some(Network::Mainnet);
    }
    if TESTNET_LEGACY.is_match(address) {
        return Some(Network::Testnet);
    }

    let (hrp, data) = bech32::decode(address)?;
    if data.is_empty() {
        return None;
    }
    match hrp.as_str() {
        "bc" => Some(Network::Mainnet),
        "tb" => Some(Network::Testnet),
        _ => None,
    }
}

pub fn is_valid_address(address: &str) -> bool {
    validate_address(address).is_some()
}
