//! Address validation and Bitcoin message signatures.

pub mod address;
pub mod bech32;
pub mod signature;

pub use address::{is_valid_address, validate_address, Network};
pub use signature::{address_of, bitcoin_message_hash, verify_message, AddressKind, KeyPair};
