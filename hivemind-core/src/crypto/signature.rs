//! Bitcoin signed-message verification.
//!
//! Signatures are 65-byte compact recoverable ECDSA signatures over
//! secp256k1, base64 encoded. The first byte carries the recovery id and
//! the key/address flavour:
//!
//! | Header  | Key          | Address                     |
//! |---------|--------------|-----------------------------|
//! | 27..=30 | uncompressed | P2PKH                       |
//! | 31..=34 | compressed   | P2PKH (also used by wallets signing for segwit) |
//! | 35..=38 | compressed   | P2SH-P2WPKH                 |
//! | 39..=42 | compressed   | P2WPKH                      |
//!
//! Verification recovers the public key and accepts when any address the
//! key controls on either network matches the claimed address.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use libsecp256k1::{Message, PublicKey, RecoveryId, SecretKey, Signature};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};

use super::address::{validate_address, Network};
use super::bech32;

const MAGIC: &[u8] = b"\x18Bitcoin Signed Message:\n";

/// Address flavours a key can be rendered as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressKind {
    /// Pay-to-pubkey-hash of the uncompressed key
    P2pkhUncompressed,
    /// Pay-to-pubkey-hash of the compressed key
    P2pkh,
    /// Nested segwit
    P2shP2wpkh,
    /// Native segwit (bech32)
    P2wpkh,
}

fn sha256d(data: &[u8]) -> [u8; 32] {
    let first = Sha256::digest(data);
    Sha256::digest(first).into()
}

fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

fn write_varint(buf: &mut Vec<u8>, n: usize) {
    let n = n as u64;
    if n < 0xfd {
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(0xfd);
        buf.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(0xfe);
        buf.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        buf.push(0xff);
        buf.extend_from_slice(&n.to_le_bytes());
    }
}

/// Double SHA-256 of the magic-prefixed message.
pub fn bitcoin_message_hash(message: &str) -> [u8; 32] {
    let bytes = message.as_bytes();
    let mut buf = Vec::with_capacity(MAGIC.len() + 9 + bytes.len());
    buf.extend_from_slice(MAGIC);
    write_varint(&mut buf, bytes.len());
    buf.extend_from_slice(bytes);
    sha256d(&buf)
}

/// Render a public key as an address.
pub fn address_of(public_key: &PublicKey, kind: AddressKind, network: Network) -> String {
    match kind {
        AddressKind::P2pkhUncompressed => {
            base58check(network.p2pkh_version(), &hash160(&public_key.serialize()))
        }
        AddressKind::P2pkh => {
            base58check(network.p2pkh_version(), &hash160(&public_key.serialize_compressed()))
        }
        AddressKind::P2shP2wpkh => {
            let mut script = vec![0x00, 0x14];
            script.extend_from_slice(&hash160(&public_key.serialize_compressed()));
            base58check(network.p2sh_version(), &hash160(&script))
        }
        AddressKind::P2wpkh => {
            let program = hash160(&public_key.serialize_compressed());
            let mut data = vec![0u8];
            // 8-to-5 regrouping with padding cannot fail on whole bytes
            data.extend(bech32::convert_bits(&program, 8, 5, true).unwrap_or_default());
            bech32::encode(network.hrp(), &data)
        }
    }
}

fn base58check(version: u8, payload: &[u8]) -> String {
    let mut data = Vec::with_capacity(1 + payload.len());
    data.push(version);
    data.extend_from_slice(payload);
    bs58::encode(data).with_check().into_string()
}

fn recover(message: &str, signature: &str) -> Option<(PublicKey, u8)> {
    let raw = STANDARD.decode(signature.trim()).ok()?;
    if raw.len() != 65 {
        return None;
    }
    let header = raw[0];
    if !(27..=42).contains(&header) {
        return None;
    }

    let recovery_id = RecoveryId::parse((header - 27) & 3).ok()?;
    let signature = Signature::parse_standard_slice(&raw[1..]).ok()?;
    let message = Message::parse(&bitcoin_message_hash(message));
    let public_key = libsecp256k1::recover(&message, &signature, &recovery_id).ok()?;

    Some((public_key, header))
}

/// Verify a base64 Bitcoin message signature against an address.
///
/// Never panics; malformed input of any kind yields `false`.
pub fn verify_message(address: &str, message: &str, signature: &str) -> bool {
    let Some(network) = validate_address(address) else {
        return false;
    };
    let Some((public_key, header)) = recover(message, signature) else {
        return false;
    };

    let kinds: &[AddressKind] = if header < 31 {
        &[AddressKind::P2pkhUncompressed]
    } else {
        &[AddressKind::P2pkh, AddressKind::P2shP2wpkh, AddressKind::P2wpkh]
    };

    kinds.iter().any(|&kind| {
        let candidate = address_of(&public_key, kind, network);
        match kind {
            AddressKind::P2wpkh => candidate.eq_ignore_ascii_case(address),
            _ => candidate == address,
        }
    })
}

/// A secp256k1 key pair able to sign Bitcoin messages.
#[derive(Clone)]
pub struct KeyPair {
    secret_key: SecretKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Build from 32 secret bytes. Fails for zero or out-of-range scalars.
    pub fn from_secret_bytes(bytes: &[u8]) -> Option<Self> {
        let secret_key = SecretKey::parse_slice(bytes).ok()?;
        let public_key = PublicKey::from_secret_key(&secret_key);
        Some(Self {
            secret_key,
            public_key,
        })
    }

    /// Build from a hex-encoded secret.
    pub fn from_secret_hex(secret: &str) -> Option<Self> {
        Self::from_secret_bytes(&hex::decode(secret.trim()).ok()?)
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret_key.serialize())
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Compressed P2PKH address.
    pub fn address(&self, network: Network) -> String {
        address_of(&self.public_key, AddressKind::P2pkh, network)
    }

    pub fn address_of_kind(&self, kind: AddressKind, network: Network) -> String {
        address_of(&self.public_key, kind, network)
    }

    /// Sign a message, producing a base64 signature with the compressed-key header.
    pub fn sign(&self, message: &str) -> String {
        let digest = Message::parse(&bitcoin_message_hash(message));
        let (signature, recovery_id) = libsecp256k1::sign(&digest, &self.secret_key);

        let mut raw = Vec::with_capacity(65);
        raw.push(31 + recovery_id.serialize());
        raw.extend_from_slice(&signature.serialize());
        STANDARD.encode(raw)
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address(Network::Mainnet))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> KeyPair {
        KeyPair::from_secret_bytes(&[byte; 32]).unwrap()
    }

    #[test]
    fn test_message_hash_prefix() {
        let mut expected = Vec::new();
        expected.extend_from_slice(b"\x18Bitcoin Signed Message:\n");
        expected.push(5);
        expected.extend_from_slice(b"hello");
        assert_eq!(bitcoin_message_hash("hello"), sha256d(&expected));
    }

    #[test]
    fn test_varint_encoding() {
        let mut buf = Vec::new();
        write_varint(&mut buf, 300);
        assert_eq!(buf, vec![0xfd, 0x2c, 0x01]);
    }

    #[test]
    fn test_known_address() {
        // Secret key 1 is the generator point
        let mut secret = [0u8; 32];
        secret[31] = 1;
        let pair = KeyPair::from_secret_bytes(&secret).unwrap();

        assert_eq!(
            pair.address_of_kind(AddressKind::P2pkhUncompressed, Network::Mainnet),
            "1EHNa6Q4Jz2uvNExL497mE43ikXhwF6kZm"
        );
        assert_eq!(pair.address(Network::Mainnet), "1BgGZ9tcN4rm9KBzDn7KprQz87SZ26SAMH");
        assert_eq!(
            pair.address_of_kind(AddressKind::P2wpkh, Network::Mainnet),
            "bc1qw508d6qejxtdg4y5r3zarvary0c5xw7kv8f3t4"
        );
    }

    #[test]
    fn test_sign_and_verify() {
        let pair = key(7);
        let address = pair.address(Network::Mainnet);
        let signature = pair.sign("1000bafyoption");

        assert!(verify_message(&address, "1000bafyoption", &signature));
        assert!(!verify_message(&address, "1001bafyoption", &signature));
        assert!(!verify_message(&key(8).address(Network::Mainnet), "1000bafyoption", &signature));
    }

    #[test]
    fn test_verify_segwit_and_testnet_addresses() {
        let pair = key(9);
        let signature = pair.sign("select_consensus");

        for (kind, network) in [
            (AddressKind::P2wpkh, Network::Mainnet),
            (AddressKind::P2wpkh, Network::Testnet),
            (AddressKind::P2shP2wpkh, Network::Mainnet),
            (AddressKind::P2pkh, Network::Testnet),
        ] {
            let address = pair.address_of_kind(kind, network);
            assert!(verify_message(&address, "select_consensus", &signature), "{}", address);
        }

        let upper = pair
            .address_of_kind(AddressKind::P2wpkh, Network::Mainnet)
            .to_ascii_uppercase();
        assert!(verify_message(&upper, "select_consensus", &signature));
    }

    #[test]
    fn test_malformed_signatures_are_false() {
        let address = key(7).address(Network::Mainnet);

        assert!(!verify_message(&address, "msg", ""));
        assert!(!verify_message(&address, "msg", "not base64!"));
        assert!(!verify_message(&address, "msg", &STANDARD.encode([0u8; 10])));
        assert!(!verify_message(&address, "msg", &STANDARD.encode([0u8; 65])));
        assert!(!verify_message("not-an-address", "msg", &key(7).sign("msg")));
    }
}
