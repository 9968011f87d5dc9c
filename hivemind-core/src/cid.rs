//! Content identifier helpers.
//!
//! CIDs travel as opaque strings. Two forms exist in the wild, bare
//! (`bafy...`) and gateway-prefixed (`/ipfs/bafy...`); every inbound CID is
//! normalized to the bare form before it is compared or stored.

use ::cid::Cid;
use multihash_codetable::{Code, MultihashDigest};
use std::str::FromStr;

/// Gateway prefix stripped from inbound CIDs.
pub const IPFS_PREFIX: &str = "/ipfs/";

/// Multicodec for DAG-JSON.
pub const DAG_JSON_CODEC: u64 = 0x0129;

/// Strip a leading `/ipfs/` from a CID.
pub fn normalize(cid: &str) -> String {
    cid.strip_prefix(IPFS_PREFIX).unwrap_or(cid).to_string()
}

/// Check whether a string parses as a CID (v0 or v1), ignoring the gateway prefix.
pub fn is_valid(cid: &str) -> bool {
    let bare = cid.strip_prefix(IPFS_PREFIX).unwrap_or(cid);
    !bare.is_empty() && Cid::from_str(bare).is_ok()
}

/// Compute the CIDv1 (dag-json, sha2-256) of serialized JSON bytes.
pub fn compute(data: &[u8]) -> String {
    let hash = Code::Sha2_256.digest(data);
    Cid::new_v1(DAG_JSON_CODEC, hash).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_prefix() {
        assert_eq!(normalize("/ipfs/bafyabc"), "bafyabc");
        assert_eq!(normalize("bafyabc"), "bafyabc");
        // Only a leading prefix is stripped
        assert_eq!(normalize("x/ipfs/bafyabc"), "x/ipfs/bafyabc");
    }

    #[test]
    fn test_compute_is_deterministic_and_valid() {
        let a = compute(br#"{"name":"test"}"#);
        let b = compute(br#"{"name":"test"}"#);
        let c = compute(br#"{"name":"other"}"#);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with('b'));
        assert!(is_valid(&a));
        assert!(is_valid(&format!("/ipfs/{}", a)));
    }

    #[test]
    fn test_is_valid_rejects_garbage() {
        assert!(!is_valid(""));
        assert!(!is_valid("/ipfs/"));
        assert!(!is_valid("not a cid"));
        assert!(is_valid("QmYwAPJzv5CZsnA625s3Xf2nemtYgPpHdWEz79ojWnPbdG"));
    }
}
