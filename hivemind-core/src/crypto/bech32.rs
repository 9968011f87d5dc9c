//! Bech32 codec (BIP-173).

const CHARSET: &[u8; 32] = b"qpzry9x8gf2tvdw0s3jn54khce6mua7l";

const GENERATOR: [u32; 5] = [0x3b6a57b2, 0x26508e6d, 0x1ea119fa, 0x3d4233dd, 0x2a1462b3];

/// Maximum length of a bech32 string.
pub const MAX_LENGTH: usize = 90;

const CHECKSUM_LENGTH: usize = 6;

fn polymod(values: &[u8]) -> u32 {
    let mut chk: u32 = 1;
    for &value in values {
        let top = chk >> 25;
        chk = ((chk & 0x1ff_ffff) << 5) ^ u32::from(value);
        for (i, generator) in GENERATOR.iter().enumerate() {
            if (top >> i) & 1 == 1 {
                chk ^= generator;
            }
        }
    }
    chk
}

fn hrp_expand(hrp: &str) -> Vec<u8> {
    let bytes = hrp.as_bytes();
    let mut expanded = Vec::with_capacity(bytes.len() * 2 + 1);
    expanded.extend(bytes.iter().map(|b| b >> 5));
    expanded.push(0);
    expanded.extend(bytes.iter().map(|b| b & 31));
    expanded
}

fn verify_checksum(hrp: &str, data: &[u8]) -> bool {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    polymod(&values) == 1
}

fn create_checksum(hrp: &str, data: &[u8]) -> [u8; CHECKSUM_LENGTH] {
    let mut values = hrp_expand(hrp);
    values.extend_from_slice(data);
    values.extend_from_slice(&[0; CHECKSUM_LENGTH]);
    let modulus = polymod(&values) ^ 1;

    let mut checksum = [0u8; CHECKSUM_LENGTH];
    for (i, slot) in checksum.iter_mut().enumerate() {
        *slot = ((modulus >> (5 * (5 - i))) & 31) as u8;
    }
    checksum
}

/// Decode a bech32 string into its lowercase HRP and 5-bit data words
/// (checksum removed). Returns `None` on any failure.
pub fn decode(bech: &str) -> Option<(String, Vec<u8>)> {
    if bech.len() > MAX_LENGTH {
        return None;
    }
    if bech.bytes().any(|b| !(33..=126).contains(&b)) {
        return None;
    }
    let has_lower = bech.bytes().any(|b| b.is_ascii_lowercase());
    let has_upper = bech.bytes().any(|b| b.is_ascii_uppercase());
    if has_lower && has_upper {
        return None;
    }

    let bech = bech.to_ascii_lowercase();
    let pos = bech.rfind('1')?;
    if pos < 1 || pos + CHECKSUM_LENGTH + 1 > bech.len() {
        return None;
    }

    let hrp = &bech[..pos];
    let data = bech[pos + 1..]
        .bytes()
        .map(|b| CHARSET.iter().position(|&c| c == b).map(|p| p as u8))
        .collect::<Option<Vec<u8>>>()?;

    if !verify_checksum(hrp, &data) {
        return None;
    }

    let payload = data[..data.len() - CHECKSUM_LENGTH].to_vec();
    Some((hrp.to_string(), payload))
}

/// Encode an HRP and 5-bit data words as a lowercase bech32 string.
pub fn encode(hrp: &str, data: &[u8]) -> String {
    let hrp = hrp.to_ascii_lowercase();
    let checksum = create_checksum(&hrp, data);

    let mut out = String::with_capacity(hrp.len() + 1 + data.len() + CHECKSUM_LENGTH);
    out.push_str(&hrp);
    out.push('1');
    for &word in data.iter().chain(checksum.iter()) {
        out.push(CHARSET[usize::from(word & 31)] as char);
    }
    out
}

/// Regroup bits, e.g. bytes (8) into bech32 words (5).
pub fn convert_bits(data: &[u8], from: u32, to: u32, pad: bool) -> Option<Vec<u8>> {
    let mut acc: u32 = 0;
    let mut bits: u32 = 0;
    let max_value: u32 = (1 << to) - 1;
    let max_acc: u32 = (1 << (from + to - 1)) - 1;
    let mut out = Vec::with_capacity(data.len() * from as usize / to as usize + 1);

    for &value in data {
        let value = u32::from(value);
        if value >> from != 0 {
            return None;
        }
        acc = ((acc << from) | value) & max_acc;
        bits += from;
        while bits >= to {
            bits -= to;
            out.push(((acc >> bits) & max_value) as u8);
        }
    }

    if pad {
        if bits > 0 {
            out.push(((acc << (to - bits)) & max_value) as u8);
        }
    } else if bits >= from || ((acc << (to - bits)) & max_value) != 0 {
        return None;
    }

    Some(out)
}
