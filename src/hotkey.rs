//! SS58 hotkey handling
//!
//! Hotkeys arrive as SS58 strings from operators (`.env`, CLI flags) and
//! from request metadata. Only the generic substrate prefix is produced.

use blake2::{Blake2b512, Digest};

use crate::error::{DojoError, Result};

/// Substrate generic prefix, used by Bittensor
pub const SS58_PREFIX: u16 = 42;

const CHECKSUM_PREAMBLE: &[u8] = b"SS58PRE";

fn checksum(payload: &[u8]) -> [u8; 2] {
    let mut hasher = Blake2b512::new();
    hasher.update(CHECKSUM_PREAMBLE);
    hasher.update(payload);
    let hash = hasher.finalize();
    [hash[0], hash[1]]
}

/// Decode an SS58 address into its 32-byte public key
pub fn decode_ss58(ss58: &str) -> Result<[u8; 32]> {
    let decoded = bs58::decode(ss58)
        .into_vec()
        .map_err(|e| DojoError::InvalidHotkey(format!("Base58 decode failed: {}", e)))?;

    let prefix_len = match decoded.first() {
        Some(b) if *b < 64 => 1,
        Some(b) if *b < 128 => 2,
        Some(b) => {
            return Err(DojoError::InvalidHotkey(format!(
                "Invalid SS58 prefix byte: {}",
                b
            )))
        }
        None => return Err(DojoError::InvalidHotkey("Empty address".to_string())),
    };

    let pubkey_end = prefix_len + 32;
    if decoded.len() != pubkey_end + 2 {
        return Err(DojoError::InvalidHotkey(format!(
            "Unexpected SS58 length: {} bytes",
            decoded.len()
        )));
    }

    if checksum(&decoded[..pubkey_end]) != decoded[pubkey_end..] {
        return Err(DojoError::InvalidHotkey(
            "SS58 checksum mismatch".to_string(),
        ));
    }

    let mut pubkey = [0u8; 32];
    pubkey.copy_from_slice(&decoded[prefix_len..pubkey_end]);
    Ok(pubkey)
}

/// Encode a public key as an SS58 address with the Bittensor prefix
pub fn encode_ss58(pubkey: &[u8; 32]) -> String {
    let mut data = Vec::with_capacity(35);
    data.push(SS58_PREFIX as u8);
    data.extend_from_slice(pubkey);
    let sum = checksum(&data);
    data.extend_from_slice(&sum);
    bs58::encode(data).into_string()
}

pub fn is_valid_ss58_hotkey(hotkey: &str) -> bool {
    if hotkey.len() < 40 || hotkey.len() > 60 {
        return false;
    }
    decode_ss58(hotkey).is_ok()
}

/// Short form for log lines: first 8 and last 4 characters
pub fn short_hotkey(hotkey: &str) -> String {
    if hotkey.len() <= 16 || !hotkey.is_ascii() {
        return hotkey.to_string();
    }
    format!("{}..{}", &hotkey[..8], &hotkey[hotkey.len() - 4..])
}
