//! Memcomparable key encoding.
//!
//! The upstream store holds table keys in a padded-group encoding that keeps
//! lexicographic order stable across variable-length keys. Subscribed span
//! bounds arrive in this form, so raw feed keys must be encoded before any
//! membership test against them.
//!
//! ## Wire format
//!
//! ```text
//!   [group: 8 bytes, zero-padded]  [marker: u8 = 0xFF - pad_count]
//! ```
//!
//! Groups repeat until the key is consumed; a key whose length is a multiple
//! of eight is followed by one fully-padded group so every encoding is
//! self-terminating. A key of length `n` encodes to `(n / 8 + 1) * 9` bytes.

use bytes::Bytes;

/// Bytes per encoded group, excluding the marker.
pub const ENC_GROUP_SIZE: usize = 8;

const ENC_MARKER: u8 = 0xFF;
const ENC_PAD: u8 = 0x00;

/// Encode a raw key into its memcomparable form.
pub fn encode_bytes(key: &[u8]) -> Bytes {
    let groups = key.len() / ENC_GROUP_SIZE + 1;
    let mut out = Vec::with_capacity(groups * (ENC_GROUP_SIZE + 1));
    for idx in 0..groups {
        let chunk = &key[idx * ENC_GROUP_SIZE..key.len().min((idx + 1) * ENC_GROUP_SIZE)];
        out.extend_from_slice(chunk);
        let pad = ENC_GROUP_SIZE - chunk.len();
        out.resize(out.len() + pad, ENC_PAD);
        out.push(ENC_MARKER - pad as u8);
    }
    Bytes::from(out)
}

/// Decode a memcomparable key back to its raw form.
///
/// Returns `None` for malformed input: length not a multiple of the group
/// size, a non-final padded group, or non-zero padding bytes.
pub fn decode_bytes(encoded: &[u8]) -> Option<Vec<u8>> {
    if encoded.is_empty() || encoded.len() % (ENC_GROUP_SIZE + 1) != 0 {
        return None;
    }
    let groups = encoded.len() / (ENC_GROUP_SIZE + 1);
    let mut out = Vec::with_capacity(encoded.len());
    for idx in 0..groups {
        let group = &encoded[idx * (ENC_GROUP_SIZE + 1)..(idx + 1) * (ENC_GROUP_SIZE + 1)];
        let marker = group[ENC_GROUP_SIZE];
        let pad = ENC_MARKER.checked_sub(marker)? as usize;
        if pad > ENC_GROUP_SIZE {
            return None;
        }
        let data_len = ENC_GROUP_SIZE - pad;
        if group[data_len..ENC_GROUP_SIZE].iter().any(|&b| b != ENC_PAD) {
            return None;
        }
        if pad > 0 && idx + 1 != groups {
            return None;
        }
        out.extend_from_slice(&group[..data_len]);
    }
    Some(out)
}
