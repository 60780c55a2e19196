//! Table key codec.
//!
//! Table data keys share a common head:
//! - `t{table_id}` for every key owned by a table or partition,
//! - `t{table_id}_r` for row records,
//! - `t{table_id}_i{index_id}` for secondary index entries.
//!
//! Ids are encoded as memcomparable i64 (big-endian with the sign bit
//! flipped) so that byte order matches numeric order.

const TABLE_PREFIX: u8 = b't';
const RECORD_PREFIX_SEP: &[u8] = b"_r";
const INDEX_PREFIX_SEP: &[u8] = b"_i";
const SIGN_MASK: u64 = 0x8000_0000_0000_0000;
const ENC_I64_LEN: usize = 8;

/// Length of `t{table_id}`.
pub const TABLE_PREFIX_LEN: usize = 1 + ENC_I64_LEN;

/// Decoded head of a table data key.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyHead {
    pub table_id: i64,
    /// Zero for record keys.
    pub index_id: i64,
    pub is_record: bool,
}

fn encode_i64(out: &mut Vec<u8>, value: i64) {
    out.extend_from_slice(&((value as u64) ^ SIGN_MASK).to_be_bytes());
}

fn decode_i64(bytes: &[u8]) -> Option<i64> {
    let raw: [u8; ENC_I64_LEN] = bytes.get(..ENC_I64_LEN)?.try_into().ok()?;
    Some((u64::from_be_bytes(raw) ^ SIGN_MASK) as i64)
}

/// Encode the `t{table_id}` prefix shared by all keys of a table.
pub fn encode_table_prefix(table_id: i64) -> Vec<u8> {
    let mut out = Vec::with_capacity(TABLE_PREFIX_LEN);
    out.push(TABLE_PREFIX);
    encode_i64(&mut out, table_id);
    out
}

/// Encode the `t{table_id}_r` prefix of row records.
pub fn encode_record_prefix(table_id: i64) -> Vec<u8> {
    let mut out = encode_table_prefix(table_id);
    out.extend_from_slice(RECORD_PREFIX_SEP);
    out
}

/// Encode a row key for an integer handle.
pub fn encode_row_key(table_id: i64, handle: i64) -> Vec<u8> {
    let mut out = encode_record_prefix(table_id);
    encode_i64(&mut out, handle);
    out
}

/// Encode the `t{table_id}_i{index_id}` prefix of index entries.
pub fn encode_index_prefix(table_id: i64, index_id: i64) -> Vec<u8> {
    let mut out = encode_table_prefix(table_id);
    out.extend_from_slice(INDEX_PREFIX_SEP);
    encode_i64(&mut out, index_id);
    out
}

/// Decode the table id embedded in `key`.
///
/// Returns 0 when the key is not a table key or is too short to carry an
/// id; callers treat 0 as "invalid table".
pub fn decode_table_id(key: &[u8]) -> i64 {
    if key.first() != Some(&TABLE_PREFIX) {
        return 0;
    }
    decode_i64(&key[1..]).unwrap_or(0)
}

/// Decode table id, index id and record/index kind from a table data key.
pub fn decode_key_head(key: &[u8]) -> anyhow::Result<KeyHead> {
    if key.first() != Some(&TABLE_PREFIX) || key.len() < TABLE_PREFIX_LEN + 2 {
        anyhow::bail!("invalid table data key {}", format_key(key));
    }
    let table_id = decode_i64(&key[1..]).unwrap_or(0);
    let rest = &key[TABLE_PREFIX_LEN..];
    if rest.starts_with(RECORD_PREFIX_SEP) {
        return Ok(KeyHead {
            table_id,
            index_id: 0,
            is_record: true,
        });
    }
    if rest.starts_with(INDEX_PREFIX_SEP) {
        let index_id = decode_i64(&rest[INDEX_PREFIX_SEP.len()..]).ok_or_else(|| {
            anyhow::anyhow!("index key too short to hold index id: {}", format_key(key))
        })?;
        return Ok(KeyHead {
            table_id,
            index_id,
            is_record: false,
        });
    }
    anyhow::bail!("key is neither a record nor an index key: {}", format_key(key))
}

pub fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push(char::from(b"0123456789abcdef"[(b >> 4) as usize]));
        out.push(char::from(b"0123456789abcdef"[(b & 0x0f) as usize]));
    }
    out
}

pub fn parse_hex(input: &str) -> anyhow::Result<Vec<u8>> {
    let input = input.strip_prefix("0x").unwrap_or(input);
    if input.len() % 2 != 0 {
        anyhow::bail!("hex string must have even length");
    }
    let mut out = Vec::with_capacity(input.len() / 2);
    let bytes = input.as_bytes();
    for i in (0..bytes.len()).step_by(2) {
        let hi = hex_value(bytes[i])?;
        let lo = hex_value(bytes[i + 1])?;
        out.push((hi << 4) | lo);
    }
    Ok(out)
}

fn hex_value(byte: u8) -> anyhow::Result<u8> {
    match byte {
        b'0'..=b'9' => Ok(byte - b'0'),
        b'a'..=b'f' => Ok(byte - b'a' + 10),
        b'A'..=b'F' => Ok(byte - b'A' + 10),
        _ => anyhow::bail!("invalid hex character"),
    }
}

/// Render a key for logs: `t{id}` heads are spelled out, the rest is hex.
pub fn format_key(key: &[u8]) -> String {
    if key.is_empty() {
        return "<empty>".to_string();
    }
    if key[0] == TABLE_PREFIX {
        if let Some(table_id) = decode_i64(&key[1..]) {
            let rest = &key[TABLE_PREFIX_LEN..];
            if rest.is_empty() {
                return format!("t{table_id}");
            }
            return format!("t{table_id}:0x{}", hex_encode(rest));
        }
    }
    format!("0x{}", hex_encode(key))
}

/// Serde adapter that stores byte keys as hex strings.
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::hex_encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        super::parse_hex(&raw).map_err(serde::de::Error::custom)
    }
}
