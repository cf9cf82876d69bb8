//! Binary format of write-ahead log entries
//!
//! Every entry is a fixed header followed by a CRC32C-protected payload:
//!
//! ```text
//! EntryHeader (16 bytes)
//!   [0..4]   magic     "PMKV"
//!   [4..8]   length    u32 LE, payload bytes
//!   [8..12]  checksum  u32 LE, CRC32C of bytes [12..16] and the payload
//!   [12]     operation u8 (Put=1, Remove=2, Batch=3, Checkpoint=4)
//!   [13]     version   u8
//!   [14..16] reserved
//! payload
//!   key_len u32 LE | value_len u32 LE | key | value
//! ```
//!
//! A `Batch` entry has an empty key; its value is a sequence of encoded
//! mutations. Because the whole batch sits behind one checksum, replay
//! applies it entirely or not at all.
//!
//! A `Checkpoint` entry carries nothing and only ever opens a segment: the
//! puts after it are the complete record set, so replay starts there.

use std::path::PathBuf;

use crate::error::{KvError, KvResult};

/// Magic bytes identifying log entries
pub const MAGIC_ARRAY: [u8; 4] = *b"PMKV";

/// Entry format version
pub const FORMAT_VERSION: u8 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 16;

/// Payload prefix: key_len + value_len
const PAYLOAD_PREFIX: usize = 8;

/// Maximum key size in bytes
pub const MAX_KEY_SIZE: usize = u16::MAX as usize;

/// Maximum value size in bytes (32MB)
pub const MAX_VALUE_SIZE: usize = 32 * 1024 * 1024;

/// Maximum encoded size of one transaction batch (64MB)
pub const MAX_BATCH_SIZE: usize = 64 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Operation {
    /// Insert or replace a record
    Put = 1,
    /// Delete a record
    Remove = 2,
    /// Atomic group of mutations
    Batch = 3,
    /// Start of a snapshot segment
    Checkpoint = 4,
}

impl Operation {
    fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(Operation::Put),
            2 => Some(Operation::Remove),
            3 => Some(Operation::Batch),
            4 => Some(Operation::Checkpoint),
            _ => None,
        }
    }
}

/// One staged or logged change to the record set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Put { key: Vec<u8>, value: Vec<u8> },
    Remove { key: Vec<u8> },
}

impl Mutation {
    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Put { key, .. } | Mutation::Remove { key } => key.as_slice(),
        }
    }

    fn encoded_len(&self) -> usize {
        match self {
            Mutation::Put { key, value } => 1 + PAYLOAD_PREFIX + key.len() + value.len(),
            Mutation::Remove { key } => 1 + PAYLOAD_PREFIX + key.len(),
        }
    }
}

/// Decoded log entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    pub operation: Operation,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
}

impl LogEntry {
    /// Expand into the mutations this entry applies, in order.
    pub fn into_mutations(self) -> KvResult<Vec<Mutation>> {
        match self.operation {
            Operation::Put => Ok(vec![Mutation::Put { key: self.key, value: self.value }]),
            Operation::Remove => Ok(vec![Mutation::Remove { key: self.key }]),
            Operation::Batch => decode_batch(&self.value),
            Operation::Checkpoint => Ok(Vec::new()),
        }
    }
}

/// Reject keys and values that do not fit the format.
pub fn check_sizes(key: &[u8], value: &[u8]) -> KvResult<()> {
    if key.len() > MAX_KEY_SIZE {
        return Err(KvError::invalid(format!(
            "key of {} bytes exceeds limit of {} bytes",
            key.len(),
            MAX_KEY_SIZE
        )));
    }
    if value.len() > MAX_VALUE_SIZE {
        return Err(KvError::invalid(format!(
            "value of {} bytes exceeds limit of {} bytes",
            value.len(),
            MAX_VALUE_SIZE
        )));
    }
    Ok(())
}

fn corrupted(offset: u64, reason: String) -> KvError {
    KvError::Corrupted {
        path: PathBuf::from("<buffer>"),
        offset,
        reason,
    }
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn entry_checksum(header_tail: &[u8], payload: &[u8]) -> u32 {
    crc32c::crc32c_append(crc32c::crc32c(header_tail), payload)
}

/// Serialize one entry: header followed by checksummed payload.
pub fn serialize_entry(key: &[u8], value: &[u8], op: Operation) -> KvResult<Vec<u8>> {
    if op == Operation::Batch {
        if value.len() > MAX_BATCH_SIZE {
            return Err(KvError::invalid(format!(
                "batch of {} bytes exceeds limit of {} bytes",
                value.len(),
                MAX_BATCH_SIZE
            )));
        }
    } else {
        check_sizes(key, value)?;
    }

    let payload_len = PAYLOAD_PREFIX + key.len() + value.len();
    let mut buffer = Vec::with_capacity(HEADER_SIZE + payload_len);
    buffer.extend_from_slice(&MAGIC_ARRAY);
    buffer.extend_from_slice(&(payload_len as u32).to_le_bytes());
    buffer.extend_from_slice(&[0u8; 4]); // checksum, patched below
    buffer.push(op as u8);
    buffer.push(FORMAT_VERSION);
    buffer.extend_from_slice(&[0u8; 2]);

    buffer.extend_from_slice(&(key.len() as u32).to_le_bytes());
    buffer.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buffer.extend_from_slice(key);
    buffer.extend_from_slice(value);

    let checksum = entry_checksum(&buffer[12..HEADER_SIZE], &buffer[HEADER_SIZE..]);
    buffer[8..12].copy_from_slice(&checksum.to_le_bytes());
    Ok(buffer)
}

/// Payload length announced by the header at the start of `data`.
pub fn peek_payload_len(data: &[u8]) -> Option<usize> {
    if data.len() < HEADER_SIZE || data[..4] != MAGIC_ARRAY {
        return None;
    }
    Some(read_u32(data, 4) as usize)
}

/// Deserialize one entry from the start of `data`.
pub fn deserialize_entry(data: &[u8]) -> KvResult<LogEntry> {
    if data.len() < HEADER_SIZE {
        return Err(corrupted(0, format!("entry too short: {} bytes", data.len())));
    }
    if data[..4] != MAGIC_ARRAY {
        return Err(corrupted(0, format!("bad magic {:02x?}", &data[..4])));
    }

    let length = read_u32(data, 4) as usize;
    let expected = read_u32(data, 8);
    let payload_end = HEADER_SIZE + length;
    if data.len() < payload_end {
        return Err(corrupted(
            HEADER_SIZE as u64,
            format!("torn entry: need {} payload bytes, have {}", length, data.len() - HEADER_SIZE),
        ));
    }

    let payload = &data[HEADER_SIZE..payload_end];
    let actual = entry_checksum(&data[12..HEADER_SIZE], payload);
    if actual != expected {
        return Err(corrupted(
            HEADER_SIZE as u64,
            format!("checksum mismatch: expected 0x{:08x}, got 0x{:08x}", expected, actual),
        ));
    }

    let operation = Operation::from_u8(data[12])
        .ok_or_else(|| corrupted(12, format!("invalid operation type {}", data[12])))?;

    if payload.len() < PAYLOAD_PREFIX {
        return Err(corrupted(HEADER_SIZE as u64, "payload too short".into()));
    }
    let key_len = read_u32(payload, 0) as usize;
    let value_len = read_u32(payload, 4) as usize;
    let key_end = PAYLOAD_PREFIX + key_len;
    if key_end + value_len != payload.len() {
        return Err(corrupted(
            HEADER_SIZE as u64,
            format!("payload of {} bytes does not match key({}) + value({})", payload.len(), key_len, value_len),
        ));
    }

    Ok(LogEntry {
        operation,
        key: payload[PAYLOAD_PREFIX..key_end].to_vec(),
        value: payload[key_end..].to_vec(),
    })
}

/// Encode mutations as the value of a `Batch` entry.
pub fn encode_batch(mutations: &[Mutation]) -> KvResult<Vec<u8>> {
    let total: usize = mutations.iter().map(Mutation::encoded_len).sum();
    if total > MAX_BATCH_SIZE {
        return Err(KvError::invalid(format!(
            "batch of {} bytes exceeds limit of {} bytes",
            total, MAX_BATCH_SIZE
        )));
    }

    let mut out = Vec::with_capacity(total);
    for mutation in mutations {
        let (op, key, value): (Operation, &[u8], &[u8]) = match mutation {
            Mutation::Put { key, value } => (Operation::Put, key.as_slice(), value.as_slice()),
            Mutation::Remove { key } => (Operation::Remove, key.as_slice(), &[][..]),
        };
        check_sizes(key, value)?;
        out.push(op as u8);
        out.extend_from_slice(&(key.len() as u32).to_le_bytes());
        out.extend_from_slice(&(value.len() as u32).to_le_bytes());
        out.extend_from_slice(key);
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// Decode the value of a `Batch` entry.
pub fn decode_batch(mut bytes: &[u8]) -> KvResult<Vec<Mutation>> {
    let mut mutations = Vec::new();
    let mut offset = 0u64;
    while !bytes.is_empty() {
        if bytes.len() < 1 + PAYLOAD_PREFIX {
            return Err(corrupted(offset, "truncated batch record".into()));
        }
        let key_len = read_u32(bytes, 1) as usize;
        let value_len = read_u32(bytes, 5) as usize;
        let start = 1 + PAYLOAD_PREFIX;
        let end = start + key_len + value_len;
        if bytes.len() < end {
            return Err(corrupted(offset, "batch record overruns entry".into()));
        }
        let key = bytes[start..start + key_len].to_vec();
        let mutation = match Operation::from_u8(bytes[0]) {
            Some(Operation::Put) => Mutation::Put { key, value: bytes[start + key_len..end].to_vec() },
            Some(Operation::Remove) => Mutation::Remove { key },
            _ => return Err(corrupted(offset, format!("invalid batch operation {}", bytes[0]))),
        };
        mutations.push(mutation);
        bytes = &bytes[end..];
        offset += end as u64;
    }
    Ok(mutations)
}
