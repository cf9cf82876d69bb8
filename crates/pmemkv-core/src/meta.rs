//! Pool header stored in `<root>/pool.meta`.
//!
//! Layout, all integers little-endian:
//!
//! ```text
//! magic "PMKVPOOL" | version u32 | engine PersistentString<31>
//! | capacity u64 | comparator PersistentString<255> | crc32c u32
//! ```
//!
//! Written with the replace-by-rename sequence so a crash leaves either the
//! old or the new header, never a mix.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{KvError, KvResult};
use crate::platform_durability::{durable_sync, sync_directory};
use crate::pstring::PersistentString;

pub const META_FILE: &str = "pool.meta";
const META_MAGIC: [u8; 8] = *b"PMKVPOOL";
const META_VERSION: u32 = 1;

pub type EngineName = PersistentString<31>;
pub type ComparatorName = PersistentString<255>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolMeta {
    pub engine: EngineName,
    pub capacity: u64,
    pub comparator: ComparatorName,
}

impl PoolMeta {
    pub fn new(engine: &str, capacity: u64, comparator: &str) -> KvResult<Self> {
        Ok(Self {
            engine: EngineName::try_from(engine)?,
            capacity,
            comparator: ComparatorName::try_from(comparator)?,
        })
    }

    pub fn path(root: &Path) -> PathBuf {
        root.join(META_FILE)
    }

    pub fn exists(root: &Path) -> bool {
        Self::path(root).is_file()
    }

    fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + 4 + EngineName::ENCODED_LEN + 8 + ComparatorName::ENCODED_LEN + 4);
        out.extend_from_slice(&META_MAGIC);
        out.extend_from_slice(&META_VERSION.to_le_bytes());
        self.engine.write_to(&mut out);
        out.extend_from_slice(&self.capacity.to_le_bytes());
        self.comparator.write_to(&mut out);
        let crc = crc32c::crc32c(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    fn decode(path: &Path, bytes: &[u8]) -> KvResult<Self> {
        let corrupted = |offset: usize, reason: &str| KvError::Corrupted {
            path: path.to_path_buf(),
            offset: offset as u64,
            reason: reason.to_string(),
        };

        let body_len = 8 + 4 + EngineName::ENCODED_LEN + 8 + ComparatorName::ENCODED_LEN;
        if bytes.len() != body_len + 4 {
            return Err(corrupted(0, "unexpected header size"));
        }
        if bytes[..8] != META_MAGIC {
            return Err(corrupted(0, "bad magic"));
        }
        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[body_len..]);
        if crc32c::crc32c(&bytes[..body_len]) != u32::from_le_bytes(word) {
            return Err(corrupted(body_len, "checksum mismatch"));
        }
        word.copy_from_slice(&bytes[8..12]);
        let version = u32::from_le_bytes(word);
        if version != META_VERSION {
            return Err(corrupted(8, "unsupported version"));
        }

        let mut at = 12;
        let engine = EngineName::read_from(&bytes[at..]).ok_or_else(|| corrupted(at, "bad engine name"))?;
        at += EngineName::ENCODED_LEN;
        let mut cap = [0u8; 8];
        cap.copy_from_slice(&bytes[at..at + 8]);
        at += 8;
        let comparator =
            ComparatorName::read_from(&bytes[at..]).ok_or_else(|| corrupted(at, "bad comparator name"))?;

        Ok(Self { engine, capacity: u64::from_le_bytes(cap), comparator })
    }

    pub fn engine_name(&self) -> String {
        String::from_utf8_lossy(self.engine.as_bytes()).into_owned()
    }

    pub fn comparator_name(&self) -> String {
        String::from_utf8_lossy(self.comparator.as_bytes()).into_owned()
    }

    /// Read the header under `root`.
    pub fn read(root: &Path) -> KvResult<Self> {
        let path = Self::path(root);
        let bytes = fs::read(&path).map_err(|e| KvError::io(&path, e, "failed to read pool header"))?;
        Self::decode(&path, &bytes)
    }

    /// Durably replace the header under `root`.
    pub fn write(&self, root: &Path) -> KvResult<()> {
        let path = Self::path(root);
        let temp = root.join(format!("{}.tmp", META_FILE));
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp)
                .map_err(|e| KvError::io(&temp, e, "failed to create pool header"))?;
            file.write_all(&self.encode())
                .map_err(|e| KvError::io(&temp, e, "failed to write pool header"))?;
            durable_sync(&file).map_err(|e| KvError::io(&temp, e, "failed to sync pool header"))?;
        }
        fs::rename(&temp, &path).map_err(|e| KvError::io(&path, e, "failed to install pool header"))?;
        sync_directory(root).map_err(|e| KvError::io(root, e, "failed to sync pool directory"))
    }
}
