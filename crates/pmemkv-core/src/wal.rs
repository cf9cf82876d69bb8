//! Write-ahead log of a pool
//!
//! Segments live in `<root>/log/wal-<seq>.pmkv`. A mutation is durable once
//! `append` returns: the entry bytes were written and `durable_sync` succeeded.
//! Engines update their in-memory state only after that.
//!
//! Replay walks segments in sequence order, starting at the newest checkpoint
//! and holding one segment in memory at a time. A corrupt entry is skipped by
//! scanning for the next magic; an incomplete entry at the end of a segment is
//! the crash point and ends that segment.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::error::{KvError, KvResult};
use crate::format::{
    deserialize_entry, encode_batch, peek_payload_len, serialize_entry, LogEntry, Mutation,
    Operation, HEADER_SIZE, MAGIC_ARRAY,
};
use crate::platform_durability::{durable_sync, sync_directory};

/// Segment rotation threshold (64MB)
const SEGMENT_ROTATION_SIZE: u64 = 64 * 1024 * 1024;

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".pmkv";
const COMPACT_SUFFIX: &str = ".pmkv.compact";

fn segment_name(sequence: u64) -> String {
    format!("{}{:016x}{}", SEGMENT_PREFIX, sequence, SEGMENT_SUFFIX)
}

fn parse_segment_name(name: &str) -> Option<u64> {
    let hex = name.strip_prefix(SEGMENT_PREFIX)?.strip_suffix(SEGMENT_SUFFIX)?;
    u64::from_str_radix(hex, 16).ok()
}

/// Sorted `(sequence, path)` list of segments in `dir`.
fn list_segments(dir: &Path) -> KvResult<Vec<(u64, PathBuf)>> {
    let entries = fs::read_dir(dir).map_err(|e| KvError::io(dir, e, "failed to read log directory"))?;
    let mut segments = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| KvError::io(dir, e, "failed to read directory entry"))?;
        if let Some(seq) = entry.file_name().to_str().and_then(parse_segment_name) {
            segments.push((seq, entry.path()));
        }
    }
    segments.sort_by_key(|(seq, _)| *seq);
    Ok(segments)
}

fn open_segment(path: &Path) -> KvResult<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| KvError::io(path, e, "failed to open log segment"))
}

/// Appends entries to the active segment.
pub struct WalWriter {
    file: File,
    path: PathBuf,
    size: u64,
    dir: PathBuf,
    sequence: u64,
    rotation_size: u64,
    /// Segment the next append must go to, set when a checkpoint was
    /// installed but switching to the segment after it failed.
    pending_switch: Option<u64>,
}

impl WalWriter {
    /// Open the newest segment in `dir` for appending, creating `dir` and a
    /// first segment when needed. Leftovers of an interrupted checkpoint are
    /// removed.
    pub fn new<P: AsRef<Path>>(dir: P) -> KvResult<Self> {
        Self::with_rotation_size(dir, SEGMENT_ROTATION_SIZE)
    }

    /// Like `new`, rotating to a fresh segment once one exceeds `rotation_size` bytes.
    pub fn with_rotation_size<P: AsRef<Path>>(dir: P, rotation_size: u64) -> KvResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|e| KvError::io(&dir, e, "failed to create log directory"))?;

        if let Ok(entries) = fs::read_dir(&dir) {
            for entry in entries.flatten() {
                let stale = entry.file_name().to_str().map_or(false, |n| n.ends_with(COMPACT_SUFFIX));
                if stale {
                    debug!("removing interrupted checkpoint {}", entry.path().display());
                    let _ = fs::remove_file(entry.path());
                }
            }
        }

        let sequence = list_segments(&dir)?.last().map_or(0, |(seq, _)| *seq);
        let path = dir.join(segment_name(sequence));
        let file = open_segment(&path)?;
        let size = file
            .metadata()
            .map_err(|e| KvError::io(&path, e, "failed to stat log segment"))?
            .len();

        Ok(Self {
            file,
            path,
            size,
            dir,
            sequence,
            rotation_size,
            pending_switch: None,
        })
    }

    /// Append one put or remove.
    pub fn append(&mut self, key: &[u8], value: &[u8], op: Operation) -> KvResult<()> {
        let bytes = serialize_entry(key, value, op)?;
        self.write_durable(&bytes)
    }

    /// Append a group of mutations as a single all-or-nothing entry.
    pub fn append_batch(&mut self, mutations: &[Mutation]) -> KvResult<()> {
        let encoded = encode_batch(mutations)?;
        let bytes = serialize_entry(&[], &encoded, Operation::Batch)?;
        self.write_durable(&bytes)
    }

    fn write_durable(&mut self, bytes: &[u8]) -> KvResult<()> {
        if let Some(sequence) = self.pending_switch {
            self.switch_to(sequence)?;
        }
        if self.size > 0 && self.size + bytes.len() as u64 > self.rotation_size {
            self.rotate()?;
        }

        self.file
            .write_all(bytes)
            .map_err(|e| KvError::io(&self.path, e, "log write failed"))?;
        durable_sync(&self.file).map_err(|e| KvError::io(&self.path, e, "log sync failed"))?;

        self.size += bytes.len() as u64;
        Ok(())
    }

    fn rotate(&mut self) -> KvResult<()> {
        durable_sync(&self.file).map_err(|e| KvError::io(&self.path, e, "log sync before rotation failed"))?;
        self.switch_to(self.sequence + 1)?;
        debug!("rotated log to {}", self.path.display());
        Ok(())
    }

    fn switch_to(&mut self, sequence: u64) -> KvResult<()> {
        let path = self.dir.join(segment_name(sequence));
        self.file = open_segment(&path)?;
        self.path = path;
        self.size = 0;
        self.sequence = sequence;
        self.pending_switch = None;
        sync_directory(&self.dir).map_err(|e| KvError::io(&self.dir, e, "log directory sync failed"))
    }

    /// Replace every segment with a snapshot holding `records` as puts.
    ///
    /// Order of steps: write `<next>.pmkv.compact` opening with a checkpoint
    /// marker, sync it, rename it to segment `next`, sync the directory,
    /// continue appending to segment `next + 1`, then delete older segments.
    /// Replay starts at the newest marker, so the deletion is best-effort
    /// and a segment left behind is ignored. Interrupted at any step, replay
    /// still yields the same record set. Returns the snapshot size in bytes.
    pub fn checkpoint<'a, I>(&mut self, records: I) -> KvResult<u64>
    where
        I: IntoIterator<Item = (&'a [u8], &'a [u8])>,
    {
        durable_sync(&self.file).map_err(|e| KvError::io(&self.path, e, "log sync failed"))?;

        let snapshot_seq = self.sequence + 1;
        let final_path = self.dir.join(segment_name(snapshot_seq));
        let temp_path = self.dir.join(format!("{}{:016x}{}", SEGMENT_PREFIX, snapshot_seq, COMPACT_SUFFIX));

        let mut written = 0u64;
        {
            let mut temp = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)
                .map_err(|e| KvError::io(&temp_path, e, "failed to create checkpoint"))?;
            let marker = serialize_entry(&[], &[], Operation::Checkpoint)?;
            temp.write_all(&marker)
                .map_err(|e| KvError::io(&temp_path, e, "checkpoint write failed"))?;
            written += marker.len() as u64;
            for (key, value) in records {
                let bytes = serialize_entry(key, value, Operation::Put)?;
                temp.write_all(&bytes)
                    .map_err(|e| KvError::io(&temp_path, e, "checkpoint write failed"))?;
                written += bytes.len() as u64;
            }
            durable_sync(&temp).map_err(|e| KvError::io(&temp_path, e, "checkpoint sync failed"))?;
        }

        fs::rename(&temp_path, &final_path)
            .map_err(|e| KvError::io(&final_path, e, "failed to install checkpoint"))?;
        sync_directory(&self.dir).map_err(|e| KvError::io(&self.dir, e, "log directory sync failed"))?;

        // Appends must land after the snapshot from here on, even if this switch fails.
        self.pending_switch = Some(snapshot_seq + 1);
        self.switch_to(snapshot_seq + 1)?;
        info!("checkpointed log into {} ({} bytes)", final_path.display(), written);

        self.remove_superseded(snapshot_seq);
        Ok(written)
    }

    fn remove_superseded(&self, snapshot_seq: u64) {
        let segments = match list_segments(&self.dir) {
            Ok(segments) => segments,
            Err(e) => {
                warn!("leaving superseded log segments in place: {}", e);
                return;
            }
        };
        for (seq, path) in segments {
            if seq >= snapshot_seq {
                continue;
            }
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove superseded segment {}: {}", path.display(), e);
            }
        }
    }

    /// Current segment path (for diagnostics)
    pub fn current_path(&self) -> &Path {
        &self.path
    }

    /// Current segment size in bytes
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Total bytes across every segment on disk.
    pub fn total_size(&self) -> KvResult<u64> {
        let mut total = 0;
        for (_, path) in list_segments(&self.dir)? {
            total += fs::metadata(&path)
                .map_err(|e| KvError::io(&path, e, "failed to stat log segment"))?
                .len();
        }
        Ok(total)
    }
}

/// Reads every segment back for replay.
pub struct WalReader {
    dir: PathBuf,
}

impl WalReader {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self { dir: dir.as_ref().to_path_buf() }
    }

    /// Feed every recoverable entry to `visit` in log order and return how
    /// many were visited. Segments before the newest checkpoint are skipped
    /// and the checkpoint marker itself is consumed here. A missing
    /// directory is empty.
    pub fn replay<F>(&self, mut visit: F) -> KvResult<usize>
    where
        F: FnMut(LogEntry) -> KvResult<()>,
    {
        if !self.dir.exists() {
            return Ok(0);
        }
        let mut segments = list_segments(&self.dir)?;
        segments.retain(|(_, path)| {
            let regular = path.is_file();
            if !regular {
                warn!("{}: not a regular file, skipping", path.display());
            }
            regular
        });

        let start = segments
            .iter()
            .rposition(|(_, path)| starts_with_checkpoint(path))
            .unwrap_or(0);
        if start > 0 {
            debug!("skipping {} segments older than checkpoint {}", start, segments[start].1.display());
        }

        let mut visited = 0;
        for (_, path) in &segments[start..] {
            for entry in self.recover_segment(path)? {
                if entry.operation == Operation::Checkpoint {
                    continue;
                }
                visit(entry)?;
                visited += 1;
            }
        }
        Ok(visited)
    }

    /// All recoverable entries in log order.
    pub fn recover_entries(&self) -> KvResult<Vec<LogEntry>> {
        let mut all = Vec::new();
        self.replay(|entry| {
            all.push(entry);
            Ok(())
        })?;
        Ok(all)
    }

    fn recover_segment(&self, path: &Path) -> KvResult<Vec<LogEntry>> {
        let mut buffer = Vec::new();
        File::open(path)
            .and_then(|mut f| f.read_to_end(&mut buffer))
            .map_err(|e| KvError::io(path, e, "failed to read log segment"))?;

        let mut entries = Vec::new();
        let mut offset = 0;

        while offset + HEADER_SIZE <= buffer.len() {
            let Some(length) = peek_payload_len(&buffer[offset..]) else {
                warn!("{}: bad magic at offset {}, resyncing", path.display(), offset);
                match find_next_magic(&buffer, offset + 1) {
                    Some(next) => {
                        offset = next;
                        continue;
                    }
                    None => break,
                }
            };

            let end = offset + HEADER_SIZE + length;
            if end > buffer.len() {
                warn!(
                    "{}: torn entry at offset {} ({} of {} bytes), discarding tail",
                    path.display(),
                    offset,
                    buffer.len() - offset,
                    HEADER_SIZE + length
                );
                break;
            }

            match deserialize_entry(&buffer[offset..end]) {
                Ok(entry) => {
                    entries.push(entry);
                    offset = end;
                }
                Err(e) => {
                    warn!("{}: skipping corrupt entry at offset {}: {}", path.display(), offset, e);
                    match find_next_magic(&buffer, offset + 1) {
                        Some(next) => offset = next,
                        None => break,
                    }
                }
            }
        }

        Ok(entries)
    }
}

/// Whether the segment at `path` opens with an intact checkpoint marker.
fn starts_with_checkpoint(path: &Path) -> bool {
    let Ok(mut file) = File::open(path) else {
        return false;
    };
    let mut head = [0u8; HEADER_SIZE];
    if file.read_exact(&mut head).is_err() || head[12] != Operation::Checkpoint as u8 {
        return false;
    }
    let Some(length) = peek_payload_len(&head).filter(|len| *len <= HEADER_SIZE) else {
        return false;
    };
    let mut entry = vec![0u8; HEADER_SIZE + length];
    entry[..HEADER_SIZE].copy_from_slice(&head);
    if file.read_exact(&mut entry[HEADER_SIZE..]).is_err() {
        return false;
    }
    deserialize_entry(&entry).map_or(false, |e| e.operation == Operation::Checkpoint)
}

/// Next offset at or after `start` where the entry magic appears.
fn find_next_magic(buffer: &[u8], start: usize) -> Option<usize> {
    buffer
        .get(start..)?
        .windows(MAGIC_ARRAY.len())
        .position(|w| w == MAGIC_ARRAY)
        .map(|pos| start + pos)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(entries: &[LogEntry]) -> Vec<&[u8]> {
        entries.iter().map(|e| e.key.as_slice()).collect()
    }

    #[test]
    fn test_append_and_recover() {
        let temp = TempDir::new().unwrap();

        let mut writer = WalWriter::new(temp.path()).unwrap();
        writer.append(b"key1", b"value1", Operation::Put).unwrap();
        writer.append(b"key2", b"value2", Operation::Put).unwrap();
        writer.append(b"key1", b"", Operation::Remove).unwrap();
        drop(writer);

        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].value, b"value1");
        assert_eq!(entries[2].operation, Operation::Remove);
        assert_eq!(keys(&entries), vec![&b"key1"[..], b"key2", b"key1"]);
    }

    #[test]
    fn test_reopen_appends_to_newest_segment() {
        let temp = TempDir::new().unwrap();
        {
            let mut writer = WalWriter::new(temp.path()).unwrap();
            writer.append(b"a", b"1", Operation::Put).unwrap();
        }
        {
            let mut writer = WalWriter::new(temp.path()).unwrap();
            assert!(writer.current_size() > 0);
            writer.append(b"b", b"2", Operation::Put).unwrap();
        }
        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(keys(&entries), vec![&b"a"[..], b"b"]);
    }

    #[test]
    fn test_corrupt_entry_skipped() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path()).unwrap();
        writer.append(b"good1", b"val1", Operation::Put).unwrap();
        let first_len = writer.current_size() as usize;
        writer.append(b"good2", b"val2", Operation::Put).unwrap();
        writer.append(b"good3", b"val3", Operation::Put).unwrap();
        let path = writer.current_path().to_path_buf();
        drop(writer);

        let mut data = std::fs::read(&path).unwrap();
        data[first_len + HEADER_SIZE + 9] ^= 0xFF; // inside good2's key
        std::fs::write(&path, data).unwrap();

        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(keys(&entries), vec![&b"good1"[..], b"good3"]);
    }

    #[test]
    fn test_torn_tail_discarded() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path()).unwrap();
        writer.append(b"complete", b"entry", Operation::Put).unwrap();
        let batch = vec![
            Mutation::Put { key: b"t1".to_vec(), value: b"v1".to_vec() },
            Mutation::Put { key: b"t2".to_vec(), value: b"v2".to_vec() },
        ];
        writer.append_batch(&batch).unwrap();
        let path = writer.current_path().to_path_buf();
        drop(writer);

        // Chop the batch in half, as a crash mid-write would.
        let data = std::fs::read(&path).unwrap();
        std::fs::write(&path, &data[..data.len() - 10]).unwrap();

        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, b"complete");
    }

    #[test]
    fn test_checkpoint_replaces_segments() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path()).unwrap();
        for i in 0..20u8 {
            writer.append(&[i], b"old", Operation::Put).unwrap();
        }
        let before = writer.total_size().unwrap();

        let live: Vec<(Vec<u8>, Vec<u8>)> = vec![(b"x".to_vec(), b"1".to_vec()), (b"y".to_vec(), b"2".to_vec())];
        writer.checkpoint(live.iter().map(|(k, v)| (k.as_slice(), v.as_slice()))).unwrap();
        writer.append(b"z", b"3", Operation::Put).unwrap();
        assert!(writer.total_size().unwrap() < before);
        drop(writer);

        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(keys(&entries), vec![&b"x"[..], b"y", b"z"]);
    }

    #[test]
    fn test_checkpoint_with_undeletable_segment() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path()).unwrap();
        writer.append(b"a", b"1", Operation::Put).unwrap();
        writer.checkpoint(vec![(&b"a"[..], &b"1"[..])]).unwrap();

        // A non-empty directory where the snapshot segment was cannot be removed.
        let blocked = temp.path().join(segment_name(1));
        std::fs::remove_file(&blocked).unwrap();
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("pinned"), b"x").unwrap();

        writer.append(b"b", b"1", Operation::Put).unwrap();
        writer.checkpoint(vec![(&b"a"[..], &b"1"[..]), (&b"b"[..], &b"1"[..])]).unwrap();
        assert_eq!(writer.current_path(), temp.path().join(segment_name(4)));
        assert!(blocked.exists());

        writer.append(b"b", b"", Operation::Remove).unwrap();
        writer.append(b"a", b"2", Operation::Put).unwrap();
        drop(writer);

        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(keys(&entries), vec![&b"a"[..], b"b", b"b", b"a"]);
        assert_eq!(entries[2].operation, Operation::Remove);
        assert_eq!(entries[3].value, b"2");
    }

    #[test]
    fn test_segments_before_checkpoint_ignored() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::new(temp.path()).unwrap();
        writer.append(b"gone", b"1", Operation::Put).unwrap();
        writer.append(b"kept", b"1", Operation::Put).unwrap();
        let first = writer.current_path().to_path_buf();
        let history = std::fs::read(&first).unwrap();

        writer.checkpoint(vec![(&b"kept"[..], &b"1"[..])]).unwrap();
        assert!(!first.exists());
        drop(writer);

        // A superseded segment that survived deletion must not bring `gone` back.
        std::fs::write(&first, history).unwrap();
        let entries = WalReader::new(temp.path()).recover_entries().unwrap();
        assert_eq!(keys(&entries), vec![&b"kept"[..]]);
    }

    #[test]
    fn test_replay_streams_segments_in_order() {
        let temp = TempDir::new().unwrap();
        let mut writer = WalWriter::with_rotation_size(temp.path(), 128).unwrap();
        for i in 0..12u8 {
            writer.append(&[i], &[i; 32], Operation::Put).unwrap();
        }
        drop(writer);
        assert!(list_segments(temp.path()).unwrap().len() > 3);

        let mut seen = Vec::new();
        let visited = WalReader::new(temp.path())
            .replay(|entry| {
                seen.push(entry.key[0]);
                Ok(())
            })
            .unwrap();
        assert_eq!(visited, 12);
        assert_eq!(seen, (0..12u8).collect::<Vec<_>>());

        let err = WalReader::new(temp.path())
            .replay(|_| Err(KvError::invalid("stop")))
            .unwrap_err();
        assert!(err.to_string().contains("stop"));
    }

    #[test]
    fn test_stale_checkpoint_removed() {
        let temp = TempDir::new().unwrap();
        let stale = temp.path().join("wal-0000000000000001.pmkv.compact");
        std::fs::write(&stale, b"partial").unwrap();
        let _writer = WalWriter::new(temp.path()).unwrap();
        assert!(!stale.exists());
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let temp = TempDir::new().unwrap();
        let entries = WalReader::new(temp.path().join("nope")).recover_entries().unwrap();
        assert!(entries.is_empty());
    }
}
