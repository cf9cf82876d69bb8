//! Byte-addressable record arena with stable handles.
//!
//! The arena is a region of at most `capacity` bytes. Each record lives in
//! one 8-byte aligned extent, laid out as `key_len: u32 LE | key | value`.
//! Indices never see offsets: they hold a `RecordHandle`, a slot in the
//! handle table that the arena rewrites whenever it relocates an extent.
//!
//! Free space below the high watermark is kept as coalesced holes. Allocation
//! is first fit over the holes, then bump at the watermark. A request that
//! fits neither fails with `OutOfMemory` even if the holes add up to enough,
//! which is the fragmentation `defrag` removes.

use std::collections::BTreeMap;

use crate::error::{KvError, KvResult};

const ALIGN: u64 = 8;
const KEY_LEN_PREFIX: usize = 4;

/// Stable reference to a record in an `Arena`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHandle(u32);

#[derive(Debug, Clone, Copy)]
struct Extent {
    offset: u64,
    /// Exact record length; the reserved space is `aligned(len)`.
    len: u64,
}

impl Extent {
    fn reserved(&self) -> u64 {
        aligned(self.len)
    }
}

fn aligned(len: u64) -> u64 {
    (len + ALIGN - 1) / ALIGN * ALIGN
}

/// Defrag bounds are percentages with `start <= end <= 100`.
pub fn check_defrag_range(start_percent: u8, end_percent: u8) -> KvResult<()> {
    if start_percent > end_percent || end_percent > 100 {
        return Err(KvError::invalid(format!(
            "defrag range {}..{} must satisfy start <= end <= 100",
            start_percent, end_percent
        )));
    }
    Ok(())
}

/// Outcome of one defragmentation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DefragStats {
    /// Records considered for relocation
    pub candidates: usize,
    /// Records actually moved
    pub relocated: usize,
    /// Bytes copied
    pub bytes_moved: u64,
}

pub struct Arena {
    capacity: u64,
    bytes: Vec<u8>,
    slots: Vec<Option<Extent>>,
    free_slots: Vec<u32>,
    holes: BTreeMap<u64, u64>,
    used: u64,
}

impl Arena {
    pub fn new(capacity: u64) -> Self {
        Self {
            capacity,
            bytes: Vec::new(),
            slots: Vec::new(),
            free_slots: Vec::new(),
            holes: BTreeMap::new(),
            used: 0,
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes reserved by live records.
    pub fn used_bytes(&self) -> u64 {
        self.used
    }

    /// Bytes not reserved by any record, fragmented or not.
    pub fn free_bytes(&self) -> u64 {
        self.capacity - self.used
    }

    /// Free bytes trapped below the high watermark.
    pub fn hole_bytes(&self) -> u64 {
        self.holes.values().sum()
    }

    /// Largest request that would currently succeed.
    pub fn largest_free_extent(&self) -> u64 {
        let tail = self.capacity - self.bytes.len() as u64;
        self.holes.values().copied().fold(tail, u64::max)
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free_slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes a record with this key and value occupies.
    pub fn footprint(key: &[u8], value: &[u8]) -> u64 {
        aligned((KEY_LEN_PREFIX + key.len() + value.len()) as u64)
    }

    /// Copy a record into the arena.
    pub fn store(&mut self, key: &[u8], value: &[u8]) -> KvResult<RecordHandle> {
        let len = (KEY_LEN_PREFIX + key.len() + value.len()) as u64;
        let offset = self.reserve(aligned(len))?;

        let start = offset as usize;
        let key_end = start + KEY_LEN_PREFIX + key.len();
        self.bytes[start..start + KEY_LEN_PREFIX].copy_from_slice(&(key.len() as u32).to_le_bytes());
        self.bytes[start + KEY_LEN_PREFIX..key_end].copy_from_slice(key);
        self.bytes[key_end..key_end + value.len()].copy_from_slice(value);

        let extent = Extent { offset, len };
        let handle = match self.free_slots.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(extent);
                RecordHandle(slot)
            }
            None => {
                self.slots.push(Some(extent));
                RecordHandle((self.slots.len() - 1) as u32)
            }
        };
        Ok(handle)
    }

    /// Key and value of a live record.
    ///
    /// Panics if `handle` was already freed; handles are owned by exactly
    /// one index entry, so that is an engine bug.
    pub fn record(&self, handle: RecordHandle) -> (&[u8], &[u8]) {
        let extent = self.slots[handle.0 as usize].expect("record handle used after free");
        let start = extent.offset as usize;
        let end = start + extent.len as usize;
        let mut prefix = [0u8; KEY_LEN_PREFIX];
        prefix.copy_from_slice(&self.bytes[start..start + KEY_LEN_PREFIX]);
        let key_end = start + KEY_LEN_PREFIX + u32::from_le_bytes(prefix) as usize;
        (&self.bytes[start + KEY_LEN_PREFIX..key_end], &self.bytes[key_end..end])
    }

    pub fn key(&self, handle: RecordHandle) -> &[u8] {
        self.record(handle).0
    }

    pub fn value(&self, handle: RecordHandle) -> &[u8] {
        self.record(handle).1
    }

    /// Every live record, in slot order.
    pub fn records(&self) -> impl Iterator<Item = (&[u8], &[u8])> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, extent)| extent.is_some())
            .map(move |(slot, _)| self.record(RecordHandle(slot as u32)))
    }

    /// Release a record's space. The handle must not be used again.
    pub fn free(&mut self, handle: RecordHandle) {
        if let Some(extent) = self.slots[handle.0 as usize].take() {
            self.free_slots.push(handle.0);
            self.used -= extent.reserved();
            self.release(extent.offset, extent.reserved());
        }
    }

    fn reserve(&mut self, size: u64) -> KvResult<u64> {
        let hole = self
            .holes
            .iter()
            .find(|(_, len)| **len >= size)
            .map(|(offset, len)| (*offset, *len));

        let offset = match hole {
            Some((offset, len)) => {
                self.holes.remove(&offset);
                if len > size {
                    self.holes.insert(offset + size, len - size);
                }
                offset
            }
            None => {
                let watermark = self.bytes.len() as u64;
                if watermark + size > self.capacity {
                    return Err(KvError::OutOfMemory {
                        requested: size,
                        available: self.free_bytes(),
                    });
                }
                self.bytes.resize((watermark + size) as usize, 0);
                watermark
            }
        };

        self.used += size;
        Ok(offset)
    }

    /// Return `[offset, offset + size)` to the free space.
    fn release(&mut self, mut offset: u64, mut size: u64) {
        if let Some((&prev_off, &prev_len)) = self.holes.range(..offset).next_back() {
            if prev_off + prev_len == offset {
                self.holes.remove(&prev_off);
                offset = prev_off;
                size += prev_len;
            }
        }
        if let Some(next_len) = self.holes.remove(&(offset + size)) {
            size += next_len;
        }

        if offset + size == self.bytes.len() as u64 {
            self.bytes.truncate(offset as usize);
        } else {
            self.holes.insert(offset, size);
        }
    }

    /// Slide records into lower holes.
    ///
    /// Live records are ranked by offset; those ranked within
    /// `[start_percent, end_percent]` of the live set are candidates. Each
    /// candidate moves to the lowest hole below it that can hold it. Handles
    /// stay valid and record contents are unchanged.
    pub fn defrag(&mut self, start_percent: u8, end_percent: u8) -> KvResult<DefragStats> {
        check_defrag_range(start_percent, end_percent)?;

        let mut live: Vec<(u64, u32)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(slot, extent)| extent.map(|e| (e.offset, slot as u32)))
            .collect();
        live.sort_unstable();

        let n = live.len();
        let lo = n * start_percent as usize / 100;
        let hi = ((n * end_percent as usize + 99) / 100).min(n);
        let mut stats = DefragStats { candidates: hi.saturating_sub(lo), ..Default::default() };

        for &(_, slot) in &live[lo..hi.max(lo)] {
            let Some(extent) = self.slots[slot as usize] else { continue };
            let size = extent.reserved();
            let target = self
                .holes
                .range(..extent.offset)
                .find(|(_, len)| **len >= size)
                .map(|(offset, len)| (*offset, *len));

            if let Some((hole_off, hole_len)) = target {
                self.holes.remove(&hole_off);
                if hole_len > size {
                    self.holes.insert(hole_off + size, hole_len - size);
                }
                let src = extent.offset as usize;
                self.bytes.copy_within(src..src + extent.len as usize, hole_off as usize);
                self.slots[slot as usize] = Some(Extent { offset: hole_off, len: extent.len });
                self.release(extent.offset, size);

                stats.relocated += 1;
                stats.bytes_moved += extent.len;
            }
        }

        Ok(stats)
    }
}

impl std::fmt::Debug for Arena {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arena")
            .field("capacity", &self.capacity)
            .field("records", &self.len())
            .field("used", &self.used)
            .field("watermark", &self.bytes.len())
            .field("holes", &self.holes.len())
            .finish()
    }
}
