//! Fixed-capacity, NUL-terminated byte string cell.
//!
//! `PersistentString<N>` owns `N` data bytes followed by one terminator byte.
//! The byte at `len()` is always zero, and `len() <= N` holds for the whole
//! life of the cell. There is no resize: callers that need more room build a
//! new cell and replace the old one.

use std::cmp::Ordering;
use std::fmt;

/// Source data did not fit the cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LengthExceeded {
    /// Length of the rejected source
    pub length: usize,
    /// Capacity of the cell
    pub capacity: usize,
}

impl fmt::Display for LengthExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes exceed string capacity of {}", self.length, self.capacity)
    }
}

impl std::error::Error for LengthExceeded {}

impl From<LengthExceeded> for crate::error::KvError {
    fn from(err: LengthExceeded) -> Self {
        crate::error::KvError::InvalidArgument { reason: err.to_string() }
    }
}

#[derive(Clone, Copy)]
#[repr(C)]
pub struct PersistentString<const N: usize> {
    size: u32,
    data: [u8; N],
    terminator: u8,
}

impl<const N: usize> PersistentString<N> {
    /// Size of the on-media encoding: size word, data bytes, terminator.
    pub const ENCODED_LEN: usize = 4 + N + 1;

    pub fn new() -> Self {
        Self { size: 0, data: [0; N], terminator: 0 }
    }

    /// Copy `src` into a new cell. Fails instead of truncating.
    pub fn try_from_bytes(src: &[u8]) -> Result<Self, LengthExceeded> {
        if src.len() > N {
            return Err(LengthExceeded { length: src.len(), capacity: N });
        }
        let mut cell = Self::new();
        cell.data[..src.len()].copy_from_slice(src);
        cell.size = src.len() as u32;
        Ok(cell)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data[..self.size as usize]
    }

    pub fn len(&self) -> usize {
        self.size as usize
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Byte at `index`, where `index == len()` reads the terminator.
    pub fn byte_at(&self, index: usize) -> Option<u8> {
        let size = self.size as usize;
        match index.cmp(&size) {
            Ordering::Less => Some(self.data[index]),
            Ordering::Equal if size == N => Some(self.terminator),
            Ordering::Equal => Some(self.data[size]),
            Ordering::Greater => None,
        }
    }

    /// Shared prefix decides; otherwise the shorter string sorts first.
    pub fn compare(&self, other: &[u8]) -> Ordering {
        let mine = self.as_bytes();
        let shared = mine.len().min(other.len());
        match mine[..shared].cmp(&other[..shared]) {
            Ordering::Equal => mine.len().cmp(&other.len()),
            unequal => unequal,
        }
    }

    /// Append the fixed-width encoding to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.size.to_le_bytes());
        out.extend_from_slice(&self.data);
        out.push(self.terminator);
    }

    /// Decode a cell written by `write_to`. Returns `None` when the size word
    /// is out of range or the terminator is missing.
    pub fn read_from(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::ENCODED_LEN {
            return None;
        }
        let size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
        if size > N {
            return None;
        }
        let body = &bytes[4..4 + N + 1];
        if body[size] != 0 {
            return None;
        }
        Self::try_from_bytes(&body[..size]).ok()
    }
}

impl<const N: usize> Default for PersistentString<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> TryFrom<&[u8]> for PersistentString<N> {
    type Error = LengthExceeded;

    fn try_from(src: &[u8]) -> Result<Self, Self::Error> {
        Self::try_from_bytes(src)
    }
}

impl<const N: usize> TryFrom<&str> for PersistentString<N> {
    type Error = LengthExceeded;

    fn try_from(src: &str) -> Result<Self, Self::Error> {
        Self::try_from_bytes(src.as_bytes())
    }
}

impl<const N: usize> PartialEq for PersistentString<N> {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other.as_bytes()) == Ordering::Equal
    }
}

impl<const N: usize> Eq for PersistentString<N> {}

impl<const N: usize> PartialOrd for PersistentString<N> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<const N: usize> Ord for PersistentString<N> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other.as_bytes())
    }
}

impl<const N: usize> fmt::Debug for PersistentString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersistentString<{}>({:?})", N, String::from_utf8_lossy(self.as_bytes()))
    }
}
