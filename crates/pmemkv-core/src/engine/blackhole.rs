//! `blackhole`: accepts every write and stores nothing.

use std::ops::Bound;

use log::debug;

use crate::arena::check_defrag_range;
use crate::config::Config;
use crate::engine::{Engine, RecordCallback, ValueCallback};
use crate::error::{KvError, KvResult};
use crate::format::check_sizes;

pub const NAME: &str = "blackhole";

#[derive(Debug, Default)]
pub struct Blackhole;

impl Blackhole {
    /// Options are accepted but unused; no path is required.
    pub fn open(config: &Config) -> KvResult<Self> {
        debug!("opening {} with {} options", NAME, config.len());
        Ok(Self)
    }
}

impl Engine for Blackhole {
    fn name(&self) -> &'static str {
        NAME
    }

    fn put(&self, key: &[u8], value: &[u8]) -> KvResult<()> {
        check_sizes(key, value)
    }

    fn get_with(&self, _key: &[u8], _callback: ValueCallback<'_>) -> KvResult<()> {
        Err(KvError::NotFound)
    }

    fn exists(&self, _key: &[u8]) -> KvResult<()> {
        Err(KvError::NotFound)
    }

    fn remove(&self, _key: &[u8]) -> KvResult<()> {
        Ok(())
    }

    fn count_all(&self) -> KvResult<usize> {
        Ok(0)
    }

    fn count(&self, _prefix: Option<&[u8]>) -> KvResult<usize> {
        Ok(0)
    }

    fn iterate(&self, _prefix: Option<&[u8]>, _callback: RecordCallback<'_>) -> KvResult<()> {
        Ok(())
    }

    fn count_range(&self, _lower: Bound<&[u8]>, _upper: Bound<&[u8]>) -> KvResult<usize> {
        Ok(0)
    }

    fn get_range(&self, _lower: Bound<&[u8]>, _upper: Bound<&[u8]>, _callback: RecordCallback<'_>) -> KvResult<()> {
        Ok(())
    }

    fn defrag(&self, start_percent: u8, end_percent: u8) -> KvResult<()> {
        check_defrag_range(start_percent, end_percent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Status;

    #[test]
    fn test_swallows_everything() {
        let hole = Blackhole::open(&Config::new()).unwrap();
        hole.put(b"k", b"v").unwrap();
        assert_eq!(hole.get(b"k").unwrap_err().status(), Status::NotFound);
        assert_eq!(hole.exists(b"k").unwrap_err().status(), Status::NotFound);
        assert_eq!(hole.count_all().unwrap(), 0);
        assert_eq!(hole.count(Some(&b"k"[..])).unwrap(), 0);
        hole.remove(b"k").unwrap();

        let mut calls = 0;
        hole.iterate(None, &mut |_: &[u8], _: &[u8]| {
            calls += 1;
            0
        })
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(hole.count_range(Bound::Unbounded, Bound::Unbounded).unwrap(), 0);
    }

    #[test]
    fn test_defrag_still_validates() {
        let hole = Blackhole::open(&Config::new()).unwrap();
        hole.defrag(0, 100).unwrap();
        assert_eq!(hole.defrag(60, 40).unwrap_err().status(), Status::InvalidArgument);
        assert_eq!(hole.begin_transaction().unwrap_err().status(), Status::NotSupported);
    }
}
