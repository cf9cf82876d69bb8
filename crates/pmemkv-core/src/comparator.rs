//! Pluggable key ordering for ordered engines.
//!
//! A comparator must be a strict total order. Only its name is persisted: an
//! ordered pool records the name at creation and refuses to open with any
//! other name. Two comparators with equal names are assumed to be the same
//! function.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Name under which the default byte-wise ordering is recorded.
pub const BINARY_COMPARATOR_NAME: &str = "__pmemkv_binary_comparator";

pub trait Comparator: Send + Sync {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering;

    /// Stable identifier stored in pool metadata.
    fn name(&self) -> &str;
}

/// Lexicographic comparison of raw bytes.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinaryComparator;

impl Comparator for BinaryComparator {
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        a.cmp(b)
    }

    fn name(&self) -> &str {
        BINARY_COMPARATOR_NAME
    }
}

/// Comparator built from a closure and a name.
pub struct FnComparator<F> {
    name: String,
    func: F,
}

impl<F> FnComparator<F>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self { name: name.into(), func }
    }
}

impl<F> Comparator for FnComparator<F>
where
    F: Fn(&[u8], &[u8]) -> Ordering + Send + Sync,
{
    fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.func)(a, b)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl<F> fmt::Debug for FnComparator<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnComparator").field("name", &self.name).finish()
    }
}

/// Shared comparator handle as held by configs and engines.
pub type SharedComparator = Arc<dyn Comparator>;

pub fn binary_comparator() -> SharedComparator {
    Arc::new(BinaryComparator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_comparator() {
        let cmp = BinaryComparator;
        assert_eq!(cmp.compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.compare(b"ab", b"a"), Ordering::Greater);
        assert_eq!(cmp.compare(b"", b""), Ordering::Equal);
        assert_eq!(cmp.name(), BINARY_COMPARATOR_NAME);
    }

    #[test]
    fn test_fn_comparator() {
        let reverse = FnComparator::new("reverse", |a: &[u8], b: &[u8]| b.cmp(a));
        assert_eq!(reverse.compare(b"a", b"b"), Ordering::Greater);
        assert_eq!(reverse.name(), "reverse");
        assert!(format!("{:?}", reverse).contains("reverse"));
    }
}
