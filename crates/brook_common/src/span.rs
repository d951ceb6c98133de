//! Half-open key spans and key membership tests.

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::keys;

/// A half-open key range `[start, end)` under lexicographic byte order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Bytes,
    pub end: Bytes,
}

impl Span {
    pub fn new(start: impl Into<Bytes>, end: impl Into<Bytes>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
        }
    }

    /// True when `key` falls inside `[start, end)`.
    pub fn contains(&self, key: &[u8]) -> bool {
        key >= &self.start[..] && key < &self.end[..]
    }

    /// True when `other` lies entirely inside this span.
    pub fn covers(&self, other: &Span) -> bool {
        other.start >= self.start && other.end <= self.end
    }

    /// True when the two ranges share at least one key.
    pub fn intersects(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        fmt_key(f, &self.start)?;
        write!(f, ", ")?;
        fmt_key(f, &self.end)?;
        write!(f, ")")
    }
}

fn fmt_key(f: &mut fmt::Formatter<'_>, key: &[u8]) -> fmt::Result {
    for b in key {
        write!(f, "{:02x}", b)?;
    }
    Ok(())
}

/// Test whether `key` belongs to any of `spans`.
///
/// Span bounds are held in the upstream's memcomparable form; when the feed
/// delivers raw keys (`need_encode`), the key is encoded before comparison.
pub fn key_in_spans(key: &[u8], spans: &[Span], need_encode: bool) -> bool {
    if need_encode {
        let encoded = keys::encode_bytes(key);
        spans.iter().any(|span| span.contains(&encoded))
    } else {
        spans.iter().any(|span| span.contains(key))
    }
}
