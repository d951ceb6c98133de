//! Core data model for the puller pipeline.
//!
//! Everything that crosses a task boundary is defined here: timestamps, raw
//! KV entries, region feed events, and the whole-transaction form used by the
//! legacy grouping path.

use std::fmt;
use std::mem;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::span::Span;

/// Number of low bits holding the logical component of a hybrid timestamp.
/// The remaining high bits are wall-clock milliseconds.
pub const TS_LOGICAL_BITS: u32 = 18;

/// 64-bit hybrid logical timestamp minted by the upstream oracle.
///
/// The puller only compares and forwards timestamps; it never mints them.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Ts(pub u64);

impl Ts {
    /// Physical (wall-clock, milliseconds) part of the timestamp.
    pub fn physical(self) -> u64 {
        self.0 >> TS_LOGICAL_BITS
    }

    /// Compose a timestamp from its physical and logical parts.
    pub fn compose(physical: u64, logical: u64) -> Ts {
        Ts((physical << TS_LOGICAL_BITS) | logical)
    }
}

impl fmt::Display for Ts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an upstream region (one shard of the KV store).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct RegionId(pub u64);

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region:{}", self.0)
    }
}

/// Kind of a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpType {
    Put,
    Delete,
    /// Pure watermark: no row payload, `crts` is the resolved ts.
    Resolved,
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Put => write!(f, "PUT"),
            Self::Delete => write!(f, "DELETE"),
            Self::Resolved => write!(f, "RESOLVED"),
        }
    }
}

/// A single row mutation, or a resolved-ts watermark in entry form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawKvEntry {
    pub op_type: OpType,
    pub key: Bytes,
    /// New row value (PUT only).
    pub value: Option<Bytes>,
    /// Previous row value, when the upstream captures it (DELETE/overwrite).
    pub old_value: Option<Bytes>,
    /// Transaction start ts.
    pub start_ts: Ts,
    /// Commit ts; for `Resolved` entries this is the resolved ts.
    pub crts: Ts,
    pub region_id: RegionId,
}

impl RawKvEntry {
    pub fn put(key: Bytes, value: Bytes, start_ts: Ts, crts: Ts, region_id: RegionId) -> Self {
        Self {
            op_type: OpType::Put,
            key,
            value: Some(value),
            old_value: None,
            start_ts,
            crts,
            region_id,
        }
    }

    pub fn delete(
        key: Bytes,
        old_value: Option<Bytes>,
        start_ts: Ts,
        crts: Ts,
        region_id: RegionId,
    ) -> Self {
        Self {
            op_type: OpType::Delete,
            key,
            value: None,
            old_value,
            start_ts,
            crts,
            region_id,
        }
    }

    /// Synthetic global watermark entry carrying no row payload.
    pub fn resolved(ts: Ts) -> Self {
        Self {
            op_type: OpType::Resolved,
            key: Bytes::new(),
            value: None,
            old_value: None,
            start_ts: Ts(0),
            crts: ts,
            region_id: RegionId(0),
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.op_type == OpType::Resolved
    }

    /// Approximate in-memory footprint, used for byte-level backpressure
    /// accounting. Advisory only.
    pub fn approximate_size(&self) -> u64 {
        let payload = self.key.len()
            + self.value.as_ref().map_or(0, |v| v.len())
            + self.old_value.as_ref().map_or(0, |v| v.len());
        (payload + mem::size_of::<Self>()) as u64
    }
}

/// A per-span resolved-ts watermark from one region feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedSpan {
    pub span: Span,
    pub resolved_ts: Ts,
}

/// One event from a region feed: a row mutation or a span watermark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegionFeedEvent {
    Val(RawKvEntry),
    Resolved(ResolvedSpan),
}

impl RegionFeedEvent {
    /// Approximate in-memory footprint for backpressure accounting.
    pub fn approximate_size(&self) -> u64 {
        match self {
            Self::Val(entry) => entry.approximate_size(),
            Self::Resolved(resolved) => {
                (resolved.span.start.len() + resolved.span.end.len() + mem::size_of::<Self>())
                    as u64
            }
        }
    }

    /// Metric label for this event kind.
    pub fn kind_label(&self) -> &'static str {
        match self {
            Self::Val(_) => "kv",
            Self::Resolved(_) => "resolved",
        }
    }
}

/// A whole transaction: every entry committed at `ts`.
///
/// An empty entry list is a "fake txn": a pure progress marker emitted so
/// downstream consumers keep advancing through idle resolved-ts windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTxn {
    pub ts: Ts,
    pub entries: Vec<RawKvEntry>,
}

impl RawTxn {
    pub fn is_fake(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ts_physical_compose_roundtrip() {
        let ts = Ts::compose(1_700_000_000_000, 42);
        assert_eq!(ts.physical(), 1_700_000_000_000);
        assert_eq!(ts.0 & ((1 << TS_LOGICAL_BITS) - 1), 42);
    }

    #[test]
    fn test_ts_ordering_is_numeric() {
        assert!(Ts(10) < Ts(20));
        assert_eq!(Ts(15), Ts(15));
    }

    #[test]
    fn test_resolved_entry_has_no_payload() {
        let entry = RawKvEntry::resolved(Ts(99));
        assert!(entry.is_resolved());
        assert!(entry.key.is_empty());
        assert!(entry.value.is_none());
        assert_eq!(entry.crts, Ts(99));
    }

    #[test]
    fn test_approximate_size_counts_payload() {
        let small = RawKvEntry::put(
            Bytes::from_static(b"k"),
            Bytes::from_static(b"v"),
            Ts(1),
            Ts(2),
            RegionId(1),
        );
        let large = RawKvEntry::put(
            Bytes::from_static(b"k"),
            Bytes::from(vec![0u8; 1024]),
            Ts(1),
            Ts(2),
            RegionId(1),
        );
        assert!(large.approximate_size() > small.approximate_size() + 1000);
    }

    #[test]
    fn test_event_kind_labels() {
        let val = RegionFeedEvent::Val(RawKvEntry::resolved(Ts(1)));
        let resolved = RegionFeedEvent::Resolved(ResolvedSpan {
            span: Span::new("a", "b"),
            resolved_ts: Ts(1),
        });
        assert_eq!(val.kind_label(), "kv");
        assert_eq!(resolved.kind_label(), "resolved");
    }

    #[test]
    fn test_fake_txn() {
        let fake = RawTxn {
            ts: Ts(7),
            entries: Vec::new(),
        };
        assert!(fake.is_fake());
    }
}
