//! Span frontier: per-sub-span resolved timestamps over the subscribed spans,
//! with a cached global minimum.
//!
//! The stored sub-spans always form a partition of the subscription set:
//! `forward` splits boundary sub-spans at intersection points instead of
//! mutating them wholesale, so a partially-covered sub-span keeps its old ts
//! on the uncovered remainder.
//!
//! Single-writer: callers serialize `forward`. The puller calls it from the
//! sorted-output task only, which is what makes "forward returned true, read
//! `frontier()`" an atomic view of the new global minimum.

use std::collections::BTreeMap;

use bytes::Bytes;

use brook_common::{Span, Ts};

#[derive(Debug, Clone)]
struct SubSpan {
    end: Bytes,
    ts: Ts,
}

/// Partition of the subscribed spans with a cached global minimum.
#[derive(Debug)]
pub struct SpanFrontier {
    /// Sub-spans keyed by start key.
    entries: BTreeMap<Bytes, SubSpan>,
    min_ts: Ts,
}

impl SpanFrontier {
    /// Build a frontier over `spans`; every sub-span starts at `Ts(0)`.
    /// Spans are expected to be well-formed (`start < end`) and disjoint.
    pub fn new(spans: impl IntoIterator<Item = Span>) -> Self {
        let mut entries = BTreeMap::new();
        for span in spans {
            entries.insert(
                span.start,
                SubSpan {
                    end: span.end,
                    ts: Ts(0),
                },
            );
        }
        Self {
            entries,
            min_ts: Ts(0),
        }
    }

    /// Current global minimum resolved ts.
    pub fn frontier(&self) -> Ts {
        self.min_ts
    }

    /// Raise every stored sub-span covered by `span` to at least `ts`,
    /// splitting partially-overlapped sub-spans so the mapping stays a
    /// partition. Returns `true` iff the global minimum strictly increased.
    ///
    /// A sub-span already at `ts` or above is left untouched, so repeated
    /// forwards of the same `(span, ts)` are no-ops after the first.
    pub fn forward(&mut self, span: &Span, ts: Ts) -> bool {
        let old_min = self.min_ts;
        let mut min_mutated = false;

        // Only sub-spans starting below span.end can intersect it.
        let candidates: Vec<Bytes> = self
            .entries
            .range(..span.end.clone())
            .filter(|(_, sub)| sub.end > span.start)
            .map(|(start, _)| start.clone())
            .collect();

        for start in candidates {
            let Some(sub) = self.entries.get(&start).cloned() else {
                continue;
            };
            if ts <= sub.ts {
                continue;
            }
            let prev_ts = sub.ts;
            let seg_start = if start < span.start {
                span.start.clone()
            } else {
                start.clone()
            };
            let seg_end = if sub.end > span.end {
                span.end.clone()
            } else {
                sub.end.clone()
            };

            if seg_start == start && seg_end == sub.end {
                // Fully covered: raise in place.
                if let Some(stored) = self.entries.get_mut(&start) {
                    stored.ts = ts;
                }
            } else {
                // Partially covered: split, raising only the covered segment.
                self.entries.remove(&start);
                if start < seg_start {
                    self.entries.insert(
                        start.clone(),
                        SubSpan {
                            end: seg_start.clone(),
                            ts: prev_ts,
                        },
                    );
                }
                self.entries.insert(
                    seg_start,
                    SubSpan {
                        end: seg_end.clone(),
                        ts,
                    },
                );
                if seg_end < sub.end {
                    self.entries.insert(
                        seg_end,
                        SubSpan {
                            end: sub.end,
                            ts: prev_ts,
                        },
                    );
                }
            }

            if prev_ts == old_min {
                min_mutated = true;
            }
        }

        // Raising a non-minimum sub-span cannot move the minimum.
        if min_mutated {
            self.min_ts = self
                .entries
                .values()
                .map(|sub| sub.ts)
                .min()
                .unwrap_or(old_min);
        }
        self.min_ts > old_min
    }

    /// Number of stored sub-spans.
    pub fn sub_span_count(&self) -> usize {
        self.entries.len()
    }

    /// The stored partition, in key order. For diagnostics and invariant
    /// checks.
    pub fn coverage(&self) -> Vec<(Span, Ts)> {
        self.entries
            .iter()
            .map(|(start, sub)| {
                (
                    Span {
                        start: start.clone(),
                        end: sub.end.clone(),
                    },
                    sub.ts,
                )
            })
            .collect()
    }
}
