//! Append-only stream log implementation
//!
//! Each stream key holds an ordered log of timestamped entries. Entry ids
//! are (millisecond, sequence) pairs compared lexicographically; appends
//! must be strictly increasing. Id 0-0 is a reserved sentinel and never a
//! valid target of an explicit append.

use crate::error::CommandError;
use std::cmp::Ordering as CmpOrdering;
use std::fmt::{self, Display};
use std::time::{SystemTime, UNIX_EPOCH};

/// A stream entry id with bit-packed representation
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub struct StreamId {
    /// Packed representation: high 64 bits = millis, low 64 bits = seq
    packed: u128,
}

/// A single stream entry. Field order is preserved for replies.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamEntry {
    pub id: StreamId,
    pub fields: Vec<(Vec<u8>, Vec<u8>)>,
}

/// How XADD names the entry to append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendId {
    /// `*` - wall-clock millis with auto sequence
    Auto,

    /// `<ms>-*` - explicit millis, auto sequence
    AtMillis(u64),

    /// `<ms>-<seq>` - fully explicit
    Explicit(StreamId),
}

/// Per-key ordered log of entries
#[derive(Debug, Clone, Default)]
pub struct StreamLog {
    entries: Vec<StreamEntry>,
    last_id: StreamId,
}

impl StreamId {
    #[inline]
    pub fn new(millis: u64, seq: u64) -> Self {
        StreamId {
            packed: ((millis as u128) << 64) | (seq as u128),
        }
    }

    #[inline]
    pub fn millis(&self) -> u64 {
        (self.packed >> 64) as u64
    }

    #[inline]
    pub fn seq(&self) -> u64 {
        self.packed as u64
    }

    pub fn zero() -> Self {
        StreamId { packed: 0 }
    }

    pub fn min() -> Self {
        StreamId { packed: 0 }
    }

    pub fn max() -> Self {
        StreamId { packed: u128::MAX }
    }

    pub fn is_zero(&self) -> bool {
        self.packed == 0
    }

    /// Parse an explicit "<ms>-<seq>" id
    pub fn from_string(s: &str) -> Option<Self> {
        let (millis_str, seq_str) = s.split_once('-')?;
        let millis = millis_str.parse::<u64>().ok()?;
        let seq = seq_str.parse::<u64>().ok()?;
        Some(StreamId::new(millis, seq))
    }

    /// Parse a range bound. A bound lacking a sequence component matches
    /// the whole millisecond: the start side resolves to seq 0, the end
    /// side to seq MAX.
    pub fn parse_bound(s: &str, is_start: bool) -> Option<Self> {
        if s == "-" {
            return Some(StreamId::min());
        }
        if s == "+" {
            return Some(StreamId::max());
        }
        if s.contains('-') {
            return Self::from_string(s);
        }
        let millis = s.parse::<u64>().ok()?;
        Some(if is_start {
            StreamId::new(millis, 0)
        } else {
            StreamId::new(millis, u64::MAX)
        })
    }
}

impl PartialOrd for StreamId {
    #[inline]
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl Ord for StreamId {
    #[inline]
    fn cmp(&self, other: &Self) -> CmpOrdering {
        self.packed.cmp(&other.packed)
    }
}

impl Default for StreamId {
    fn default() -> Self {
        Self::zero()
    }
}

impl Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis(), self.seq())
    }
}

/// Wall clock in unix milliseconds
fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

impl StreamLog {
    pub fn new() -> Self {
        StreamLog {
            entries: Vec::new(),
            last_id: StreamId::zero(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Id of the most recently appended entry; 0-0 for a fresh log
    pub fn last_id(&self) -> StreamId {
        self.last_id
    }

    /// Append an entry, validating and resolving its id.
    ///
    /// Validation order: explicit 0-0 is rejected outright; an explicit id
    /// not greater than the last entry's id is rejected; an auto sequence
    /// for the last entry's millisecond continues it, a new millisecond
    /// starts at 0 (the fresh-log ms == 0 case lands on 1, keeping 0-0
    /// reserved).
    pub fn append(
        &mut self,
        id: AppendId,
        fields: Vec<(Vec<u8>, Vec<u8>)>,
    ) -> Result<StreamId, CommandError> {
        let assigned = match id {
            AppendId::Explicit(id) => {
                if id.is_zero() {
                    return Err(CommandError::InvalidStreamId(
                        "The ID specified in XADD must be greater than 0-0".into(),
                    ));
                }
                if id <= self.last_id {
                    return Err(CommandError::InvalidStreamId(
                        "The ID specified in XADD is equal or smaller than the target stream top item"
                            .into(),
                    ));
                }
                id
            }
            AppendId::AtMillis(millis) => {
                let candidate = self.next_seq_for(millis);
                if candidate <= self.last_id {
                    return Err(CommandError::InvalidStreamId(
                        "The ID specified in XADD is equal or smaller than the target stream top item"
                            .into(),
                    ));
                }
                candidate
            }
            AppendId::Auto => {
                let now = wall_clock_ms();
                if now <= self.last_id.millis() {
                    StreamId::new(self.last_id.millis(), self.last_id.seq() + 1)
                } else {
                    StreamId::new(now, 0)
                }
            }
        };

        self.entries.push(StreamEntry {
            id: assigned,
            fields,
        });
        self.last_id = assigned;
        Ok(assigned)
    }

    fn next_seq_for(&self, millis: u64) -> StreamId {
        if millis == self.last_id.millis() {
            // Covers the fresh-log millis == 0 case too: 0-0 -> 0-1
            StreamId::new(millis, self.last_id.seq() + 1)
        } else {
            StreamId::new(millis, 0)
        }
    }

    /// Entries with start <= id <= end, in append order
    pub fn range(&self, start: StreamId, end: StreamId) -> Vec<StreamEntry> {
        let start_idx = self
            .entries
            .binary_search_by(|e| e.id.cmp(&start))
            .unwrap_or_else(|idx| idx);

        self.entries[start_idx..]
            .iter()
            .take_while(|e| e.id <= end)
            .cloned()
            .collect()
    }

    /// Entries with id strictly greater than `after`, in append order
    pub fn read_after(&self, after: StreamId) -> Vec<StreamEntry> {
        let start_idx = self
            .entries
            .binary_search_by(|e| e.id.cmp(&after))
            .map(|idx| idx + 1)
            .unwrap_or_else(|idx| idx);

        self.entries[start_idx..].to_vec()
    }
}
