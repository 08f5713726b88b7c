//! Common types used throughout the Outrider dispatch engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a downstream worker endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WorkerUid(pub u64);

impl fmt::Display for WorkerUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for WorkerUid {
    fn from(uid: u64) -> Self {
        Self(uid)
    }
}

impl WorkerUid {
    /// Get the raw identifier value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

/// Process-unique identifier of an outbound packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PacketId(pub u64);

static PACKET_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

impl PacketId {
    /// Generate a new unique packet identifier.
    pub fn next() -> Self {
        Self(PACKET_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw identifier value.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Dispatch priority band for outbound records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Priority {
    /// Urgent traffic; eligible for quick-send workers.
    High = 0,
    /// Normal business traffic.
    Medium = 1,
    /// Batch traffic; protected from starvation by promotion.
    Low = 2,
}

impl Priority {
    /// Map a producer-facing priority level onto a band.
    ///
    /// `0` maps to [`Priority::High`], `1` to [`Priority::Medium`], and any
    /// other value to [`Priority::Low`].
    pub const fn from_level(level: u8) -> Self {
        match level {
            0 => Self::High,
            1 => Self::Medium,
            _ => Self::Low,
        }
    }

    /// Whether the band counts toward the LOW-starvation streak.
    pub const fn is_urgent(self) -> bool {
        matches!(self, Self::High | Self::Medium)
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
        }
    }
}

/// Terminal status of an outbound record's in-flight state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum RecordStatus {
    /// Packets are queued or awaiting acknowledgment.
    Pending = 0,
    /// Every packet has been acknowledged (or delivered, for
    /// fire-and-forget records).
    Acked = 1,
    /// Retransmission retries were exhausted for at least one packet.
    Failed = 2,
    /// The record was drained during shutdown before completing.
    Drained = 3,
}

impl RecordStatus {
    /// Safely convert from the atomic representation.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Pending),
            1 => Some(Self::Acked),
            2 => Some(Self::Failed),
            3 => Some(Self::Drained),
            _ => None,
        }
    }

    /// Whether the record has reached a terminal state.
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Acked => write!(f, "acked"),
            Self::Failed => write!(f, "failed"),
            Self::Drained => write!(f, "drained"),
        }
    }
}
