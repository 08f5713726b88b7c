//! Acknowledgment timeout tracking on a monotonic clock.
//!
//! Every ackable packet entering a worker's ack-pending queue gets exactly
//! one live entry here. Expiries with retries left re-front the packet on
//! its owning worker for resend; exhausted expiries discard the packet and
//! fail the record. The service owns no thread of its own; the dispatch
//! engine drives [`TimeoutService::tick`] from its timer thread.

use crate::dispatch::worker::Worker;
use crate::record::OutPacket;
use crate::types::PacketId;
use parking_lot::Mutex;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Deadline tracker for ack-pending packets.
#[derive(Debug)]
pub struct TimeoutService {
    retry_interval: Duration,
    max_retries: u32,
    inner: Mutex<TimeoutInner>,
    stats: TimeoutStats,
}

#[derive(Debug)]
struct TimeoutInner {
    /// Min-heap of (deadline, packet) pairs; stale nodes are skipped
    /// against the live entry map on pop.
    heap: BinaryHeap<Reverse<(Instant, PacketId)>>,
    entries: HashMap<PacketId, TimeoutEntry>,
}

struct TimeoutEntry {
    packet: Weak<OutPacket>,
    worker: Weak<Worker>,
    deadline: Instant,
    retries_remaining: u32,
}

impl std::fmt::Debug for TimeoutEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutEntry")
            .field("deadline", &self.deadline)
            .field("retries_remaining", &self.retries_remaining)
            .finish()
    }
}

impl TimeoutService {
    /// Create a service with the given retransmission policy.
    pub fn new(retry_interval: Duration, max_retries: u32) -> Self {
        Self {
            retry_interval,
            max_retries,
            inner: Mutex::new(TimeoutInner { heap: BinaryHeap::new(), entries: HashMap::new() }),
            stats: TimeoutStats::default(),
        }
    }

    /// Track a freshly dispatched ackable packet.
    ///
    /// The first deadline is one retry interval from now; the entry starts
    /// with the full retry budget.
    pub fn add(&self, packet: &Arc<OutPacket>, worker: &Arc<Worker>) {
        let deadline = Instant::now() + self.retry_interval;
        let mut inner = self.inner.lock();
        inner.entries.insert(
            packet.id(),
            TimeoutEntry {
                packet: Arc::downgrade(packet),
                worker: Arc::downgrade(worker),
                deadline,
                retries_remaining: self.max_retries,
            },
        );
        inner.heap.push(Reverse((deadline, packet.id())));
        self.stats.added.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop the entry for a packet (ack received or queue drained).
    pub fn cancel(&self, packet: PacketId) {
        let removed = self.inner.lock().entries.remove(&packet).is_some();
        if removed {
            self.stats.cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Whether a packet currently has a live entry.
    pub fn contains(&self, packet: PacketId) -> bool {
        self.inner.lock().entries.contains_key(&packet)
    }

    /// Number of live entries.
    pub fn pending_count(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Fire every entry whose deadline has passed.
    ///
    /// Expired work is collected under the service lock and published to
    /// the owning workers only after it is released, so worker locks are
    /// never taken while this lock is held.
    pub fn tick(&self, now: Instant) {
        let mut refire: Vec<(Arc<Worker>, Arc<OutPacket>)> = Vec::new();
        let mut exhausted: Vec<(Arc<Worker>, Arc<OutPacket>)> = Vec::new();

        {
            let mut guard = self.inner.lock();
            let TimeoutInner { heap, entries } = &mut *guard;
            while let Some(&Reverse((deadline, packet_id))) = heap.peek() {
                if deadline > now {
                    break;
                }
                heap.pop();

                let Some(entry) = entries.get_mut(&packet_id) else {
                    continue; // cancelled; stale heap node
                };
                if entry.deadline != deadline {
                    continue; // rescheduled; a newer heap node exists
                }

                let upgraded = (entry.packet.upgrade(), entry.worker.upgrade());
                let (Some(packet), Some(worker)) = upgraded else {
                    entries.remove(&packet_id);
                    continue;
                };

                if entry.retries_remaining > 0 {
                    entry.retries_remaining -= 1;
                    entry.deadline = now + self.retry_interval;
                    heap.push(Reverse((entry.deadline, packet_id)));
                    refire.push((worker, packet));
                } else {
                    entries.remove(&packet_id);
                    exhausted.push((worker, packet));
                }
            }
        }

        for (worker, packet) in refire {
            debug!(
                packet = %packet.id(),
                record = packet.state().id(),
                worker = %worker.uid(),
                "ack timeout, re-fronting for resend"
            );
            self.stats.refired.fetch_add(1, Ordering::Relaxed);
            worker.repop_front(&packet);
        }

        for (worker, packet) in exhausted {
            warn!(
                packet = %packet.id(),
                record = packet.state().id(),
                worker = %worker.uid(),
                "retries exhausted, discarding packet"
            );
            self.stats.exhausted.fetch_add(1, Ordering::Relaxed);
            worker.discard(&packet);
        }
    }

    /// Drop every entry (engine shutdown).
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.heap.clear();
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TimeoutStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Timeout service counters.
#[derive(Debug, Default)]
struct TimeoutStats {
    added: AtomicU64,
    cancelled: AtomicU64,
    refired: AtomicU64,
    exhausted: AtomicU64,
}

impl TimeoutStats {
    fn snapshot(&self) -> TimeoutStatsSnapshot {
        TimeoutStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            refired: self.refired.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of timeout counters.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutStatsSnapshot {
    /// Entries created.
    pub added: u64,
    /// Entries cancelled by acks or drains.
    pub cancelled: u64,
    /// Expiries that re-fronted a packet.
    pub refired: u64,
    /// Expiries that exhausted the retry budget.
    pub exhausted: u64,
}
