//! Per-endpoint queueing unit.
//!
//! A worker owns two ordered packet queues for a single downstream
//! transport endpoint: `pending_send` holds packets awaiting initial
//! dispatch, `ack_pending` holds dispatched-but-unacked ackable packets.
//! All queue mutation happens under one mutex; the attendance, ack-repop,
//! and quick-send flags are atomics that may be read as hints outside it.

use crate::dispatch::registry::RecordRegistry;
use crate::dispatch::timeout::TimeoutService;
use crate::record::OutPacket;
use crate::types::WorkerUid;
use crate::{Error, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
#[cfg(test)]
use std::sync::atomic::AtomicU32;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// The engine's handle for one downstream transport endpoint.
#[derive(Debug)]
pub struct Worker {
    uid: WorkerUid,
    capacity: usize,
    queues: Mutex<WorkerQueues>,
    /// Whether the endpoint's transport is connected.
    attendance: AtomicBool,
    /// Resend hint: the next `next_packet` serves the ack-pending front.
    ack_repop: AtomicBool,
    /// Scheduling hint: prefer this worker for bursty HIGH traffic.
    quick_send: AtomicBool,
    timeout: Arc<TimeoutService>,
    registry: Arc<RecordRegistry>,
    stats: WorkerStats,
    /// Deterministic rejection hook for enqueue-failure tests.
    #[cfg(test)]
    forced_rejections: AtomicU32,
}

#[derive(Debug, Default)]
struct WorkerQueues {
    pending_send: VecDeque<Arc<OutPacket>>,
    ack_pending: VecDeque<Arc<OutPacket>>,
}

impl Worker {
    /// Create a worker for the given endpoint.
    ///
    /// Workers start checked in; the transport layer flips attendance on
    /// connect and disconnect.
    pub fn new(
        uid: WorkerUid,
        capacity: usize,
        timeout: Arc<TimeoutService>,
        registry: Arc<RecordRegistry>,
    ) -> Self {
        Self {
            uid,
            capacity,
            queues: Mutex::new(WorkerQueues::default()),
            attendance: AtomicBool::new(true),
            ack_repop: AtomicBool::new(false),
            quick_send: AtomicBool::new(false),
            timeout,
            registry,
            stats: WorkerStats::default(),
            #[cfg(test)]
            forced_rejections: AtomicU32::new(0),
        }
    }

    /// Force the next `count` enqueue attempts to report a full queue.
    #[cfg(test)]
    pub(crate) fn force_queue_rejections(&self, count: u32) {
        self.forced_rejections.store(count, Ordering::Release);
    }

    #[cfg(test)]
    fn take_forced_rejection(&self) -> bool {
        self.forced_rejections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }

    #[cfg(not(test))]
    fn take_forced_rejection(&self) -> bool {
        false
    }

    /// The worker's endpoint identifier.
    pub fn uid(&self) -> WorkerUid {
        self.uid
    }

    /// Configured queue capacity shared by both queues.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a packet to the pending-send queue.
    ///
    /// # Errors
    /// Returns [`Error::QueueFull`] when the two queues together have
    /// reached capacity; accepting would break the queue-sum bound.
    pub fn queue(&self, packet: Arc<OutPacket>) -> Result<()> {
        if self.take_forced_rejection() {
            return Err(Error::QueueFull { worker: self.uid });
        }

        let mut queues = self.queues.lock();
        if queues.pending_send.len() + queues.ack_pending.len() >= self.capacity {
            trace!(worker = %self.uid, "enqueue rejected, queues at capacity");
            return Err(Error::QueueFull { worker: self.uid });
        }
        trace!(worker = %self.uid, packet = %packet.id(), "packet queued");
        queues.pending_send.push_back(packet);
        self.stats.queued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Hand the next payload to the transport, or `None` when idle.
    ///
    /// Selection order: a set ack-repop flag serves the ack-pending front
    /// (resend); otherwise the pending-send head is served, except that an
    /// ackable head is skipped in favor of the first non-ackable packet
    /// while the ack-pending queue is past half capacity. With no
    /// non-ackable packet available the worker is paused by backpressure
    /// and returns `None` rather than busy-waiting.
    pub fn next_packet(self: &Arc<Self>) -> Option<Bytes> {
        let mut queues = self.queues.lock();

        if self.ack_repop.swap(false, Ordering::AcqRel) {
            if let Some(front) = queues.ack_pending.front() {
                debug!(worker = %self.uid, record = front.state().id(), "resending unacked packet");
                front.mark_delivered();
                self.stats.resent.fetch_add(1, Ordering::Relaxed);
                return Some(front.payload());
            }
            // Flag was set but the queue drained in between; fall through.
        }

        let head_is_ackable = queues.pending_send.front()?.is_ackable();

        if head_is_ackable && queues.ack_pending.len() > self.capacity / 2 {
            // Ack backpressure: only fire-and-forget traffic may pass.
            let Some(pos) = queues.pending_send.iter().position(|p| !p.is_ackable()) else {
                trace!(worker = %self.uid, "paused by ack backpressure");
                return None;
            };
            let packet = queues.pending_send.remove(pos)?;
            drop(queues);
            debug!(worker = %self.uid, packet = %packet.id(), "backpressure skip, sending non-ackable");
            self.finish_fire_and_forget(&packet);
            return Some(packet.payload());
        }

        let packet = queues.pending_send.pop_front()?;
        if packet.is_ackable() {
            // Insertion into ack-pending and timeout registration happen
            // under the queue mutex so the two stay in lockstep.
            self.timeout.add(&packet, self);
            queues.ack_pending.push_back(packet.clone());
            packet.mark_delivered();
            self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
            return Some(packet.payload());
        }

        drop(queues);
        self.finish_fire_and_forget(&packet);
        Some(packet.payload())
    }

    /// Delivery completes a fire-and-forget packet outright.
    fn finish_fire_and_forget(&self, packet: &Arc<OutPacket>) {
        packet.mark_delivered();
        self.stats.dispatched.fetch_add(1, Ordering::Relaxed);
        if packet.state().release_packet() {
            self.registry.retire(packet.state().alias());
        }
    }

    /// Match an acknowledgment frame against the ack-pending queue.
    ///
    /// On a match the packet is released: its timeout entry is cancelled,
    /// the record's outstanding count drops, and a completed record is
    /// retired from the registry.
    ///
    /// # Errors
    /// Returns [`Error::AckNotFound`] when no ack-pending packet carries
    /// the id; duplicate and post-timeout acks land here and are dropped.
    pub fn ack(&self, id: &str) -> Result<()> {
        let mut queues = self.queues.lock();
        let pos = queues.ack_pending.iter().position(|p| p.state().id() == id);
        let Some(packet) = pos.and_then(|i| queues.ack_pending.remove(i)) else {
            drop(queues);
            self.stats.ack_misses.fetch_add(1, Ordering::Relaxed);
            warn!(worker = %self.uid, id, "ack matched no pending packet");
            return Err(Error::AckNotFound { worker: self.uid, id: id.to_string() });
        };
        self.timeout.cancel(packet.id());
        drop(queues);

        debug!(worker = %self.uid, record = id, "packet acked");
        self.stats.acked.fetch_add(1, Ordering::Relaxed);
        if packet.state().release_packet() {
            self.registry.retire(packet.state().alias());
        }
        Ok(())
    }

    /// Move a timed-out packet to the ack-pending head and arm the
    /// ack-repop flag so the next transport poll resends it.
    ///
    /// A packet no longer in the queue (acked between expiry collection
    /// and this call) is left alone rather than resurrected.
    pub fn repop_front(&self, packet: &Arc<OutPacket>) {
        let mut queues = self.queues.lock();
        let pos = queues.ack_pending.iter().position(|p| p.id() == packet.id());
        let Some(packet) = pos.and_then(|i| queues.ack_pending.remove(i)) else {
            return;
        };
        queues.ack_pending.push_front(packet);
        self.ack_repop.store(true, Ordering::Release);
        self.stats.refronted.fetch_add(1, Ordering::Relaxed);
    }

    /// Remove a packet whose retries are exhausted and fail its record.
    ///
    /// Called by the timeout service; the packet's entry is already gone.
    pub fn discard(&self, packet: &Arc<OutPacket>) {
        let mut queues = self.queues.lock();
        if let Some(pos) = queues.ack_pending.iter().position(|p| p.id() == packet.id()) {
            queues.ack_pending.remove(pos);
        }
        drop(queues);

        packet.state().mark_failed();
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        let err = Error::RetriesExhausted { id: packet.state().id().to_string() };
        warn!(worker = %self.uid, error = %err, "packet discarded, record failed");
    }

    /// Drain both queues for reassignment or shutdown.
    ///
    /// Ack-pending packets come first so unacked work is requeued with
    /// priority; their timeout entries are cancelled here. Attendance is
    /// cleared before the drain so the scheduler stops targeting this
    /// worker immediately.
    pub fn shutdown(&self) -> Vec<Arc<OutPacket>> {
        self.attendance.store(false, Ordering::Release);

        let mut queues = self.queues.lock();
        let unacked: Vec<Arc<OutPacket>> = queues.ack_pending.drain(..).collect();
        let unsent: Vec<Arc<OutPacket>> = queues.pending_send.drain(..).collect();
        drop(queues);

        for packet in &unacked {
            self.timeout.cancel(packet.id());
        }
        self.ack_repop.store(false, Ordering::Release);

        debug!(
            worker = %self.uid,
            unacked = unacked.len(),
            unsent = unsent.len(),
            "worker drained"
        );
        unacked.into_iter().chain(unsent).collect()
    }

    /// Mark the endpoint's transport as connected.
    pub fn check_in(&self) {
        trace!(worker = %self.uid, "checked in");
        self.attendance.store(true, Ordering::Release);
    }

    /// Mark the endpoint's transport as disconnected.
    pub fn check_out(&self) {
        trace!(worker = %self.uid, "checked out");
        self.attendance.store(false, Ordering::Release);
    }

    /// Whether the endpoint's transport is connected.
    pub fn is_checked_in(&self) -> bool {
        self.attendance.load(Ordering::Acquire)
    }

    /// Prefer this worker for bursty HIGH-priority traffic.
    pub fn set_quick_send(&self) {
        self.quick_send.store(true, Ordering::Release);
    }

    /// Clear the quick-send preference.
    pub fn reset_quick_send(&self) {
        self.quick_send.store(false, Ordering::Release);
    }

    /// Whether the quick-send hint is set.
    pub fn is_quick_send(&self) -> bool {
        self.quick_send.load(Ordering::Acquire)
    }

    /// Remaining pending-send slots, the scheduler's capacity signal.
    pub fn free_capacity(&self) -> usize {
        self.capacity.saturating_sub(self.queues.lock().pending_send.len())
    }

    /// Total packets currently held across both queues.
    pub fn held_packets(&self) -> usize {
        let queues = self.queues.lock();
        queues.pending_send.len() + queues.ack_pending.len()
    }

    /// Current `(pending_send, ack_pending)` queue depths.
    pub fn queue_depths(&self) -> (usize, usize) {
        let queues = self.queues.lock();
        (queues.pending_send.len(), queues.ack_pending.len())
    }

    /// Counter snapshot.
    pub fn stats(&self) -> WorkerStatsSnapshot {
        self.stats.snapshot()
    }
}

/// Per-worker counters.
#[derive(Debug, Default)]
struct WorkerStats {
    queued: AtomicU64,
    dispatched: AtomicU64,
    resent: AtomicU64,
    acked: AtomicU64,
    ack_misses: AtomicU64,
    failed: AtomicU64,
    refronted: AtomicU64,
}

impl WorkerStats {
    fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
            resent: self.resent.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            ack_misses: self.ack_misses.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            refronted: self.refronted.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of worker counters.
#[derive(Debug, Clone, Copy)]
pub struct WorkerStatsSnapshot {
    /// Packets accepted into pending-send.
    pub queued: u64,
    /// First-time deliveries to the transport.
    pub dispatched: u64,
    /// Resends served from the ack-pending front.
    pub resent: u64,
    /// Acknowledgments matched.
    pub acked: u64,
    /// Acknowledgments that matched nothing.
    pub ack_misses: u64,
    /// Packets discarded after exhausting retries.
    pub failed: u64,
    /// Timeout re-fronts applied.
    pub refronted: u64,
}
