//! Record, packet, and in-flight state types for the dispatch engine.
//!
//! A [`Record`] is the unit of outbound work handed in by producers. The
//! sender stack splits it into one or more [`OutPacket`]s, the granularity
//! at which acknowledgment tracking occurs, and binds them all to a shared
//! [`OutDataState`] that carries the record's assigned worker, outstanding
//! packet count, and terminal status.

use crate::types::{PacketId, Priority, RecordStatus, WorkerUid};
use crate::{Error, Result};
use bytes::Bytes;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;

/// Sentinel for "no worker assigned" in the atomic worker slot.
const NO_WORKER: u64 = u64::MAX;

/// A unit of outbound work identified by a user-visible alias.
#[derive(Debug, Clone)]
pub struct Record {
    /// Stable record name, unique per ingest run.
    pub name: String,
    /// User-visible key; at most one live in-flight state per alias.
    pub alias: String,
    /// Dispatch band.
    pub priority: Priority,
    /// Opaque processing hint carried through to the endpoint.
    pub algorithm: String,
    /// Raw payload, split into packets at assignment time.
    pub payload: Bytes,
    /// Whether packets of this record require positive acknowledgment.
    pub ackable: bool,
}

impl Record {
    /// Create an ackable record.
    ///
    /// # Errors
    /// Returns [`Error::InvalidRecord`] if the name or alias is empty.
    pub fn new(
        name: impl Into<String>,
        alias: impl Into<String>,
        priority: Priority,
        algorithm: impl Into<String>,
        payload: Bytes,
    ) -> Result<Self> {
        let name = name.into();
        let alias = alias.into();
        if name.is_empty() {
            return Err(Error::InvalidRecord { message: "record name cannot be empty".to_string() });
        }
        if alias.is_empty() {
            return Err(Error::InvalidRecord {
                message: "record alias cannot be empty".to_string(),
            });
        }

        Ok(Self { name, alias, priority, algorithm: algorithm.into(), payload, ackable: true })
    }

    /// Mark the record as fire-and-forget: its packets are released on
    /// delivery instead of waiting for an acknowledgment.
    #[must_use]
    pub fn fire_and_forget(mut self) -> Self {
        self.ackable = false;
        self
    }

    /// Payload size in bytes.
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Per-record in-flight state shared by all of the record's packets.
///
/// Mutated only through atomic operations; the identity fields are
/// immutable after construction.
pub struct OutDataState {
    id: String,
    alias: String,
    priority: Priority,
    worker: AtomicU64,
    outstanding: AtomicUsize,
    status: AtomicU8,
}

impl OutDataState {
    /// Create a fresh in-flight state with no assigned worker.
    pub fn new(id: impl Into<String>, alias: impl Into<String>, priority: Priority) -> Self {
        Self {
            id: id.into(),
            alias: alias.into(),
            priority,
            worker: AtomicU64::new(NO_WORKER),
            outstanding: AtomicUsize::new(0),
            status: AtomicU8::new(RecordStatus::Pending as u8),
        }
    }

    /// The record identity used to match acknowledgments.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The user-visible alias registered in the record registry.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// The record's dispatch band.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Bind the state to the worker that currently holds its packets.
    pub fn assign_worker(&self, worker: WorkerUid) {
        self.worker.store(worker.value(), Ordering::Release);
    }

    /// Clear the worker binding, e.g. while packets await reassignment.
    pub fn clear_worker(&self) {
        self.worker.store(NO_WORKER, Ordering::Release);
    }

    /// The worker currently bound to this record, if any.
    pub fn assigned_worker(&self) -> Option<WorkerUid> {
        match self.worker.load(Ordering::Acquire) {
            NO_WORKER => None,
            uid => Some(WorkerUid(uid)),
        }
    }

    /// Add newly created packets to the outstanding count.
    pub fn add_outstanding(&self, count: usize) {
        self.outstanding.fetch_add(count, Ordering::AcqRel);
    }

    /// Current outstanding packet count.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    /// Release one packet (acked, or delivered for fire-and-forget).
    ///
    /// Returns `true` when this release completed the record: the count
    /// reached zero and the status transitioned from pending to acked. The
    /// caller retires the registry entry in that case.
    pub fn release_packet(&self) -> bool {
        let prev = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .unwrap_or(0);
        if prev == 1 {
            return self
                .status
                .compare_exchange(
                    RecordStatus::Pending as u8,
                    RecordStatus::Acked as u8,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok();
        }
        false
    }

    /// Record a packet discarded after exhausting its retries.
    ///
    /// Marks the record failed (sticky over a later completion of sibling
    /// packets) and removes the packet from the outstanding count.
    pub fn mark_failed(&self) {
        let _ = self.status.compare_exchange(
            RecordStatus::Pending as u8,
            RecordStatus::Failed as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        let _ = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
    }

    /// Mark the record drained during shutdown, if it was still pending.
    pub fn mark_drained(&self) {
        let _ = self.status.compare_exchange(
            RecordStatus::Pending as u8,
            RecordStatus::Drained as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Current terminal status.
    pub fn status(&self) -> RecordStatus {
        RecordStatus::from_u8(self.status.load(Ordering::Acquire)).unwrap_or(RecordStatus::Failed)
    }
}

impl fmt::Debug for OutDataState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutDataState")
            .field("id", &self.id)
            .field("alias", &self.alias)
            .field("priority", &self.priority)
            .field("worker", &self.assigned_worker())
            .field("outstanding", &self.outstanding())
            .field("status", &self.status())
            .finish()
    }
}

/// A transmittable subunit of a record.
///
/// Packets are owned by exactly one worker at a time; the shared back
/// reference to the record state is the only thing that outlives the
/// owning queue.
pub struct OutPacket {
    id: PacketId,
    payload: Bytes,
    state: Arc<OutDataState>,
    ackable: bool,
    delivered: AtomicBool,
}

impl OutPacket {
    /// Create a packet bound to the given record state.
    pub fn new(payload: Bytes, state: Arc<OutDataState>, ackable: bool) -> Self {
        Self { id: PacketId::next(), payload, state, ackable, delivered: AtomicBool::new(false) }
    }

    /// Process-unique packet identifier.
    pub fn id(&self) -> PacketId {
        self.id
    }

    /// The immutable payload chunk.
    pub fn payload(&self) -> Bytes {
        self.payload.clone()
    }

    /// Shared in-flight state of the owning record.
    pub fn state(&self) -> &Arc<OutDataState> {
        &self.state
    }

    /// Whether this packet requires a positive acknowledgment.
    pub fn is_ackable(&self) -> bool {
        self.ackable
    }

    /// Note that the packet was handed to a transport at least once.
    pub fn mark_delivered(&self) {
        self.delivered.store(true, Ordering::Release);
    }

    /// Whether the packet was ever handed to a transport.
    pub fn is_delivered(&self) -> bool {
        self.delivered.load(Ordering::Acquire)
    }
}

impl fmt::Debug for OutPacket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutPacket")
            .field("id", &self.id)
            .field("record", &self.state.id())
            .field("len", &self.payload.len())
            .field("ackable", &self.ackable)
            .field("delivered", &self.is_delivered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> Arc<OutDataState> {
        Arc::new(OutDataState::new("r-0", "alias", Priority::High))
    }

    #[test]
    fn test_record_validation() {
        assert!(Record::new("r", "a", Priority::High, "none", Bytes::new()).is_ok());
        assert!(Record::new("", "a", Priority::High, "none", Bytes::new()).is_err());
        assert!(Record::new("r", "", Priority::High, "none", Bytes::new()).is_err());
    }

    #[test]
    fn test_fire_and_forget_clears_ackable() {
        let record = Record::new("r", "a", Priority::Low, "none", Bytes::new())
            .unwrap()
            .fire_and_forget();
        assert!(!record.ackable);
    }

    #[test]
    fn test_release_completes_record() {
        let state = state();
        state.add_outstanding(2);

        assert!(!state.release_packet());
        assert_eq!(state.status(), RecordStatus::Pending);

        assert!(state.release_packet());
        assert_eq!(state.status(), RecordStatus::Acked);
        assert_eq!(state.outstanding(), 0);
    }

    #[test]
    fn test_failure_is_sticky() {
        let state = state();
        state.add_outstanding(2);

        state.mark_failed();
        assert_eq!(state.status(), RecordStatus::Failed);

        // A sibling packet completing later must not overwrite the failure.
        assert!(!state.release_packet());
        assert_eq!(state.status(), RecordStatus::Failed);
    }

    #[test]
    fn test_release_never_underflows() {
        let state = state();
        assert!(!state.release_packet());
        assert_eq!(state.outstanding(), 0);
    }

    #[test]
    fn test_worker_binding() {
        let state = state();
        assert_eq!(state.assigned_worker(), None);

        state.assign_worker(WorkerUid(3));
        assert_eq!(state.assigned_worker(), Some(WorkerUid(3)));

        state.clear_worker();
        assert_eq!(state.assigned_worker(), None);
    }

    #[test]
    fn test_drained_only_from_pending() {
        let state = state();
        state.add_outstanding(1);
        assert!(state.release_packet());

        state.mark_drained();
        assert_eq!(state.status(), RecordStatus::Acked);
    }

    #[test]
    fn test_packet_flags() {
        let packet = OutPacket::new(Bytes::from_static(b"p"), state(), true);
        assert!(packet.is_ackable());
        assert!(!packet.is_delivered());

        packet.mark_delivered();
        assert!(packet.is_delivered());
    }
}
