//! Priority-ordered sender stack.
//!
//! The producer-facing multiplexer across workers. Records wait in three
//! priority bands until the scheduler tick assigns them: the record is
//! split into packets, its in-flight state is registered, and the packets
//! are queued on the selected worker. A fourth internal queue holds
//! already-packetized work parked during worker-loss reassignment.

use crate::config::DispatchConfig;
use crate::dispatch::registry::RecordRegistry;
use crate::dispatch::worker::Worker;
use crate::record::{OutDataState, OutPacket, Record};
use crate::types::Priority;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Priority multiplexer feeding records to workers.
#[derive(Debug)]
pub struct SenderStack {
    config: DispatchConfig,
    bands: Mutex<Bands>,
    registry: Arc<RecordRegistry>,
    stats: StackStats,
}

#[derive(Debug, Default)]
struct Bands {
    high: VecDeque<Record>,
    medium: VecDeque<Record>,
    low: VecDeque<Record>,
    /// Packetized work awaiting a new worker after reassignment.
    parked: VecDeque<Arc<OutPacket>>,
    /// Consecutive HIGH/MEDIUM dispatches since the last LOW one.
    urgent_streak: u32,
}

impl SenderStack {
    /// Create a stack bound to the given registry.
    pub fn new(config: DispatchConfig, registry: Arc<RecordRegistry>) -> Self {
        Self { config, bands: Mutex::new(Bands::default()), registry, stats: StackStats::default() }
    }

    /// Append a record to its priority band.
    pub fn push(&self, record: Record) {
        let mut bands = self.bands.lock();
        trace!(alias = %record.alias, priority = %record.priority, "record pushed");
        match record.priority {
            Priority::High => bands.high.push_back(record),
            Priority::Medium => bands.medium.push_back(record),
            Priority::Low => bands.low.push_back(record),
        }
        self.stats.pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Park packets drained from a lost worker for reassignment.
    ///
    /// Callers pass ack-pending packets first; FIFO placement preserves
    /// that order. The worker binding is cleared until a successor
    /// accepts each packet.
    pub fn requeue_packets(&self, packets: Vec<Arc<OutPacket>>) {
        let mut bands = self.bands.lock();
        for packet in packets {
            packet.state().clear_worker();
            bands.parked.push_back(packet);
            self.stats.parked.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// One scheduler tick: reassign parked packets, then place the head
    /// record of the winning band. Returns how many placements happened.
    pub fn assign(&self, workers: &[Arc<Worker>]) -> usize {
        let mut bands = self.bands.lock();
        let mut placed = self.place_parked(&mut bands, workers);

        let Some(priority) = self.select_band(&bands) else {
            return placed;
        };
        let promoted = priority == Priority::Low && bands.urgent_streak >= self.config.promote_after;

        let needed = {
            let record = match priority {
                Priority::High => bands.high.front(),
                Priority::Medium => bands.medium.front(),
                Priority::Low => bands.low.front(),
            };
            let Some(record) = record else { return placed };
            packet_count(record.payload_size(), self.config.max_packet_bytes)
        };

        let candidates = rank_workers(workers, priority);
        let target = candidates
            .iter()
            .find(|worker| worker.capacity().saturating_sub(worker.held_packets()) >= needed)
            .cloned();
        let Some(worker) = target else {
            // Every eligible worker is full; the record stays at the band
            // head and assignment is re-attempted on the next tick.
            self.stats.full_rejections.fetch_add(1, Ordering::Relaxed);
            trace!(%priority, "no worker has capacity, holding record");
            return placed;
        };

        let record = match priority {
            Priority::High => bands.high.pop_front(),
            Priority::Medium => bands.medium.pop_front(),
            Priority::Low => bands.low.pop_front(),
        };
        let Some(record) = record else { return placed };

        let (state, packets) = self.packetize(&record);
        state.assign_worker(worker.uid());
        debug!(
            alias = %record.alias,
            record = state.id(),
            worker = %worker.uid(),
            packets = packets.len(),
            promoted,
            "record assigned"
        );

        let mut overflowed = false;
        for packet in packets {
            if overflowed {
                bands.parked.push_back(packet);
                self.stats.parked.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            if worker.queue(packet.clone()).is_err() {
                // Capacity was pre-checked; park the remainder anyway so no
                // packet is ever dropped on the floor.
                warn!(worker = %worker.uid(), "mid-record queue rejection, parking remainder");
                bands.parked.push_back(packet);
                self.stats.parked.fetch_add(1, Ordering::Relaxed);
                overflowed = true;
            }
        }

        if promoted {
            self.stats.promotions.fetch_add(1, Ordering::Relaxed);
        }
        if priority.is_urgent() {
            bands.urgent_streak += 1;
        } else {
            bands.urgent_streak = 0;
        }

        self.stats.assigned.fetch_add(1, Ordering::Relaxed);
        placed + 1
    }

    /// Drain everything still waiting (engine shutdown).
    ///
    /// Returns unassigned records and parked packets; the caller decides
    /// their terminal status.
    pub fn flush(&self) -> (Vec<Record>, Vec<Arc<OutPacket>>) {
        let mut bands = self.bands.lock();
        let mut records = Vec::new();
        records.extend(bands.high.drain(..));
        records.extend(bands.medium.drain(..));
        records.extend(bands.low.drain(..));
        let parked = bands.parked.drain(..).collect();
        bands.urgent_streak = 0;
        (records, parked)
    }

    /// Current band depths.
    pub fn depths(&self) -> BandDepths {
        let bands = self.bands.lock();
        BandDepths {
            high: bands.high.len(),
            medium: bands.medium.len(),
            low: bands.low.len(),
            parked: bands.parked.len(),
        }
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StackStatsSnapshot {
        self.stats.snapshot()
    }

    /// Pick the band to serve, honoring the LOW-starvation promotion.
    fn select_band(&self, bands: &Bands) -> Option<Priority> {
        if bands.urgent_streak >= self.config.promote_after && !bands.low.is_empty() {
            return Some(Priority::Low);
        }
        if !bands.high.is_empty() {
            Some(Priority::High)
        } else if !bands.medium.is_empty() {
            Some(Priority::Medium)
        } else if !bands.low.is_empty() {
            Some(Priority::Low)
        } else {
            None
        }
    }

    /// Place parked packets onto workers, stopping at the first one no
    /// worker can take so reassignment order is preserved.
    fn place_parked(&self, bands: &mut Bands, workers: &[Arc<Worker>]) -> usize {
        let mut placed = 0;
        while let Some(front) = bands.parked.front() {
            let priority = front.state().priority();
            let target = rank_workers(workers, priority)
                .into_iter()
                .find(|worker| worker.held_packets() < worker.capacity());
            let Some(worker) = target else {
                break;
            };

            let Some(packet) = bands.parked.pop_front() else {
                break;
            };
            packet.state().assign_worker(worker.uid());
            if worker.queue(packet.clone()).is_err() {
                packet.state().clear_worker();
                bands.parked.push_front(packet);
                break;
            }
            self.stats.reassigned.fetch_add(1, Ordering::Relaxed);
            placed += 1;
        }
        placed
    }

    /// Split a record into packets sharing one registered state.
    fn packetize(&self, record: &Record) -> (Arc<OutDataState>, Vec<Arc<OutPacket>>) {
        let state = self.registry.add(&record.alias, &record.name, record.priority);
        let chunks = chunk_payload(&record.payload, self.config.max_packet_bytes);
        state.add_outstanding(chunks.len());
        self.stats.packetized.fetch_add(chunks.len() as u64, Ordering::Relaxed);

        let packets = chunks
            .into_iter()
            .map(|chunk| Arc::new(OutPacket::new(chunk, Arc::clone(&state), record.ackable)))
            .collect();
        (state, packets)
    }
}

/// Number of packets a payload of `len` bytes splits into.
fn packet_count(len: usize, max_packet_bytes: usize) -> usize {
    if len == 0 {
        1
    } else {
        len.div_ceil(max_packet_bytes)
    }
}

/// Zero-copy payload chunking.
fn chunk_payload(payload: &Bytes, max_packet_bytes: usize) -> Vec<Bytes> {
    if payload.len() <= max_packet_bytes {
        return vec![payload.clone()];
    }
    (0..payload.len())
        .step_by(max_packet_bytes)
        .map(|start| payload.slice(start..usize::min(start + max_packet_bytes, payload.len())))
        .collect()
}

/// Order checked-in workers by the selection policy: quick-send workers
/// first for HIGH traffic, then greatest free capacity, ties broken by
/// lowest UID for determinism.
fn rank_workers(workers: &[Arc<Worker>], priority: Priority) -> Vec<Arc<Worker>> {
    let mut ranked: Vec<(Arc<Worker>, usize, bool)> = workers
        .iter()
        .filter(|worker| worker.is_checked_in())
        .map(|worker| {
            let free = worker.free_capacity();
            let quick = worker.is_quick_send();
            (Arc::clone(worker), free, quick)
        })
        .collect();

    ranked.sort_by(|a, b| {
        if priority == Priority::High {
            let a_quick = a.2 && a.1 >= 1;
            let b_quick = b.2 && b.1 >= 1;
            if a_quick != b_quick {
                return b_quick.cmp(&a_quick);
            }
        }
        b.1.cmp(&a.1).then_with(|| a.0.uid().cmp(&b.0.uid()))
    });

    ranked.into_iter().map(|(worker, _, _)| worker).collect()
}

/// Current queue depths of the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandDepths {
    /// Records waiting in the HIGH band.
    pub high: usize,
    /// Records waiting in the MEDIUM band.
    pub medium: usize,
    /// Records waiting in the LOW band.
    pub low: usize,
    /// Packets awaiting reassignment.
    pub parked: usize,
}

/// Sender stack counters.
#[derive(Debug, Default)]
struct StackStats {
    pushed: AtomicU64,
    assigned: AtomicU64,
    packetized: AtomicU64,
    reassigned: AtomicU64,
    promotions: AtomicU64,
    full_rejections: AtomicU64,
    parked: AtomicU64,
}

impl StackStats {
    fn snapshot(&self) -> StackStatsSnapshot {
        StackStatsSnapshot {
            pushed: self.pushed.load(Ordering::Relaxed),
            assigned: self.assigned.load(Ordering::Relaxed),
            packetized: self.packetized.load(Ordering::Relaxed),
            reassigned: self.reassigned.load(Ordering::Relaxed),
            promotions: self.promotions.load(Ordering::Relaxed),
            full_rejections: self.full_rejections.load(Ordering::Relaxed),
            parked: self.parked.load(Ordering::Relaxed),
        }
    }
}

/// Immutable snapshot of stack counters.
#[derive(Debug, Clone, Copy)]
pub struct StackStatsSnapshot {
    /// Records accepted from producers.
    pub pushed: u64,
    /// Records placed on a worker.
    pub assigned: u64,
    /// Packets created.
    pub packetized: u64,
    /// Parked packets placed on a successor worker.
    pub reassigned: u64,
    /// LOW records served ahead of urgent bands.
    pub promotions: u64,
    /// Assignment attempts held back by full workers.
    pub full_rejections: u64,
    /// Packets parked for reassignment.
    pub parked: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::timeout::TimeoutService;
    use crate::types::WorkerUid;
    use std::time::Duration;

    fn small_config() -> DispatchConfig {
        DispatchConfig { worker_queue_size: 4, promote_after: 2, ..Default::default() }
    }

    fn fixture(config: &DispatchConfig) -> (SenderStack, Arc<RecordRegistry>, Arc<TimeoutService>) {
        let registry = Arc::new(RecordRegistry::new());
        let timeout = Arc::new(TimeoutService::new(Duration::from_secs(5), 3));
        (SenderStack::new(config.clone(), Arc::clone(&registry)), registry, timeout)
    }

    fn worker(
        uid: u64,
        config: &DispatchConfig,
        timeout: &Arc<TimeoutService>,
        registry: &Arc<RecordRegistry>,
    ) -> Arc<Worker> {
        Arc::new(Worker::new(
            WorkerUid(uid),
            config.worker_queue_size,
            Arc::clone(timeout),
            Arc::clone(registry),
        ))
    }

    fn record(name: &str, priority: Priority) -> Record {
        Record::new(name, name, priority, "none", Bytes::from_static(b"payload")).unwrap()
    }

    #[test]
    fn test_chunking_boundaries() {
        assert_eq!(packet_count(0, 8), 1);
        assert_eq!(packet_count(8, 8), 1);
        assert_eq!(packet_count(9, 8), 2);

        let payload = Bytes::from_static(b"abcdefghij");
        let chunks = chunk_payload(&payload, 4);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], Bytes::from_static(b"abcd"));
        assert_eq!(chunks[2], Bytes::from_static(b"ij"));
    }

    #[test]
    fn test_assign_prefers_high_band() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let workers = vec![worker(1, &config, &timeout, &registry)];

        stack.push(record("low", Priority::Low));
        stack.push(record("high", Priority::High));

        assert_eq!(stack.assign(&workers), 1);
        assert_eq!(registry.lookup("high").unwrap().id(), "high-0");
        assert!(registry.lookup("low").is_none());
    }

    #[test]
    fn test_selection_prefers_free_capacity_then_uid() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let busy = worker(1, &config, &timeout, &registry);
        let idle = worker(2, &config, &timeout, &registry);
        // Give worker 1 a backlog so worker 2 wins on free capacity.
        stack.push(record("warmup", Priority::Medium));
        stack.assign(&[Arc::clone(&busy)]);

        stack.push(record("target", Priority::Medium));
        stack.assign(&[Arc::clone(&busy), Arc::clone(&idle)]);

        assert_eq!(
            registry.lookup("target").unwrap().assigned_worker(),
            Some(WorkerUid(2)),
        );
    }

    #[test]
    fn test_ties_break_to_lowest_uid() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let a = worker(5, &config, &timeout, &registry);
        let b = worker(3, &config, &timeout, &registry);

        stack.push(record("r", Priority::Medium));
        stack.assign(&[a, b]);

        assert_eq!(registry.lookup("r").unwrap().assigned_worker(), Some(WorkerUid(3)));
    }

    #[test]
    fn test_quick_send_wins_for_high_priority() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let plain = worker(1, &config, &timeout, &registry);
        let quick = worker(9, &config, &timeout, &registry);
        quick.set_quick_send();

        stack.push(record("hot", Priority::High));
        stack.assign(&[Arc::clone(&plain), Arc::clone(&quick)]);
        assert_eq!(registry.lookup("hot").unwrap().assigned_worker(), Some(WorkerUid(9)));

        // MEDIUM traffic ignores the quick-send hint.
        stack.push(record("warm", Priority::Medium));
        stack.assign(&[plain, quick]);
        assert_eq!(registry.lookup("warm").unwrap().assigned_worker(), Some(WorkerUid(1)));
    }

    #[test]
    fn test_record_held_when_all_workers_full() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);
        for i in 0..config.worker_queue_size {
            stack.push(record(&format!("fill{i}"), Priority::Medium));
            assert_eq!(stack.assign(std::slice::from_ref(&w)), 1);
        }

        stack.push(record("held", Priority::Medium));
        assert_eq!(stack.assign(std::slice::from_ref(&w)), 0);
        assert_eq!(stack.depths().medium, 1);
        assert_eq!(stack.stats().full_rejections, 1);
    }

    #[test]
    fn test_low_promotion_after_urgent_streak() {
        let config = small_config(); // promote_after = 2
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);

        stack.push(record("h1", Priority::High));
        stack.push(record("h2", Priority::High));
        stack.push(record("h3", Priority::High));
        stack.push(record("starved", Priority::Low));

        stack.assign(std::slice::from_ref(&w));
        stack.assign(std::slice::from_ref(&w));
        // Streak hit the threshold: LOW is served despite HIGH waiting.
        stack.assign(std::slice::from_ref(&w));

        assert!(registry.lookup("starved").is_some());
        assert_eq!(stack.depths().high, 1);
        assert_eq!(stack.stats().promotions, 1);
    }

    #[test]
    fn test_multi_chunk_record_counts_outstanding() {
        let config = DispatchConfig {
            worker_queue_size: 8,
            max_packet_bytes: 4,
            ..Default::default()
        };
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);

        let big = Record::new("big", "big", Priority::High, "none", Bytes::from_static(b"0123456789"))
            .unwrap();
        stack.push(big);
        stack.assign(std::slice::from_ref(&w));

        let state = registry.lookup("big").unwrap();
        assert_eq!(state.outstanding(), 3);
        assert_eq!(w.queue_depths().0, 3);
    }

    #[test]
    fn test_mid_record_rejection_parks_remainder() {
        let config = DispatchConfig {
            worker_queue_size: 8,
            max_packet_bytes: 4,
            ..Default::default()
        };
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);

        let big = Record::new("big", "big", Priority::High, "none", Bytes::from_static(b"0123456789"))
            .unwrap();
        stack.push(big);

        // The capacity pre-check passes, then the first enqueue reports
        // full anyway.
        w.force_queue_rejections(1);
        stack.assign(std::slice::from_ref(&w));

        // No chunk is dropped: the whole record is parked for the next tick.
        assert_eq!(w.queue_depths(), (0, 0));
        assert_eq!(stack.depths().parked, 3);
        assert_eq!(stack.stats().parked, 3);
        let state = registry.lookup("big").unwrap();
        assert_eq!(state.outstanding(), 3);

        // The next tick places the parked chunks in order.
        assert_eq!(stack.assign(std::slice::from_ref(&w)), 3);
        assert_eq!(w.queue_depths().0, 3);
        assert_eq!(state.assigned_worker(), Some(WorkerUid(1)));
        assert_eq!(w.next_packet().unwrap(), Bytes::from_static(b"0123"));
    }

    #[test]
    fn test_parked_packets_drain_before_bands() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);

        let state = registry.add("orphan", "orphan", Priority::High);
        state.add_outstanding(1);
        let packet = Arc::new(OutPacket::new(Bytes::from_static(b"x"), state, true));
        stack.requeue_packets(vec![Arc::clone(&packet)]);
        stack.push(record("fresh", Priority::High));

        assert_eq!(stack.assign(std::slice::from_ref(&w)), 2);
        assert_eq!(packet.state().assigned_worker(), Some(WorkerUid(1)));
        assert_eq!(stack.depths().parked, 0);
        // The parked packet reached the worker ahead of the fresh record.
        assert_eq!(w.next_packet().unwrap(), Bytes::from_static(b"x"));
    }

    #[test]
    fn test_checked_out_workers_are_skipped() {
        let config = small_config();
        let (stack, registry, timeout) = fixture(&config);
        let w = worker(1, &config, &timeout, &registry);
        w.check_out();

        stack.push(record("r", Priority::High));
        assert_eq!(stack.assign(std::slice::from_ref(&w)), 0);
        assert_eq!(stack.depths().high, 1);
    }

    #[test]
    fn test_flush_returns_everything() {
        let config = small_config();
        let (stack, registry, _timeout) = fixture(&config);

        stack.push(record("a", Priority::High));
        stack.push(record("b", Priority::Low));
        let state = registry.add("p", "p", Priority::Medium);
        state.add_outstanding(1);
        stack.requeue_packets(vec![Arc::new(OutPacket::new(Bytes::new(), state, true))]);

        let (records, parked) = stack.flush();
        assert_eq!(records.len(), 2);
        assert_eq!(parked.len(), 1);
        let depths = stack.depths();
        assert_eq!((depths.high, depths.medium, depths.low, depths.parked), (0, 0, 0, 0));
    }
}
