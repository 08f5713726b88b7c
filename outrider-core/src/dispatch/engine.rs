//! Dispatch engine: the composition root of the core.
//!
//! Owns the worker set and binds the sender stack, timeout service, and
//! record registry together as explicit dependencies. Two long-running
//! threads drive the engine: a scheduler running the assignment tick and
//! the lost-worker sweep, and a timer driving timeout expiries. Both are
//! also callable directly for embedders that want to drive the engine
//! without background threads.

use crate::config::DispatchConfig;
use crate::dispatch::registry::RecordRegistry;
use crate::dispatch::stack::SenderStack;
use crate::dispatch::timeout::TimeoutService;
use crate::dispatch::worker::Worker;
use crate::record::Record;
use crate::types::{RecordStatus, WorkerUid};
use crate::{Error, Result};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Wakeable wait used by the engine's service threads.
#[derive(Debug, Default)]
struct WakeSignal {
    pending: Mutex<bool>,
    condvar: Condvar,
}

impl WakeSignal {
    /// Sleep for at most `timeout`, returning early when notified.
    fn wait(&self, timeout: Duration) {
        let mut pending = self.pending.lock();
        if !*pending {
            let _ = self.condvar.wait_for(&mut pending, timeout);
        }
        *pending = false;
    }

    fn notify(&self) {
        *self.pending.lock() = true;
        self.condvar.notify_all();
    }
}

/// Priority-aware outbound dispatch engine.
#[derive(Debug)]
pub struct DispatchEngine {
    instance: Uuid,
    config: DispatchConfig,
    registry: Arc<RecordRegistry>,
    timeout: Arc<TimeoutService>,
    stack: Arc<SenderStack>,
    workers: Arc<RwLock<Vec<Arc<Worker>>>>,
    shutting_down: Arc<AtomicBool>,
    scheduler_wake: Arc<WakeSignal>,
    timer_wake: Arc<WakeSignal>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl DispatchEngine {
    /// Create an engine from a validated configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the configuration is invalid.
    pub fn new(config: DispatchConfig) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(RecordRegistry::new());
        let timeout = Arc::new(TimeoutService::new(config.retry_interval(), config.max_retries));
        let stack = Arc::new(SenderStack::new(config.clone(), Arc::clone(&registry)));

        let engine = Self {
            instance: Uuid::new_v4(),
            config,
            registry,
            timeout,
            stack,
            workers: Arc::new(RwLock::new(Vec::new())),
            shutting_down: Arc::new(AtomicBool::new(false)),
            scheduler_wake: Arc::new(WakeSignal::default()),
            timer_wake: Arc::new(WakeSignal::default()),
            threads: Mutex::new(Vec::new()),
        };
        info!(engine = %engine.instance, "dispatch engine created");
        Ok(engine)
    }

    /// This engine instance's identity.
    pub fn instance_id(&self) -> Uuid {
        self.instance
    }

    /// The active configuration.
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The record registry (status polling surface).
    pub fn registry(&self) -> &Arc<RecordRegistry> {
        &self.registry
    }

    /// The timeout service tracking ack-pending packets.
    pub fn timeout_service(&self) -> &Arc<TimeoutService> {
        &self.timeout
    }

    /// The sender stack accepting producer records.
    pub fn sender_stack(&self) -> &Arc<SenderStack> {
        &self.stack
    }

    /// Register a worker for a downstream endpoint.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] when the UID is already registered.
    pub fn register_worker(&self, uid: u64) -> Result<Arc<Worker>> {
        let uid = WorkerUid(uid);
        let mut workers = self.workers.write();
        if workers.iter().any(|w| w.uid() == uid) {
            return Err(Error::Internal { message: format!("worker {uid} already registered") });
        }

        let worker = Arc::new(Worker::new(
            uid,
            self.config.worker_queue_size,
            Arc::clone(&self.timeout),
            Arc::clone(&self.registry),
        ));
        workers.push(Arc::clone(&worker));
        info!(engine = %self.instance, worker = %uid, "worker registered");
        Ok(worker)
    }

    /// Snapshot of the registered workers.
    pub fn workers(&self) -> Vec<Arc<Worker>> {
        self.workers.read().clone()
    }

    /// Look up a worker by UID.
    pub fn worker(&self, uid: u64) -> Option<Arc<Worker>> {
        let uid = WorkerUid(uid);
        self.workers.read().iter().find(|w| w.uid() == uid).cloned()
    }

    /// Accept a record from a producer.
    ///
    /// # Errors
    /// Returns [`Error::ShuttingDown`] once shutdown has begun.
    pub fn push_record(&self, record: Record) -> Result<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(Error::ShuttingDown);
        }
        self.stack.push(record);
        self.scheduler_wake.notify();
        Ok(())
    }

    /// Terminal status for an alias, if registered.
    pub fn status(&self, alias: &str) -> Option<RecordStatus> {
        self.registry.status(alias)
    }

    /// Report a lost endpoint: check the worker out and reassign its
    /// packets immediately.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] for an unknown UID.
    pub fn worker_lost(&self, uid: u64) -> Result<()> {
        let Some(worker) = self.worker(uid) else {
            return Err(Error::Internal { message: format!("worker {uid} is not registered") });
        };
        worker.check_out();
        reassign_lost(&self.stack, &worker);
        self.scheduler_wake.notify();
        Ok(())
    }

    /// One scheduler tick: sweep lost workers, then run the assignment
    /// tick. Returns the number of placements.
    pub fn run_assign_tick(&self) -> usize {
        let snapshot = self.workers();
        for worker in &snapshot {
            if !worker.is_checked_in() && worker.held_packets() > 0 {
                reassign_lost(&self.stack, worker);
            }
        }
        self.stack.assign(&snapshot)
    }

    /// One timer tick at the given instant.
    pub fn run_timer_tick(&self, now: Instant) {
        self.timeout.tick(now);
    }

    /// Spawn the scheduler and timer threads. Idempotent.
    ///
    /// # Errors
    /// Returns [`Error::Internal`] if a thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut threads = self.threads.lock();
        if !threads.is_empty() {
            return Ok(());
        }

        {
            let stack = Arc::clone(&self.stack);
            let workers = Arc::clone(&self.workers);
            let shutdown = Arc::clone(&self.shutting_down);
            let wake = Arc::clone(&self.scheduler_wake);
            let idle = self.config.assign_idle();
            let handle = std::thread::Builder::new()
                .name("outrider-scheduler".to_string())
                .spawn(move || scheduler_loop(&stack, &workers, &shutdown, &wake, idle))
                .map_err(|e| Error::Internal {
                    message: format!("failed to spawn scheduler thread: {e}"),
                })?;
            threads.push(handle);
        }

        {
            let timeout = Arc::clone(&self.timeout);
            let shutdown = Arc::clone(&self.shutting_down);
            let wake = Arc::clone(&self.timer_wake);
            let granularity = self.config.tick_granularity();
            let handle = std::thread::Builder::new()
                .name("outrider-timer".to_string())
                .spawn(move || timer_loop(&timeout, &shutdown, &wake, granularity))
                .map_err(|e| Error::Internal {
                    message: format!("failed to spawn timer thread: {e}"),
                })?;
            threads.push(handle);
        }

        info!(engine = %self.instance, "dispatch engine started");
        Ok(())
    }

    /// Whether the service threads are running.
    pub fn is_running(&self) -> bool {
        !self.threads.lock().is_empty() && !self.shutting_down.load(Ordering::Acquire)
    }

    /// Stop the engine: join the service threads, drain every worker and
    /// the stack, clear the timeout service, and retire all record states.
    /// Undelivered work is marked *drained*. Returns the number of packets
    /// drained.
    pub fn shutdown(&self) -> usize {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return 0;
        }
        self.scheduler_wake.notify();
        self.timer_wake.notify();

        let handles: Vec<JoinHandle<()>> = self.threads.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.join();
        }

        let mut drained = 0;
        for worker in self.workers.read().iter() {
            let packets = worker.shutdown();
            if packets.is_empty() {
                continue;
            }
            let err = Error::ShutdownDrain { worker: worker.uid(), held: packets.len() };
            warn!(error = %err, "draining worker at shutdown");
            for packet in packets {
                packet.state().mark_drained();
                drained += 1;
            }
        }

        let (records, parked) = self.stack.flush();
        for packet in parked {
            packet.state().mark_drained();
            drained += 1;
        }
        for record in records {
            // Never packetized; register a state so producers observe the
            // drain through the same status surface.
            let state = self.registry.add(&record.alias, &record.name, record.priority);
            state.mark_drained();
        }

        self.timeout.clear();
        for state in self.registry.drain_all() {
            state.mark_drained();
        }

        info!(engine = %self.instance, drained, "dispatch engine shut down");
        drained
    }
}

/// Drain a checked-out worker and park its packets for reassignment,
/// unacked work first.
fn reassign_lost(stack: &Arc<SenderStack>, worker: &Arc<Worker>) {
    let drained = worker.shutdown();
    if drained.is_empty() {
        return;
    }
    let err = Error::WorkerLoss { worker: worker.uid(), held: drained.len() };
    warn!(error = %err, "reassigning packets from lost worker");
    stack.requeue_packets(drained);
}

fn scheduler_loop(
    stack: &Arc<SenderStack>,
    workers: &Arc<RwLock<Vec<Arc<Worker>>>>,
    shutdown: &Arc<AtomicBool>,
    wake: &Arc<WakeSignal>,
    idle: Duration,
) {
    debug!("scheduler thread running");
    while !shutdown.load(Ordering::Acquire) {
        let snapshot: Vec<Arc<Worker>> = workers.read().clone();
        for worker in &snapshot {
            if !worker.is_checked_in() && worker.held_packets() > 0 {
                reassign_lost(stack, worker);
            }
        }

        let placed = stack.assign(&snapshot);
        if placed == 0 {
            wake.wait(idle);
        }
    }
    debug!("scheduler thread stopped");
}

fn timer_loop(
    timeout: &Arc<TimeoutService>,
    shutdown: &Arc<AtomicBool>,
    wake: &Arc<WakeSignal>,
    granularity: Duration,
) {
    debug!("timer thread running");
    loop {
        wake.wait(granularity);
        if shutdown.load(Ordering::Acquire) {
            break;
        }
        timeout.tick(Instant::now());
    }
    debug!("timer thread stopped");
}
