//! The dispatch core.
//!
//! Five components in dependency order: the [`RecordRegistry`] directory
//! of in-flight record state, the [`TimeoutService`] tracking ack
//! deadlines, the per-endpoint [`Worker`] queueing unit, the priority
//! [`SenderStack`] multiplexer, and the [`DispatchEngine`] binding them
//! together with the scheduler and timer threads.
//!
//! Lock ordering throughout: sender stack, then worker, then timeout
//! service; the record registry is independent and acquired last.

pub mod engine;
pub mod registry;
pub mod stack;
pub mod timeout;
pub mod worker;

pub use engine::DispatchEngine;
pub use registry::{RecordRegistry, RegistryStatsSnapshot};
pub use stack::{BandDepths, SenderStack, StackStatsSnapshot};
pub use timeout::{TimeoutService, TimeoutStatsSnapshot};
pub use worker::{Worker, WorkerStatsSnapshot};
