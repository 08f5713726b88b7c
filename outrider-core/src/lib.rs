//! # Outrider Core
//!
//! Priority-aware outbound dispatch engine. Producers push records into a
//! priority-sorted sender stack; the stack packetizes them across
//! per-endpoint workers; workers track acknowledgments with timeout-based
//! retransmission; and a process-wide registry surfaces each record's
//! terminal status.
//!
//! ## Guarantees
//! - Delivery order is preserved within a single worker's pending-send
//!   queue, modulo the documented backpressure skip.
//! - Unacked packets are re-sent on timeout, reassigned on worker loss,
//!   and drained on shutdown; each record ends in exactly one terminal
//!   status (acked, failed, or drained).
//! - LOW-priority records are promoted after a bounded run of urgent
//!   dispatches, so no band starves.
//!
//! ## Example
//!
//! ```rust
//! use bytes::Bytes;
//! use outrider_core::{DispatchConfig, DispatchEngine, Priority, Record};
//!
//! let engine = DispatchEngine::new(DispatchConfig::default())?;
//! let worker = engine.register_worker(1)?;
//!
//! let record = Record::new("tbl", "metrics", Priority::High, "none", Bytes::from_static(b"row"))?;
//! engine.push_record(record)?;
//! engine.run_assign_tick();
//!
//! // The transport drains the worker and acknowledges by record id.
//! let payload = worker.next_packet().expect("packet is queued");
//! assert_eq!(payload, Bytes::from_static(b"row"));
//! worker.ack("tbl-0")?;
//! # Ok::<(), outrider_core::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod dispatch;
pub mod error;
pub mod record;
pub mod telemetry;
pub mod types;

pub use config::DispatchConfig;
pub use dispatch::{DispatchEngine, RecordRegistry, SenderStack, TimeoutService, Worker};
pub use error::{Error, Result};
pub use record::{OutDataState, OutPacket, Record};
pub use types::{PacketId, Priority, RecordStatus, WorkerUid};

/// Re-export commonly used types for convenience.
pub mod prelude {
    pub use crate::config::DispatchConfig;
    pub use crate::dispatch::{DispatchEngine, RecordRegistry, SenderStack, TimeoutService, Worker};
    pub use crate::record::{OutDataState, OutPacket, Record};
    pub use crate::types::{PacketId, Priority, RecordStatus, WorkerUid};
    pub use crate::{Error, Result};
    pub use bytes::Bytes;
}
