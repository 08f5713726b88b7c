//! Error types for the Outrider core library.

use crate::types::WorkerUid;
use thiserror::Error;

/// Main error type for Outrider core operations.
///
/// Variants are ordered by expected frequency. Everything here is recovered
/// or logged inside the engine; the surfaced signal for producers is the
/// terminal status on the record's in-flight state.
#[derive(Error, Debug, Clone)]
pub enum Error {
    // High-frequency conditions
    /// A worker rejected an enqueue because its queues are at capacity.
    #[error("worker {worker}: queue full")]
    QueueFull {
        /// The rejecting worker.
        worker: WorkerUid,
    },

    /// An acknowledgment arrived with no matching ack-pending packet.
    #[error("worker {worker}: no ack-pending packet matches id {id}")]
    AckNotFound {
        /// The worker that received the acknowledgment.
        worker: WorkerUid,
        /// The unmatched record identity.
        id: String,
    },

    // Medium-frequency conditions
    /// A record failed validation at construction.
    #[error("invalid record: {message}")]
    InvalidRecord {
        /// What was wrong with the record.
        message: String,
    },

    /// A worker checked out while still holding packets.
    #[error("worker {worker}: lost while holding {held} packets")]
    WorkerLoss {
        /// The lost worker.
        worker: WorkerUid,
        /// Packets held at the time of loss.
        held: usize,
    },

    /// Retransmission retries were exhausted for a packet.
    #[error("retries exhausted for record {id}")]
    RetriesExhausted {
        /// The record identity whose packet gave up.
        id: String,
    },

    // Low-frequency conditions
    /// A worker's queues were drained during engine shutdown with packets
    /// still unsent or unacked.
    #[error("worker {worker}: drained {held} packets at shutdown")]
    ShutdownDrain {
        /// The drained worker.
        worker: WorkerUid,
        /// Packets drained from its queues.
        held: usize,
    },

    /// Configuration failed validation.
    #[error("configuration error: {message}")]
    Configuration {
        /// What was wrong with the configuration.
        message: String,
    },

    /// The engine rejected an operation because it is shutting down.
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Internal system errors.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal failure.
        message: String,
    },
}

/// Result type alias for Outrider core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::QueueFull { worker: WorkerUid(7) };
        assert_eq!(err.to_string(), "worker 7: queue full");

        let err = Error::AckNotFound { worker: WorkerUid(2), id: "tbl-0".to_string() };
        assert!(err.to_string().contains("tbl-0"));

        let err = Error::ShutdownDrain { worker: WorkerUid(3), held: 4 };
        assert_eq!(err.to_string(), "worker 3: drained 4 packets at shutdown");
    }
}
