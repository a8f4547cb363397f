//! Worker protocol: the message pairs crossing the thread boundary.
//!
//! Requests flow supervisor → worker over a per-worker crossbeam inbox;
//! replies flow worker → supervisor over one shared tokio channel. Every
//! reply carries the worker's `(index, generation)` so events from a
//! replaced incarnation are recognized as stale and dropped.

use cyto_catalog::{CoreError, OpOutput, OperationId, Payload};

#[derive(Debug)]
pub(crate) enum WorkerMsg {
    /// Handshake; the worker acknowledges with `InitAck`.
    Init { worker_id: usize, pool_size: usize },
    /// Introspection request answered with `Info`.
    Info,
    /// One operation. The payload moves here — this send is the
    /// transferable-buffer handoff.
    Request {
        request_id: u64,
        op: OperationId,
        payload: Payload,
    },
    Shutdown,
    /// Panic on receipt (crash-recovery tests).
    #[cfg(feature = "test-internals")]
    Poison,
    /// Sleep on receipt (stuck-worker tests).
    #[cfg(feature = "test-internals")]
    Stall(std::time::Duration),
}

#[derive(Debug)]
pub(crate) enum WorkerEvent {
    InitAck {
        worker: usize,
        generation: u64,
        worker_id: usize,
    },
    Info {
        worker: usize,
        generation: u64,
        worker_id: usize,
        pool_size: usize,
    },
    Completed {
        worker: usize,
        generation: u64,
        request_id: u64,
        result: Result<OpOutput, CoreError>,
    },
    Crashed {
        worker: usize,
        generation: u64,
        detail: String,
    },
}

/// Answer to `GET_WORKER_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerInfo {
    pub worker_id: usize,
    pub pool_size: usize,
}
