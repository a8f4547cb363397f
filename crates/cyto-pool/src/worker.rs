//! Worker threads.
//!
//! Each worker is a named OS thread owning a crossbeam inbox, an optional
//! marker context, and nothing else. Handlers run to completion without
//! suspension; a panic anywhere in the loop is converted into a single
//! `Crashed` event so the supervisor can respawn the slot.

use crate::protocol::{WorkerEvent, WorkerMsg};
use cyto_markers::MarkerContext;
use std::panic::AssertUnwindSafe;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, trace};

pub(crate) struct WorkerHandle {
    pub index: usize,
    pub generation: u64,
    pub inbox: crossbeam_channel::Sender<WorkerMsg>,
}

/// Spawn one worker thread and immediately queue its init handshake.
pub(crate) fn spawn_worker(
    index: usize,
    generation: u64,
    pool_size: usize,
    events: UnboundedSender<WorkerEvent>,
) -> WorkerHandle {
    let (inbox, rx) = crossbeam_channel::unbounded::<WorkerMsg>();
    let thread_events = events.clone();
    let spawned = std::thread::Builder::new()
        .name(format!("cyto-worker-{index}"))
        .spawn(move || {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| {
                worker_main(index, generation, &rx, &thread_events);
            }));
            if let Err(panic) = outcome {
                let detail = panic_detail(panic.as_ref());
                error!(target: "pool.worker", worker = index, generation, detail = %detail, "worker_panicked");
                let _ = thread_events.send(WorkerEvent::Crashed {
                    worker: index,
                    generation,
                    detail,
                });
            }
        });

    if let Err(err) = spawned {
        // Thread creation failed outright; report it like a crash so the
        // supervisor's recovery path owns the outcome.
        let _ = events.send(WorkerEvent::Crashed {
            worker: index,
            generation,
            detail: format!("thread spawn failed: {err}"),
        });
    }

    let _ = inbox.send(WorkerMsg::Init {
        worker_id: index,
        pool_size,
    });

    WorkerHandle {
        index,
        generation,
        inbox,
    }
}

fn worker_main(
    index: usize,
    generation: u64,
    rx: &crossbeam_channel::Receiver<WorkerMsg>,
    events: &UnboundedSender<WorkerEvent>,
) {
    let mut markers: Option<MarkerContext> = None;
    let mut worker_id = index;
    let mut pool_size = 0usize;

    while let Ok(msg) = rx.recv() {
        match msg {
            WorkerMsg::Init {
                worker_id: id,
                pool_size: size,
            } => {
                worker_id = id;
                pool_size = size;
                debug!(target: "pool.worker", worker = index, generation, "worker_ready");
                if events
                    .send(WorkerEvent::InitAck {
                        worker: index,
                        generation,
                        worker_id,
                    })
                    .is_err()
                {
                    break;
                }
            }
            WorkerMsg::Info => {
                if events
                    .send(WorkerEvent::Info {
                        worker: index,
                        generation,
                        worker_id,
                        pool_size,
                    })
                    .is_err()
                {
                    break;
                }
            }
            WorkerMsg::Request {
                request_id,
                op,
                payload,
            } => {
                trace!(target: "pool.worker", worker = index, request_id, op = %op, "request_started");
                let result = cyto_handlers::execute(op, &payload, &mut markers);
                if events
                    .send(WorkerEvent::Completed {
                        worker: index,
                        generation,
                        request_id,
                        result,
                    })
                    .is_err()
                {
                    break;
                }
            }
            WorkerMsg::Shutdown => {
                debug!(target: "pool.worker", worker = index, generation, "worker_shutdown");
                break;
            }
            #[cfg(feature = "test-internals")]
            WorkerMsg::Poison => panic!("injected worker crash"),
            #[cfg(feature = "test-internals")]
            WorkerMsg::Stall(duration) => std::thread::sleep(duration),
        }
    }
}

fn panic_detail(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
