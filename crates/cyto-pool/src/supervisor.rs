//! Pool supervisor: the single task owning every piece of mutable pool
//! state.
//!
//! Workers never share memory with it; they receive moved payloads and
//! post reply events. All bookkeeping — worker records, per-worker FIFO
//! queues, the pending map, the round-robin cursor, timers — mutates only
//! inside this task, which is what makes the at-most-once completion
//! guarantee checkable in one place: a request resolves exactly when it
//! leaves the pending map, and it leaves exactly once.

use crate::protocol::{WorkerEvent, WorkerInfo, WorkerMsg};
use crate::worker::{WorkerHandle, spawn_worker};
use crate::{PoolCounters, PoolOptions, PoolStatus, PruneReport, RequestOptions};
use ahash::AHashMap;
use cyto_catalog::{Backend, BackendState, CoreError, OpOutput, OperationId, Payload};
use cyto_markers::MarkerContext;
use std::collections::VecDeque;
use std::time::Instant;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

type Reply = oneshot::Sender<Result<OpOutput, CoreError>>;

pub(crate) enum Command {
    Execute {
        op: OperationId,
        payload: Payload,
        options: RequestOptions,
        reply: Reply,
    },
    Cancel {
        request_id: u64,
    },
    TimedOut {
        request_id: u64,
    },
    WorkerInfo {
        index: usize,
        reply: oneshot::Sender<Result<WorkerInfo, CoreError>>,
    },
    Prune {
        keep_at_least: usize,
        max_to_recycle: usize,
        reply: oneshot::Sender<PruneReport>,
    },
    Status {
        reply: oneshot::Sender<PoolStatus>,
    },
    Terminate {
        reply: oneshot::Sender<()>,
    },
    #[cfg(feature = "test-internals")]
    CrashWorker {
        index: usize,
    },
    #[cfg(feature = "test-internals")]
    StallWorker {
        index: usize,
        duration: std::time::Duration,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WorkerState {
    Idle,
    Busy,
}

struct Slot {
    handle: WorkerHandle,
    state: WorkerState,
    busy_since: Option<Instant>,
    in_flight: Option<u64>,
    queue: VecDeque<u64>,
}

impl Slot {
    fn new(handle: WorkerHandle) -> Self {
        Self {
            handle,
            state: WorkerState::Idle,
            busy_since: None,
            in_flight: None,
            queue: VecDeque::new(),
        }
    }

    fn mark_idle(&mut self) {
        self.state = WorkerState::Idle;
        self.busy_since = None;
        self.in_flight = None;
    }
}

struct Pending {
    op: OperationId,
    /// Present while queued; taken at dispatch (the buffer handoff).
    payload: Option<Payload>,
    reply: Reply,
    worker: usize,
    submitted_at: Instant,
    started_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
    cancel_watch: Option<JoinHandle<()>>,
}

impl Pending {
    fn detach_tasks(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        if let Some(watch) = self.cancel_watch.take() {
            watch.abort();
        }
    }
}

pub(crate) struct Supervisor {
    options: PoolOptions,
    commands: UnboundedReceiver<Command>,
    /// Clone handed to per-request timer / cancel-watch tasks.
    command_tx: UnboundedSender<Command>,
    events: UnboundedReceiver<WorkerEvent>,
    event_tx: UnboundedSender<WorkerEvent>,
    slots: Vec<Slot>,
    pending: AHashMap<u64, Pending>,
    next_request_id: u64,
    rr_cursor: usize,
    terminated: bool,
    /// Marker slot for the inline fallback path.
    inline_markers: Option<MarkerContext>,
    info_waiters: Vec<(usize, u64, oneshot::Sender<Result<WorkerInfo, CoreError>>)>,
    counters: PoolCounters,
}

enum Flow {
    Continue,
    Stop,
}

impl Supervisor {
    pub(crate) fn new(
        options: PoolOptions,
        commands: UnboundedReceiver<Command>,
        command_tx: UnboundedSender<Command>,
    ) -> Self {
        let (event_tx, events) = tokio::sync::mpsc::unbounded_channel();
        let slots = (0..options.workers)
            .map(|index| Slot::new(spawn_worker(index, 0, options.workers, event_tx.clone())))
            .collect();
        info!(target: "pool.dispatch", workers = options.workers, "pool_started");
        Self {
            options,
            commands,
            command_tx,
            events,
            event_tx,
            slots,
            pending: AHashMap::new(),
            next_request_id: 0,
            rr_cursor: 0,
            terminated: false,
            inline_markers: None,
            info_waiters: Vec::new(),
            counters: PoolCounters::default(),
        }
    }

    pub(crate) async fn run(mut self) {
        let mut health = tokio::time::interval(self.options.health_interval);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        health.reset();
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    match command {
                        Some(command) => {
                            if matches!(self.handle_command(command), Flow::Stop) {
                                break;
                            }
                        }
                        // Every pool handle dropped: tear down.
                        None => break,
                    }
                }
                Some(event) = self.events.recv() => self.handle_event(event),
                _ = health.tick() => self.health_scan(),
            }
        }
        self.shutdown_workers();
        debug!(target: "pool.dispatch", "supervisor_stopped");
    }

    fn handle_command(&mut self, command: Command) -> Flow {
        match command {
            Command::Execute {
                op,
                payload,
                options,
                reply,
            } => self.submit(op, payload, options, reply),
            Command::Cancel { request_id } => {
                self.settle(request_id, Err(CoreError::Cancelled));
            }
            Command::TimedOut { request_id } => {
                self.settle(request_id, Err(CoreError::Timeout));
            }
            Command::WorkerInfo { index, reply } => self.request_worker_info(index, reply),
            Command::Prune {
                keep_at_least,
                max_to_recycle,
                reply,
            } => {
                let report = self.prune_idle(keep_at_least, max_to_recycle);
                let _ = reply.send(report);
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Terminate { reply } => {
                self.terminate();
                let _ = reply.send(());
                return Flow::Stop;
            }
            #[cfg(feature = "test-internals")]
            Command::CrashWorker { index } => {
                if let Some(slot) = self.slots.get(index) {
                    let _ = slot.handle.inbox.send(WorkerMsg::Poison);
                }
            }
            #[cfg(feature = "test-internals")]
            Command::StallWorker { index, duration } => {
                if let Some(slot) = self.slots.get(index) {
                    let _ = slot.handle.inbox.send(WorkerMsg::Stall(duration));
                }
            }
        }
        Flow::Continue
    }

    // ---------------------------------------------------------------------
    // Submission & dispatch
    // ---------------------------------------------------------------------

    fn submit(&mut self, op: OperationId, payload: Payload, options: RequestOptions, reply: Reply) {
        // No live workers: run inline against the same handlers.
        if self.terminated || self.slots.is_empty() {
            self.counters.inline_fallbacks += 1;
            let result = cyto_handlers::execute(op, &payload, &mut self.inline_markers);
            let _ = reply.send(result);
            return;
        }

        self.next_request_id += 1;
        let request_id = self.next_request_id;
        let timeout = options.timeout.unwrap_or(self.options.default_timeout);

        // Idle worker first, round-robin queue otherwise.
        let target = match self.slots.iter().position(|s| s.state == WorkerState::Idle) {
            Some(idle) => idle,
            None => {
                let target = self.rr_cursor % self.slots.len();
                self.rr_cursor = self.rr_cursor.wrapping_add(1);
                target
            }
        };

        let timer = {
            let tx = self.command_tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = tx.send(Command::TimedOut { request_id });
            })
        };
        let cancel_watch = options.cancel.map(|token| {
            let tx = self.command_tx.clone();
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = tx.send(Command::Cancel { request_id });
            })
        });

        self.pending.insert(
            request_id,
            Pending {
                op,
                payload: Some(payload),
                reply,
                worker: target,
                submitted_at: Instant::now(),
                started_at: None,
                timer: Some(timer),
                cancel_watch,
            },
        );

        let idle = self.slots[target].state == WorkerState::Idle;
        if idle {
            self.dispatch(target, request_id);
        } else {
            trace!(target: "pool.dispatch", request_id, worker = target, "request_queued");
            self.slots[target].queue.push_back(request_id);
        }
    }

    /// Hand a pending request to its worker. The payload moves out of the
    /// pending record here.
    fn dispatch(&mut self, worker: usize, request_id: u64) {
        let Some(pending) = self.pending.get_mut(&request_id) else {
            return;
        };
        let Some(payload) = pending.payload.take() else {
            return;
        };
        pending.started_at = Some(Instant::now());
        let op = pending.op;

        let slot = &mut self.slots[worker];
        slot.state = WorkerState::Busy;
        slot.busy_since = Some(Instant::now());
        slot.in_flight = Some(request_id);
        self.counters.dispatched += 1;
        trace!(target: "pool.dispatch", request_id, worker, op = %op, "request_dispatched");

        if slot
            .handle
            .inbox
            .send(WorkerMsg::Request {
                request_id,
                op,
                payload,
            })
            .is_err()
        {
            // Inbox closed under us: the thread is gone without a crash
            // event (e.g. spawn failure). Recover the slot now.
            self.recover_crashed(worker, "worker inbox closed".to_string());
        }
    }

    /// Resolve a pending request exactly once. Queued entries leave their
    /// queue; in-flight entries free their worker and advance its queue.
    fn settle(&mut self, request_id: u64, result: Result<OpOutput, CoreError>) {
        let Some(mut pending) = self.pending.remove(&request_id) else {
            // Re-entrant cancel / late timer: no-op.
            return;
        };
        pending.detach_tasks();
        trace!(
            target: "pool.dispatch",
            request_id,
            outcome = result.as_ref().map(|_| "ok").unwrap_or_else(|e| e.kind()),
            elapsed_ms = pending.submitted_at.elapsed().as_millis() as u64,
            "request_settled"
        );
        match &result {
            Err(CoreError::Cancelled) => self.counters.cancelled += 1,
            Err(CoreError::Timeout) => self.counters.timed_out += 1,
            Err(_) => self.counters.failed += 1,
            Ok(_) => self.counters.completed += 1,
        }

        let worker = pending.worker;
        let was_queued = pending.started_at.is_none();
        if was_queued {
            if let Some(slot) = self.slots.get_mut(worker) {
                slot.queue.retain(|&id| id != request_id);
            }
        } else if let Some(slot) = self.slots.get_mut(worker) {
            // The worker may still be crunching the discarded request; its
            // eventual stale completion is dropped because the id is gone
            // from the pending map and from `in_flight`.
            if slot.in_flight == Some(request_id) {
                slot.mark_idle();
                self.advance_queue(worker);
            }
        }

        let _ = pending.reply.send(result);
    }

    fn advance_queue(&mut self, worker: usize) {
        loop {
            let Some(slot) = self.slots.get_mut(worker) else {
                return;
            };
            if slot.state == WorkerState::Busy {
                return;
            }
            let Some(next) = slot.queue.pop_front() else {
                return;
            };
            if self.pending.contains_key(&next) {
                self.dispatch(worker, next);
                return;
            }
            // Stale id (cancelled while queued): keep draining.
        }
    }

    // ---------------------------------------------------------------------
    // Worker events
    // ---------------------------------------------------------------------

    fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::InitAck {
                worker,
                generation,
                worker_id,
            } => {
                if self.generation_live(worker, generation) {
                    debug!(target: "pool.worker", worker, worker_id, "worker_init_ack");
                }
            }
            WorkerEvent::Info {
                worker,
                generation,
                worker_id,
                pool_size,
            } => {
                if !self.generation_live(worker, generation) {
                    return;
                }
                if let Some(pos) = self
                    .info_waiters
                    .iter()
                    .position(|(w, g, _)| *w == worker && *g == generation)
                {
                    let (_, _, reply) = self.info_waiters.swap_remove(pos);
                    let _ = reply.send(Ok(WorkerInfo {
                        worker_id,
                        pool_size,
                    }));
                }
            }
            WorkerEvent::Completed {
                worker,
                generation,
                request_id,
                result,
            } => {
                if !self.generation_live(worker, generation) {
                    trace!(target: "pool.worker", worker, request_id, "stale_completion_dropped");
                    return;
                }
                let live = self.slots[worker].in_flight == Some(request_id);
                if live {
                    self.slots[worker].mark_idle();
                }
                self.settle(request_id, result);
                if live {
                    self.advance_queue(worker);
                }
            }
            WorkerEvent::Crashed {
                worker,
                generation,
                detail,
            } => {
                if !self.generation_live(worker, generation) {
                    return;
                }
                self.recover_crashed(worker, detail);
            }
        }
    }

    fn generation_live(&self, worker: usize, generation: u64) -> bool {
        self.slots
            .get(worker)
            .is_some_and(|slot| slot.handle.generation == generation)
    }

    /// Crash recovery: reject the in-flight request, respawn the slot in
    /// place (next generation), keep the queue and dispatch its head.
    fn recover_crashed(&mut self, worker: usize, detail: String) {
        self.counters.crashes += 1;
        warn!(target: "pool.health", worker, detail = %detail, "worker_crashed_respawning");

        let in_flight = self.slots[worker].in_flight.take();
        if let Some(request_id) = in_flight {
            self.settle(request_id, Err(CoreError::WorkerCrashed(detail)));
        }
        self.respawn(worker);
        self.advance_queue(worker);
    }

    fn respawn(&mut self, worker: usize) {
        let generation = self.slots[worker].handle.generation + 1;
        let handle = spawn_worker(
            worker,
            generation,
            self.options.workers,
            self.event_tx.clone(),
        );
        let slot = &mut self.slots[worker];
        slot.handle = handle;
        slot.mark_idle();
    }

    // ---------------------------------------------------------------------
    // Health / lifecycle
    // ---------------------------------------------------------------------

    fn health_scan(&mut self) {
        let stuck_after = self.options.stuck_after;
        let mut stuck: Vec<usize> = Vec::new();
        for (index, slot) in self.slots.iter().enumerate() {
            if slot.state == WorkerState::Busy
                && slot
                    .busy_since
                    .is_some_and(|since| since.elapsed() > stuck_after)
            {
                stuck.push(index);
            }
            if slot.queue.len() > self.options.queue_warn_depth {
                warn!(
                    target: "pool.health",
                    worker = index,
                    backlog = slot.queue.len(),
                    "worker_queue_backlog"
                );
            }
        }

        for index in stuck {
            self.counters.stuck_restarts += 1;
            warn!(
                target: "pool.health",
                worker = index,
                threshold_ms = stuck_after.as_millis() as u64,
                "worker_stuck_restarted"
            );
            let in_flight = self.slots[index].in_flight.take();
            if let Some(request_id) = in_flight {
                self.settle(request_id, Err(CoreError::StuckAndRestarted));
            }
            let _ = self.slots[index].handle.inbox.send(WorkerMsg::Shutdown);
            self.respawn(index);
            self.advance_queue(index);
        }

        // Orphaned bookkeeping: pending entries referenced by no queue and
        // no in-flight slot can never complete.
        let orphans: Vec<u64> = self
            .pending
            .iter()
            .filter(|(id, p)| {
                let Some(slot) = self.slots.get(p.worker) else {
                    return true;
                };
                let queued = slot.queue.contains(*id);
                let in_flight = slot.in_flight == Some(**id);
                !queued && !in_flight && p.started_at.is_none()
            })
            .map(|(id, _)| *id)
            .collect();
        for id in orphans {
            warn!(target: "pool.health", request_id = id, "orphaned_request_evicted");
            self.settle(id, Err(CoreError::Internal("worker no longer available".into())));
        }
    }

    fn prune_idle(&mut self, keep_at_least: usize, max_to_recycle: usize) -> PruneReport {
        let idle: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.state == WorkerState::Idle)
            .map(|(index, _)| index)
            .collect();
        let considered = idle.len();
        let limit = considered
            .saturating_sub(keep_at_least)
            .min(max_to_recycle);

        let mut recycled = 0usize;
        for &index in idle.iter().take(limit) {
            let _ = self.slots[index].handle.inbox.send(WorkerMsg::Shutdown);
            self.respawn(index);
            self.advance_queue(index);
            recycled += 1;
        }
        self.counters.recycled += recycled as u64;
        debug!(
            target: "pool.health",
            recycled,
            kept = considered - recycled,
            considered,
            "idle_workers_pruned"
        );
        PruneReport {
            recycled,
            kept: considered - recycled,
            considered,
        }
    }

    fn status(&self) -> PoolStatus {
        let idle = self
            .slots
            .iter()
            .filter(|s| s.state == WorkerState::Idle)
            .count();
        let busy = self.slots.len() - idle;
        let queued = self.slots.iter().map(|s| s.queue.len()).sum();
        let state = if self.terminated {
            BackendState::Unavailable
        } else if self.slots.is_empty() {
            BackendState::Unavailable
        } else {
            BackendState::Available
        };
        PoolStatus {
            workers: self.slots.len(),
            idle,
            busy,
            queued,
            pending: self.pending.len(),
            state,
            counters: self.counters,
        }
    }

    fn terminate(&mut self) {
        self.terminated = true;
        let pending: Vec<u64> = self.pending.keys().copied().collect();
        for id in pending {
            self.settle(id, Err(CoreError::BackendUnavailable(Backend::Worker)));
        }
        info!(target: "pool.dispatch", "pool_terminated");
    }

    fn shutdown_workers(&mut self) {
        for slot in &self.slots {
            let _ = slot.handle.inbox.send(WorkerMsg::Shutdown);
        }
        self.slots.clear();
    }

    fn request_worker_info(
        &mut self,
        index: usize,
        reply: oneshot::Sender<Result<WorkerInfo, CoreError>>,
    ) {
        let Some(slot) = self.slots.get(index) else {
            let _ = reply.send(Err(CoreError::Internal(format!(
                "no worker at index {index}"
            ))));
            return;
        };
        if slot.handle.inbox.send(WorkerMsg::Info).is_err() {
            let _ = reply.send(Err(CoreError::BackendUnavailable(Backend::Worker)));
            return;
        }
        self.info_waiters
            .push((index, slot.handle.generation, reply));
    }
}
