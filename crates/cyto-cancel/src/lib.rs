//! Cancellable operation slots.
//!
//! A slot holds at most one logical operation. `start()` cancels whatever
//! the slot currently holds and hands back a fresh context with a unique
//! monotone id, so racing callers settle deterministically: the newest
//! start wins and every superseded context observes cancellation.
//! Cancellation is a signal, not an exception — running handlers finish,
//! their results are discarded by the caller that observes the flag.

use ahash::AHashMap;
use cyto_catalog::CoreError;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::trace;

/// Shared cancellation flag with async wakeup. Clones observe the same
/// signal; `cancel` is idempotent.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

#[derive(Debug, Default)]
struct CancelInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the signal. Re-entrant calls are no-ops.
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::SeqCst) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Resolve once the token is cancelled.
    pub async fn cancelled(&self) {
        loop {
            // The notified future must exist before the flag re-check so a
            // cancel between check and await still wakes us.
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// One live operation handed out by a slot.
#[derive(Debug, Clone)]
pub struct OperationContext {
    id: u64,
    token: CancelToken,
}

impl OperationContext {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Error out if this context has been superseded or cancelled.
    pub fn check(&self) -> Result<(), CoreError> {
        if self.is_cancelled() {
            Err(CoreError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Run a future under this context, checking the flag on entry and
    /// again after the await so a cancellation during the suspension is
    /// never delivered as a stale success.
    pub async fn run_async<F, T>(&self, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = T>,
    {
        self.check()?;
        let value = fut.await;
        self.check()?;
        Ok(value)
    }
}

/// Single-operation slot: starting a new operation cancels the previous
/// one.
#[derive(Debug, Default)]
pub struct OperationSlot {
    next_id: u64,
    current: Option<OperationContext>,
}

impl OperationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the current operation (if any) and hand out a new context.
    pub fn start(&mut self) -> OperationContext {
        self.cancel_current();
        self.next_id += 1;
        let ctx = OperationContext {
            id: self.next_id,
            token: CancelToken::new(),
        };
        trace!(target: "cancel.slot", id = ctx.id, "operation_started");
        self.current = Some(ctx.clone());
        ctx
    }

    pub fn cancel_current(&mut self) {
        if let Some(current) = self.current.take() {
            trace!(target: "cancel.slot", id = current.id, "operation_cancelled");
            current.token.cancel();
        }
    }

    pub fn current_id(&self) -> Option<u64> {
        self.current.as_ref().map(|c| c.id)
    }
}

/// N named slots with the single-slot semantics per name.
#[derive(Debug, Default)]
pub struct NamedSlots {
    slots: AHashMap<String, OperationSlot>,
}

impl NamedSlots {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, name: &str) -> OperationContext {
        self.slots.entry(name.to_string()).or_default().start()
    }

    pub fn cancel(&mut self, name: &str) {
        if let Some(slot) = self.slots.get_mut(name) {
            slot.cancel_current();
        }
    }

    pub fn cancel_all(&mut self) {
        for slot in self.slots.values_mut() {
            slot.cancel_current();
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
