//! AsyncResult - Single-Resolution Completion Cell
//!
//! Every layer of the pipeline reports completion through an [`AsyncResult`]:
//! exporters return one per `export()` call, the batch processor and periodic
//! reader return one from `force_flush()` and `shutdown()`.
//!
//! # Semantics
//!
//! - A result starts `Pending` and transitions exactly once to success or
//!   failure. The first transition wins; later calls to [`succeed`] / [`fail`]
//!   are no-ops that return `false`. This is what lets an export timeout and a
//!   late transport completion race without corrupting the outcome.
//! - Callbacks registered with [`when_complete`] run once, in registration
//!   order, on the thread that resolves the result. Callbacks registered after
//!   resolution run immediately on the registering thread.
//! - [`join`] blocks the calling thread and is purely an observer.
//! - [`all_of`] combines N results into one.
//!
//! Handles are cheap to clone; all clones observe the same cell.
//!
//! [`succeed`]: AsyncResult::succeed
//! [`fail`]: AsyncResult::fail
//! [`when_complete`]: AsyncResult::when_complete
//! [`join`]: AsyncResult::join
//! [`all_of`]: AsyncResult::all_of

use crate::error::ExportError;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tracing::error;

/// Outcome carried by a resolved [`AsyncResult`].
pub type Outcome = Result<(), ExportError>;

type Callback = Box<dyn FnOnce(&Outcome) + Send>;

enum State {
    Pending(Vec<Callback>),
    Done(Outcome),
}

struct Inner {
    state: Mutex<State>,
    resolved: Condvar,
}

/// Observable, single-resolution outcome of an asynchronous operation.
#[derive(Clone)]
pub struct AsyncResult {
    inner: Arc<Inner>,
}

impl AsyncResult {
    /// Creates an unresolved result.
    pub fn pending() -> Self {
        Self::with_state(State::Pending(Vec::new()))
    }

    /// Creates an already-succeeded result.
    pub fn succeeded() -> Self {
        Self::with_state(State::Done(Ok(())))
    }

    /// Creates an already-failed result.
    pub fn failed(error: ExportError) -> Self {
        Self::with_state(State::Done(Err(error)))
    }

    /// Creates an already-resolved result from an outcome.
    pub fn resolved(outcome: Outcome) -> Self {
        Self::with_state(State::Done(outcome))
    }

    fn with_state(state: State) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(state),
                resolved: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // Callbacks never run under the lock, so poisoning cannot leave the
        // state half-updated.
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the result succeeded. Returns `false` if it was already resolved.
    pub fn succeed(&self) -> bool {
        self.resolve(Ok(()))
    }

    /// Marks the result failed. Returns `false` if it was already resolved.
    pub fn fail(&self, error: ExportError) -> bool {
        self.resolve(Err(error))
    }

    /// Resolves the result with `outcome` unless it is already resolved.
    pub fn resolve(&self, outcome: Outcome) -> bool {
        let callbacks = {
            let mut state = self.lock();
            match &mut *state {
                State::Done(_) => return false,
                State::Pending(callbacks) => {
                    let callbacks = std::mem::take(callbacks);
                    *state = State::Done(outcome.clone());
                    callbacks
                }
            }
        };

        self.inner.resolved.notify_all();

        for callback in callbacks {
            run_callback(callback, &outcome);
        }
        true
    }

    /// Registers a callback to run once the result is resolved.
    ///
    /// If the result is already resolved the callback runs immediately on the
    /// calling thread. A panicking callback is logged and does not stop the
    /// remaining callbacks.
    pub fn when_complete<F>(&self, callback: F) -> &Self
    where
        F: FnOnce(&Outcome) + Send + 'static,
    {
        let outcome = {
            let mut state = self.lock();
            match &mut *state {
                State::Pending(callbacks) => {
                    callbacks.push(Box::new(callback));
                    return self;
                }
                State::Done(outcome) => outcome.clone(),
            }
        };
        run_callback(Box::new(callback), &outcome);
        self
    }

    /// Blocks the calling thread until the result resolves or `timeout`
    /// elapses. Returns `true` if the result is resolved.
    ///
    /// Timing out leaves the result untouched.
    pub fn join(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut state = self.lock();
        loop {
            if matches!(*state, State::Done(_)) {
                return true;
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    self.inner
                        .resolved
                        .wait_timeout(state, deadline - now)
                        .map(|(guard, _)| guard)
                        .unwrap_or_else(|poisoned| poisoned.into_inner().0)
                }
                None => self
                    .inner
                    .resolved
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner),
            };
        }
    }

    /// Waits asynchronously for the outcome.
    pub async fn completion(&self) -> Outcome {
        let (tx, rx) = oneshot::channel();
        self.when_complete(move |outcome| {
            let _ = tx.send(outcome.clone());
        });
        // The sender lives in our own callback list, which outlives `rx`
        // while `self` is borrowed.
        rx.await.unwrap_or(Err(ExportError::Shutdown))
    }

    /// Returns `true` once resolved.
    pub fn is_done(&self) -> bool {
        matches!(*self.lock(), State::Done(_))
    }

    /// Returns `true` if resolved successfully.
    pub fn is_success(&self) -> bool {
        matches!(*self.lock(), State::Done(Ok(())))
    }

    /// Returns the failure, if resolved as failed.
    pub fn failure(&self) -> Option<ExportError> {
        match &*self.lock() {
            State::Done(Err(e)) => Some(e.clone()),
            _ => None,
        }
    }

    /// Returns the outcome if resolved.
    pub fn outcome(&self) -> Option<Outcome> {
        match &*self.lock() {
            State::Done(outcome) => Some(outcome.clone()),
            State::Pending(_) => None,
        }
    }

    /// Combines `results` into one that resolves after every child resolves.
    ///
    /// Succeeds iff every child succeeded; fails with the first observed child
    /// failure otherwise. An empty input yields an already-succeeded result.
    pub fn all_of<I>(results: I) -> AsyncResult
    where
        I: IntoIterator<Item = AsyncResult>,
    {
        let children: Vec<AsyncResult> = results.into_iter().collect();
        if children.is_empty() {
            return Self::succeeded();
        }

        let parent = Self::pending();
        let remaining = Arc::new(AtomicUsize::new(children.len()));
        let first_failure: Arc<Mutex<Option<ExportError>>> = Arc::new(Mutex::new(None));

        for child in &children {
            let parent = parent.clone();
            let remaining = Arc::clone(&remaining);
            let first_failure = Arc::clone(&first_failure);
            child.when_complete(move |outcome| {
                if let Err(e) = outcome {
                    let mut slot = first_failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if slot.is_none() {
                        *slot = Some(e.clone());
                    }
                }
                if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
                    let failure = first_failure
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .take();
                    match failure {
                        Some(e) => parent.fail(e),
                        None => parent.succeed(),
                    };
                }
            });
        }

        parent
    }
}

fn run_callback(callback: Callback, outcome: &Outcome) {
    if panic::catch_unwind(AssertUnwindSafe(|| callback(outcome))).is_err() {
        error!("async result completion callback panicked");
    }
}

impl Default for AsyncResult {
    fn default() -> Self {
        Self::pending()
    }
}

impl fmt::Debug for AsyncResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.lock() {
            State::Pending(callbacks) => f
                .debug_struct("AsyncResult")
                .field("state", &"pending")
                .field("callbacks", &callbacks.len())
                .finish(),
            State::Done(outcome) => f
                .debug_struct("AsyncResult")
                .field("state", outcome)
                .finish(),
        }
    }
}

impl From<Outcome> for AsyncResult {
    fn from(outcome: Outcome) -> Self {
        Self::resolved(outcome)
    }
}
