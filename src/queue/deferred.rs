use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

use crate::error::{ParleyError, Result};

type Continuation<T> = Box<dyn FnOnce(&Result<T>) + Send + 'static>;

struct Slot<T> {
    outcome: Option<Result<T>>,
    /// Set once an outcome has been claimed, before continuations run.
    sealed: bool,
    continuations: Vec<Continuation<T>>,
}

struct Shared<T> {
    slot: Mutex<Slot<T>>,
    ready: Notify,
}

impl<T> Shared<T> {
    fn lock(&self) -> MutexGuard<'_, Slot<T>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single-assignment handle to the outcome of a queued job.
///
/// Cloning yields another reader of the same cell. Continuations registered
/// with [`DeferredResult::on_complete`] run on the resolving task once the
/// outcome is fixed and before any waiter is released.
pub struct DeferredResult<T = String> {
    shared: Arc<Shared<T>>,
}

/// Write half of a [`DeferredResult`], owned by whoever produces the outcome.
///
/// Dropping an unresolved resolver settles the cell with
/// [`ParleyError::JobAbandoned`], so no reader waits forever.
pub struct Resolver<T: Clone = String> {
    shared: Arc<Shared<T>>,
    resolved: bool,
}

pub fn deferred<T: Clone + Send + 'static>() -> (Resolver<T>, DeferredResult<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(Slot {
            outcome: None,
            sealed: false,
            continuations: Vec::new(),
        }),
        ready: Notify::new(),
    });
    (
        Resolver {
            shared: shared.clone(),
            resolved: false,
        },
        DeferredResult { shared },
    )
}

impl<T> Clone for DeferredResult<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> DeferredResult<T> {
    /// A handle that is already settled, used by the fast paths.
    pub fn resolved(outcome: Result<T>) -> Self {
        let (resolver, handle) = deferred();
        resolver.resolve(outcome);
        handle
    }

    /// Wait until the outcome is set and return a copy of it.
    pub async fn wait(&self) -> Result<T> {
        loop {
            let notified = self.shared.ready.notified();
            tokio::pin!(notified);
            // Register before checking so a resolve in between is not missed.
            notified.as_mut().enable();

            if let Some(outcome) = self.try_get() {
                return outcome;
            }
            notified.await;
        }
    }

    /// The outcome if it is already visible to readers.
    pub fn try_get(&self) -> Option<Result<T>> {
        self.shared.lock().outcome.clone()
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.lock().outcome.is_some()
    }

    /// Attach a continuation. If the outcome is already set it runs
    /// immediately on the caller's task.
    pub fn on_complete<F>(&self, continuation: F)
    where
        F: FnOnce(&Result<T>) + Send + 'static,
    {
        let mut slot = self.shared.lock();
        match slot.outcome.clone() {
            Some(outcome) => {
                drop(slot);
                continuation(&outcome);
            }
            None => slot.continuations.push(Box::new(continuation)),
        }
    }
}

impl<T: Clone + Send + 'static> Resolver<T> {
    /// Settle the cell. Returns `false` if it was already settled, in which
    /// case the given outcome is discarded.
    pub fn resolve(mut self, outcome: Result<T>) -> bool {
        self.resolved = true;
        settle(&self.shared, outcome)
    }
}

impl<T: Clone> Drop for Resolver<T> {
    fn drop(&mut self) {
        if !self.resolved {
            settle_abandoned(&self.shared);
        }
    }
}

fn settle<T: Clone>(shared: &Shared<T>, outcome: Result<T>) -> bool {
    {
        let mut slot = shared.lock();
        if slot.sealed {
            return false;
        }
        slot.sealed = true;
    }

    // Continuations may themselves register further continuations; keep
    // draining until the list stays empty under the lock.
    loop {
        let pending = std::mem::take(&mut shared.lock().continuations);
        if pending.is_empty() {
            break;
        }
        for continuation in pending {
            continuation(&outcome);
        }
    }

    {
        let mut slot = shared.lock();
        let late = std::mem::take(&mut slot.continuations);
        slot.outcome = Some(outcome.clone());
        drop(slot);
        for continuation in late {
            continuation(&outcome);
        }
    }
    shared.ready.notify_waiters();
    true
}

fn settle_abandoned<T: Clone>(shared: &Shared<T>) {
    settle(
        shared,
        Err(ParleyError::JobAbandoned(
            "result producer dropped without resolving".to_string(),
        )),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_waiter_receives_value() {
        let (resolver, handle) = deferred::<String>();
        let reader = handle.clone();
        let waiter = tokio::spawn(async move { reader.wait().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(resolver.resolve(Ok("done".to_string())));

        assert_eq!(waiter.await.unwrap(), Ok("done".to_string()));
        assert_eq!(handle.wait().await, Ok("done".to_string()));
    }

    #[tokio::test]
    async fn test_error_outcome_is_delivered() {
        let (resolver, handle) = deferred::<String>();
        resolver.resolve(Err(ParleyError::BackendUnreachable("refused".to_string())));
        assert_eq!(
            handle.wait().await,
            Err(ParleyError::BackendUnreachable("refused".to_string()))
        );
    }

    #[tokio::test]
    async fn test_continuation_runs_before_waiters_see_value() {
        let (resolver, handle) = deferred::<String>();
        let seen = Arc::new(AtomicUsize::new(0));

        let counter = seen.clone();
        handle.on_complete(move |outcome| {
            assert!(outcome.is_ok());
            counter.fetch_add(1, Ordering::SeqCst);
        });

        resolver.resolve(Ok("x".to_string()));
        handle.wait().await.unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_late_continuation_runs_immediately() {
        let handle = DeferredResult::resolved(Ok("x".to_string()));
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        handle.on_complete(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_dropped_resolver_settles_with_error() {
        let (resolver, handle) = deferred::<String>();
        drop(resolver);
        assert!(matches!(handle.wait().await, Err(ParleyError::JobAbandoned(_))));
    }

    #[test]
    fn test_pending_handle_reports_unresolved() {
        let (_resolver, handle) = deferred::<String>();
        assert!(!handle.is_resolved());
        assert!(handle.try_get().is_none());
    }
}
