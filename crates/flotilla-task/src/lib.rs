//! Structured concurrency for the orchestrator.
//!
//! Every fan-out in the lifecycle controller runs through this crate: a
//! [`TaskContext`] scopes child work to its parent, a [`TaskHandle`] is waited
//! on for exactly one child, and a [`TaskGroup`] waits for (and reaps) a whole
//! set of siblings, aggregating their failures.
//!
//! Cancellation is *cooperative*: aborting a handle or group only trips a
//! shared [`CancellationToken`]; children observe it when they call
//! [`TaskContext::check_aborted`], which the provider/agent facades do at
//! every I/O boundary. An in-flight provider request therefore runs to
//! completion, and the resources it produced are cleaned up by the
//! compensating action of the initiating step, not by the runtime.
//!
//! A failed subtask never aborts its siblings implicitly; callers that want
//! sibling cancellation call [`TaskHandle::abort`] / [`TaskGroup::abort`]
//! explicitly and then still wait, so every child is reaped.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use flotilla_common::{Error, Result};

/// Execution scope handed to every task body.
///
/// Cloning is cheap; a clone observes the same cancellation signal.
#[derive(Clone, Debug)]
pub struct TaskContext {
    cancel: CancellationToken,
}

impl Default for TaskContext {
    fn default() -> Self {
        Self::root()
    }
}

impl TaskContext {
    /// Create a root context, not cancelled by anyone above it.
    pub fn root() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a child scope: cancelled when `self` is cancelled, but
    /// cancellable on its own without affecting the parent.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
        }
    }

    /// True once cancellation has been requested for this scope.
    pub fn is_aborted(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Suspension-point check: returns `Err(Aborted)` once this scope has been
    /// cancelled. Facades call this before every provider/agent/metadata
    /// round-trip.
    pub fn check_aborted(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::aborted());
        }
        Ok(())
    }

    /// Request cooperative cancellation of this scope and everything below it.
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Start `f` as a subtask logically scoped to this context.
    ///
    /// The body receives its own child [`TaskContext`]; aborting the returned
    /// handle cancels only that subtree.
    pub fn start<T, F, Fut>(&self, f: F) -> TaskHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let child = self.child();
        let cancel = child.cancel.clone();
        let join = tokio::spawn(f(child));
        TaskHandle { cancel, join }
    }
}

/// Handle on one running subtask.
pub struct TaskHandle<T> {
    cancel: CancellationToken,
    join: JoinHandle<Result<T>>,
}

impl<T> TaskHandle<T> {
    /// Request cooperative cancellation of the subtask (and its own subtasks).
    pub fn abort(&self) {
        self.cancel.cancel();
    }

    /// Block until the subtask completes and return its result.
    ///
    /// The error is either the body's own error or the aborted marker the body
    /// surfaced when it observed cancellation. A panicking body is reported as
    /// an internal error; it never poisons siblings.
    pub async fn wait(self) -> Result<T> {
        match self.join.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => {
                warn!(error = %e, "subtask panicked");
                Err(Error::internal("task", format!("subtask panicked: {}", e)))
            }
            Err(e) => Err(Error::internal("task", format!("subtask vanished: {}", e))),
        }
    }
}

/// A set of sibling subtasks sharing one cancellation scope.
pub struct TaskGroup<T> {
    scope: TaskContext,
    handles: Vec<TaskHandle<T>>,
}

impl<T: Send + 'static> TaskGroup<T> {
    /// Create an empty group scoped under `parent`.
    pub fn new(parent: &TaskContext) -> Self {
        Self {
            scope: parent.child(),
            handles: Vec::new(),
        }
    }

    /// Start `f` as a member of the group.
    pub fn start<F, Fut>(&mut self, f: F)
    where
        F: FnOnce(TaskContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        self.handles.push(self.scope.start(f));
    }

    /// Number of members started so far.
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// True if no member has been started.
    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Ask every member to observe cancellation at its next suspension point.
    pub fn abort(&self) {
        self.scope.abort();
    }

    /// Wait for every member, reaping all of them even after failures.
    ///
    /// Successful results are returned in start order. If any member failed,
    /// all failures are aggregated into a single error list.
    pub async fn wait_group(self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.handles.len());
        let mut errors = Vec::new();
        for handle in self.handles {
            match handle.wait().await {
                Ok(value) => results.push(value),
                Err(e) => errors.push(e),
            }
        }
        if errors.is_empty() {
            Ok(results)
        } else {
            Err(Error::list(errors))
        }
    }

    /// Like [`TaskGroup::wait_group`], bounded by `timeout`.
    ///
    /// On timeout the group is aborted so stragglers wind down cooperatively,
    /// and a timeout error is returned; straggler results are unreachable
    /// past this point.
    pub async fn wait_group_for(self, timeout: Duration) -> Result<Vec<T>> {
        let scope = self.scope.clone();
        match tokio::time::timeout(timeout, self.wait_group()).await {
            Ok(result) => result,
            Err(_) => {
                scope.abort();
                Err(Error::timeout("task group wait", timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use flotilla_common::ErrorKind;

    #[tokio::test]
    async fn test_start_and_wait_returns_value() {
        let ctx = TaskContext::root();
        let handle = ctx.start(|_| async { Ok(7u32) });
        assert_eq!(handle.wait().await.expect("task result"), 7);
    }

    #[tokio::test]
    async fn test_wait_propagates_body_error() {
        let ctx = TaskContext::root();
        let handle = ctx.start(|_| async {
            Err::<(), _>(Error::provisioning("h1", "bring-up failed"))
        });
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("bring-up failed"));
    }

    /// Story: cancellation is cooperative and observed at suspension points
    #[tokio::test]
    async fn test_abort_is_observed_at_check_points() {
        let ctx = TaskContext::root();
        let handle = ctx.start(|task| async move {
            for _ in 0..1000 {
                task.check_aborted()?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        });
        handle.abort();
        let err = handle.wait().await.unwrap_err();
        assert!(err.is_aborted());
    }

    /// Story: a sibling's failure does not cancel the others
    #[tokio::test]
    async fn test_sibling_failure_does_not_cancel_others() {
        let ctx = TaskContext::root();
        let completed = Arc::new(AtomicU32::new(0));

        let mut group = TaskGroup::new(&ctx);
        group.start(|_| async { Err::<u32, _>(Error::provisioning("h1", "boom")) });
        for _ in 0..3 {
            let completed = completed.clone();
            group.start(|task| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                task.check_aborted()?;
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(1)
            });
        }

        let err = group.wait_group().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        // All healthy siblings ran to completion and were reaped.
        assert_eq!(completed.load(Ordering::SeqCst), 3);
    }

    /// Story: the whole group aggregates every failure, not just the first
    #[tokio::test]
    async fn test_wait_group_aggregates_all_failures() {
        let ctx = TaskContext::root();
        let mut group = TaskGroup::new(&ctx);
        group.start(|_| async { Err::<(), _>(Error::provisioning("h1", "first")) });
        group.start(|_| async { Ok(()) });
        group.start(|_| async { Err::<(), _>(Error::provisioning("h2", "second")) });

        let err = group.wait_group().await.unwrap_err();
        let rendered = err.to_string();
        assert!(rendered.contains("first"));
        assert!(rendered.contains("second"));
    }

    #[tokio::test]
    async fn test_group_abort_reaches_all_members() {
        let ctx = TaskContext::root();
        let mut group = TaskGroup::new(&ctx);
        for _ in 0..4 {
            group.start(|task| async move {
                for _ in 0..1000 {
                    task.check_aborted()?;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                Ok(())
            });
        }
        group.abort();
        let err = group.wait_group().await.unwrap_err();
        // Every member reports the aborted marker.
        match err.kind() {
            ErrorKind::List { errors } => {
                assert_eq!(errors.len(), 4);
                assert!(errors.iter().all(Error::is_aborted));
            }
            _ => panic!("expected an error list"),
        }
    }

    #[tokio::test]
    async fn test_wait_group_for_times_out() {
        let ctx = TaskContext::root();
        let mut group: TaskGroup<()> = TaskGroup::new(&ctx);
        group.start(|task| async move {
            for _ in 0..1000 {
                task.check_aborted()?;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            Ok(())
        });
        let err = group
            .wait_group_for(Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_parent_abort_propagates_to_children() {
        let ctx = TaskContext::root();
        let handle = ctx.start(|task| async move {
            let inner = task.start(|grandchild| async move {
                for _ in 0..1000 {
                    grandchild.check_aborted()?;
                    tokio::time::sleep(Duration::from_millis(2)).await;
                }
                Ok(())
            });
            inner.wait().await
        });
        ctx.abort();
        assert!(handle.wait().await.unwrap_err().is_aborted());
    }

    #[tokio::test]
    async fn test_panic_is_reported_as_internal_error() {
        let ctx = TaskContext::root();
        let handle = ctx.start(|_| async {
            if true {
                panic!("boom");
            }
            Ok(())
        });
        let err = handle.wait().await.unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }
}
