//! Compensating-action tracking for failure paths.
//!
//! Stages of a pipeline push a named compensation after they succeed; when a
//! later stage fails, the stack unwinds in reverse order and every
//! compensation failure is attached to the primary error as a consequence.
//! Success (or `keep_on_failure`) disarms the stack and nothing runs.

use futures::future::BoxFuture;
use tracing::{debug, error};

use flotilla_common::{Error, Result};

type RollbackAction = Box<dyn FnOnce() -> BoxFuture<'static, Result<()>> + Send>;

/// A LIFO stack of compensating actions.
#[derive(Default)]
pub struct RollbackStack {
    entries: Vec<(String, RollbackAction)>,
}

impl RollbackStack {
    /// Create an empty stack.
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a compensation to run if the operation later fails.
    pub fn push<F>(&mut self, name: impl Into<String>, action: F)
    where
        F: FnOnce() -> BoxFuture<'static, Result<()>> + Send + 'static,
    {
        self.entries.push((name.into(), Box::new(action)));
    }

    /// Number of armed compensations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is armed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every compensation without running it (success path, or
    /// `keep_on_failure`).
    pub fn disarm(&mut self) {
        self.entries.clear();
    }

    /// Run every compensation in reverse push order.
    ///
    /// Failures are appended to `primary` as consequences; an aborted marker
    /// coming out of a compensation is propagation of cancellation, not a
    /// cleanup failure, and is not recorded. The stack never masks or
    /// replaces the primary error.
    pub async fn unwind(mut self, primary: &mut Error) {
        for (name, action) in self.entries.drain(..).rev() {
            debug!(compensation = %name, "running compensating action");
            match action().await {
                Ok(()) => debug!(compensation = %name, "compensating action succeeded"),
                Err(e) if e.is_aborted() => {
                    debug!(compensation = %name, "compensating action observed cancellation")
                }
                Err(e) => {
                    error!(compensation = %name, error = %e, "compensating action failed");
                    primary.add_consequence(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Story: compensations run in reverse push order
    #[tokio::test]
    async fn test_unwind_runs_in_reverse_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut stack = RollbackStack::new();
        for label in ["metadata", "network", "hosts"] {
            let order = order.clone();
            stack.push(label, move || {
                async move {
                    order.lock().expect("lock").push(label);
                    Ok(())
                }
                .boxed()
            });
        }

        let mut primary = Error::provisioning("c1-master-2", "boom");
        stack.unwind(&mut primary).await;

        assert_eq!(
            *order.lock().expect("lock"),
            vec!["hosts", "network", "metadata"]
        );
        assert!(primary.consequences().is_empty());
    }

    /// Story: a failing compensation becomes a consequence, never the primary
    #[tokio::test]
    async fn test_failures_attach_as_consequences() {
        let mut stack = RollbackStack::new();
        stack.push("delete subnet", || {
            async { Err(Error::internal("provider", "subnet still has ports")) }.boxed()
        });
        stack.push("delete hosts", || async { Ok(()) }.boxed());

        let mut primary = Error::provisioning("c1-master-2", "boom");
        stack.unwind(&mut primary).await;

        assert_eq!(primary.consequences().len(), 1);
        assert!(primary.to_string().starts_with("provisioning of host"));
        assert!(primary.to_string().contains("subnet still has ports"));
    }

    /// Story: later compensations still run after an earlier one fails
    #[tokio::test]
    async fn test_one_failure_does_not_stop_the_unwind() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut stack = RollbackStack::new();
        let r = ran.clone();
        stack.push("first pushed, last run", move || {
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        stack.push("fails", || {
            async { Err(Error::internal("provider", "nope")) }.boxed()
        });

        let mut primary = Error::provisioning("h", "boom");
        stack.unwind(&mut primary).await;
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(primary.consequences().len(), 1);
    }

    #[tokio::test]
    async fn test_disarm_runs_nothing() {
        let ran = Arc::new(AtomicUsize::new(0));
        let mut stack = RollbackStack::new();
        let r = ran.clone();
        stack.push("never", move || {
            async move {
                r.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
            .boxed()
        });
        stack.disarm();
        assert!(stack.is_empty());

        let mut primary = Error::provisioning("h", "boom");
        stack.unwind(&mut primary).await;
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    /// Aborted markers propagate silently through compensating code
    #[tokio::test]
    async fn test_aborted_compensation_is_not_a_consequence() {
        let mut stack = RollbackStack::new();
        stack.push("observes cancellation", || {
            async { Err(Error::aborted()) }.boxed()
        });
        let mut primary = Error::provisioning("h", "boom");
        stack.unwind(&mut primary).await;
        assert!(primary.consequences().is_empty());
    }
}
