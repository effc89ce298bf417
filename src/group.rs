//! Fail-fast task group.
//!
//! A [`TaskGroup`] runs a set of concurrent tasks under one shared
//! cancellation scope. The first task to return an error cancels the scope
//! for all of its siblings; [`TaskGroup::wait`] blocks until every task has
//! exited and reports the first error in spawn order.
//!
//! Cancellation of the parent token has the same unblocking effect as an
//! internal error, but is not itself an error: a task that observes
//! cancellation while blocked should return `Ok(())`.
//!
//! # Example
//!
//! ```rust,ignore
//! use axon::group::TaskGroup;
//!
//! let mut group: TaskGroup<MyError> = TaskGroup::new(&parent_token);
//! let token = group.token();
//! group.spawn(async move { read_loop(token).await });
//! group.spawn(async move { write_loop().await });
//! group.wait().await?;
//! ```

use std::future::Future;
use std::panic;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A group of concurrent tasks sharing one cancellable scope.
pub struct TaskGroup<E> {
    token: CancellationToken,
    handles: Vec<JoinHandle<Result<(), E>>>,
}

impl<E: Send + 'static> TaskGroup<E> {
    /// Create a group whose scope is a child of `parent`.
    ///
    /// Cancelling `parent` cancels the group's scope; the reverse does not
    /// hold, so a failing session cannot take down its connection's
    /// siblings.
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            handles: Vec::new(),
        }
    }

    /// A handle to the group's shared cancellation scope.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Spawn a task into the group.
    ///
    /// The scope is cancelled the moment the task returns an error, before
    /// anyone calls [`TaskGroup::wait`].
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let token = self.token.clone();
        self.handles.push(tokio::spawn(async move {
            let result = future.await;
            if result.is_err() {
                token.cancel();
            }
            result
        }));
    }

    /// Block until every spawned task has exited.
    ///
    /// Returns the first error in spawn order (not first-to-finish), or
    /// `Ok(())` when no task failed. Parent cancellation alone never
    /// produces an error here. Task panics are resumed on the caller.
    pub async fn wait(mut self) -> Result<(), E> {
        let mut first_error = None;
        for handle in self.handles.drain(..) {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
                Err(join_error) => {
                    if join_error.is_panic() {
                        panic::resume_unwind(join_error.into_panic());
                    }
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<E> Drop for TaskGroup<E> {
    fn drop(&mut self) {
        // An abandoned group must not leave its tasks blocked forever.
        self.token.cancel();
    }
}
