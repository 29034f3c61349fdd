//! Structured supervision for session flows

use std::future::Future;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::{Error, Result};

/// A set of named flows that live and die together
///
/// Every flow races its work against the group's cancellation token. The
/// first flow to fail cancels the token, which unblocks and stops the rest;
/// [`join`](Self::join) returns once all of them have exited.
pub struct TaskGroup {
    tasks: JoinSet<(&'static str, Result<()>)>,
    names: Vec<&'static str>,
    cancel: CancellationToken,
}

impl TaskGroup {
    /// Create a group cancelled along with `parent`
    #[must_use]
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            tasks: JoinSet::new(),
            names: Vec::new(),
            cancel: parent.child_token(),
        }
    }

    /// Spawn a named flow into the group
    pub fn spawn<F>(&mut self, name: &'static str, flow: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                outcome = flow => (name, outcome),
                () = cancel.cancelled() => (name, Ok(())),
            }
        });
        self.names.push(name);
        tracing::trace!(flow = name, "flow started");
    }

    /// Spawn a flow that handles cancellation itself
    ///
    /// The flow receives the group token and must return promptly once it
    /// fires; use this for flows that have cleanup to finish on the way out.
    pub fn spawn_with_token<F, Fut>(&mut self, name: &'static str, flow: F)
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let fut = flow(self.cancel.clone());
        self.tasks.spawn(async move { (name, fut.await) });
        self.names.push(name);
        tracing::trace!(flow = name, "flow started");
    }

    /// Names of every flow spawned into the group, in spawn order
    #[must_use]
    pub fn names(&self) -> &[&'static str] {
        &self.names
    }

    /// Token fired when any flow fails or the parent is cancelled
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every flow to exit
    ///
    /// # Errors
    ///
    /// Returns the first flow error; later errors are logged and dropped
    pub async fn join(mut self) -> Result<()> {
        let mut first_error: Option<Error> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let failure = match joined {
                Ok((name, Ok(()))) => {
                    tracing::debug!(flow = name, "flow finished");
                    None
                }
                Ok((name, Err(e))) => {
                    tracing::debug!(flow = name, error = %e, "flow failed");
                    Some(e)
                }
                Err(e) if e.is_cancelled() => None,
                Err(e) => Some(Error::Flow(format!("session flow panicked: {e}"))),
            };

            if let Some(e) = failure {
                if first_error.is_none() {
                    self.cancel.cancel();
                    first_error = Some(e);
                } else {
                    tracing::debug!(error = %e, "additional flow failure after cancellation");
                }
            }
        }

        first_error.map_or(Ok(()), Err)
    }
}
