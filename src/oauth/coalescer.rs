//! Single-flight execution for token refreshes.
//!
//! [`RefreshCoalescer::execute`] collapses concurrent refresh requests into
//! one run of the refresh action. The first caller becomes the leader and
//! runs the action; callers arriving while it runs become followers and
//! receive a clone of the leader's outcome. Joining the wait list and
//! draining it happen under the same lock, so a follower is either drained
//! by the current leader or becomes the next leader. It is never lost.
//!
//! If the leader's future is dropped before it finishes, the followers are
//! released with [`RefreshAbandoned`] and the coalescer returns to idle.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;
use tracing::{debug, trace};

/// The leading refresh was dropped before it produced an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshAbandoned;

type Waiters<T, E> = Vec<oneshot::Sender<Result<T, E>>>;

/// Coalesces concurrent refreshes into one in-flight operation.
pub struct RefreshCoalescer<T, E> {
    // `None` when idle, `Some(followers)` while a leader is running.
    in_flight: Mutex<Option<Waiters<T, E>>>,
}

impl<T, E> Default for RefreshCoalescer<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, E> std::fmt::Debug for RefreshCoalescer<T, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshCoalescer")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}

enum Role<T, E> {
    Leader,
    Follower(oneshot::Receiver<Result<T, E>>),
}

impl<T, E> RefreshCoalescer<T, E> {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(None),
        }
    }

    /// Whether a refresh is currently running.
    pub fn is_in_flight(&self) -> bool {
        self.lock().is_some()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Waiters<T, E>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn join(&self) -> Role<T, E> {
        let mut in_flight = self.lock();
        match in_flight.as_mut() {
            Some(waiters) => {
                let (sender, receiver) = oneshot::channel();
                waiters.push(sender);
                Role::Follower(receiver)
            }
            None => {
                *in_flight = Some(Vec::new());
                Role::Leader
            }
        }
    }
}

impl<T, E> RefreshCoalescer<T, E>
where
    T: Clone,
    E: Clone + From<RefreshAbandoned>,
{
    /// Run `refresh`, or join the refresh already running.
    ///
    /// Every caller that joined before the leader finished observes the
    /// identical outcome, success or error.
    pub async fn execute<F, Fut>(&self, refresh: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        match self.join() {
            Role::Follower(receiver) => {
                trace!("Joining in-flight refresh");
                receiver
                    .await
                    .unwrap_or_else(|_| Err(E::from(RefreshAbandoned)))
            }
            Role::Leader => {
                let mut guard = LeaderGuard {
                    coalescer: self,
                    finished: false,
                };
                let outcome = refresh().await;
                guard.finish(&outcome);
                outcome
            }
        }
    }
}

/// Drains the wait list when the leader finishes or is dropped.
struct LeaderGuard<'a, T, E> {
    coalescer: &'a RefreshCoalescer<T, E>,
    finished: bool,
}

impl<T: Clone, E: Clone> LeaderGuard<'_, T, E> {
    fn finish(&mut self, outcome: &Result<T, E>) {
        self.finished = true;
        let waiters = self.coalescer.lock().take().unwrap_or_default();
        debug!(followers = waiters.len(), ok = outcome.is_ok(), "Refresh completed");
        for waiter in waiters {
            // A follower that stopped waiting is not an error.
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl<T, E> Drop for LeaderGuard<'_, T, E> {
    fn drop(&mut self) {
        if !self.finished {
            // Dropping the senders wakes followers with `RefreshAbandoned`.
            let abandoned = self.coalescer.lock().take().map_or(0, |w| w.len());
            debug!(followers = abandoned, "Refresh leader dropped before completion");
        }
    }
}
