//! Callback-to-future bridge for browser redirects.
//!
//! A browser agent reports its result through a callback some time after it
//! was asked to present a request. [`pending_redirect`] splits one pending
//! redirect into two halves:
//!
//! - [`RedirectCallback`], handed to the agent, resolved exactly once
//! - [`ResponseAwaiter`], kept by the caller, awaited exactly once
//!
//! Both halves are consumed by value, so a second resolution or a second
//! wait does not compile. Dropping the callback without resolving it (the
//! agent's session was torn down) fails the wait with
//! [`AuthError::AgentFailed`].
//!
//! ```rust
//! use oauth_session::oauth::awaiter::pending_redirect;
//! use oauth_session::oauth::{AuthError, Error};
//!
//! # tokio_test_block_on(async {
//! let (callback, awaiter) = pending_redirect::<String>("state-123");
//! callback.callback(None, Some(Error::Auth(AuthError::UserCancelled)));
//!
//! let err = awaiter.wait_for_callback().await.unwrap_err();
//! assert!(err.is_user_cancelled());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use tokio::sync::oneshot;
use tracing::debug;

use super::{AuthError, Error, Result};

/// Create the two halves of a pending redirect correlated by `state`.
pub fn pending_redirect<R>(state: impl Into<String>) -> (RedirectCallback<R>, ResponseAwaiter<R>) {
    let state = state.into();
    let (sender, receiver) = oneshot::channel();
    (
        RedirectCallback {
            sender,
            state: state.clone(),
        },
        ResponseAwaiter { receiver, state },
    )
}

/// Producer half: resolves the pending redirect.
#[derive(Debug)]
pub struct RedirectCallback<R> {
    sender: oneshot::Sender<Result<R>>,
    state: String,
}

impl<R> RedirectCallback<R> {
    /// The `state` nonce of the request this callback belongs to.
    pub fn expected_state(&self) -> &str {
        &self.state
    }

    /// Resolve with whatever the platform delivered.
    ///
    /// An error wins over a response. A callback carrying neither is
    /// reported as [`AuthError::AgentFailed`].
    pub fn callback(self, response: Option<R>, error: Option<Error>) {
        let outcome = match (response, error) {
            (_, Some(err)) => Err(err),
            (Some(response), None) => Ok(response),
            (None, None) => Err(AuthError::agent_failed(
                "callback carried neither a response nor an error",
            )
            .into()),
        };
        self.resolve(outcome);
    }

    /// Resolve with an outcome.
    pub fn resolve(self, outcome: Result<R>) {
        if self.sender.send(outcome).is_err() {
            debug!(state = %self.state, "Redirect resolved after its awaiter was dropped");
        }
    }

    /// Resolve as cancelled by the user.
    pub fn cancel(self) {
        self.resolve(Err(AuthError::UserCancelled.into()));
    }

    /// Whether the awaiting side has gone away.
    pub fn is_abandoned(&self) -> bool {
        self.sender.is_closed()
    }

    /// Completes once the awaiting side has gone away.
    pub async fn abandoned(&mut self) {
        self.sender.closed().await;
    }
}

/// Consumer half: awaits the redirect result.
#[derive(Debug)]
pub struct ResponseAwaiter<R> {
    receiver: oneshot::Receiver<Result<R>>,
    state: String,
}

impl<R> ResponseAwaiter<R> {
    /// The `state` nonce of the request being awaited.
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Suspend until the callback half resolves.
    ///
    /// # Errors
    ///
    /// - the error the callback was resolved with, [`AuthError::UserCancelled`] included
    /// - [`AuthError::AgentFailed`] if the callback half was dropped unresolved
    pub async fn wait_for_callback(self) -> Result<R> {
        match self.receiver.await {
            Ok(outcome) => outcome,
            Err(_) => Err(AuthError::agent_failed(
                "browser session ended without delivering a redirect",
            )
            .into()),
        }
    }
}
