//! Owner of the live [`AuthState`].
//!
//! The manager is the only place that mutates the state. Each effective
//! change is persisted and then broadcast to subscribers. Writes are
//! serialized behind a single lock, so the persisted blob always matches
//! the last state observers were told about.

use tokio::sync::{broadcast, RwLock};
use tracing::{debug, info, instrument, warn};

use super::codec::{decode_browser_session, encode_browser_session, JsonStateCodec, StateCodec};
use super::{AuthState, AuthStatus, AuthorizationErrorDetail, BrowserSessionStatus, TokenType};
use crate::oauth::auth::config::{DEFAULT_AUTH_STATE_KEY, DEFAULT_BROWSER_STATE_KEY};
use crate::oauth::storage::BlobStorage;
use crate::oauth::token::TokenResponse;
use crate::oauth::{Error, Result};

const EVENT_CAPACITY: usize = 32;

/// Notification emitted after a state change was persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStateEvent {
    /// Authorization data changed; carries the new status.
    StateChanged(AuthStatus),
    /// An authorization error was recorded.
    AuthorizationError(AuthorizationErrorDetail),
    BrowserSessionChanged(BrowserSessionStatus),
    /// App-session logout removed the authorization data.
    Cleared,
}

/// Loads, mutates, persists and broadcasts the authorization state.
pub struct AuthStateManager<S, C = JsonStateCodec> {
    storage: S,
    codec: C,
    auth_key: String,
    browser_key: String,
    state: RwLock<AuthState>,
    events: broadcast::Sender<AuthStateEvent>,
}

impl<S, C> std::fmt::Debug for AuthStateManager<S, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthStateManager")
            .field("auth_key", &self.auth_key)
            .field("browser_key", &self.browser_key)
            .finish_non_exhaustive()
    }
}

impl<S: BlobStorage> AuthStateManager<S> {
    /// Manager using the default keys and the JSON codec.
    pub fn new(storage: S) -> Self {
        Self::with_codec(storage, JsonStateCodec)
    }
}

impl<S: BlobStorage, C: StateCodec> AuthStateManager<S, C> {
    pub fn with_codec(storage: S, codec: C) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            storage,
            codec,
            auth_key: DEFAULT_AUTH_STATE_KEY.to_string(),
            browser_key: DEFAULT_BROWSER_STATE_KEY.to_string(),
            state: RwLock::new(AuthState::empty()),
            events,
        }
    }

    /// Override the storage keys.
    #[must_use]
    pub fn with_keys(mut self, auth_key: impl Into<String>, browser_key: impl Into<String>) -> Self {
        self.auth_key = auth_key.into();
        self.browser_key = browser_key.into();
        self
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AuthStateEvent> {
        self.events.subscribe()
    }

    /// A copy of the current state.
    pub async fn snapshot(&self) -> AuthState {
        self.state.read().await.clone()
    }

    /// Masked human-readable summary of the current state.
    pub async fn summary(&self) -> String {
        self.state.read().await.summary()
    }

    /// Replace the in-memory state with what storage holds.
    ///
    /// Bytes that do not decode yield an empty state; storage read failures
    /// are returned. A loaded token is marked as needing a refresh before
    /// its first use.
    #[instrument(skip(self), fields(storage = self.storage.name()))]
    pub async fn load(&self) -> Result<AuthState> {
        let mut loaded = match self.storage.get(&self.auth_key).await? {
            Some(bytes) => self.codec.decode(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Stored auth state is unreadable, starting empty");
                AuthState::empty()
            }),
            None => AuthState::empty(),
        };

        let browser = match self.storage.get(&self.browser_key).await? {
            Some(bytes) => decode_browser_session(&bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Stored browser state is unreadable");
                BrowserSessionStatus::Inactive
            }),
            None => BrowserSessionStatus::Inactive,
        };
        loaded.set_browser_session(browser);

        if loaded.token_response().is_some() {
            loaded.set_needs_token_refresh();
        }

        let mut state = self.state.write().await;
        *state = loaded.clone();
        drop(state);

        info!(status = ?loaded.status(), browser = ?browser, "Auth state loaded");
        self.emit(AuthStateEvent::StateChanged(loaded.status()));
        Ok(loaded)
    }

    /// Install `new` as the current authorization.
    ///
    /// The browser session flag is kept from the current state. Returns
    /// `false` without touching storage when nothing changed.
    #[instrument(skip_all)]
    pub async fn set_auth_state(&self, mut new: AuthState) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.same_authorization(&new) {
            debug!("Auth state unchanged, skipping persist");
            return Ok(false);
        }

        new.set_browser_session(state.browser_session());
        self.persist(&new).await?;
        let status = new.status();
        *state = new;
        drop(state);

        debug!(status = ?status, "Auth state replaced");
        self.emit(AuthStateEvent::StateChanged(status));
        Ok(true)
    }

    /// Record the outcome of a token request.
    ///
    /// Success stores the tokens, clears any error and revoked flags. Failure
    /// is recorded as the last authorization error, flagged transient unless
    /// it is an authorization-class error.
    #[instrument(skip_all, fields(ok = outcome.is_ok()))]
    pub async fn update_with_token_response(
        &self,
        outcome: std::result::Result<TokenResponse, &Error>,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();

        let error = match outcome {
            Ok(token) => {
                next.apply_token_response(token)?;
                None
            }
            Err(err) => {
                let detail = AuthorizationErrorDetail::from_error(err);
                next.record_error(detail.clone());
                Some(detail)
            }
        };

        self.persist(&next).await?;
        let status = next.status();
        *state = next;
        drop(state);

        self.emit(AuthStateEvent::StateChanged(status));
        if let Some(detail) = error {
            self.emit(AuthStateEvent::AuthorizationError(detail));
        }
        Ok(())
    }

    /// Record that a resource server rejected the access token.
    #[instrument(skip(self))]
    pub async fn update_with_authorization_error(
        &self,
        detail: AuthorizationErrorDetail,
    ) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.apply_authorization_error(detail);

        self.persist(&next).await?;
        let status = next.status();
        let recorded = next.last_authorization_error().cloned();
        *state = next;
        drop(state);

        self.emit(AuthStateEvent::StateChanged(status));
        if let Some(detail) = recorded {
            self.emit(AuthStateEvent::AuthorizationError(detail));
        }
        Ok(())
    }

    /// Mark a token revoked. Revoking twice persists once.
    #[instrument(skip(self))]
    pub async fn set_token_revoked(&self, token_type: TokenType) -> Result<()> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        next.set_token_revoked(token_type);
        if next.same_authorization(&state) {
            return Ok(());
        }

        self.persist(&next).await?;
        let status = next.status();
        *state = next;
        drop(state);

        self.emit(AuthStateEvent::StateChanged(status));
        Ok(())
    }

    /// Update the browser session flag. Returns whether it changed.
    #[instrument(skip(self))]
    pub async fn set_browser_session(&self, status: BrowserSessionStatus) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.browser_session() == status {
            return Ok(false);
        }

        let bytes = encode_browser_session(status)?;
        self.storage.set(&self.browser_key, &bytes).await?;
        state.set_browser_session(status);
        drop(state);

        self.emit(AuthStateEvent::BrowserSessionChanged(status));
        Ok(true)
    }

    /// Drop the authorization data. The browser session flag survives.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.storage.remove(&self.auth_key).await?;

        let browser = state.browser_session();
        *state = AuthState::empty();
        state.set_browser_session(browser);
        drop(state);

        info!("Auth state cleared");
        self.emit(AuthStateEvent::Cleared);
        Ok(())
    }

    async fn persist(&self, state: &AuthState) -> Result<()> {
        if state.is_empty() {
            self.storage.remove(&self.auth_key).await
        } else {
            let bytes = self.codec.encode(state)?;
            self.storage.set(&self.auth_key, &bytes).await
        }
    }

    fn emit(&self, event: AuthStateEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oauth::state::fixtures::{authorization_response, authorized, token};
    use crate::oauth::storage::MemoryBlobStorage;
    use crate::oauth::AuthError;

    fn manager() -> (AuthStateManager<MemoryBlobStorage>, MemoryBlobStorage) {
        let storage = MemoryBlobStorage::new();
        (AuthStateManager::new(storage.clone()), storage)
    }

    #[tokio::test]
    async fn test_set_auth_state_persists_once() {
        let (manager, storage) = manager();
        let mut events = manager.subscribe();
        let state = authorized("at", Some("rt"), 3600);

        assert!(manager.set_auth_state(state.clone()).await.unwrap());
        assert!(!manager.set_auth_state(state).await.unwrap());

        assert_eq!(storage.write_count(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            AuthStateEvent::StateChanged(AuthStatus::Authorized)
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_round_trip_through_storage() {
        let (manager, storage) = manager();
        manager
            .set_auth_state(authorized("at", Some("rt"), 3600))
            .await
            .unwrap();
        manager
            .set_browser_session(BrowserSessionStatus::Active)
            .await
            .unwrap();
        let saved = manager.snapshot().await;

        let reloaded = AuthStateManager::new(storage).load().await.unwrap();

        assert!(reloaded.same_authorization(&saved));
        assert_eq!(reloaded.browser_session(), BrowserSessionStatus::Active);
        assert_eq!(reloaded.refresh_token(), Some("rt"));
        assert!(reloaded.needs_token_refresh());
        assert!(reloaded.is_authorized());
    }

    #[tokio::test]
    async fn test_corrupt_blob_loads_empty() {
        let storage = MemoryBlobStorage::with_entries([
            (DEFAULT_AUTH_STATE_KEY, b"{broken".to_vec()),
            (DEFAULT_BROWSER_STATE_KEY, b"??".to_vec()),
        ]);
        let manager = AuthStateManager::new(storage);

        let state = manager.load().await.unwrap();
        assert!(state.is_empty());
        assert_eq!(state.browser_session(), BrowserSessionStatus::Inactive);
    }

    #[tokio::test]
    async fn test_set_auth_state_keeps_browser_flag() {
        let (manager, _) = manager();
        manager
            .set_browser_session(BrowserSessionStatus::Active)
            .await
            .unwrap();

        manager
            .set_auth_state(authorized("at", None, 3600))
            .await
            .unwrap();
        assert!(manager.snapshot().await.is_browser_session_active());
    }

    #[tokio::test]
    async fn test_token_response_updates_and_events() {
        let (manager, _) = manager();
        manager
            .set_auth_state(AuthState::from_authorization(
                authorization_response(Some("code")),
                None,
            ))
            .await
            .unwrap();
        let mut events = manager.subscribe();

        manager
            .update_with_token_response(Ok(token("at", Some("rt"), 3600)))
            .await
            .unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            AuthStateEvent::StateChanged(AuthStatus::Authorized)
        );

        let err = Error::Auth(AuthError::InvalidGrant);
        manager.update_with_token_response(Err(&err)).await.unwrap();
        assert_eq!(
            events.try_recv().unwrap(),
            AuthStateEvent::StateChanged(AuthStatus::Error)
        );
        assert!(matches!(
            events.try_recv().unwrap(),
            AuthStateEvent::AuthorizationError(detail) if detail.error == "invalid_grant"
        ));
        assert!(!manager.snapshot().await.is_authorized());
    }

    #[tokio::test]
    async fn test_token_response_without_authorization_is_rejected() {
        let (manager, storage) = manager();
        let err = manager
            .update_with_token_response(Ok(token("at", None, 3600)))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::CodeExchangeRequired)));
        assert_eq!(storage.write_count(), 0);
    }

    #[tokio::test]
    async fn test_authorization_error_forces_refresh() {
        let (manager, _) = manager();
        manager
            .set_auth_state(authorized("at", Some("rt"), 3600))
            .await
            .unwrap();

        manager
            .update_with_authorization_error(AuthorizationErrorDetail::unauthorized("401"))
            .await
            .unwrap();

        let state = manager.snapshot().await;
        assert!(state.needs_token_refresh());
        assert!(!state.is_authorized());
        assert!(state.token_refresh_request().is_some());
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (manager, storage) = manager();
        manager
            .set_auth_state(authorized("at", Some("rt"), 3600))
            .await
            .unwrap();

        manager.set_token_revoked(TokenType::AccessToken).await.unwrap();
        manager.set_token_revoked(TokenType::AccessToken).await.unwrap();

        assert_eq!(storage.write_count(), 2);
        assert!(manager.snapshot().await.access_token().is_none());
    }

    #[tokio::test]
    async fn test_browser_session_only_writes_on_change() {
        let (manager, storage) = manager();
        let mut events = manager.subscribe();

        assert!(manager
            .set_browser_session(BrowserSessionStatus::Active)
            .await
            .unwrap());
        assert!(!manager
            .set_browser_session(BrowserSessionStatus::Active)
            .await
            .unwrap());

        assert_eq!(storage.write_count(), 1);
        assert_eq!(
            events.try_recv().unwrap(),
            AuthStateEvent::BrowserSessionChanged(BrowserSessionStatus::Active)
        );
        assert_eq!(
            storage.get(DEFAULT_BROWSER_STATE_KEY).await.unwrap(),
            Some(br#"{"status":"active"}"#.to_vec())
        );
    }

    #[tokio::test]
    async fn test_clear_keeps_browser_session() {
        let (manager, storage) = manager();
        manager
            .set_auth_state(authorized("at", Some("rt"), 3600))
            .await
            .unwrap();
        manager
            .set_browser_session(BrowserSessionStatus::Active)
            .await
            .unwrap();

        manager.clear().await.unwrap();

        let state = manager.snapshot().await;
        assert!(state.is_empty());
        assert!(state.is_browser_session_active());
        assert!(!storage.exists(DEFAULT_AUTH_STATE_KEY).await.unwrap());
        assert!(storage.exists(DEFAULT_BROWSER_STATE_KEY).await.unwrap());
    }

    #[tokio::test]
    async fn test_custom_keys() {
        let storage = MemoryBlobStorage::new();
        let manager = AuthStateManager::new(storage.clone()).with_keys("a", "b");

        manager
            .set_auth_state(authorized("at", None, 3600))
            .await
            .unwrap();
        assert!(storage.exists("a").await.unwrap());
        assert!(!storage.exists(DEFAULT_AUTH_STATE_KEY).await.unwrap());
    }
}
