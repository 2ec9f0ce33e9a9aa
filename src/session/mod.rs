//! Session Module - current-user identity sourced from an external provider
//!
//! Core operations never read ambient auth state: each takes the user id as
//! an explicit parameter. A single [`SessionTracker`] at the top of the call
//! chain sources that identity from the provider and its subscription guard
//! tears the registration down on every exit path.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Session provider error: {0}")]
    Provider(String),
}

/// Authenticated account identity, as supplied by the session provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    /// Opaque stable identifier, owned by the provider.
    pub id: String,

    /// Email, when the provider exposes one.
    pub email: Option<String>,
}

/// Session lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    SignedIn,
    SignedOut,
}

/// Callback invoked on every session change.
pub type SessionHandler = Arc<dyn Fn(SessionEvent, Option<&UserAccount>) + Send + Sync>;

/// Live session-change registration; dropping it unsubscribes.
pub struct SessionSubscription {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SessionSubscription {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }
}

impl Drop for SessionSubscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

/// External authentication/session service.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Currently signed-in user, if any.
    async fn current_user(&self) -> Result<Option<UserAccount>, SessionError>;

    /// Register for sign-in/sign-out events.
    fn on_session_change(&self, handler: SessionHandler) -> SessionSubscription;
}

/// Tracks the signed-in identity from a provider.
///
/// Seeded from [`SessionProvider::current_user`], then kept current by the
/// provider's event stream. The returned subscription owns the registration;
/// the tracker stops updating once it is dropped.
#[derive(Clone)]
pub struct SessionTracker {
    current: Arc<RwLock<Option<UserAccount>>>,
}

impl SessionTracker {
    pub async fn attach(
        provider: &dyn SessionProvider,
    ) -> Result<(Self, SessionSubscription), SessionError> {
        let current = Arc::new(RwLock::new(provider.current_user().await?));

        let tracked = Arc::clone(&current);
        let subscription = provider.on_session_change(Arc::new(move |event, user| {
            let next = match event {
                SessionEvent::SignedIn => user.cloned(),
                SessionEvent::SignedOut => None,
            };
            *tracked.write() = next;
        }));

        Ok((Self { current }, subscription))
    }

    /// Snapshot of the signed-in user.
    pub fn current(&self) -> Option<UserAccount> {
        self.current.read().clone()
    }

    /// The signed-in user's id.
    pub fn user_id(&self) -> Option<String> {
        self.current.read().as_ref().map(|user| user.id.clone())
    }
}
