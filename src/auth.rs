//! Application-scoped authentication state.
//!
//! The store is created once by the application shell, initialized exactly
//! once (optionally restoring a saved session), and handed to whoever needs
//! it. Listeners subscribe explicitly and are notified on every change.

use crate::error::{Error, Result};
use crate::models::ChurchId;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// A signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSession {
    pub user_id: String,
    #[serde(default)]
    pub email: Option<String>,
    pub access_token: String,
    /// The church this user administers, once known.
    #[serde(default)]
    pub church_id: Option<ChurchId>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum AuthState {
    /// `initialize` has not run yet.
    #[default]
    Uninitialized,
    SignedOut,
    SignedIn(AuthSession),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener = Box<dyn Fn(&AuthState) + Send + Sync>;

#[derive(Default)]
pub struct AuthStore {
    state: AuthState,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: u64,
}

impl AuthStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Establish the initial state. Fails if called more than once.
    pub fn initialize(&mut self, restored: Option<AuthSession>) -> Result<()> {
        if self.state != AuthState::Uninitialized {
            return Err(Error::Conflict("auth store already initialized".to_string()));
        }
        let next = match restored {
            Some(session) => {
                info!("Restored session for user {}", session.user_id);
                AuthState::SignedIn(session)
            }
            None => AuthState::SignedOut,
        };
        self.set(next);
        Ok(())
    }

    pub fn subscribe(&mut self, listener: impl Fn(&AuthState) + Send + Sync + 'static) -> SubscriptionId {
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        self.listeners.push((id, Box::new(listener)));
        id
    }

    /// Returns `false` if the subscription was already gone.
    #[allow(dead_code)] // Listener contract; the CLI keeps its one listener for the run
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(l, _)| *l != id);
        self.listeners.len() != before
    }

    #[allow(dead_code)] // The CLI only restores sessions from config
    pub fn sign_in(&mut self, session: AuthSession) -> Result<()> {
        self.ensure_initialized()?;
        self.set(AuthState::SignedIn(session));
        Ok(())
    }

    #[allow(dead_code)] // The CLI only restores sessions from config
    pub fn sign_out(&mut self) -> Result<()> {
        self.ensure_initialized()?;
        self.set(AuthState::SignedOut);
        Ok(())
    }

    /// Record which church the signed-in user administers.
    pub fn set_church(&mut self, church_id: ChurchId) -> Result<()> {
        let AuthState::SignedIn(ref session) = self.state else {
            return Err(Error::Unauthorized);
        };
        let mut session = session.clone();
        session.church_id = Some(church_id);
        self.set(AuthState::SignedIn(session));
        Ok(())
    }

    #[allow(dead_code)] // Listeners receive the state directly
    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn session(&self) -> Option<&AuthSession> {
        match self.state {
            AuthState::SignedIn(ref session) => Some(session),
            _ => None,
        }
    }

    /// The bearer token for authenticated calls.
    pub fn access_token(&self) -> Result<&str> {
        self.session()
            .map(|s| s.access_token.as_str())
            .ok_or(Error::Unauthorized)
    }

    #[allow(dead_code)] // Utility accessor (the workspace carries the church)
    pub fn church_id(&self) -> Option<ChurchId> {
        self.session().and_then(|s| s.church_id)
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.state == AuthState::Uninitialized {
            return Err(Error::Conflict("auth store not initialized".to_string()));
        }
        Ok(())
    }

    fn set(&mut self, next: AuthState) {
        self.state = next;
        debug!("Auth state changed, notifying {} listeners", self.listeners.len());
        for (_, listener) in &self.listeners {
            listener(&self.state);
        }
    }
}
