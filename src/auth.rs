//! Credential collaborators.
//!
//! The call layer does not store or mint credentials. It asks an [`AuthHeaderProvider`] for
//! an `Authorization` value on every attempt, and on a 401 asks a [`TokenRefresher`] to
//! refresh once before retrying.

use async_trait::async_trait;
use std::sync::{Arc, RwLock};

/// Supplies the `Authorization` header. Consulted once per attempt; never cached here.
#[async_trait]
pub trait AuthHeaderProvider: Send + Sync {
    async fn authorization(&self) -> Option<String>;
}

/// Refreshes credentials after a 401.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Refresh credentials. An `Err` carries a human-readable reason.
    async fn refresh(&self) -> std::result::Result<(), String>;

    /// Called when refreshing failed and the user has to sign in again.
    async fn session_expired(&self) {}
}

/// Never sends an `Authorization` header.
pub struct NoAuth;

#[async_trait]
impl AuthHeaderProvider for NoAuth {
    async fn authorization(&self) -> Option<String> {
        None
    }
}

/// Bearer token held in memory and swappable at runtime.
pub struct BearerToken {
    token: RwLock<Option<String>>,
}

impl BearerToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(Some(token.into())),
        }
    }

    pub fn empty() -> Self {
        Self {
            token: RwLock::new(None),
        }
    }

    pub fn set(&self, token: impl Into<String>) {
        if let Ok(mut t) = self.token.write() {
            *t = Some(token.into());
        }
    }

    pub fn clear(&self) {
        if let Ok(mut t) = self.token.write() {
            *t = None;
        }
    }
}

#[async_trait]
impl AuthHeaderProvider for BearerToken {
    async fn authorization(&self) -> Option<String> {
        self.token
            .read()
            .ok()?
            .as_ref()
            .map(|t| format!("Bearer {}", t))
    }
}

pub fn no_auth() -> Arc<dyn AuthHeaderProvider> {
    Arc::new(NoAuth)
}
