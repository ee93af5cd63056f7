//! RAII holder for a granted token.

use super::manager::AdmissionManager;
use super::token::{Token, TokenId};

/// A granted token bound to the manager that issued it.
///
/// The token goes back to its own manager exactly once: explicitly through
/// [`AdmissionGuard::release`], or on drop. Swapping the service's manager
/// does not redirect it.
#[must_use = "dropping the guard releases the token immediately"]
#[derive(Debug)]
pub struct AdmissionGuard {
    token: Option<Token>,
    manager: AdmissionManager,
}

impl AdmissionGuard {
    pub fn new(token: Token, manager: AdmissionManager) -> Self {
        Self {
            token: Some(token),
            manager,
        }
    }

    pub fn token_id(&self) -> Option<TokenId> {
        self.token.as_ref().map(Token::id)
    }

    pub fn manager(&self) -> &AdmissionManager {
        &self.manager
    }

    /// Release now, waiting for mailbox room if needed.
    ///
    /// Cancelling this while it waits still releases the token, detached.
    pub async fn release(mut self) {
        if let Some(token) = self.token.take() {
            self.manager.release(Some(token)).await;
        }
    }
}

impl Drop for AdmissionGuard {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            tracing::trace!(token = %token.id(), "Guard dropped - releasing token");
            self.manager.release_detached(token);
        }
    }
}
