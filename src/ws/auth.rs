//! IAM token handling for the WebSocket upgrade request.

use std::sync::{PoisonError, RwLock};

/// Atomic get/set of the bearer token added to the upgrade request's
/// `Authorization` header. Callers may rotate it between reconnects.
#[derive(Debug, Default)]
pub struct IamTokenSource {
    token: RwLock<String>,
}

impl IamTokenSource {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: RwLock::new(token.into()),
        }
    }

    pub fn token(&self) -> String {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        *self.token.write().unwrap_or_else(PoisonError::into_inner) = token.into();
    }
}
