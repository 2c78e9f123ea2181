//! Token verification at connection time.
//!
//! An invalid or absent token never rejects the socket; the connection
//! simply stays anonymous and per-command checks decide what anonymous
//! clients may do.

use async_trait::async_trait;

use forge_core::UserId;
use forge_store::users::UserRepo;
use forge_store::Database;

#[async_trait]
pub trait TokenVerifier: Send + Sync {
    /// Resolve a bearer token to a user, or `None` for anonymous.
    async fn verify(&self, token: &str) -> Option<UserId>;
}

/// Verifier backed by the users table. Tokens of deactivated users are
/// treated as invalid.
pub struct StoreTokenVerifier {
    users: UserRepo,
}

impl StoreTokenVerifier {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db),
        }
    }
}

#[async_trait]
impl TokenVerifier for StoreTokenVerifier {
    async fn verify(&self, token: &str) -> Option<UserId> {
        match self.users.find_by_token(token) {
            Ok(Some(user)) if user.is_active => Some(user.id),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(error = %e, "Token lookup failed, treating as anonymous");
                None
            }
        }
    }
}

/// Resolve an optional token from the connection URL.
pub async fn verify_optional(
    verifier: &dyn TokenVerifier,
    token: Option<&str>,
) -> Option<UserId> {
    match token {
        Some(t) if !t.is_empty() => verifier.verify(t).await,
        _ => None,
    }
}
