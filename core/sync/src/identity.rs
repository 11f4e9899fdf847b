//! Identity provider seam.

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use syncbridge_common::{Error, Result, UserId};

/// Identity provider that signs the user in and issues identity tokens.
///
/// Login flows live outside SyncBridge; the connector only needs to know who
/// is signed in and how to get a token proving it.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// The currently authenticated user, if any.
    async fn current_user(&self) -> Option<UserId>;

    /// Get an identity token for the current user.
    ///
    /// With `force_refresh` the provider must mint a new token instead of
    /// returning a cached one.
    ///
    /// # Errors
    /// - No user is signed in
    /// - Network errors
    async fn id_token(&self, force_refresh: bool) -> Result<String>;

    /// Sign the current user out.
    async fn sign_out(&self) -> Result<()>;
}

/// Identity provider backed by a fixed token.
///
/// Used by the command line tool, where the caller already holds a token.
pub struct StaticIdentity {
    session: RwLock<Option<(UserId, String)>>,
}

impl StaticIdentity {
    /// Signed-in identity for `user` presenting `token`.
    pub fn new(user: UserId, token: impl Into<String>) -> Self {
        Self {
            session: RwLock::new(Some((user, token.into()))),
        }
    }

    /// Identity with nobody signed in.
    pub fn signed_out() -> Self {
        Self {
            session: RwLock::new(None),
        }
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn current_user(&self) -> Option<UserId> {
        self.session.read().await.as_ref().map(|(user, _)| user.clone())
    }

    async fn id_token(&self, _force_refresh: bool) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|(_, token)| token.clone())
            .ok_or_else(|| Error::Authentication("No user is signed in".to_string()))
    }

    async fn sign_out(&self) -> Result<()> {
        if let Some((user, _)) = self.session.write().await.take() {
            info!("Signed out {}", user);
        }
        Ok(())
    }
}
