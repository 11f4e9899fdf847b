//! Sync-channel credentials and their refresh coordination.

use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::identity::IdentityProvider;

/// Short-lived token and endpoint authorizing the sync channel.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Sync service endpoint.
    pub endpoint: String,
    /// Bearer token for the sync service.
    pub token: String,
    /// User the token was issued for.
    pub user_id: Option<String>,
    /// When the token stops being accepted.
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// Check if the token has expired at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| expires <= now)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("token", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of a successful token exchange.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    power_sync_url: String,
    token: String,
    #[serde(default)]
    user_id: Option<String>,
    /// Epoch seconds.
    #[serde(default)]
    expires_at: Option<i64>,
}

impl TokenResponse {
    fn into_credentials(self) -> Credentials {
        Credentials {
            endpoint: self.power_sync_url,
            token: self.token,
            user_id: self.user_id,
            expires_at: self
                .expires_at
                .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0)),
        }
    }
}

/// Single-slot marker for an in-flight credential refresh.
#[derive(Debug, Default)]
pub struct RefreshGuard {
    in_flight: AtomicBool,
    attempts: AtomicU64,
}

impl RefreshGuard {
    /// Claim the slot. Returns false if a refresh is already running.
    pub fn try_acquire(&self) -> bool {
        let acquired = self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acquired {
            self.attempts.fetch_add(1, Ordering::Relaxed);
        }
        acquired
    }

    /// Free the slot.
    pub fn release(&self) {
        self.in_flight.store(false, Ordering::Release);
    }

    /// Check if a refresh is running.
    pub fn is_held(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Number of refresh attempts started so far.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::Relaxed)
    }
}

/// Releases the guard when the refresh task ends, even if it panics.
struct InFlight(Arc<RefreshGuard>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.release();
    }
}

/// Produces sync-channel credentials from the signed-in identity.
pub struct CredentialProvider {
    identity: Arc<dyn IdentityProvider>,
    http: Client,
    token_url: Url,
    refresh_timeout: Duration,
    guard: Arc<RefreshGuard>,
}

impl CredentialProvider {
    /// Create a provider exchanging identity tokens at `token_url`.
    pub fn new(
        identity: Arc<dyn IdentityProvider>,
        http: Client,
        token_url: Url,
        refresh_timeout: Duration,
    ) -> Self {
        Self {
            identity,
            http,
            token_url,
            refresh_timeout,
            guard: Arc::new(RefreshGuard::default()),
        }
    }

    /// Fetch fresh credentials for the sync channel.
    ///
    /// Returns `None` when nobody is signed in or the exchange fails; the
    /// sync engine treats that as "stay disconnected and try later". The
    /// token endpoint is never contacted without a signed-in user.
    pub async fn fetch_credentials(&self) -> Option<Credentials> {
        let Some(user) = self.identity.current_user().await else {
            debug!("No signed-in user, skipping credential fetch");
            return None;
        };

        let id_token = match self.identity.id_token(false).await {
            Ok(token) => token,
            Err(e) => {
                warn!("Could not get identity token for {}: {}", user, e);
                return None;
            }
        };

        let response = match self
            .http
            .post(self.token_url.clone())
            .bearer_auth(id_token)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Token exchange request failed: {}", e);
                return None;
            }
        };

        let status = response.status();
        if status != StatusCode::OK {
            warn!(
                status = status.as_u16(),
                "Token exchange for {} returned {}", user, status
            );
            return None;
        }

        match response.json::<TokenResponse>().await {
            Ok(body) => {
                let credentials = body.into_credentials();
                info!(
                    "Fetched credentials for {} (endpoint {})",
                    user, credentials.endpoint
                );
                Some(credentials)
            }
            Err(e) => {
                warn!("Malformed token exchange response: {}", e);
                None
            }
        }
    }

    /// Signal that the sync channel rejected the current token.
    ///
    /// Returns immediately. Starts a background refresh of the identity token
    /// unless one is already running; the refresh is abandoned after the
    /// configured timeout and its errors are only logged.
    pub fn invalidate_credentials(&self) {
        if !self.guard.try_acquire() {
            debug!("Credential refresh already in flight");
            return;
        }

        let in_flight = InFlight(self.guard.clone());
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                warn!("No async runtime available, skipping credential refresh");
                return;
            }
        };

        let identity = self.identity.clone();
        let bound = self.refresh_timeout;
        runtime.spawn(async move {
            let _in_flight = in_flight;
            match tokio::time::timeout(bound, identity.id_token(true)).await {
                Ok(Ok(_)) => debug!("Identity token refreshed"),
                Ok(Err(e)) => warn!("Credential refresh failed: {}", e),
                Err(_) => warn!("Credential refresh abandoned after {:?}", bound),
            }
        });
    }

    /// Check if a background refresh is running.
    pub fn is_refreshing(&self) -> bool {
        self.guard.is_held()
    }

    /// Number of background refreshes started so far.
    pub fn refresh_attempts(&self) -> u64 {
        self.guard.attempts()
    }

    /// Token exchange endpoint.
    pub fn token_url(&self) -> &Url {
        &self.token_url
    }
}
