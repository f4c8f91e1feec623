//! Carrier client adapters: authenticated live-tracking fetches for the two
//! carriers the facility receives from. Both adapters follow the same
//! contract: client-credentials token exchange, bearer-authenticated
//! tracking POST with an array of identifiers, normalized results, and at
//! most one retry on an expired token.

use std::sync::Mutex;
use std::time::Duration;

use shipdesk_core::TrackError;
use time::OffsetDateTime;

mod fedex;
mod ups;

pub use fedex::FedexClient;
pub use ups::UpsClient;

/// Refresh the cached token this long before its reported expiry.
const TOKEN_EXPIRY_MARGIN_SECS: i64 = 60;

/// Credentials and endpoints for one carrier account. Loaded once at
/// startup by the binaries and injected at adapter construction; adapters
/// never read the environment themselves.
#[derive(Debug, Clone, Default)]
pub struct CarrierConfig {
    pub client_id: String,
    pub client_secret: String,
    pub base_url: String,
    /// Per-call timeout; defaults to 10 seconds when zero.
    pub timeout_secs: u64,
}

impl CarrierConfig {
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }

    fn timeout(&self) -> Duration {
        let secs = if self.timeout_secs == 0 { 10 } else { self.timeout_secs };
        Duration::from_secs(secs)
    }

    fn from_env(prefix: &str, default_base: &str) -> Self {
        let var = |suffix: &str| std::env::var(format!("{prefix}_{suffix}")).unwrap_or_default();
        let base_url = {
            let value = var("BASE_URL");
            if value.trim().is_empty() { default_base.to_string() } else { value }
        };
        let timeout_secs = var("TIMEOUT_SECS").parse().unwrap_or(0);
        Self { client_id: var("CLIENT_ID"), client_secret: var("CLIENT_SECRET"), base_url, timeout_secs }
    }

    /// Read `UPS_CLIENT_ID` / `UPS_CLIENT_SECRET` / `UPS_BASE_URL` /
    /// `UPS_TIMEOUT_SECS`.
    #[must_use]
    pub fn ups_from_env() -> Self {
        Self::from_env("UPS", "https://onlinetools.ups.com")
    }

    /// Read `FEDEX_CLIENT_ID` / `FEDEX_CLIENT_SECRET` / `FEDEX_BASE_URL` /
    /// `FEDEX_TIMEOUT_SECS`.
    #[must_use]
    pub fn fedex_from_env() -> Self {
        Self::from_env("FEDEX", "https://apis.fedex.com")
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: OffsetDateTime,
}

#[derive(Debug, serde::Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: i64,
}

/// Bearer-token plumbing shared by both adapters: client-credentials
/// exchange against the carrier token endpoint, with the token cached
/// until shortly before expiry.
pub(crate) struct TokenClient {
    agent: ureq::Agent,
    token_url: String,
    client_id: String,
    client_secret: String,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenClient {
    fn new(config: &CarrierConfig, token_path: &str) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(config.timeout())
            .build();
        Self {
            agent,
            token_url: format!("{}{token_path}", config.base_url.trim_end_matches('/')),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            cached: Mutex::new(None),
        }
    }

    fn agent(&self) -> &ureq::Agent {
        &self.agent
    }

    /// A bearer token, reusing the cached one while it is fresh.
    fn bearer(&self, carrier: &str) -> Result<String, TrackError> {
        if let Ok(guard) = self.cached.lock() {
            if let Some(cached) = guard.as_ref() {
                let margin = time::Duration::seconds(TOKEN_EXPIRY_MARGIN_SECS);
                if cached.expires_at - margin > OffsetDateTime::now_utc() {
                    return Ok(cached.access_token.clone());
                }
            }
        }
        self.refresh(carrier)
    }

    /// Drop the cached token so the next call performs a fresh exchange.
    fn invalidate(&self) {
        if let Ok(mut guard) = self.cached.lock() {
            *guard = None;
        }
    }

    fn refresh(&self, carrier: &str) -> Result<String, TrackError> {
        let response = self
            .agent
            .post(&self.token_url)
            .set("content-type", "application/x-www-form-urlencoded")
            .send_form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .map_err(|err| adapter_error(carrier, "token exchange failed", &err))?;

        let token: TokenResponse = response
            .into_json()
            .map_err(|err| TrackError::Adapter(format!("{carrier}: token response malformed: {err}")))?;

        let lifetime = if token.expires_in > 0 { token.expires_in } else { 3600 };
        let cached = CachedToken {
            access_token: token.access_token.clone(),
            expires_at: OffsetDateTime::now_utc() + time::Duration::seconds(lifetime),
        };
        if let Ok(mut guard) = self.cached.lock() {
            *guard = Some(cached);
        }
        Ok(token.access_token)
    }
}

/// Run one bearer-authenticated tracking call, retrying exactly once with a
/// fresh token when the carrier rejects the cached one. Never loops.
fn with_bearer_retry<T>(
    token_client: &TokenClient,
    carrier: &str,
    call: impl Fn(&str) -> Result<T, ureq::Error>,
) -> Result<T, TrackError> {
    let bearer = token_client.bearer(carrier)?;
    match call(&bearer) {
        Ok(value) => Ok(value),
        Err(ureq::Error::Status(401, _)) => {
            tracing::debug!(carrier, "bearer token rejected, retrying once with a fresh token");
            token_client.invalidate();
            let bearer = token_client.refresh(carrier)?;
            call(&bearer).map_err(|err| adapter_error(carrier, "tracking call failed after token refresh", &err))
        }
        Err(err) => Err(adapter_error(carrier, "tracking call failed", &err)),
    }
}

fn adapter_error(carrier: &str, what: &str, err: &ureq::Error) -> TrackError {
    match err {
        ureq::Error::Status(code, _) => {
            TrackError::Adapter(format!("{carrier}: {what}: http status {code}"))
        }
        ureq::Error::Transport(transport) => {
            TrackError::Adapter(format!("{carrier}: {what}: {transport}"))
        }
    }
}
