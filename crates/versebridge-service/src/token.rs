//! Expiring-credential cache for the Spotify and GitHub APIs.
//!
//! Two independent credentials live here: a client-credentials bearer
//! token for the Spotify Web API (fixed one-hour lifetime, refreshed
//! with a five-minute buffer) and a GitHub App installation token
//! (lifetime supplied by GitHub, refreshed with a three-minute buffer,
//! obtained by exchanging a short-lived RS256-signed app assertion).
//!
//! Refresh is lazy, on access, one attempt per call. The cache slots are
//! plain mutexes that are never held across an await; two tasks
//! refreshing concurrently is harmless (last writer wins) because token
//! issuance is idempotent.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::{ApiError, ApiResult};

const SPOTIFY_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const GITHUB_API_BASE: &str = "https://api.github.com";

/// Spotify tokens are valid for an hour; refresh five minutes early.
const SPOTIFY_LIFETIME_SECS: i64 = 3600;
const SPOTIFY_BUFFER_SECS: i64 = 300;

/// GitHub reports the installation-token expiry; refresh three minutes early.
const GITHUB_BUFFER_SECS: i64 = 180;

/// App assertions are minted just in time and live ten minutes.
const ASSERTION_LIFETIME_SECS: i64 = 600;

pub(crate) const USER_AGENT: &str = "versebridge/0.1.0 (https://github.com/versebridge/versebridge)";

/// Spotify client-credentials grant secrets.
#[derive(Debug, Clone)]
pub struct SpotifyAppAuth {
    pub client_id: String,
    pub client_secret: String,
}

/// GitHub App identity: app id, RSA private key (PEM), installation id.
#[derive(Debug, Clone)]
pub struct GitHubAppAuth {
    pub app_id: String,
    pub private_key_pem: String,
    pub installation_id: String,
}

/// A cached credential with its absolute expiry.
#[derive(Debug, Clone)]
struct Credential {
    value: String,
    expires_at: DateTime<Utc>,
}

impl Credential {
    /// Fresh while `expires_at - buffer` is still in the future.
    fn is_fresh(&self, now: DateTime<Utc>, buffer_secs: i64) -> bool {
        self.expires_at - Duration::seconds(buffer_secs) > now
    }
}

#[derive(Debug, Deserialize)]
struct SpotifyTokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: String,
}

#[derive(Debug, Serialize)]
struct AppClaims<'a> {
    iat: i64,
    exp: i64,
    iss: &'a str,
}

/// Process-wide cache of the two third-party credentials.
#[derive(Debug)]
pub struct TokenCache {
    http: Client,
    clock: Arc<dyn Clock>,
    spotify_auth: SpotifyAppAuth,
    github_auth: GitHubAppAuth,
    spotify_token_url: String,
    github_api_base: String,
    spotify: Mutex<Option<Credential>>,
    github: Mutex<Option<Credential>>,
}

impl TokenCache {
    /// Create a cache with empty slots; the first access refreshes.
    pub fn new(spotify_auth: SpotifyAppAuth, github_auth: GitHubAppAuth) -> ApiResult<Self> {
        let http = Client::builder()
            .timeout(StdDuration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            http,
            clock: Arc::new(SystemClock),
            spotify_auth,
            github_auth,
            spotify_token_url: SPOTIFY_TOKEN_URL.to_string(),
            github_api_base: GITHUB_API_BASE.to_string(),
            spotify: Mutex::new(None),
            github: Mutex::new(None),
        })
    }

    /// Replace the clock (tests pin expiry logic to a fixed instant).
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the Spotify token endpoint.
    #[must_use]
    pub fn with_spotify_token_url(mut self, url: impl Into<String>) -> Self {
        self.spotify_token_url = url.into();
        self
    }

    /// Override the GitHub API base URL.
    #[must_use]
    pub fn with_github_api_base(mut self, base: impl Into<String>) -> Self {
        self.github_api_base = base.into();
        self
    }

    /// Current Spotify bearer token, refreshing if stale.
    pub async fn spotify_token(&self) -> ApiResult<String> {
        let now = self.clock.now();
        if let Some(value) = Self::cached(&self.spotify, now, SPOTIFY_BUFFER_SECS) {
            log::debug!("using cached spotify token");
            return Ok(value);
        }

        log::info!("refreshing spotify token");
        let response = self
            .http
            .post(&self.spotify_token_url)
            .basic_auth(&self.spotify_auth.client_id, Some(&self.spotify_auth.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| auth_error("spotify", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(auth_error("spotify", format!("token endpoint returned {status}")));
        }

        let body: SpotifyTokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error("spotify", format!("malformed token body: {e}")))?;

        // Spotify tokens are always issued for an hour.
        let credential = Credential {
            value: body.access_token,
            expires_at: now + Duration::seconds(SPOTIFY_LIFETIME_SECS),
        };
        let value = credential.value.clone();
        Self::store(&self.spotify, credential);
        Ok(value)
    }

    /// Current GitHub installation token, refreshing if stale.
    ///
    /// Refresh mints a fresh RS256 app assertion and exchanges it for an
    /// installation access token. A signing failure means the configured
    /// private key is unusable and propagates as [`ApiError::Signing`].
    pub async fn github_token(&self) -> ApiResult<String> {
        let now = self.clock.now();
        if let Some(value) = Self::cached(&self.github, now, GITHUB_BUFFER_SECS) {
            log::debug!("using cached github token");
            return Ok(value);
        }

        log::info!("refreshing github installation token");
        let assertion = self.mint_assertion(now)?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.github_api_base, self.github_auth.installation_id
        );
        let response = self
            .http
            .post(&url)
            .bearer_auth(assertion)
            .header("Accept", "application/vnd.github.machine-man-preview+json")
            .send()
            .await
            .map_err(|e| auth_error("github", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(auth_error("github", format!("token endpoint returned {status}")));
        }

        let body: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| auth_error("github", format!("malformed token body: {e}")))?;

        let expires_at = DateTime::parse_from_rfc3339(&body.expires_at)
            .map_err(|e| auth_error("github", format!("bad expires_at {:?}: {e}", body.expires_at)))?
            .with_timezone(&Utc);

        let credential = Credential {
            value: body.token,
            expires_at,
        };
        let value = credential.value.clone();
        Self::store(&self.github, credential);
        Ok(value)
    }

    fn mint_assertion(&self, now: DateTime<Utc>) -> ApiResult<String> {
        let claims = AppClaims {
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
            iss: &self.github_auth.app_id,
        };
        let key = EncodingKey::from_rsa_pem(self.github_auth.private_key_pem.as_bytes())?;
        Ok(jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)?)
    }

    fn cached(slot: &Mutex<Option<Credential>>, now: DateTime<Utc>, buffer_secs: i64) -> Option<String> {
        let guard = slot.lock().unwrap_or_else(PoisonError::into_inner);
        guard
            .as_ref()
            .filter(|c| c.is_fresh(now, buffer_secs))
            .map(|c| c.value.clone())
    }

    fn store(slot: &Mutex<Option<Credential>>, credential: Credential) {
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(credential);
    }

    #[cfg(test)]
    pub(crate) fn seed_spotify(&self, value: &str, expires_at: DateTime<Utc>) {
        Self::store(
            &self.spotify,
            Credential {
                value: value.to_string(),
                expires_at,
            },
        );
    }

    #[cfg(test)]
    pub(crate) fn seed_github(&self, value: &str, expires_at: DateTime<Utc>) {
        Self::store(
            &self.github,
            Credential {
                value: value.to_string(),
                expires_at,
            },
        );
    }
}

fn auth_error(source_name: &'static str, message: String) -> ApiError {
    ApiError::Auth {
        source_name,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::test_support::FixedClock;
    use chrono::TimeZone;

    // Nothing listens here; any attempted refresh fails fast.
    const DEAD_ENDPOINT: &str = "http://127.0.0.1:9/token";

    fn cache_at(clock: Arc<FixedClock>) -> TokenCache {
        TokenCache::new(
            SpotifyAppAuth {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            GitHubAppAuth {
                app_id: "42".to_string(),
                private_key_pem: "not a real key".to_string(),
                installation_id: "7".to_string(),
            },
        )
        .unwrap()
        .with_clock(clock)
        .with_spotify_token_url(DEAD_ENDPOINT)
        .with_github_api_base("http://127.0.0.1:9")
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_freshness_boundary() {
        let cred = Credential {
            value: "t".to_string(),
            expires_at: now() + Duration::seconds(301),
        };
        assert!(cred.is_fresh(now(), 300));

        let cred = Credential {
            value: "t".to_string(),
            expires_at: now() + Duration::seconds(300),
        };
        // expiry minus buffer is exactly now -> stale
        assert!(!cred.is_fresh(now(), 300));
    }

    #[tokio::test]
    async fn test_fresh_spotify_token_served_without_network() {
        let clock = Arc::new(FixedClock::at(now()));
        let cache = cache_at(Arc::clone(&clock));
        cache.seed_spotify("cached-token", now() + Duration::seconds(3600));

        // The endpoint is dead, so an Ok here proves no refresh happened.
        assert_eq!(cache.spotify_token().await.unwrap(), "cached-token");
    }

    #[tokio::test]
    async fn test_stale_spotify_token_triggers_refresh() {
        let clock = Arc::new(FixedClock::at(now()));
        let cache = cache_at(Arc::clone(&clock));
        cache.seed_spotify("cached-token", now() + Duration::seconds(3600));

        // Advance past expiry minus buffer; the dead endpoint makes the
        // (single) refresh attempt surface as an auth error.
        clock.advance(3301);
        let err = cache.spotify_token().await.unwrap_err();
        assert!(err.is_auth(), "expected auth error, got {err:?}");
    }

    #[tokio::test]
    async fn test_fresh_github_token_served_without_network() {
        let clock = Arc::new(FixedClock::at(now()));
        let cache = cache_at(Arc::clone(&clock));
        cache.seed_github("ghs_cached", now() + Duration::seconds(600));

        assert_eq!(cache.github_token().await.unwrap(), "ghs_cached");
    }

    #[tokio::test]
    async fn test_github_refresh_with_bad_key_is_signing_error() {
        let clock = Arc::new(FixedClock::at(now()));
        let cache = cache_at(Arc::clone(&clock));

        // Empty cache forces a refresh; the garbage PEM fails before any
        // network traffic.
        let err = cache.github_token().await.unwrap_err();
        assert!(matches!(err, ApiError::Signing(_)), "got {err:?}");
    }

    #[tokio::test]
    async fn test_github_buffer_is_three_minutes() {
        let clock = Arc::new(FixedClock::at(now()));
        let cache = cache_at(Arc::clone(&clock));
        cache.seed_github("ghs_cached", now() + Duration::seconds(200));

        // 200s remaining > 180s buffer: still fresh.
        assert_eq!(cache.github_token().await.unwrap(), "ghs_cached");

        clock.advance(21);
        // 179s remaining: stale, refresh path runs (and fails on the key).
        assert!(cache.github_token().await.is_err());
    }
}
