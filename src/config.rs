use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};


/// Application configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // ── Server ──────────────────────────────────────────────────────────
    pub host: String,
    pub port: u16,
    /// Public base URL of this service; the OAuth callback lives under it.
    pub base_url: String,
    /// Frontend URL for post-connect redirects.
    pub app_url: String,

    // ── Database ────────────────────────────────────────────────────────
    /// PostgreSQL connection string. Without it connections live in memory.
    pub database_url: Option<String>,

    // ── Crypto ──────────────────────────────────────────────────────────
    /// 32-byte base64-encoded master key for AES-256-GCM encryption.
    pub master_key: String,
    /// 32-byte base64-encoded HMAC key for state parameter signing.
    pub hmac_secret: String,
    /// HS256 secret used to verify caller session tokens.
    pub session_jwt_secret: String,
    /// Shared secret for internal service calls.
    pub auth_service_secret: Option<String>,

    // ── Platforms ───────────────────────────────────────────────────────
    pub tiktok: Option<PlatformCredentials>,
    pub instagram: Option<PlatformCredentials>,
    pub endpoints: ProviderEndpoints,
    pub tiktok_privacy_level: String,

    // ── Tuning ──────────────────────────────────────────────────────────
    pub http: HttpSettings,
    pub oauth_state_ttl: Duration,
    pub refresh_margin: Duration,
    pub refresh_interval: Duration,
    pub publish: PublishSettings,
}

/// Client credentials registered with a provider.
#[derive(Clone)]
pub struct PlatformCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for PlatformCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlatformCredentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .finish()
    }
}

/// Provider base URLs. Overridable so staging and tests can point elsewhere.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub tiktok_auth_url: String,
    pub tiktok_api_base: String,
    pub facebook_auth_url: String,
    pub graph_api_base: String,
}

impl Default for ProviderEndpoints {
    fn default() -> Self {
        Self {
            tiktok_auth_url: "https://www.tiktok.com/v2/auth/authorize/".into(),
            tiktok_api_base: "https://open.tiktokapis.com".into(),
            facebook_auth_url: "https://www.facebook.com/v18.0/dialog/oauth".into(),
            graph_api_base: "https://graph.facebook.com/v18.0".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpSettings {
    pub timeout: Duration,
    /// Total attempts per outbound call (initial try + retries).
    pub max_attempts: usize,
    pub base_backoff: Duration,
}

/// Readiness polling budget for one phase of a publish job.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollSettings {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct PublishSettings {
    /// Wait performed while the publish request is still open.
    pub inline: PollSettings,
    /// Wait performed by the background watch after answering `pending`.
    pub background: PollSettings,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let or = |key: &str, default: &str| var(key).unwrap_or_else(|| default.to_string());
        let num = |key: &str, default: u64| -> Result<u64> {
            match var(key) {
                Some(v) => v.parse().with_context(|| format!("Invalid {key}")),
                None => Ok(default),
            }
        };
        let count = |key: &str, default: u64| -> Result<u32> {
            u32::try_from(num(key, default)?).with_context(|| format!("{key} is out of range"))
        };
        let credentials = |id_key: &str, secret_key: &str| match (var(id_key), var(secret_key)) {
            (Some(client_id), Some(client_secret)) => Some(PlatformCredentials {
                client_id,
                client_secret,
            }),
            _ => None,
        };

        let defaults = ProviderEndpoints::default();

        Ok(Config {
            host: or("HOST", "0.0.0.0"),
            port: or("PORT", "8430").parse().context("Invalid PORT")?,
            base_url: or("BASE_URL", "http://localhost:8430")
                .trim_end_matches('/')
                .to_string(),
            app_url: or("APP_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),

            database_url: var("DATABASE_URL"),

            master_key: var("MASTER_KEY").context("MASTER_KEY is required (32 bytes, base64)")?,
            hmac_secret: var("HMAC_SECRET")
                .context("HMAC_SECRET is required (32 bytes, base64)")?,
            session_jwt_secret: var("SESSION_JWT_SECRET")
                .context("SESSION_JWT_SECRET is required to verify caller sessions")?,
            auth_service_secret: var("AUTH_SERVICE_SECRET"),

            tiktok: credentials("TIKTOK_CLIENT_KEY", "TIKTOK_CLIENT_SECRET"),
            instagram: credentials("INSTAGRAM_CLIENT_ID", "INSTAGRAM_CLIENT_SECRET"),
            endpoints: ProviderEndpoints {
                tiktok_auth_url: or("TIKTOK_AUTH_URL", &defaults.tiktok_auth_url),
                tiktok_api_base: or("TIKTOK_API_BASE", &defaults.tiktok_api_base)
                    .trim_end_matches('/')
                    .to_string(),
                facebook_auth_url: or("FACEBOOK_AUTH_URL", &defaults.facebook_auth_url),
                graph_api_base: or("GRAPH_API_BASE", &defaults.graph_api_base)
                    .trim_end_matches('/')
                    .to_string(),
            },
            tiktok_privacy_level: or("TIKTOK_PRIVACY_LEVEL", "SELF_ONLY"),

            http: HttpSettings {
                timeout: Duration::from_secs(num("HTTP_TIMEOUT_SECS", 20)?),
                max_attempts: usize::try_from(count("HTTP_MAX_ATTEMPTS", 3)?)
                    .context("HTTP_MAX_ATTEMPTS is out of range")?,
                base_backoff: Duration::from_millis(num("HTTP_BACKOFF_MS", 250)?),
            },
            oauth_state_ttl: Duration::from_secs(num("OAUTH_STATE_TTL_SECS", 600)?),
            refresh_margin: Duration::from_secs(num("TOKEN_REFRESH_MARGIN_SECS", 300)?),
            refresh_interval: Duration::from_secs(num("REFRESH_INTERVAL_SECS", 300)?),
            publish: PublishSettings {
                inline: PollSettings {
                    max_attempts: count("PUBLISH_INLINE_POLL_ATTEMPTS", 3)?,
                    initial_backoff: Duration::from_millis(num("PUBLISH_POLL_BACKOFF_MS", 2000)?),
                    max_backoff: Duration::from_millis(num("PUBLISH_POLL_MAX_BACKOFF_MS", 30_000)?),
                    timeout: Duration::from_secs(num("PUBLISH_INLINE_TIMEOUT_SECS", 15)?),
                },
                background: PollSettings {
                    max_attempts: count("PUBLISH_POLL_ATTEMPTS", 20)?,
                    initial_backoff: Duration::from_millis(num("PUBLISH_POLL_BACKOFF_MS", 2000)?),
                    max_backoff: Duration::from_millis(num("PUBLISH_POLL_MAX_BACKOFF_MS", 30_000)?),
                    timeout: Duration::from_secs(num("PUBLISH_POLL_TIMEOUT_SECS", 600)?),
                },
            },
        })
    }

    /// Build from a fixed set of values, ignoring the process environment.
    pub fn from_map(values: &HashMap<String, String>) -> Result<Self> {
        Self::from_lookup(|key| values.get(key).cloned())
    }

    /// The OAuth callback URL registered with every provider.
    pub fn callback_url(&self) -> String {
        format!("{}/v1/social/callback", self.base_url)
    }

    /// Where the browser lands after the callback, with an outcome query.
    pub fn settings_url(&self, query: &[(&str, &str)]) -> String {
        let base = format!("{}/settings/social", self.app_url);
        if query.is_empty() {
            return base;
        }
        let encoded: String = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(query)
            .finish();
        format!("{base}?{encoded}")
    }
}
