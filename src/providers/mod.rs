mod instagram;
mod platform;
mod registry;
mod tiktok;
mod traits;

pub use instagram::InstagramProvider;
pub use platform::Platform;
pub use registry::ProviderRegistry;
pub use tiktok::TikTokProvider;
pub use traits::{
    ContainerStatus, ContainerStep, OAuthProvider, PlatformAdapter, PlatformIdentity,
    PublishAttempt, SocialProvider, TokenSet,
};

use std::sync::Arc;

use crate::config::Config;
use crate::http::HttpClient;

/// Register every platform that has client credentials configured.
pub fn register_defaults(registry: &mut ProviderRegistry, config: &Config, http: &HttpClient) {
    if let Some(credentials) = &config.tiktok {
        registry.register(Arc::new(TikTokProvider::new(
            credentials,
            &config.endpoints.tiktok_auth_url,
            &config.endpoints.tiktok_api_base,
            &config.tiktok_privacy_level,
            http.clone(),
        )));
    }

    if let Some(credentials) = &config.instagram {
        registry.register(Arc::new(InstagramProvider::new(
            credentials,
            &config.endpoints.facebook_auth_url,
            &config.endpoints.graph_api_base,
            http.clone(),
        )));
    }
}

fn urlencoding(s: &str) -> String {
    url::form_urlencoded::byte_serialize(s.as_bytes()).collect()
}
