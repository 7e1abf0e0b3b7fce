use std::sync::Arc;

use super::state::StateCodec;
use crate::error::AppError;
use crate::providers::{Platform, ProviderRegistry};

/// Builds the provider authorization URL a browser is sent to on "connect".
pub struct AuthorizationUrlBuilder {
    registry: Arc<ProviderRegistry>,
    states: Arc<StateCodec>,
    redirect_uri: String,
}

impl AuthorizationUrlBuilder {
    pub fn new(registry: Arc<ProviderRegistry>, states: Arc<StateCodec>, redirect_uri: String) -> Self {
        Self {
            registry,
            states,
            redirect_uri,
        }
    }

    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Build the authorization URL for a platform name as supplied by a caller.
    pub fn build_for(&self, platform: &str, user_id: &str) -> Result<String, AppError> {
        self.build(platform.parse()?, user_id)
    }

    pub fn build(&self, platform: Platform, user_id: &str) -> Result<String, AppError> {
        if user_id.trim().is_empty() {
            return Err(AppError::Validation("userId is required".into()));
        }

        let provider = self.registry.require(platform)?;
        let state = self.states.encode(platform, user_id)?;
        Ok(provider.auth_url(&state, &self.redirect_uri))
    }
}
