use std::collections::HashMap;
use std::sync::Arc;

use super::{Platform, SocialProvider};
use crate::error::AppError;

/// Registry of configured platform integrations, keyed by platform.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<Platform, Arc<dyn SocialProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any earlier one for the same platform.
    pub fn register(&mut self, provider: Arc<dyn SocialProvider>) {
        self.providers.insert(provider.platform(), provider);
    }

    pub fn get(&self, platform: Platform) -> Option<Arc<dyn SocialProvider>> {
        self.providers.get(&platform).cloned()
    }

    /// Get a provider, failing when its client credentials were not configured.
    pub fn require(&self, platform: Platform) -> Result<Arc<dyn SocialProvider>, AppError> {
        self.get(platform).ok_or_else(|| {
            AppError::MissingConfiguration(format!(
                "{} client credentials are not configured",
                platform.display_name()
            ))
        })
    }

    /// List all registered platforms.
    pub fn list(&self) -> Vec<Platform> {
        let mut platforms: Vec<Platform> = self.providers.keys().copied().collect();
        platforms.sort_by_key(|p| p.as_str());
        platforms
    }

    pub fn count(&self) -> usize {
        self.providers.len()
    }
}
