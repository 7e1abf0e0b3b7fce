pub mod api;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod error;
pub mod http;
pub mod oauth;
pub mod providers;
pub mod publish;
pub mod store;

pub use config::Config;
pub use error::AppError;

use std::sync::Arc;

use auth::SessionVerifier;
use crypto::CryptoEngine;
use http::HttpClient;
use oauth::{AuthorizationUrlBuilder, StateCodec, TokenExchangeClient};
use providers::ProviderRegistry;
use publish::{JobTracker, PublishOrchestrator};
use store::{ConnectionStore, TokenRefresher};

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn ConnectionStore>,
    pub registry: Arc<ProviderRegistry>,
    pub states: Arc<StateCodec>,
    pub authorize: AuthorizationUrlBuilder,
    pub exchange: TokenExchangeClient,
    pub refresher: TokenRefresher,
    pub publisher: PublishOrchestrator,
    pub verifier: SessionVerifier,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wire every component from configuration around an existing store.
    pub fn new(
        config: Config,
        crypto: Arc<CryptoEngine>,
        store: Arc<dyn ConnectionStore>,
    ) -> Result<Self, AppError> {
        let http = HttpClient::from_settings(&config.http)?;

        let mut registry = ProviderRegistry::new();
        providers::register_defaults(&mut registry, &config, &http);
        let registry = Arc::new(registry);

        let states = Arc::new(StateCodec::new(crypto.clone(), config.oauth_state_ttl));
        let authorize =
            AuthorizationUrlBuilder::new(registry.clone(), states.clone(), config.callback_url());
        let exchange = TokenExchangeClient::new(registry.clone());
        let refresher = TokenRefresher::new(store.clone(), registry.clone(), config.refresh_margin);
        let publisher = PublishOrchestrator::new(
            store.clone(),
            registry.clone(),
            refresher.clone(),
            Arc::new(JobTracker::new(config.publish.background.timeout)),
            config.publish.clone(),
        );
        let verifier = SessionVerifier::new(
            &config.session_jwt_secret,
            config.auth_service_secret.clone(),
            crypto,
        );

        Ok(Self {
            config,
            store,
            registry,
            states,
            authorize,
            exchange,
            refresher,
            publisher,
            verifier,
        })
    }
}
