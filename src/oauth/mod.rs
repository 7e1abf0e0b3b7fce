//! OAuth authorization-code handshake: state round-trip, authorization URL,
//! code exchange.

mod authorize;
mod exchange;
mod state;

pub use authorize::AuthorizationUrlBuilder;
pub use exchange::TokenExchangeClient;
pub use state::{OAuthState, StateCodec};
