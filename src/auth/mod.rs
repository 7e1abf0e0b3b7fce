pub mod verify;

pub use verify::{AuthContext, AuthMethod, SessionClaims, SessionVerifier};
