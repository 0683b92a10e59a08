//! Authentication Module
//! Mission: Credential verification, JWT issuance, refresh-token lifecycle,
//! and password reset

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod notify;
pub mod refresh_store;
pub mod reset;
pub mod user_store;
pub mod verifier;

pub use api::AuthState;
pub use jwt::JwtHandler;
pub use middleware::auth_middleware;
pub use notify::Notifier;
pub use refresh_store::RefreshTokenStore;
pub use reset::PasswordResetManager;
pub use user_store::UserStore;
pub use verifier::CredentialVerifier;
