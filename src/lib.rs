//! AuthGate Backend Library
//!
//! Credential-and-token authority: credential verification, JWT access
//! tokens, rotatable refresh tokens, password reset, and per-client rate
//! limiting. Exposed as a library for the `authgate` binary and the
//! integration tests.

pub mod api;
pub mod auth;
pub mod middleware;
