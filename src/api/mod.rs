//! HTTP API handlers outside the core auth flow

pub mod users;
