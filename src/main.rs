//! AuthGate - Credential & Token Authority
//! Mission: Verify credentials, mint short-lived access tokens, rotate
//! refresh tokens, and throttle authentication traffic per client

use anyhow::{Context, Result};
use authgate_backend::{
    api::users as users_api,
    auth::{api as auth_api, auth_middleware, AuthState, JwtHandler, Notifier, RefreshTokenStore, UserStore},
    middleware::{rate_limit_middleware, request_logging, RateLimitConfig, RateLimiter},
};
use axum::{
    middleware,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::Utc;
use dotenv::dotenv;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::{env, sync::Arc, time::Duration};
use tokio::{net::TcpListener, time::interval};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    info!("🚀 AuthGate starting");

    let db_path = resolve_data_path(env::var("AUTH_DB_PATH").ok(), "authgate.db");
    let jwt_secret = env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-in-production-minimum-32-characters".to_string());

    let access_ttl_minutes = env_i64("ACCESS_TOKEN_TTL_MINUTES", 15);
    let refresh_ttl_secs = env_i64("REFRESH_TOKEN_TTL_SECS", 7 * 24 * 3600);
    let reset_ttl_secs = env_i64("RESET_TOKEN_TTL_SECS", 3600);

    let users = Arc::new(UserStore::new(&db_path)?);
    let refresh_tokens = Arc::new(RefreshTokenStore::with_ttl(&db_path, refresh_ttl_secs)?);
    let jwt_handler = Arc::new(JwtHandler::with_ttl_minutes(jwt_secret, access_ttl_minutes));
    let notifier = Arc::new(Notifier::new(
        env::var("NOTIFY_FROM").unwrap_or_else(|_| "noreply@authgate.local".to_string()),
    ));

    let auth_state = AuthState::new(
        users,
        refresh_tokens.clone(),
        jwt_handler.clone(),
        notifier,
    )
    .with_reset_ttl(reset_ttl_secs);

    info!("🔐 Auth database initialized at: {}", db_path);

    // Rate limiter guarding the authentication path (pre-credential check)
    let limiter = Arc::new(RateLimiter::new(RateLimitConfig {
        capacity: env_i64("RATE_LIMIT_CAPACITY", 10) as f64,
        refill_tokens: env_i64("RATE_LIMIT_REFILL_TOKENS", 10) as f64,
        window: Duration::from_secs(env_i64("RATE_LIMIT_WINDOW_SECS", 60) as u64),
    }));

    // Background: periodically sweep expired refresh tokens and idle buckets
    tokio::spawn(token_sweep_polling(refresh_tokens, limiter.clone()));

    // Authentication routes (rate-limited, no bearer token required)
    let auth_router = Router::new()
        .route("/api/auth/signup", post(auth_api::signup))
        .route("/api/auth/signin", post(auth_api::signin))
        .route("/api/auth/refresh", post(auth_api::refresh_token))
        .route("/api/auth/signout", post(auth_api::signout))
        .route("/api/auth/forgot-password", post(auth_api::forgot_password))
        .route("/api/auth/reset-password", post(auth_api::reset_password))
        .with_state(auth_state.clone());

    // Protected user-management routes
    let protected_routes = Router::new()
        .route("/api/users/me", get(users_api::get_current_user))
        .route("/api/users/me", put(users_api::update_current_user))
        .route("/api/users/me/password", post(users_api::change_password))
        .route("/api/users", get(users_api::list_users))
        .route("/api/users/:id", get(users_api::get_user))
        .route("/api/users/:id", put(users_api::update_user))
        .route("/api/users/:id", delete(users_api::delete_user))
        .route_layer(middleware::from_fn_with_state(
            jwt_handler,
            auth_middleware,
        ))
        .with_state(auth_state);

    let public_routes = Router::new().route("/health", get(health_check));

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(auth_router)
        .layer(middleware::from_fn_with_state(
            limiter,
            rate_limit_middleware,
        ))
        .layer(middleware::from_fn(request_logging))
        .layer(CorsLayer::permissive());

    let port = env_i64("PORT", 3000);
    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    info!("🎯 API server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Server error")?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Periodic maintenance: delete expired refresh tokens and drop idle rate
/// buckets. Runs off the request path.
async fn token_sweep_polling(refresh_tokens: Arc<RefreshTokenStore>, limiter: Arc<RateLimiter>) {
    let sweep_secs = env_i64("TOKEN_SWEEP_INTERVAL_SECS", 3600) as u64;
    let mut ticker = interval(Duration::from_secs(sweep_secs));

    loop {
        ticker.tick().await;

        match refresh_tokens.sweep_expired(Utc::now().timestamp()) {
            Ok(0) => {}
            Ok(swept) => info!("🧹 Swept {} expired refresh token(s)", swept),
            Err(e) => warn!("Refresh token sweep failed: {}", e),
        }

        limiter.cleanup();
    }
}

fn env_i64(name: &str, default: i64) -> i64 {
    env::var(name)
        .ok()
        .and_then(|v| v.parse::<i64>().ok())
        .unwrap_or(default)
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "authgate_backend=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn resolve_data_path(env_value: Option<String>, default_filename: &str) -> String {
    let base = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let Some(raw) = env_value.filter(|v| !v.trim().is_empty()) else {
        return base.join(default_filename).to_string_lossy().to_string();
    };

    let p = PathBuf::from(raw);
    if p.is_absolute() {
        return p.to_string_lossy().to_string();
    }

    // Treat relative paths as relative to the crate directory, not the cwd
    base.join(p).to_string_lossy().to_string()
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also try the crate directory .env when started from elsewhere
    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidate = manifest_dir.join(".env");
    if candidate.exists() {
        let _ = dotenv::from_path(&candidate);
    }
}
