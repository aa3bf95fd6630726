use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Endpoints that need no token. Item browsing is public so students can look
/// before registering.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // Liveness probe for monitoring and load balancers.
        .route("/health", get(|| async { "ok" }))
        // POST /register, POST /login
        // Both return a bearer token on success.
        .route("/register", post(handlers::register_user))
        .route("/login", post(handlers::login))
        // GET /users/{id}
        .route("/users/{id}", get(handlers::get_user_profile))
        // GET /items?status=...&category=...&location=...&donor_id=...
        // Collection paths are served with and without the trailing slash.
        .route("/items", get(handlers::list_items))
        .route("/items/", get(handlers::list_items))
        // GET /items/{id}
        .route("/items/{id}", get(handlers::get_item))
}
