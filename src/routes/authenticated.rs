use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, patch, post},
};

/// Authenticated Router Module
///
/// Every handler here receives a validated `AuthUser`; the auth middleware
/// layered over this router rejects anonymous calls with 401 first.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        .route("/me", get(handlers::get_me))
        // POST /items (donors)
        .route("/items", post(handlers::create_item))
        .route("/items/", post(handlers::create_item))
        // PATCH/DELETE /items/{id} (owning donor)
        // PATCH edits fields or marks a reserved item as given.
        .route(
            "/items/{id}",
            patch(handlers::update_item).delete(handlers::delete_item),
        )
        // GET /requests (scoped to the caller), POST /requests (affected students)
        .route(
            "/requests",
            get(handlers::list_requests).post(handlers::create_request),
        )
        .route(
            "/requests/",
            get(handlers::list_requests).post(handlers::create_request),
        )
        // GET/PATCH/DELETE /requests/{id}
        // PATCH approves or declines; approval reserves the item.
        .route(
            "/requests/{id}",
            get(handlers::get_request)
                .patch(handlers::update_request_status)
                .delete(handlers::delete_request),
        )
}
