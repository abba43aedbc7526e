use crate::{AppState, handlers};
use axum::{Router, routing::get};

/// Authenticated Router Module
///
/// Routes that need a verified identity but no particular role. The token guard
/// is layered over this router in `create_router`, and handlers read the
/// resulting `AuthUser` from the request.
pub fn authenticated_routes() -> Router<AppState> {
    Router::new()
        // GET /users/admin/{id}
        // Self-service admin check; the segment carries the caller's own email.
        .route("/users/admin/{id}", get(handlers::get_admin_status))
}
