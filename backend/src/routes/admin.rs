use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get},
};

/// Admin Router Module
///
/// Routes reserved for users whose stored role is `admin`. `create_router` layers
/// the token guard and then the role gate over this router, so handlers here
/// never see an unauthorized request.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /users
        .route("/users", get(handlers::list_users))
        // DELETE /users/{id}
        .route("/users/{id}", delete(handlers::delete_user))
}
