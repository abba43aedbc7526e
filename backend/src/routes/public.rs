use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, patch, post},
};

/// Public Router Module
///
/// Endpoints open to any client: token exchange, registration, the catalogue
/// reads and the owner-scoped cart operations.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // POST /jwt
        // Exchanges an identity payload for a signed, one-hour token.
        .route("/jwt", post(handlers::issue_token))
        // POST /users
        // Registration. Idempotent by email: a known identity returns insertedId = null.
        .route("/users", post(handlers::create_user))
        // PATCH /users/admin/{id}
        // Role promotion by document id. Shares its pattern with the authenticated
        // self-check, whose segment is an email, so both use one segment name.
        .route("/users/admin/{id}", patch(handlers::promote_user))
        .route(
            "/menu",
            get(handlers::list_menu).post(handlers::create_menu_item),
        )
        .route("/reviews", get(handlers::list_reviews))
        // GET /carts?email=...
        // Always filtered by the owner; the email parameter is required.
        .route(
            "/carts",
            get(handlers::list_cart_items).post(handlers::add_cart_item),
        )
        .route("/carts/{id}", delete(handlers::delete_cart_item))
}
