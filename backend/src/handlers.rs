use crate::{
    AppState,
    auth::{self, AuthError, AuthUser, DenyReason},
    error::AppError,
    models::{
        AdminStatus, CartQuery, CreateUserResponse, DeleteResult, Document, IdentityPayload,
        InsertOneResult, NewUser, TokenResponse, UpdateResult, ADMIN_ROLE,
    },
    repository::{Collection, Filter, RepoError},
};
use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde_json::Value;

/// Liveness string served at `/`.
pub const LIVENESS_MESSAGE: &str = "Khana-Pina server is running";

pub async fn root() -> &'static str {
    LIVENESS_MESSAGE
}

// --- Tokens ---

/// issue_token
///
/// [Public Route] Signs a token for the posted identity payload. The payload is
/// taken at face value; this endpoint is the frontend's exchange point after its
/// own sign-in flow.
#[utoipa::path(
    post,
    path = "/api/v1/jwt",
    request_body = IdentityPayload,
    responses((status = 200, description = "Signed token", body = TokenResponse))
)]
pub async fn issue_token(
    State(state): State<AppState>,
    Json(payload): Json<IdentityPayload>,
) -> Result<Json<TokenResponse>, AppError> {
    tracing::debug!(email = %payload.email, "issuing token");
    let token = state.tokens.issue(payload)?;
    Ok(Json(TokenResponse { token }))
}

// --- Users ---

/// list_users
///
/// [Admin Route] Every user document.
#[utoipa::path(
    get,
    path = "/api/v1/users",
    responses(
        (status = 200, description = "All users"),
        (status = 401, description = "No token"),
        (status = 403, description = "Invalid token or not an admin")
    )
)]
pub async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    let users = state.repo.find(Collection::Users, Filter::All).await?;
    Ok(Json(users))
}

/// get_admin_status
///
/// [Authenticated Route] Answers "am I an admin". Only the owner of an identity
/// may ask about it: a path email other than the token's is refused whatever
/// the caller's own role.
#[utoipa::path(
    get,
    path = "/api/v1/users/admin/{id}",
    params(("id" = String, Path, description = "Email of the identity to check; must equal the token identity")),
    responses(
        (status = 200, description = "Admin flag", body = AdminStatus),
        (status = 401, description = "No token"),
        (status = 403, description = "Invalid token or identity mismatch")
    )
)]
pub async fn get_admin_status(
    AuthUser { email: caller, .. }: AuthUser,
    State(state): State<AppState>,
    Path(email): Path<String>,
) -> Result<Json<AdminStatus>, AppError> {
    if email != caller {
        return Err(AuthError::Forbidden(DenyReason::IdentityMismatch).into());
    }
    let admin = auth::is_admin(state.repo.as_ref(), &email).await?;
    Ok(Json(AdminStatus { admin }))
}

/// create_user
///
/// [Public Route] Registers a user unless the identity is already known. A
/// repeat registration is a success that inserts nothing.
#[utoipa::path(
    post,
    path = "/api/v1/users",
    request_body = NewUser,
    responses((status = 200, description = "Inserted, or already registered (insertedId = null)", body = CreateUserResponse))
)]
pub async fn create_user(
    State(state): State<AppState>,
    Json(user): Json<NewUser>,
) -> Result<Json<CreateUserResponse>, AppError> {
    let existing = state
        .repo
        .find_one(Collection::Users, Filter::eq("email", user.email.as_str()))
        .await?;
    if existing.is_some() {
        return Ok(Json(CreateUserResponse::already_exists()));
    }

    match state
        .repo
        .insert_one(Collection::Users, user.into_document())
        .await
    {
        Ok(result) => Ok(Json(CreateUserResponse::Inserted(result))),
        // Lost a race with a concurrent registration of the same identity.
        Err(RepoError::Duplicate(_)) => Ok(Json(CreateUserResponse::already_exists())),
        Err(e) => Err(e.into()),
    }
}

/// promote_user
///
/// [Public Route] Sets `role = "admin"` on the user with this identifier. An
/// unknown identifier matches nothing and is reported as such, not as an error.
#[utoipa::path(
    patch,
    path = "/api/v1/users/admin/{id}",
    params(("id" = String, Path, description = "User identifier")),
    responses((status = 200, description = "Update outcome", body = UpdateResult))
)]
pub async fn promote_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<UpdateResult>, AppError> {
    let mut set = Document::new();
    set.insert("role".to_string(), Value::String(ADMIN_ROLE.to_string()));

    let result = state
        .repo
        .update_one(Collection::Users, Filter::by_id(&id)?, set)
        .await?;
    tracing::info!(user_id = %id, matched = result.matched_count, "role promotion applied");
    Ok(Json(result))
}

/// delete_user
///
/// [Admin Route] Removes a user by identifier. Idempotent.
#[utoipa::path(
    delete,
    path = "/api/v1/users/{id}",
    params(("id" = String, Path, description = "User identifier")),
    responses(
        (status = 200, description = "Delete outcome", body = DeleteResult),
        (status = 401, description = "No token"),
        (status = 403, description = "Invalid token or not an admin")
    )
)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>, AppError> {
    let result = state
        .repo
        .delete_one(Collection::Users, Filter::by_id(&id)?)
        .await?;
    Ok(Json(result))
}

// --- Menu & Reviews ---

#[utoipa::path(
    get,
    path = "/api/v1/menu",
    responses((status = 200, description = "All menu items"))
)]
pub async fn list_menu(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(state.repo.find(Collection::Menu, Filter::All).await?))
}

#[utoipa::path(
    post,
    path = "/api/v1/menu",
    request_body = Object,
    responses((status = 200, description = "Inserted", body = InsertOneResult))
)]
pub async fn create_menu_item(
    State(state): State<AppState>,
    Json(item): Json<Document>,
) -> Result<Json<InsertOneResult>, AppError> {
    Ok(Json(state.repo.insert_one(Collection::Menu, item).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/reviews",
    responses((status = 200, description = "All reviews"))
)]
pub async fn list_reviews(State(state): State<AppState>) -> Result<Json<Vec<Document>>, AppError> {
    Ok(Json(state.repo.find(Collection::Reviews, Filter::All).await?))
}

// --- Carts ---

/// list_cart_items
///
/// [Public Route] The cart of one owner. The owner filter is mandatory, so this
/// never returns items belonging to anyone else.
#[utoipa::path(
    get,
    path = "/api/v1/carts",
    params(CartQuery),
    responses((status = 200, description = "Cart items of the owner"))
)]
pub async fn list_cart_items(
    State(state): State<AppState>,
    Query(query): Query<CartQuery>,
) -> Result<Json<Vec<Document>>, AppError> {
    let items = state
        .repo
        .find(Collection::Carts, Filter::eq("email", query.email))
        .await?;
    Ok(Json(items))
}

#[utoipa::path(
    post,
    path = "/api/v1/carts",
    request_body = Object,
    responses((status = 200, description = "Inserted", body = InsertOneResult))
)]
pub async fn add_cart_item(
    State(state): State<AppState>,
    Json(item): Json<Document>,
) -> Result<Json<InsertOneResult>, AppError> {
    Ok(Json(state.repo.insert_one(Collection::Carts, item).await?))
}

/// delete_cart_item
///
/// [Public Route] Removes one cart item. Deleting an unknown identifier reports
/// `deletedCount: 0`.
#[utoipa::path(
    delete,
    path = "/api/v1/carts/{id}",
    params(("id" = String, Path, description = "Cart item identifier")),
    responses((status = 200, description = "Delete outcome", body = DeleteResult))
)]
pub async fn delete_cart_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeleteResult>, AppError> {
    let result = state
        .repo
        .delete_one(Collection::Carts, Filter::by_id(&id)?)
        .await?;
    Ok(Json(result))
}
