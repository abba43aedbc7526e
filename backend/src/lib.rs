use axum::{
    Router,
    extract::{FromRef, Request, State},
    http::{HeaderName, HeaderValue},
    middleware::{self, Next},
    response::Response,
    routing::get,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;

// Routing segregated by guard chain (Public, Authenticated, Admin).
pub mod routes;
use auth::AuthUser;
use routes::{admin, authenticated, public};

// --- Public Re-exports ---

pub use auth::{JwtTokenService, TokenService, TokenServiceState};
pub use config::AppConfig;
pub use error::AppError;
pub use repository::{InMemoryRepository, PostgresRepository, RepositoryState};

/// ApiDoc
///
/// OpenAPI document for every route, served at `/api-docs/openapi.json` and
/// browsable under `/swagger-ui`.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::issue_token, handlers::list_users, handlers::get_admin_status,
        handlers::create_user, handlers::promote_user, handlers::delete_user,
        handlers::list_menu, handlers::create_menu_item, handlers::list_reviews,
        handlers::list_cart_items, handlers::add_cart_item, handlers::delete_cart_item
    ),
    components(
        schemas(
            models::User, models::IdentityPayload, models::NewUser, models::TokenResponse,
            models::AdminStatus, models::InsertOneResult, models::UpdateResult,
            models::DeleteResult, models::CreateUserResponse,
        )
    ),
    tags(
        (name = "khana-pina", description = "Khana-Pina restaurant ordering API")
    )
)]
struct ApiDoc;

/// AppState
///
/// The single container of process-lifetime services, built once in `main` and
/// handed to `create_router`. Nothing reaches the database or the signing key
/// except through this value.
#[derive(Clone)]
pub struct AppState {
    /// Document store handle.
    pub repo: RepositoryState,
    /// Token issuance and verification.
    pub tokens: TokenServiceState,
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for TokenServiceState {
    fn from_ref(app_state: &AppState) -> TokenServiceState {
        app_state.tokens.clone()
    }
}

/// require_token
///
/// First guard stage. Extracting `AuthUser` verifies the bearer token and rejects
/// with 401 (no token) or 403 (bad or expired token). On success the identity is
/// stored in the request extensions for the stages behind it.
async fn require_token(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// require_admin
///
/// Second guard stage. Runs behind `require_token` and checks the stored role of
/// the verified identity.
async fn require_admin(
    State(repo): State<RepositoryState>,
    auth_user: AuthUser,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    auth::authorize_admin(repo.as_ref(), &auth_user.claims).await?;
    Ok(next.run(request).await)
}

fn cors_layer(origin: &str) -> CorsLayer {
    let allow_origin = match origin {
        "*" => AllowOrigin::from(Any),
        exact => match HeaderValue::from_str(exact) {
            Ok(value) => AllowOrigin::exact(value),
            Err(_) => {
                tracing::warn!(origin = %exact, "unusable CORS_ORIGIN, allowing any origin");
                AllowOrigin::from(Any)
            }
        },
    };

    CorsLayer::new()
        .allow_methods(Any)
        .allow_headers(Any)
        .allow_origin(allow_origin)
}

/// create_router
///
/// Assembles the routing structure, applies the guard chains and the
/// observability layers, and registers the application state.
pub fn create_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origin);
    let x_request_id = HeaderName::from_static("x-request-id");

    // Layers run outermost-first: the last `route_layer` is the first guard.
    let api = Router::new()
        .merge(public::public_routes())
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), require_token)),
        )
        .merge(
            admin::admin_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
                .route_layer(middleware::from_fn_with_state(state.clone(), require_token)),
        );

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/", get(handlers::root))
        .nest("/api/v1", api)
        .with_state(state);

    base_router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id)),
        )
        .layer(cors)
}

/// Builds the per-request span so every log line of a request carries its id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
