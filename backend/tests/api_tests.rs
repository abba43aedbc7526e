use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use async_trait::async_trait;
use khana_pina_server::{
    AppConfig, AppState, InMemoryRepository, JwtTokenService, RepositoryState, create_router,
    handlers::LIVENESS_MESSAGE,
    models::{DeleteResult, Document, IdentityPayload, InsertOneResult, UpdateResult},
    repository::{Collection, Filter, RepoError, Repository},
};
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

// --- Test harness ---

struct TestApp {
    router: Router,
    repo: Arc<InMemoryRepository>,
    state: AppState,
}

fn app_state(repo: RepositoryState, config: AppConfig) -> AppState {
    AppState {
        repo,
        tokens: Arc::new(JwtTokenService::from_config(&config)),
        config,
    }
}

fn spawn_app() -> TestApp {
    spawn_app_with_config(AppConfig::default())
}

fn spawn_app_with_config(config: AppConfig) -> TestApp {
    let repo = Arc::new(InMemoryRepository::new());
    let state = app_state(repo.clone(), config);

    TestApp {
        router: create_router(state.clone()),
        repo,
        state,
    }
}

/// Serves the router over a store that fails in a chosen way. The returned
/// `TestApp.repo` is an unrelated empty store.
fn spawn_app_over(store: FaultyRepository) -> TestApp {
    let state = app_state(Arc::new(store), AppConfig::default());

    TestApp {
        router: create_router(state.clone()),
        repo: Arc::new(InMemoryRepository::new()),
        state,
    }
}

#[derive(Clone, Copy)]
enum Fault {
    /// Lookups see no user, then the insert hits the unique index: the shape of
    /// two registrations of one identity racing.
    RegistrationRace,
    /// Every call fails the way a lost database connection does.
    StoreDown,
}

struct FaultyRepository {
    fault: Fault,
    inner: InMemoryRepository,
}

impl FaultyRepository {
    fn new(fault: Fault) -> Self {
        Self {
            fault,
            inner: InMemoryRepository::new(),
        }
    }

    fn check(&self) -> Result<(), RepoError> {
        match self.fault {
            Fault::StoreDown => Err(RepoError::Database(sqlx::Error::PoolTimedOut)),
            Fault::RegistrationRace => Ok(()),
        }
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    async fn ping(&self) -> Result<(), RepoError> {
        self.check()
    }

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Document>, RepoError> {
        self.check()?;
        self.inner.find(collection, filter).await
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, RepoError> {
        self.check()?;
        match self.fault {
            Fault::RegistrationRace => Ok(None),
            Fault::StoreDown => self.inner.find_one(collection, filter).await,
        }
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> Result<InsertOneResult, RepoError> {
        self.check()?;
        match self.fault {
            Fault::RegistrationRace => Err(RepoError::Duplicate(collection)),
            Fault::StoreDown => self.inner.insert_one(collection, doc).await,
        }
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        set: Document,
    ) -> Result<UpdateResult, RepoError> {
        self.check()?;
        self.inner.update_one(collection, filter, set).await
    }

    async fn delete_one(&self, collection: Collection, filter: Filter) -> Result<DeleteResult, RepoError> {
        self.check()?;
        self.inner.delete_one(collection, filter).await
    }
}

impl TestApp {
    fn token_for(&self, email: &str) -> String {
        self.state
            .tokens
            .issue(IdentityPayload {
                email: email.to_string(),
                extra: Document::new(),
            })
            .unwrap()
    }

    async fn seed(&self, collection: Collection, value: Value) -> String {
        self.repo
            .insert_one(collection, value.as_object().cloned().unwrap())
            .await
            .unwrap()
            .inserted_id
    }

    async fn send(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        let body = match body {
            Some(value) => {
                builder = builder.header(header::CONTENT_TYPE, "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };

        let response = self
            .router
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn get(&self, uri: &str, token: Option<&str>) -> (StatusCode, Value) {
        self.send(Method::GET, uri, token, None).await
    }
}

// --- Tests ---

#[tokio::test]
async fn test_liveness() {
    let app = spawn_app();
    let (status, body) = app.get("/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!(LIVENESS_MESSAGE));
}

#[tokio::test]
async fn test_jwt_endpoint_issues_verifiable_token() {
    let app = spawn_app();
    let (status, body) = app
        .send(Method::POST, "/api/v1/jwt", None, Some(json!({ "email": "a@x.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);

    let token = body["token"].as_str().unwrap();
    let claims = app.state.tokens.verify(token).unwrap();
    assert_eq!(claims.email, "a@x.com");
}

#[tokio::test]
async fn test_jwt_endpoint_requires_email() {
    let app = spawn_app();
    let (status, _) = app
        .send(Method::POST, "/api/v1/jwt", None, Some(json!({ "name": "anon" })))
        .await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_gated_routes_without_token_are_unauthenticated() {
    let app = spawn_app();
    let id = app.seed(Collection::Users, json!({ "email": "a@x.com" })).await;

    let cases = [
        (Method::GET, "/api/v1/users".to_string()),
        (Method::DELETE, format!("/api/v1/users/{id}")),
        (Method::GET, "/api/v1/users/admin/a@x.com".to_string()),
    ];
    for (method, uri) in cases {
        let (status, body) = app.send(method.clone(), &uri, None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{method} {uri}");
        assert_eq!(body, json!({ "message": "Unauthorized access" }));
    }

    // The gate short-circuits: nothing was deleted.
    assert!(app.repo.find_one(Collection::Users, Filter::by_id(&id).unwrap()).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_token_is_forbidden() {
    let app = spawn_app();
    let (status, body) = app.get("/api/v1/users", Some("definitely-not-a-jwt")).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "message": "Forbidden access" }));
}

#[tokio::test]
async fn test_admin_routes_reject_non_admins() {
    let app = spawn_app();
    app.seed(Collection::Users, json!({ "email": "guest@x.com" })).await;
    let victim = app.seed(Collection::Users, json!({ "email": "victim@x.com" })).await;

    // Known user without the role, and an identity with no record at all.
    for email in ["guest@x.com", "ghost@x.com"] {
        let token = app.token_for(email);
        let (status, _) = app.get("/api/v1/users", Some(&token)).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, _) = app
            .send(Method::DELETE, &format!("/api/v1/users/{victim}"), Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }
    assert_eq!(app.repo.find(Collection::Users, Filter::All).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_admin_can_list_and_delete_users() {
    let app = spawn_app();
    app.seed(Collection::Users, json!({ "email": "boss@x.com", "role": "admin" })).await;
    let guest = app.seed(Collection::Users, json!({ "email": "guest@x.com" })).await;
    let token = app.token_for("boss@x.com");

    let (status, body) = app.get("/api/v1/users", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let emails: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|user| user["email"].as_str().unwrap())
        .collect();
    assert_eq!(emails, ["boss@x.com", "guest@x.com"]);

    let uri = format!("/api/v1/users/{guest}");
    let (status, body) = app.send(Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "acknowledged": true, "deletedCount": 1 }));

    // Deleting again is a zero-effect success.
    let (status, body) = app.send(Method::DELETE, &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["deletedCount"], 0);
}

#[tokio::test]
async fn test_admin_status_is_self_only() {
    let app = spawn_app();
    app.seed(Collection::Users, json!({ "email": "boss@x.com", "role": "admin" })).await;
    app.seed(Collection::Users, json!({ "email": "guest@x.com" })).await;

    // Even an admin may not ask about somebody else.
    let boss = app.token_for("boss@x.com");
    let (status, body) = app.get("/api/v1/users/admin/guest@x.com", Some(&boss)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body, json!({ "message": "Forbidden access" }));

    let guest = app.token_for("guest@x.com");
    let (status, _) = app.get("/api/v1/users/admin/boss@x.com", Some(&guest)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.get("/api/v1/users/admin/boss@x.com", Some(&boss)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "admin": true }));

    let (status, body) = app.get("/api/v1/users/admin/guest@x.com", Some(&guest)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "admin": false }));
}

#[tokio::test]
async fn test_admin_status_for_unregistered_identity_is_false() {
    let app = spawn_app();
    let token = app.token_for("new@x.com");
    let (status, body) = app.get("/api/v1/users/admin/new@x.com", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "admin": false }));
}

#[tokio::test]
async fn test_registration_is_idempotent_by_email() {
    let app = spawn_app();
    let payload = json!({ "email": "a@x.com", "name": "Asha" });

    let (status, first) = app.send(Method::POST, "/api/v1/users", None, Some(payload.clone())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["acknowledged"], true);
    assert!(first["insertedId"].is_string());

    let (status, second) = app.send(Method::POST, "/api/v1/users", None, Some(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["insertedId"], Value::Null);
    assert_eq!(second["message"], "User already exists.");

    let users = app
        .repo
        .find(Collection::Users, Filter::eq("email", "a@x.com"))
        .await
        .unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0]["name"], "Asha");
}

#[tokio::test]
async fn test_registration_losing_a_race_reports_already_exists() {
    let app = spawn_app_over(FaultyRepository::new(Fault::RegistrationRace));
    let (status, body) = app
        .send(Method::POST, "/api/v1/users", None, Some(json!({ "email": "a@x.com" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "message": "User already exists.", "insertedId": null }));
}

#[tokio::test]
async fn test_role_gate_lookup_failure_is_a_server_error() {
    let app = spawn_app_over(FaultyRepository::new(Fault::StoreDown));
    let token = app.token_for("boss@x.com");

    for (method, uri) in [
        (Method::GET, "/api/v1/users".to_string()),
        (Method::DELETE, format!("/api/v1/users/{}", uuid::Uuid::new_v4())),
    ] {
        let (status, body) = app.send(method, &uri, Some(&token), None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR, "{uri}");
        // Driver details are not leaked.
        assert_eq!(body, json!({ "message": "Internal server error" }));
    }
}

#[tokio::test]
async fn test_promote_unknown_id_is_a_silent_no_op() {
    let app = spawn_app();
    let missing = uuid::Uuid::new_v4();
    let (status, body) = app
        .send(Method::PATCH, &format!("/api/v1/users/admin/{missing}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "acknowledged": true,
            "matchedCount": 0,
            "modifiedCount": 0,
            "upsertedCount": 0,
            "upsertedId": null
        })
    );
}

#[tokio::test]
async fn test_malformed_identifier_is_a_generic_failure() {
    let app = spawn_app();
    for (method, uri) in [
        (Method::DELETE, "/api/v1/carts/not-an-id"),
        (Method::PATCH, "/api/v1/users/admin/not-an-id"),
    ] {
        let (status, body) = app.send(method, uri, None, None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["message"].as_str().unwrap().contains("not-an-id"));
    }
}

#[tokio::test]
async fn test_registration_promotion_and_admin_check_scenario() {
    let app = spawn_app();
    let payload = json!({ "email": "a@x.com" });

    let (_, first) = app.send(Method::POST, "/api/v1/users", None, Some(payload.clone())).await;
    let id = first["insertedId"].as_str().unwrap().to_string();
    assert_eq!(app.repo.find(Collection::Users, Filter::All).await.unwrap().len(), 1);

    let (_, second) = app.send(Method::POST, "/api/v1/users", None, Some(payload)).await;
    assert_eq!(second["insertedId"], Value::Null);

    let (status, body) = app
        .send(Method::PATCH, &format!("/api/v1/users/admin/{id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["matchedCount"], 1);
    assert_eq!(body["modifiedCount"], 1);

    let user = app
        .repo
        .find_one(Collection::Users, Filter::by_id(&id).unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user["role"], "admin");

    let token = app.token_for("a@x.com");
    let (status, body) = app.get("/api/v1/users/admin/a@x.com", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "admin": true }));

    // The freshly promoted user now passes the role gate too.
    let (status, _) = app.get("/api/v1/users", Some(&token)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_menu_and_reviews_are_public() {
    let app = spawn_app();
    app.seed(Collection::Reviews, json!({ "name": "Rafi", "rating": 5 })).await;

    let (status, body) = app
        .send(
            Method::POST,
            "/api/v1/menu",
            None,
            Some(json!({ "name": "Biryani", "price": 12.5, "category": "dinner" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    let id = body["insertedId"].as_str().unwrap().to_string();

    let (status, menu) = app.get("/api/v1/menu", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(menu, json!([{ "_id": id, "name": "Biryani", "price": 12.5, "category": "dinner" }]));

    let (status, reviews) = app.get("/api/v1/reviews", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviews.as_array().unwrap().len(), 1);
    assert_eq!(reviews[0]["rating"], 5);
}

#[tokio::test]
async fn test_cart_read_is_scoped_to_owner() {
    let app = spawn_app();
    for (email, item) in [("a@x.com", "Naan"), ("b@x.com", "Kebab"), ("a@x.com", "Lassi")] {
        let (status, _) = app
            .send(
                Method::POST,
                "/api/v1/carts",
                None,
                Some(json!({ "email": email, "name": item })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
    }

    let (status, body) = app.get("/api/v1/carts?email=a@x.com", None).await;
    assert_eq!(status, StatusCode::OK);
    let items = body.as_array().unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|item| item["email"] == "a@x.com"));

    let (_, body) = app.get("/api/v1/carts?email=nobody@x.com", None).await;
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn test_cart_read_requires_owner_filter() {
    let app = spawn_app();
    app.seed(Collection::Carts, json!({ "email": "a@x.com", "name": "Naan" })).await;

    let (status, _) = app.get("/api/v1/carts", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_cart_delete_is_idempotent() {
    let app = spawn_app();
    let id = app.seed(Collection::Carts, json!({ "email": "a@x.com", "name": "Naan" })).await;
    let uri = format!("/api/v1/carts/{id}");

    let (status, body) = app.send(Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "acknowledged": true, "deletedCount": 1 }));

    let (status, body) = app.send(Method::DELETE, &uri, None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "acknowledged": true, "deletedCount": 0 }));
}

#[tokio::test]
async fn test_responses_carry_request_id() {
    let app = spawn_app();
    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}

async fn allow_origin(app: &TestApp, method: Method, uri: &str, origin: &str) -> Option<String> {
    let mut builder = Request::builder()
        .method(method.clone())
        .uri(uri)
        .header(header::ORIGIN, origin);
    if method == Method::OPTIONS {
        builder = builder.header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET");
    }

    let response = app
        .router
        .clone()
        .oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap();
    response
        .headers()
        .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
        .map(|value| value.to_str().unwrap().to_string())
}

#[tokio::test]
async fn test_cors_allows_the_configured_origin() {
    let app = spawn_app();
    let frontend = khana_pina_server::config::DEFAULT_CORS_ORIGIN;

    assert_eq!(
        allow_origin(&app, Method::GET, "/", frontend).await.as_deref(),
        Some(frontend)
    );
    // Preflight answers before the token gate.
    assert_eq!(
        allow_origin(&app, Method::OPTIONS, "/api/v1/users", frontend).await.as_deref(),
        Some(frontend)
    );
    // Another site is never echoed back.
    assert_ne!(
        allow_origin(&app, Method::GET, "/", "http://elsewhere.test").await.as_deref(),
        Some("http://elsewhere.test")
    );
}

#[tokio::test]
async fn test_cors_wildcard_allows_any_origin() {
    let mut config = AppConfig::default();
    config.cors_origin = "*".to_string();
    let app = spawn_app_with_config(config);

    for origin in ["http://localhost:5173", "https://khana-pina.example"] {
        assert_eq!(
            allow_origin(&app, Method::GET, "/", origin).await.as_deref(),
            Some("*")
        );
        assert_eq!(
            allow_origin(&app, Method::OPTIONS, "/api/v1/carts", origin).await.as_deref(),
            Some("*")
        );
    }
}

#[tokio::test]
async fn test_openapi_document_lists_every_operation() {
    let app = spawn_app();
    let (status, doc) = app.get("/api-docs/openapi.json", None).await;
    assert_eq!(status, StatusCode::OK);

    let paths = doc["paths"].as_object().unwrap();
    let mut operations: Vec<String> = paths
        .iter()
        .flat_map(|(path, item)| {
            item.as_object()
                .unwrap()
                .keys()
                .filter(|key| ["get", "post", "patch", "delete"].contains(&key.as_str()))
                .map(move |method| format!("{method} {path}"))
        })
        .collect();
    operations.sort();

    assert_eq!(
        operations,
        [
            "delete /api/v1/carts/{id}",
            "delete /api/v1/users/{id}",
            "get /api/v1/carts",
            "get /api/v1/menu",
            "get /api/v1/reviews",
            "get /api/v1/users",
            "get /api/v1/users/admin/{id}",
            "patch /api/v1/users/admin/{id}",
            "post /api/v1/carts",
            "post /api/v1/jwt",
            "post /api/v1/menu",
            "post /api/v1/users",
        ]
    );
}

#[tokio::test]
async fn test_served_over_http() {
    let app = spawn_app();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind port");
    let address = format!("http://{}", listener.local_addr().unwrap());
    let router = app.router.clone();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let client = reqwest::Client::new();
    let token: Value = client
        .post(format!("{address}/api/v1/jwt"))
        .json(&json!({ "email": "a@x.com" }))
        .send()
        .await
        .expect("req fail")
        .json()
        .await
        .unwrap();

    let response = client
        .get(format!("{address}/api/v1/users/admin/a@x.com"))
        .bearer_auth(token["token"].as_str().unwrap())
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    assert_eq!(response.json::<Value>().await.unwrap(), json!({ "admin": false }));

    let response = client
        .get(format!("{address}/api/v1/users"))
        .send()
        .await
        .expect("req fail");
    assert_eq!(response.status(), reqwest::StatusCode::UNAUTHORIZED);
}
