use std::sync::Arc;

use axum::{
    Json,
    extract::{FromRef, FromRequestParts},
    http::{HeaderMap, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, TimeDelta, Utc};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::{
    config::AppConfig,
    error::AppError,
    models::{Document, IdentityPayload, User},
    repository::{Collection, Filter, RepoError, Repository},
};

/// Claims
///
/// Payload carried inside a signed identity token. `email` is the identity the
/// guards trust once the signature and expiry have been checked; every other
/// field of the identity payload rides along in `extra`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Claims {
    pub email: String,
    /// Issued At, seconds since the epoch.
    pub iat: i64,
    /// Expiration Time, seconds since the epoch.
    pub exp: i64,
    #[serde(flatten)]
    pub extra: Document,
}

/// Why a request with a token was refused. Logged, never sent to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("token expired")]
    Expired,
    #[error("token signature or format invalid")]
    InvalidToken,
    #[error("admin role required")]
    NotAdmin,
    #[error("path identity does not match token identity")]
    IdentityMismatch,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// No credentials were presented at all.
    #[error("no bearer token presented")]
    Unauthenticated,

    /// Credentials were presented but rejected, or the identity lacks permission.
    #[error("forbidden: {0}")]
    Forbidden(DenyReason),

    #[error("failed to sign token: {0}")]
    Signing(#[source] jsonwebtoken::errors::Error),

    /// The configured lifetime puts the expiry outside the representable range.
    #[error("token lifetime of {0}s is out of range")]
    Lifetime(i64),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AuthError::Unauthenticated => (StatusCode::UNAUTHORIZED, "Unauthorized access"),
            AuthError::Forbidden(reason) => {
                tracing::debug!(%reason, "request forbidden");
                (StatusCode::FORBIDDEN, "Forbidden access")
            }
            AuthError::Signing(e) => {
                tracing::error!(error = %e, "token signing failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to issue token")
            }
            AuthError::Lifetime(secs) => {
                tracing::error!(ttl_secs = secs, "token lifetime out of range");
                (StatusCode::INTERNAL_SERVER_ERROR, "Failed to issue token")
            }
        };
        (status, Json(json!({ "message": message }))).into_response()
    }
}

/// TokenService
///
/// The authentication contract: issue a self-contained token for an identity,
/// and verify a presented token back into its claims. No server-side session
/// state is kept.
pub trait TokenService: Send + Sync {
    fn issue(&self, payload: IdentityPayload) -> Result<String, AuthError>;

    fn verify(&self, token: &str) -> Result<Claims, AuthError>;
}

pub type TokenServiceState = Arc<dyn TokenService>;

/// JwtTokenService
///
/// HS256 JSON Web Tokens signed with the shared secret from `AppConfig`.
#[derive(Clone)]
pub struct JwtTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl JwtTokenService {
    pub fn new(secret: &str, ttl_secs: i64) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        // Expiry is absolute: a token is dead the second its lifetime ends.
        validation.leeway = 0;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_secs,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(&config.jwt_secret, config.token_ttl_secs)
    }

    /// Signs `payload` as if issued at `issued_at`.
    pub fn issue_at(
        &self,
        payload: IdentityPayload,
        issued_at: DateTime<Utc>,
    ) -> Result<String, AuthError> {
        let mut extra = payload.extra;
        extra.remove("iat");
        extra.remove("exp");

        let expires_at = TimeDelta::try_seconds(self.ttl_secs)
            .and_then(|ttl| issued_at.checked_add_signed(ttl))
            .ok_or(AuthError::Lifetime(self.ttl_secs))?;

        let claims = Claims {
            email: payload.email,
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
            extra,
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(AuthError::Signing)
    }
}

impl TokenService for JwtTokenService {
    fn issue(&self, payload: IdentityPayload) -> Result<String, AuthError> {
        self.issue_at(payload, Utc::now())
    }

    fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Forbidden(DenyReason::Expired),
                _ => AuthError::Forbidden(DenyReason::InvalidToken),
            })
    }
}

/// bearer_token
///
/// Pulls the token out of `Authorization: Bearer <token>`. A missing header means
/// the caller never tried to authenticate; a header in any other shape is a
/// rejected credential.
pub fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthError::Unauthenticated)?;

    value
        .to_str()
        .ok()
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::Forbidden(DenyReason::InvalidToken))
}

/// AuthUser
///
/// The verified identity of a request. Produced once by the token guard and
/// cached in the request extensions, so later stages and handlers extracting
/// `AuthUser` reuse it instead of decoding the token again.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub email: String,
    pub claims: Claims,
}

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenServiceState: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let tokens = TokenServiceState::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let claims = tokens.verify(token)?;

        tracing::debug!(email = %claims.email, "bearer token verified");
        Ok(AuthUser {
            email: claims.email.clone(),
            claims,
        })
    }
}

/// Whether the stored user record for `email` carries the admin role.
/// A missing record, or one whose role is anything else, is not an admin.
pub async fn is_admin(repo: &dyn Repository, email: &str) -> Result<bool, RepoError> {
    let record = repo
        .find_one(Collection::Users, Filter::eq("email", email))
        .await?;

    Ok(record
        .map(User::from_document)
        .is_some_and(|user| user.is_ok_and(|u| u.is_admin())))
}

/// authorize_admin
///
/// The role gate. Trusts `claims.email` as already authenticated and checks the
/// current role in the store, so a demotion takes effect on the next request.
pub async fn authorize_admin(repo: &dyn Repository, claims: &Claims) -> Result<(), AppError> {
    if is_admin(repo, &claims.email).await? {
        Ok(())
    } else {
        Err(AuthError::Forbidden(DenyReason::NotAdmin).into())
    }
}
