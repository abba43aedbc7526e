use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ts_rs::TS;
use utoipa::{IntoParams, ToSchema};

/// A schemaless JSON document as stored in a collection.
pub type Document = Map<String, Value>;

/// Field under which the store exposes a document's identifier.
pub const ID_FIELD: &str = "_id";

/// Role value that grants administrative access.
pub const ADMIN_ROLE: &str = "admin";

// --- Core Application Schemas ---

/// User
///
/// Typed view over a document of the `users` collection. Only the fields the
/// role gate needs are decoded; everything else stays opaque.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default, PartialEq)]
#[ts(export)]
pub struct User {
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// The user's identity. Unique across the collection.
    pub email: String,
    /// `"admin"` for administrators, absent for ordinary users.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl User {
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(Value::Object(doc))
    }

    pub fn is_admin(&self) -> bool {
        self.role.as_deref() == Some(ADMIN_ROLE)
    }
}

// --- Request Payloads ---

/// IdentityPayload
///
/// Body of `POST /jwt`. The email is the identity; any other fields are carried
/// into the token claims untouched.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct IdentityPayload {
    pub email: String,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Document,
}

/// NewUser
///
/// Body of `POST /users`. Only the identity is required.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewUser {
    pub email: String,
    #[serde(flatten)]
    #[schema(value_type = Object)]
    pub extra: Document,
}

impl NewUser {
    /// Reassembles the full document to be inserted.
    pub fn into_document(self) -> Document {
        let mut doc = self.extra;
        doc.insert("email".to_string(), Value::String(self.email));
        doc
    }
}

/// CartQuery
///
/// Owner-identity filter for `GET /carts`.
#[derive(Debug, Deserialize, IntoParams)]
pub struct CartQuery {
    /// Identity of the cart owner.
    pub email: String,
}

// --- Response Payloads ---

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct TokenResponse {
    pub token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[ts(export)]
pub struct AdminStatus {
    pub admin: bool,
}

/// InsertOneResult
///
/// Outcome of a single-document insert, shaped the way document drivers report it.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct InsertOneResult {
    pub acknowledged: bool,
    pub inserted_id: String,
}

/// UpdateResult
///
/// Outcome of a single-document update. This store never upserts, so the
/// upsert fields are always empty.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UpdateResult {
    pub acknowledged: bool,
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_count: u64,
    pub upserted_id: Option<String>,
}

impl UpdateResult {
    pub fn new(matched_count: u64, modified_count: u64) -> Self {
        Self {
            acknowledged: true,
            matched_count,
            modified_count,
            upserted_count: 0,
            upserted_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DeleteResult {
    pub acknowledged: bool,
    pub deleted_count: u64,
}

/// CreateUserResponse
///
/// `POST /users` either reports the insert, or the sentinel telling the client
/// the identity is already registered (`insertedId: null`).
#[derive(Debug, Clone, Serialize, ToSchema, PartialEq)]
#[serde(untagged)]
pub enum CreateUserResponse {
    Inserted(InsertOneResult),
    AlreadyExists {
        message: String,
        #[serde(rename = "insertedId")]
        inserted_id: Option<String>,
    },
}

impl CreateUserResponse {
    pub fn already_exists() -> Self {
        Self::AlreadyExists {
            message: "User already exists.".to_string(),
            inserted_id: None,
        }
    }
}
