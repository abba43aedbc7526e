use crate::models::{DeleteResult, Document, ID_FIELD, InsertOneResult, UpdateResult};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder, types::Json};
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Collection
///
/// The four document collections served by the API. Each maps to one table in
/// the Postgres store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Menu,
    Reviews,
    Carts,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Users,
        Collection::Menu,
        Collection::Reviews,
        Collection::Carts,
    ];

    /// Collection name, also used verbatim as the table name.
    pub fn name(self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Menu => "menu",
            Collection::Reviews => "reviews",
            Collection::Carts => "carts",
        }
    }

    /// Field whose value must be unique across the collection, if any.
    fn unique_field(self) -> Option<&'static str> {
        match self {
            Collection::Users => Some("email"),
            _ => None,
        }
    }
}

/// Filter
///
/// Exact-match selector applied by every read, update and delete.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Matches every document.
    All,
    /// Matches the document with this identifier.
    Id(Uuid),
    /// Matches documents whose top-level `field` equals the value.
    Eq(&'static str, Value),
}

impl Filter {
    /// Builds an identifier filter from a path segment. A malformed identifier is
    /// rejected here, the way a document driver refuses to build the query.
    pub fn by_id(raw: &str) -> Result<Self, RepoError> {
        Uuid::parse_str(raw)
            .map(Filter::Id)
            .map_err(|_| RepoError::InvalidId(raw.to_string()))
    }

    pub fn eq(field: &'static str, value: impl Into<Value>) -> Self {
        Filter::Eq(field, value.into())
    }

    fn matches(&self, id: &Uuid, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Id(wanted) => wanted == id,
            Filter::Eq(field, value) => doc.get(*field) == Some(value),
        }
    }
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("duplicate key in collection `{}`", .0.name())]
    Duplicate(Collection),

    #[error("malformed identifier {0:?}")]
    InvalidId(String),
}

/// Repository Trait
///
/// Collection-scoped document operations. Every operation touches at most one
/// collection and is atomic only as far as the backing store makes a single
/// statement atomic.
///
/// **Send + Sync + async_trait** make `Arc<dyn Repository>` shareable across
/// Axum's request tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Round-trips the store to confirm the connection is alive.
    async fn ping(&self) -> Result<(), RepoError>;

    /// All matching documents, in insertion order.
    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Document>, RepoError>;

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, RepoError>;

    /// Stores the document under a freshly generated identifier. Any `_id`
    /// supplied by the caller is discarded.
    async fn insert_one(&self, collection: Collection, doc: Document) -> Result<InsertOneResult, RepoError>;

    /// Merges `set` into the top-level fields of the first matching document.
    /// No match is not an error: it reports `matched_count == 0`.
    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        set: Document,
    ) -> Result<UpdateResult, RepoError>;

    /// Removes the first matching document, if any.
    async fn delete_one(&self, collection: Collection, filter: Filter) -> Result<DeleteResult, RepoError>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer across the application state.
pub type RepositoryState = Arc<dyn Repository>;

fn with_id(id: Uuid, mut doc: Document) -> Document {
    doc.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    doc
}

fn without_id(mut doc: Document) -> Document {
    doc.remove(ID_FIELD);
    doc
}

/// PostgresRepository
///
/// Stores each collection as a table of JSONB documents keyed by UUID.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// ensure_schema
    ///
    /// Creates the collection tables and their indexes if they do not exist yet.
    /// The unique index on the user email backs the identity-uniqueness invariant
    /// even when two registrations race.
    pub async fn ensure_schema(&self) -> Result<(), RepoError> {
        for collection in Collection::ALL {
            let ddl = format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id UUID PRIMARY KEY,
                    doc JSONB NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
                collection.name()
            );
            sqlx::query(&ddl).execute(&self.pool).await?;
        }

        sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS users_email_key ON users ((doc->>'email'))")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS carts_email_idx ON carts ((doc->>'email'))")
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

/// Appends the WHERE clause for `filter`, binding every value.
fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {}
        Filter::Id(id) => {
            builder.push(" WHERE id = ");
            builder.push_bind(*id);
        }
        Filter::Eq(field, Value::String(text)) => {
            // Same expression as the `doc->>'email'` indexes, so they serve the
            // lookup; the JSONB comparison keeps `"5"` from matching `5`.
            let field = field.replace('\'', "''");
            builder.push(format!(" WHERE doc ->> '{field}' = "));
            builder.push_bind(text.clone());
            builder.push(format!(" AND doc -> '{field}' = "));
            builder.push_bind(Json(Value::String(text.clone())));
        }
        Filter::Eq(field, value) => {
            builder.push(" WHERE doc -> ");
            builder.push_bind(*field);
            builder.push(" = ");
            builder.push_bind(Json(value.clone()));
        }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn ping(&self) -> Result<(), RepoError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Document>, RepoError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT id, doc FROM {}", collection.name()));
        push_filter(&mut builder, &filter);
        builder.push(" ORDER BY created_at, id");

        let rows: Vec<(Uuid, Json<Document>)> =
            builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(id, Json(doc))| with_id(id, doc)).collect())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, RepoError> {
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT id, doc FROM {}", collection.name()));
        push_filter(&mut builder, &filter);
        builder.push(" ORDER BY created_at, id LIMIT 1");

        let row: Option<(Uuid, Json<Document>)> =
            builder.build_query_as().fetch_optional(&self.pool).await?;
        Ok(row.map(|(id, Json(doc))| with_id(id, doc)))
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> Result<InsertOneResult, RepoError> {
        let id = Uuid::new_v4();
        let sql = format!("INSERT INTO {} (id, doc) VALUES ($1, $2)", collection.name());

        match sqlx::query(&sql)
            .bind(id)
            .bind(Json(without_id(doc)))
            .execute(&self.pool)
            .await
        {
            Ok(_) => Ok(InsertOneResult {
                acknowledged: true,
                inserted_id: id.to_string(),
            }),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(RepoError::Duplicate(collection))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// update_one
    ///
    /// Locks the first matching row, then rewrites it only when `set` is not
    /// already contained in the document, so `modified_count` stays 0 for a
    /// no-op update.
    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        set: Document,
    ) -> Result<UpdateResult, RepoError> {
        let table = collection.name();
        let set = without_id(set);

        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("WITH target AS (SELECT id, doc FROM {table}"));
        push_filter(&mut builder, &filter);
        builder.push(format!(
            " ORDER BY created_at, id LIMIT 1 FOR UPDATE), updated AS (UPDATE {table} AS t SET doc = t.doc || "
        ));
        builder.push_bind(Json(set.clone()));
        builder.push(" FROM target WHERE t.id = target.id AND NOT (target.doc @> ");
        builder.push_bind(Json(set));
        builder.push(
            ") RETURNING t.id) SELECT (SELECT COUNT(*) FROM target), (SELECT COUNT(*) FROM updated)",
        );

        let (matched, modified): (i64, i64) = builder.build_query_as().fetch_one(&self.pool).await?;
        Ok(UpdateResult::new(matched as u64, modified as u64))
    }

    async fn delete_one(&self, collection: Collection, filter: Filter) -> Result<DeleteResult, RepoError> {
        let table = collection.name();

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "DELETE FROM {table} WHERE id = (SELECT id FROM {table}"
        ));
        push_filter(&mut builder, &filter);
        builder.push(" ORDER BY created_at, id LIMIT 1)");

        let result = builder.build().execute(&self.pool).await?;
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count: result.rows_affected(),
        })
    }
}

/// InMemoryRepository
///
/// Process-local store with the same semantics as `PostgresRepository`,
/// including the unique user identity. Used for local development without a
/// database and by the test suite.
#[derive(Default)]
pub struct InMemoryRepository {
    collections: RwLock<HashMap<Collection, Vec<(Uuid, Document)>>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn ping(&self) -> Result<(), RepoError> {
        Ok(())
    }

    async fn find(&self, collection: Collection, filter: Filter) -> Result<Vec<Document>, RepoError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .into_iter()
            .flatten()
            .filter(|(id, doc)| filter.matches(id, doc))
            .map(|(id, doc)| with_id(*id, doc.clone()))
            .collect())
    }

    async fn find_one(
        &self,
        collection: Collection,
        filter: Filter,
    ) -> Result<Option<Document>, RepoError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(&collection)
            .into_iter()
            .flatten()
            .find(|(id, doc)| filter.matches(id, doc))
            .map(|(id, doc)| with_id(*id, doc.clone())))
    }

    async fn insert_one(&self, collection: Collection, doc: Document) -> Result<InsertOneResult, RepoError> {
        let doc = without_id(doc);
        let mut collections = self.collections.write().await;
        let docs = collections.entry(collection).or_default();

        if let Some(field) = collection.unique_field() {
            if let Some(value) = doc.get(field) {
                if docs.iter().any(|(_, existing)| existing.get(field) == Some(value)) {
                    return Err(RepoError::Duplicate(collection));
                }
            }
        }

        let id = Uuid::new_v4();
        docs.push((id, doc));
        Ok(InsertOneResult {
            acknowledged: true,
            inserted_id: id.to_string(),
        })
    }

    async fn update_one(
        &self,
        collection: Collection,
        filter: Filter,
        set: Document,
    ) -> Result<UpdateResult, RepoError> {
        let set = without_id(set);
        let mut collections = self.collections.write().await;
        let Some((_, doc)) = collections
            .get_mut(&collection)
            .and_then(|docs| docs.iter_mut().find(|(id, doc)| filter.matches(id, doc)))
        else {
            return Ok(UpdateResult::new(0, 0));
        };

        let unchanged = set.iter().all(|(key, value)| doc.get(key) == Some(value));
        if unchanged {
            return Ok(UpdateResult::new(1, 0));
        }
        doc.extend(set);
        Ok(UpdateResult::new(1, 1))
    }

    async fn delete_one(&self, collection: Collection, filter: Filter) -> Result<DeleteResult, RepoError> {
        let mut collections = self.collections.write().await;
        let deleted_count = match collections.get_mut(&collection) {
            Some(docs) => match docs.iter().position(|(id, doc)| filter.matches(id, doc)) {
                Some(index) => {
                    docs.remove(index);
                    1
                }
                None => 0,
            },
            None => 0,
        };
        Ok(DeleteResult {
            acknowledged: true,
            deleted_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn where_clause(filter: Filter) -> String {
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new("SELECT id, doc FROM carts");
        push_filter(&mut builder, &filter);
        builder.sql().to_string()
    }

    #[test]
    fn string_filter_uses_the_indexed_expression() {
        assert_eq!(
            where_clause(Filter::eq("email", "a@x.com")),
            "SELECT id, doc FROM carts WHERE doc ->> 'email' = $1 AND doc -> 'email' = $2"
        );
    }

    #[test]
    fn non_string_filter_compares_jsonb() {
        assert_eq!(
            where_clause(Filter::eq("price", 5)),
            "SELECT id, doc FROM carts WHERE doc -> $1 = $2"
        );
        assert_eq!(where_clause(Filter::All), "SELECT id, doc FROM carts");
    }
}
