//! CRUD over JSON documents grouped into named collections.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collection {
    Ingredients,
    Users,
}

impl Collection {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Ingredients => "ingredients",
            Collection::Users => "users",
        }
    }
}

impl std::fmt::Display for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row from the `documents` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DocumentRow {
    pub id: Uuid,
    pub collection: String,
    pub body: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DocumentRow {
    /// Renders the stored object with `_id`, `createdAt` and `updatedAt`
    /// merged in. Stored keys with those names are overwritten.
    #[must_use]
    pub fn into_json(self) -> Value {
        let mut object = match self.body {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        object.insert("_id".to_string(), Value::String(self.id.to_string()));
        object.insert(
            "createdAt".to_string(),
            Value::String(self.created_at.to_rfc3339()),
        );
        object.insert(
            "updatedAt".to_string(),
            Value::String(self.updated_at.to_rfc3339()),
        );
        Value::Object(object)
    }
}

const COLUMNS: &str = "id, collection, body, created_at, updated_at";

fn require_object(body: &Value) -> Result<(), DbError> {
    if body.is_object() {
        Ok(())
    } else {
        Err(DbError::NotAnObject)
    }
}

/// Returns the newest documents of a collection, newest first.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_documents(
    pool: &PgPool,
    collection: Collection,
    limit: i64,
) -> Result<Vec<DocumentRow>, DbError> {
    let rows = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {COLUMNS} FROM documents \
         WHERE collection = $1 \
         ORDER BY created_at DESC, id \
         LIMIT $2"
    ))
    .bind(collection.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns a single document, or `None` if it does not exist in `collection`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_document(
    pool: &PgPool,
    collection: Collection,
    id: Uuid,
) -> Result<Option<DocumentRow>, DbError> {
    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "SELECT {COLUMNS} FROM documents WHERE collection = $1 AND id = $2"
    ))
    .bind(collection.as_str())
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a new document with a generated id.
///
/// # Errors
///
/// Returns [`DbError::NotAnObject`] for non-object bodies, or
/// [`DbError::Sqlx`] if the insert fails.
pub async fn insert_document(
    pool: &PgPool,
    collection: Collection,
    body: &Value,
) -> Result<DocumentRow, DbError> {
    require_object(body)?;

    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "INSERT INTO documents (id, collection, body) VALUES ($1, $2, $3) RETURNING {COLUMNS}"
    ))
    .bind(Uuid::new_v4())
    .bind(collection.as_str())
    .bind(body)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Replaces the whole body of an existing document.
///
/// # Errors
///
/// Returns [`DbError::NotAnObject`] for non-object bodies, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn replace_document(
    pool: &PgPool,
    collection: Collection,
    id: Uuid,
    body: &Value,
) -> Result<Option<DocumentRow>, DbError> {
    require_object(body)?;

    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "UPDATE documents SET body = $3, updated_at = NOW() \
         WHERE collection = $1 AND id = $2 \
         RETURNING {COLUMNS}"
    ))
    .bind(collection.as_str())
    .bind(id)
    .bind(body)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Shallow-merges `patch` into an existing document: top-level keys in
/// `patch` overwrite stored keys, everything else is kept.
///
/// # Errors
///
/// Returns [`DbError::NotAnObject`] for non-object patches, or
/// [`DbError::Sqlx`] if the update fails.
pub async fn merge_document(
    pool: &PgPool,
    collection: Collection,
    id: Uuid,
    patch: &Value,
) -> Result<Option<DocumentRow>, DbError> {
    require_object(patch)?;

    let row = sqlx::query_as::<_, DocumentRow>(&format!(
        "UPDATE documents SET body = body || $3, updated_at = NOW() \
         WHERE collection = $1 AND id = $2 \
         RETURNING {COLUMNS}"
    ))
    .bind(collection.as_str())
    .bind(id)
    .bind(patch)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Deletes a document. Returns `false` when nothing matched.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_document(
    pool: &PgPool,
    collection: Collection,
    id: Uuid,
) -> Result<bool, DbError> {
    let result = sqlx::query("DELETE FROM documents WHERE collection = $1 AND id = $2")
        .bind(collection.as_str())
        .bind(id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
