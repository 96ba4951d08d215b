//! CRUD handlers shared by the route groups, parameterised by collection.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Extension, Json,
};
use nutri_db::Collection;
use serde::Deserialize;
use serde_json::Value;
use uuid::Uuid;

use crate::middleware::{ClientInfo, RequestId};

use super::{normalize_limit, ApiError, AppState, JsonBody};

/// Binds a route group to its collection.
pub(super) trait CollectionRoute: Send + Sync + 'static {
    const COLLECTION: Collection;
}

#[derive(Debug, Deserialize)]
pub(super) struct ListQuery {
    pub limit: Option<i64>,
}

/// Ids that are not UUIDs cannot exist, so they are reported as missing.
pub(super) fn parse_id(collection: Collection, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| not_found(collection, raw))
}

pub(super) fn not_found(collection: Collection, id: &str) -> ApiError {
    ApiError::NotFound(format!("{collection} document '{id}' not found"))
}

pub(super) async fn list<C: CollectionRoute>(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let store = &state.store;
    let rows = store.observe(
        nutri_db::list_documents(store.pool(), C::COLLECTION, normalize_limit(query.limit)).await,
    )?;

    Ok(Json(rows.into_iter().map(nutri_db::DocumentRow::into_json).collect()))
}

pub(super) async fn create<C: CollectionRoute>(
    State(state): State<AppState>,
    Extension(req_id): Extension<RequestId>,
    Extension(client): Extension<ClientInfo>,
    JsonBody(body): JsonBody,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let store = &state.store;
    let row = store.observe(nutri_db::insert_document(store.pool(), C::COLLECTION, &body).await)?;

    tracing::info!(
        collection = %C::COLLECTION,
        id = %row.id,
        request_id = %req_id.0,
        client_ip = ?client.ip,
        "document created"
    );

    Ok((StatusCode::CREATED, Json(row.into_json())))
}

pub(super) async fn fetch<C: CollectionRoute>(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(C::COLLECTION, &raw_id)?;
    let store = &state.store;
    let row = store
        .observe(nutri_db::get_document(store.pool(), C::COLLECTION, id).await)?
        .ok_or_else(|| not_found(C::COLLECTION, &raw_id))?;

    Ok(Json(row.into_json()))
}

/// PUT: replaces the stored body.
pub(super) async fn replace<C: CollectionRoute>(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    JsonBody(body): JsonBody,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(C::COLLECTION, &raw_id)?;
    let store = &state.store;
    let row = store
        .observe(nutri_db::replace_document(store.pool(), C::COLLECTION, id, &body).await)?
        .ok_or_else(|| not_found(C::COLLECTION, &raw_id))?;

    Ok(Json(row.into_json()))
}

/// PATCH: shallow merge of top-level keys.
pub(super) async fn merge<C: CollectionRoute>(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    JsonBody(patch): JsonBody,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(C::COLLECTION, &raw_id)?;
    let store = &state.store;
    let row = store
        .observe(nutri_db::merge_document(store.pool(), C::COLLECTION, id, &patch).await)?
        .ok_or_else(|| not_found(C::COLLECTION, &raw_id))?;

    Ok(Json(row.into_json()))
}

pub(super) async fn remove<C: CollectionRoute>(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let id = parse_id(C::COLLECTION, &raw_id)?;
    let store = &state.store;
    if !store.observe(nutri_db::delete_document(store.pool(), C::COLLECTION, id).await)? {
        return Err(not_found(C::COLLECTION, &raw_id));
    }

    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_id_rejects_non_uuid_as_not_found() {
        let err = parse_id(Collection::Users, "not-a-uuid").unwrap_err();
        assert!(matches!(err, ApiError::NotFound(ref m) if m.contains("not-a-uuid")));
    }

    #[test]
    fn parse_id_accepts_uuid() {
        let id = Uuid::new_v4();
        assert_eq!(
            parse_id(Collection::Ingredients, &id.to_string()).unwrap(),
            id
        );
    }
}
