//! `/users` route group: the same CRUD surface as ingredients plus
//! `GET /users/me`, which resolves the `userId` cookie.

use axum::{extract::State, routing::get, Extension, Json, Router};
use nutri_db::{Collection, Store};
use serde_json::Value;

use crate::middleware::{require_store_ready, Cookies};

use super::documents::{self, not_found, parse_id, CollectionRoute};
use super::{ApiError, AppState};

const USER_ID_COOKIE: &str = "userId";

pub(super) struct Users;

impl CollectionRoute for Users {
    const COLLECTION: Collection = Collection::Users;
}

pub(super) fn router(store: Store) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(documents::list::<Users>).post(documents::create::<Users>),
        )
        .route("/me", get(current_user))
        .route(
            "/{id}",
            get(documents::fetch::<Users>)
                .put(documents::replace::<Users>)
                .patch(documents::merge::<Users>)
                .delete(documents::remove::<Users>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            store,
            require_store_ready,
        ))
}

async fn current_user(
    State(state): State<AppState>,
    Extension(cookies): Extension<Cookies>,
) -> Result<Json<Value>, ApiError> {
    let raw_id = cookies
        .get(USER_ID_COOKIE)
        .ok_or(ApiError::Unauthorized("missing userId cookie"))?;
    let id = parse_id(Collection::Users, raw_id)?;

    let store = &state.store;
    let row = store
        .observe(nutri_db::get_document(store.pool(), Collection::Users, id).await)?
        .ok_or_else(|| not_found(Collection::Users, raw_id))?;

    Ok(Json(row.into_json()))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use nutri_core::Environment;
    use nutri_db::Readiness;
    use tower::ServiceExt;

    use super::super::build_app;
    use super::super::tests::{lazy_store, test_config};

    #[tokio::test]
    async fn me_without_cookie_is_unauthorized() {
        let store = lazy_store();
        store.set_readiness(Readiness::Ready);
        let app = build_app(store, &test_config(Environment::Development));

        let response = app
            .oneshot(Request::builder().uri("/users/me").body(Body::empty()).expect("request"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_with_malformed_cookie_is_not_found() {
        let store = lazy_store();
        store.set_readiness(Readiness::Ready);
        let app = build_app(store, &test_config(Environment::Development));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users/me")
                    .header(header::COOKIE, "userId=not-a-uuid")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn unknown_id_is_not_found_before_touching_the_store() {
        let store = lazy_store();
        store.set_readiness(Readiness::Ready);
        let app = build_app(store, &test_config(Environment::Production));

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users/definitely-not-an-id")
                    .body(Body::empty())
                    .expect("request"),
            )
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
