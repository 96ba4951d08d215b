//! `/ingredients` route group.
//!
//! - `GET    /ingredients`       list (newest first, `?limit=`)
//! - `POST   /ingredients`       create
//! - `GET    /ingredients/{id}`  fetch
//! - `PUT    /ingredients/{id}`  replace
//! - `PATCH  /ingredients/{id}`  merge
//! - `DELETE /ingredients/{id}`  delete

use axum::{routing::get, Router};
use nutri_db::{Collection, Store};

use crate::middleware::require_store_ready;

use super::documents::{self, CollectionRoute};
use super::AppState;

pub(super) struct Ingredients;

impl CollectionRoute for Ingredients {
    const COLLECTION: Collection = Collection::Ingredients;
}

pub(super) fn router(store: Store) -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(documents::list::<Ingredients>).post(documents::create::<Ingredients>),
        )
        .route(
            "/{id}",
            get(documents::fetch::<Ingredients>)
                .put(documents::replace::<Ingredients>)
                .patch(documents::merge::<Ingredients>)
                .delete(documents::remove::<Ingredients>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            store,
            require_store_ready,
        ))
}
