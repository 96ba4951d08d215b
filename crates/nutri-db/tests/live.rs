//! Live integration tests for nutri-db using `#[sqlx::test]`.
//!
//! Each test gets a fresh, fully-migrated Postgres database spun up by the
//! sqlx test harness. They need `DATABASE_URL` pointing at a server the
//! harness can create databases on, so they are ignored by default:
//! `cargo test -p nutri-db -- --ignored`.

use chrono::{Duration, TimeZone, Utc};
use nutri_db::{
    clear_stale_profile_foods, delete_document, get_document, insert_document, list_documents,
    merge_document, replace_document, Collection,
};
use serde_json::json;
use uuid::Uuid;

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn insert_then_get_round_trips_body(pool: sqlx::PgPool) {
    let created = insert_document(&pool, Collection::Ingredients, &json!({ "name": "Rice" }))
        .await
        .expect("insert");

    let fetched = get_document(&pool, Collection::Ingredients, created.id)
        .await
        .expect("get")
        .expect("document exists");
    assert_eq!(fetched.body["name"], "Rice");
    assert_eq!(fetched.collection, "ingredients");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn documents_are_scoped_to_their_collection(pool: sqlx::PgPool) {
    let created = insert_document(&pool, Collection::Users, &json!({ "name": "Ada" }))
        .await
        .expect("insert");

    let wrong = get_document(&pool, Collection::Ingredients, created.id)
        .await
        .expect("get");
    assert!(wrong.is_none());

    let listed = list_documents(&pool, Collection::Ingredients, 50)
        .await
        .expect("list");
    assert!(listed.is_empty());
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn merge_keeps_untouched_keys_and_replace_drops_them(pool: sqlx::PgPool) {
    let created = insert_document(
        &pool,
        Collection::Ingredients,
        &json!({ "name": "Milk", "kcal": 42 }),
    )
    .await
    .expect("insert");

    let merged = merge_document(&pool, Collection::Ingredients, created.id, &json!({ "kcal": 64 }))
        .await
        .expect("merge")
        .expect("document exists");
    assert_eq!(merged.body, json!({ "name": "Milk", "kcal": 64 }));

    let replaced = replace_document(&pool, Collection::Ingredients, created.id, &json!({ "kcal": 1 }))
        .await
        .expect("replace")
        .expect("document exists");
    assert_eq!(replaced.body, json!({ "kcal": 1 }));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn delete_reports_whether_anything_matched(pool: sqlx::PgPool) {
    let created = insert_document(&pool, Collection::Users, &json!({}))
        .await
        .expect("insert");

    assert!(delete_document(&pool, Collection::Users, created.id)
        .await
        .expect("delete"));
    assert!(!delete_document(&pool, Collection::Users, created.id)
        .await
        .expect("second delete"));
    assert!(!delete_document(&pool, Collection::Users, Uuid::new_v4())
        .await
        .expect("unknown id"));
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn clear_stale_profile_foods_keeps_only_todays_entries(pool: sqlx::PgPool) {
    let cutoff = Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap();
    let yesterday = (cutoff - Duration::hours(3)).to_rfc3339();
    let today = (cutoff + Duration::hours(7)).to_rfc3339();

    let user = insert_document(
        &pool,
        Collection::Users,
        &json!({
            "name": "Ada",
            "foods": [
                { "name": "Toast", "addedAt": yesterday },
                { "name": "Eggs", "addedAt": today },
                { "name": "Mystery" },
            ],
        }),
    )
    .await
    .expect("insert user");

    let untouched = insert_document(&pool, Collection::Users, &json!({ "name": "Grace" }))
        .await
        .expect("insert user without foods");

    let ingredient = insert_document(
        &pool,
        Collection::Ingredients,
        &json!({ "foods": [{ "addedAt": yesterday }] }),
    )
    .await
    .expect("insert ingredient");

    let changed = clear_stale_profile_foods(&pool, cutoff)
        .await
        .expect("cleanup");
    assert_eq!(changed, 1);

    let user = get_document(&pool, Collection::Users, user.id)
        .await
        .expect("get")
        .expect("user exists");
    assert_eq!(user.body["foods"], json!([{ "name": "Eggs", "addedAt": today }]));
    assert_eq!(user.body["name"], "Ada");

    let untouched = get_document(&pool, Collection::Users, untouched.id)
        .await
        .expect("get")
        .expect("user exists");
    assert!(untouched.body.get("foods").is_none());

    let ingredient = get_document(&pool, Collection::Ingredients, ingredient.id)
        .await
        .expect("get")
        .expect("ingredient exists");
    assert_eq!(ingredient.body["foods"].as_array().map(Vec::len), Some(1));

    let changed_again = clear_stale_profile_foods(&pool, cutoff)
        .await
        .expect("second cleanup");
    assert_eq!(changed_again, 0, "cleanup is idempotent for the same cutoff");
}

#[sqlx::test(migrations = "../../migrations")]
#[ignore = "requires DATABASE_URL"]
async fn clear_stale_profile_foods_drops_malformed_timestamps_without_failing(pool: sqlx::PgPool) {
    let cutoff = Utc.with_ymd_and_hms(2026, 4, 2, 0, 0, 0).unwrap();
    let today = (cutoff + Duration::hours(7)).to_rfc3339();

    let stale = insert_document(
        &pool,
        Collection::Users,
        &json!({ "foods": [{ "name": "Toast", "addedAt": "2026-01-01T00:00:00Z" }] }),
    )
    .await
    .expect("insert stale user");

    let malformed = insert_document(
        &pool,
        Collection::Users,
        &json!({
            "foods": [
                { "name": "Soup", "addedAt": "2026-02-30Tlunch" },
                { "name": "Bread", "addedAt": 12 },
                { "name": "Eggs", "addedAt": today },
            ],
        }),
    )
    .await
    .expect("insert malformed user");

    let changed = clear_stale_profile_foods(&pool, cutoff)
        .await
        .expect("cleanup tolerates malformed addedAt");
    assert_eq!(changed, 2);

    let stale = get_document(&pool, Collection::Users, stale.id)
        .await
        .expect("get")
        .expect("user exists");
    assert_eq!(stale.body["foods"], json!([]));

    let malformed = get_document(&pool, Collection::Users, malformed.id)
        .await
        .expect("get")
        .expect("user exists");
    assert_eq!(malformed.body["foods"], json!([{ "name": "Eggs", "addedAt": today }]));
}
