//! Nightly pruning of the per-user daily food log.
//!
//! User documents carry a `foods` array; each entry records when it was added
//! in `addedAt` (RFC 3339). Entries added before the cutoff are removed.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// Removes `foods` entries older than `cutoff` from every user document.
///
/// Entries without a parsable `addedAt` are treated as stale; a malformed
/// value never fails the update. Returns the number of user documents that
/// changed.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn clear_stale_profile_foods(
    pool: &PgPool,
    cutoff: DateTime<Utc>,
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "WITH pruned AS ( \
             SELECT d.id, \
                    COALESCE( \
                        (SELECT jsonb_agg(entry ORDER BY ord) \
                         FROM jsonb_array_elements(d.body->'foods') WITH ORDINALITY AS f(entry, ord) \
                         WHERE jsonb_typeof(entry) = 'object' \
                           AND COALESCE(try_timestamptz(entry->>'addedAt') >= $1, false)), \
                        '[]'::jsonb) AS foods \
             FROM documents d \
             WHERE d.collection = 'users' \
               AND jsonb_typeof(d.body->'foods') = 'array' \
         ) \
         UPDATE documents AS doc \
         SET body = jsonb_set(doc.body, '{foods}', pruned.foods), updated_at = NOW() \
         FROM pruned \
         WHERE doc.id = pruned.id AND doc.body->'foods' IS DISTINCT FROM pruned.foods",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
