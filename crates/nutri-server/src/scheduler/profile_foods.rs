//! The nightly `cleaning-profile-foods` job: drops yesterday's entries from
//! every user's daily food log.

use anyhow::bail;
use chrono::{DateTime, Local, TimeZone, Utc};
use nutri_core::DailySchedule;
use nutri_db::Store;

use super::JobDescriptor;

pub const CLEANING_PROFILE_FOODS: &str = "cleaning-profile-foods";

pub fn cleaning_profile_foods(store: Store, schedule: DailySchedule) -> JobDescriptor {
    JobDescriptor::new(CLEANING_PROFILE_FOODS, schedule, move || {
        let store = store.clone();
        async move { run(&store, Local::now()).await }
    })
}

/// Clears food log entries added before the start of `now`'s local day.
async fn run<Tz: TimeZone>(store: &Store, now: DateTime<Tz>) -> anyhow::Result<()> {
    // Refresh first so a store that recovered since the last request is used.
    let readiness = store.refresh_readiness().await;
    if !store.is_ready() {
        bail!("store is {readiness}");
    }

    let cutoff = start_of_day(&now).unwrap_or_else(|| now.with_timezone(&Utc));
    let cleared = nutri_db::clear_stale_profile_foods(store.pool(), cutoff).await?;

    tracing::info!(
        users = cleared,
        cutoff = %cutoff,
        "scheduler: cleared stale profile foods"
    );
    Ok(())
}

/// Local midnight of `now`'s calendar day, in UTC. `None` when midnight does
/// not exist locally (DST gap).
fn start_of_day<Tz: TimeZone>(now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
    now.timezone()
        .from_local_datetime(&midnight)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
}
