//! The process-wide store handle and its readiness state.
//!
//! [`Store::connect_in_background`] returns immediately; a spawned task
//! probes the database and applies migrations, then publishes the outcome
//! through a watch channel that route guards and jobs consult.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::{Duration, Instant},
};

use sqlx::PgPool;
use tokio::sync::watch;

use crate::{ping, run_migrations, DbError, PoolConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// The initial connection attempt has not finished yet.
    Connecting,
    Ready,
    /// The last attempt or probe failed. Requests are refused until a probe succeeds.
    Degraded,
}

impl std::fmt::Display for Readiness {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Readiness::Connecting => write!(f, "connecting"),
            Readiness::Ready => write!(f, "ready"),
            Readiness::Degraded => write!(f, "degraded"),
        }
    }
}

/// Minimum spacing between recovery probes triggered by requests.
pub const PROBE_INTERVAL: Duration = Duration::from_secs(5);

/// Shared handle over the connection pool. Clones share the pool and the
/// readiness channel.
#[derive(Debug, Clone)]
pub struct Store {
    pool: PgPool,
    readiness: Arc<watch::Sender<Readiness>>,
    migrated: Arc<AtomicBool>,
    last_probe: Arc<Mutex<Option<Instant>>>,
}

impl Store {
    /// Builds the handle without touching the network. Readiness starts at
    /// [`Readiness::Connecting`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the connection string cannot be parsed.
    pub fn lazy(database_url: &str, config: PoolConfig) -> Result<Self, DbError> {
        let pool = config.options().connect_lazy(database_url)?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an existing pool. Readiness starts at [`Readiness::Connecting`]
    /// and migrations are applied on the first successful probe.
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        let (readiness, _) = watch::channel(Readiness::Connecting);
        Self {
            pool,
            readiness: Arc::new(readiness),
            migrated: Arc::new(AtomicBool::new(false)),
            last_probe: Arc::new(Mutex::new(None)),
        }
    }

    /// Builds the handle and starts a single connection attempt on a
    /// background task. A failed attempt leaves the store
    /// [`Readiness::Degraded`]; [`Store::recover_if_due`] and
    /// [`Store::refresh_readiness`] bring it back.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Sqlx`] if the connection string cannot be parsed.
    pub fn connect_in_background(database_url: &str, config: PoolConfig) -> Result<Self, DbError> {
        let store = Self::lazy(database_url, config)?;
        let probe = store.clone();
        tokio::spawn(async move { probe.establish().await });
        Ok(store)
    }

    async fn establish(&self) {
        self.mark_probed();
        match self.probe().await {
            Ok(()) => {
                tracing::info!("store connected successfully");
                self.set_readiness(Readiness::Ready);
            }
            Err(e) => {
                tracing::error!(error = %e, "store connection error");
                self.set_readiness(Readiness::Degraded);
            }
        }
    }

    /// Pings the database and applies migrations if they have not run yet.
    async fn probe(&self) -> Result<(), DbError> {
        ping(&self.pool).await?;
        if !self.migrated.load(Ordering::Acquire) {
            run_migrations(&self.pool).await?;
            self.migrated.store(true, Ordering::Release);
        }
        Ok(())
    }

    /// Probes the store and records the result. A store that is still
    /// connecting is left alone.
    pub async fn refresh_readiness(&self) -> Readiness {
        if self.readiness() == Readiness::Connecting {
            return Readiness::Connecting;
        }

        self.mark_probed();
        let next = match self.probe().await {
            Ok(()) => Readiness::Ready,
            Err(e) => {
                tracing::warn!(error = %e, "store probe failed");
                Readiness::Degraded
            }
        };
        self.set_readiness(next);
        next
    }

    /// Re-probes a degraded store, at most once per [`PROBE_INTERVAL`].
    /// Other states are returned as they are.
    pub async fn recover_if_due(&self) -> Readiness {
        let current = self.readiness();
        if current != Readiness::Degraded || !self.claim_probe(PROBE_INTERVAL) {
            return current;
        }
        self.refresh_readiness().await
    }

    /// Passes `result` through, marking the store degraded when the error
    /// means the database is unreachable.
    ///
    /// # Errors
    ///
    /// Returns the error in `result` unchanged.
    pub fn observe<T>(&self, result: Result<T, DbError>) -> Result<T, DbError> {
        if let Err(e) = &result {
            if e.is_unavailable() && self.readiness() == Readiness::Ready {
                tracing::warn!(error = %e, "store unreachable, marking degraded");
                self.set_readiness(Readiness::Degraded);
            }
        }
        result
    }

    #[must_use]
    pub fn readiness(&self) -> Readiness {
        *self.readiness.borrow()
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.readiness() == Readiness::Ready
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<Readiness> {
        self.readiness.subscribe()
    }

    pub fn set_readiness(&self, next: Readiness) {
        let previous = self.readiness.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "store readiness changed");
        }
    }

    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Closes the pool. Further queries fail immediately.
    pub async fn close(&self) {
        self.pool.close().await;
        self.set_readiness(Readiness::Degraded);
        tracing::info!("store connection closed");
    }

    fn mark_probed(&self) {
        *self.last_probe.lock().unwrap_or_else(PoisonError::into_inner) = Some(Instant::now());
    }

    /// True, and records the probe, when none ran within `interval`.
    fn claim_probe(&self, interval: Duration) -> bool {
        let mut last = self.last_probe.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_some_and(|at| at.elapsed() < interval) {
            return false;
        }
        *last = Some(Instant::now());
        true
    }
}
