//! Socket and job lifecycle around the router.

use std::{future::Future, net::SocketAddr};

use nutri_core::AppConfig;
use nutri_db::Store;

use crate::{
    build_app,
    scheduler::{profile_foods::cleaning_profile_foods, JobRunner},
};

/// Binds the listener, arms the nightly jobs, and serves until `shutdown`
/// resolves. The runner is stopped and the store closed on every exit path
/// after the store was handed in.
///
/// # Errors
///
/// Returns an error if the socket cannot be bound, the job runner fails to
/// start, or the server fails while running.
pub async fn serve<F>(config: &AppConfig, store: Store, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = match tokio::net::TcpListener::bind(config.bind_addr()).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %config.bind_addr(), error = %e, "failed to bind");
            store.close().await;
            return Err(e.into());
        }
    };
    let port = listener.local_addr().map_or(config.port, |addr| addr.port());
    tracing::info!(port, "server is listening");

    // Timers are armed only once the socket is bound.
    let mut runner = JobRunner::new(vec![cleaning_profile_foods(
        store.clone(),
        config.cleanup_schedule,
    )]);
    if let Err(e) = runner.start().await {
        store.close().await;
        return Err(e.into());
    }

    let app = build_app(store.clone(), config);
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await;

    if let Err(e) = runner.stop().await {
        tracing::warn!(error = %e, "job runner did not stop cleanly");
    }
    store.close().await;

    served?;
    Ok(())
}
