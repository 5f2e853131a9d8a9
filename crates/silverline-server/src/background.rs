//! Background task that expires stale pending signups.

use silverline_db::DbPool;
use silverline_identity::expire_pending_signups;
use std::time::Duration;
use tokio::time::sleep;

/// Runs one expiry pass. Returns how many signups were marked expired.
pub async fn sweep_expired_signups(pool: &DbPool) -> Result<usize, String> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || {
        let conn = pool.get().map_err(|e| e.to_string())?;
        expire_pending_signups(&conn).map_err(|e| e.to_string())
    })
    .await
    .map_err(|e| e.to_string())?
}

/// Marks expired pending signups on a fixed interval.
///
/// This task runs indefinitely. An interval of zero disables it.
pub async fn start_signup_expiry_task(pool: DbPool, interval_seconds: u64) {
    if interval_seconds == 0 {
        tracing::warn!("signup expiry task disabled (interval=0)");
        return;
    }
    let interval = Duration::from_secs(interval_seconds);
    tracing::info!(interval_seconds, "starting signup expiry task");

    loop {
        sleep(interval).await;

        match sweep_expired_signups(&pool).await {
            Ok(0) => tracing::debug!("no pending signups to expire"),
            Ok(count) => tracing::info!(count, "expired pending signups"),
            Err(e) => tracing::error!(error = %e, "failed to expire pending signups"),
        }
    }
}
