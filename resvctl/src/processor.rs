//! The expiration processor: a single periodic control loop that warns,
//! expires and prunes reservations as they cross their deadlines.
//!
//! The loop is owned by an [`ExpirationProcessor`] handle created at the
//! composition root; [`ExpirationProcessor::shutdown`] stops the timer and
//! waits for an in-flight tick to finish. Ticks never overlap and never
//! propagate an error out of the scheduler: each of the three passes logs
//! its own failures, and a bad reservation is skipped rather than halting
//! the sweep.
//!
//! [`tick`] takes an explicit `now` so tests drive the lifecycle with a
//! fake clock instead of waiting out real deadlines.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::config::ProcessorConfig;
use crate::db::errors::DbError;
use crate::db::handlers::{ExpirationPolicies, Inventory, Reservations, ReservationTtls};
use crate::db::models::policies::ExpirationPolicy;
use crate::db::models::reservation_ttls::TtlCandidate;
use crate::errors::Result;
use crate::notifications::{Notification, Notifier};
use crate::policy_store::PolicyStore;

/// What one tick accomplished, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickSummary {
    /// Warning notifications recorded across all policies and intervals.
    pub warnings: usize,
    /// Reservations transitioned to `expired` (with their holds released).
    pub expired: usize,
    /// `cleaned` TTL records pruned by the retention sweep.
    pub swept: u64,
}

/// Handle to the running periodic loop.
pub struct ExpirationProcessor {
    shutdown: CancellationToken,
    handle: tokio::task::JoinHandle<()>,
}

impl ExpirationProcessor {
    /// Spawn the periodic loop. The first tick runs one full interval after
    /// start, so a restarting process does not double-process with a
    /// still-draining predecessor.
    pub fn start(pool: PgPool, policies: PolicyStore, notifier: Arc<dyn Notifier>, config: ProcessorConfig) -> Self {
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            run_processor_loop(pool, policies, notifier, config, token).await;
        });
        Self { shutdown, handle }
    }

    /// Stop the timer and wait for any in-flight tick. Safe to call when no
    /// tick is running; no further tick starts afterwards.
    pub async fn shutdown(self) {
        self.shutdown.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Expiration processor task failed during shutdown");
        }
    }
}

async fn run_processor_loop(
    pool: PgPool,
    policies: PolicyStore,
    notifier: Arc<dyn Notifier>,
    config: ProcessorConfig,
    shutdown: CancellationToken,
) {
    tracing::info!(interval = ?config.interval, retention_days = config.retention_days, "Starting expiration processor");

    loop {
        tokio::select! {
            _ = tokio::time::sleep(config.interval) => {}
            _ = shutdown.cancelled() => {
                tracing::info!("Expiration processor shutting down");
                return;
            }
        }

        let summary = tick(&pool, &policies, notifier.as_ref(), &config, Utc::now()).await;
        if summary != TickSummary::default() {
            tracing::info!(
                warnings = summary.warnings,
                expired = summary.expired,
                swept = summary.swept,
                "Expiration tick complete"
            );
        }
    }
}

/// Run one tick's three passes, strictly in order: warnings, then
/// expirations, then the retention sweep. A failing pass is logged and the
/// remaining passes still run.
pub async fn tick(
    pool: &PgPool,
    policies: &PolicyStore,
    notifier: &dyn Notifier,
    config: &ProcessorConfig,
    now: DateTime<Utc>,
) -> TickSummary {
    let mut summary = TickSummary::default();

    match process_warnings(pool, policies, notifier, now).await {
        Ok(warnings) => summary.warnings = warnings,
        Err(e) => tracing::error!(error = %e, "Warning pass failed"),
    }
    match process_expirations(pool, policies, notifier, now).await {
        Ok(expired) => summary.expired = expired,
        Err(e) => tracing::error!(error = %e, "Expiration pass failed"),
    }
    match sweep_retention(pool, config, now).await {
        Ok(swept) => summary.swept = swept,
        Err(e) => tracing::error!(error = %e, "Retention sweep failed"),
    }

    summary
}

/// Pass 1: for every governing policy, for every configured interval
/// (ascending), notify reservations that entered the warning window.
#[instrument(skip_all, fields(%now))]
async fn process_warnings(pool: &PgPool, policies: &PolicyStore, notifier: &dyn Notifier, now: DateTime<Utc>) -> Result<usize> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;

    let governing = ExpirationPolicies::new(&mut conn).policies_in_use(None).await?;
    let mut sent = 0;

    for policy in &governing {
        for interval in policy.intervals_ascending() {
            let due = ReservationTtls::new(&mut conn)
                .due_for_warning(policy.business_id, now, interval)
                .await?;

            for candidate in due {
                match warn_one(&mut conn, policies, notifier, policy, &candidate, interval, now).await {
                    Ok(true) => sent += 1,
                    Ok(false) => {}
                    Err(e) => {
                        tracing::warn!(
                            reservation_id = %candidate.reservation_id,
                            interval,
                            error = %e,
                            "Failed to process expiry warning, continuing"
                        );
                    }
                }
            }
        }
    }

    Ok(sent)
}

async fn warn_one(
    conn: &mut PgConnection,
    policies: &PolicyStore,
    notifier: &dyn Notifier,
    policy: &ExpirationPolicy,
    candidate: &TtlCandidate,
    interval: i32,
    now: DateTime<Utc>,
) -> Result<bool> {
    // Re-resolve the governing policy for this reservation: a service-type
    // scoped policy may shadow the business-wide one we selected by.
    let Some(governing) = policies
        .active_for_business(conn, candidate.business_id, candidate.service_type_id)
        .await?
    else {
        return Ok(false);
    };
    if governing.id != policy.id {
        return Ok(false);
    }

    if governing.notify_warnings {
        let minutes_remaining = (candidate.expires_at - now).num_minutes();
        let notification = Notification::expiration_warning(candidate, minutes_remaining, interval);
        if let Err(e) = notifier.send(notification).await {
            // Fire-and-forget: delivery failures are not retried here
            tracing::warn!(reservation_id = %candidate.reservation_id, error = %e, "Failed to send expiry warning");
        }
    }

    let recorded = ReservationTtls::new(conn).record_warning(candidate.reservation_id, interval).await?;
    Ok(recorded)
}

/// Pass 2: expire overdue reservations, release their holds, and clean up
/// when the policy asks for it. Grace periods are re-evaluated fresh for
/// every candidate on every tick.
#[instrument(skip_all, fields(%now))]
async fn process_expirations(pool: &PgPool, policies: &PolicyStore, notifier: &dyn Notifier, now: DateTime<Utc>) -> Result<usize> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;

    let candidates = ReservationTtls::new(&mut conn).expiration_candidates(now).await?;
    let mut expired = 0;

    for candidate in &candidates {
        match expire_one(&mut conn, policies, notifier, candidate, now).await {
            Ok(true) => expired += 1,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(
                    reservation_id = %candidate.reservation_id,
                    error = %e,
                    "Failed to process expired reservation, continuing"
                );
            }
        }
    }

    Ok(expired)
}

async fn expire_one(
    conn: &mut PgConnection,
    policies: &PolicyStore,
    notifier: &dyn Notifier,
    candidate: &TtlCandidate,
    now: DateTime<Utc>,
) -> Result<bool> {
    let policy = policies
        .active_for_business(conn, candidate.business_id, candidate.service_type_id)
        .await?;

    let grace_minutes = policy.as_ref().map(|p| p.grace_period_minutes).unwrap_or(0);
    if grace_minutes > 0 {
        let grace_end = candidate.expires_at + Duration::minutes(i64::from(grace_minutes));
        if now < grace_end {
            ReservationTtls::new(conn).set_grace_deadline(candidate.reservation_id, grace_end).await?;
            return Ok(false);
        }
    }

    if !ReservationTtls::new(conn).mark_expired(candidate.reservation_id).await? {
        // Raced with an extension or a cancellation since the scan
        return Ok(false);
    }

    let released = Inventory::new(conn).expire_and_release_for_reservation(candidate.reservation_id).await?;

    if let Some(policy) = &policy {
        if policy.notify_expired {
            if let Err(e) = notifier.send(Notification::reservation_expired(candidate)).await {
                tracing::warn!(reservation_id = %candidate.reservation_id, error = %e, "Failed to send expiration notice");
            }
        }
        if policy.notify_business {
            if let Err(e) = notifier.send(Notification::business_expiration_notice(candidate)).await {
                tracing::warn!(reservation_id = %candidate.reservation_id, error = %e, "Failed to send business expiration notice");
            }
        }

        if policy.auto_cleanup {
            match Reservations::new(conn).cancel(candidate.reservation_id, "system", Some("reservation expired")).await {
                Ok(_) | Err(DbError::ProtectedEntity { .. }) => {}
                Err(e) => return Err(e.into()),
            }
            ReservationTtls::new(conn).mark_cleaned(candidate.reservation_id).await?;
        }
    }

    tracing::info!(
        reservation_id = %candidate.reservation_id,
        released = released.len(),
        "Reservation expired"
    );

    Ok(true)
}

/// Pass 3: permanently delete `cleaned` TTL records past the retention
/// window.
#[instrument(skip_all, fields(%now))]
async fn sweep_retention(pool: &PgPool, config: &ProcessorConfig, now: DateTime<Utc>) -> Result<u64> {
    let mut conn = pool.acquire().await.map_err(DbError::from)?;

    let cutoff = now - Duration::days(config.retention_days);
    let swept = ReservationTtls::new(&mut conn).sweep_cleaned(cutoff).await?;
    if swept > 0 {
        tracing::info!(swept, "Pruned cleaned TTL records past retention");
    }

    Ok(swept)
}
