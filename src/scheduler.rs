//! Cron-driven trigger layer.
//!
//! Two timezone-aware triggers fire the clock-in and clock-out attempts.
//! Each firing first consults the workday resolver; non-workdays are
//! skipped before any browser is launched. Shutdown waits for an in-flight
//! attempt instead of killing its session mid-punch.

use std::sync::Arc;

use chrono_tz::Tz;
use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracing::{error, info, instrument};

use crate::calendar::WorkdayResolver;
use crate::config::Config;
use crate::driver::PunchKind;
use crate::executor::{Punch, PunchOutcome, PunchReport};

/// Owns the two punch triggers and the in-flight-attempt gate.
pub struct PunchScheduler {
    scheduler: JobScheduler,
    gate: Arc<Mutex<()>>,
}

impl PunchScheduler {
    #[instrument(skip_all)]
    pub async fn start(
        resolver: Arc<WorkdayResolver>,
        executor: Arc<dyn Punch>,
        config: &Config,
    ) -> Result<Self, JobSchedulerError> {
        let scheduler = JobScheduler::new().await?;
        let gate = Arc::new(Mutex::new(()));

        scheduler
            .add(trigger_job(
                &config.clock_in_cron,
                config.timezone,
                PunchKind::ClockIn,
                resolver.clone(),
                executor.clone(),
                gate.clone(),
            )?)
            .await?;
        scheduler
            .add(trigger_job(
                &config.clock_out_cron,
                config.timezone,
                PunchKind::ClockOut,
                resolver,
                executor,
                gate.clone(),
            )?)
            .await?;

        scheduler.start().await?;
        info!(
            clock_in = %config.clock_in_cron,
            clock_out = %config.clock_out_cron,
            timezone = %config.timezone,
            "punch triggers armed"
        );
        Ok(Self { scheduler, gate })
    }

    /// Stop the triggers, then wait for any attempt that is already
    /// running to finish.
    pub async fn shutdown(&mut self) -> Result<(), JobSchedulerError> {
        self.scheduler.shutdown().await?;
        let _in_flight = self.gate.lock().await;
        info!("scheduler stopped");
        Ok(())
    }
}

fn trigger_job(
    cron: &str,
    timezone: Tz,
    kind: PunchKind,
    resolver: Arc<WorkdayResolver>,
    executor: Arc<dyn Punch>,
    gate: Arc<Mutex<()>>,
) -> Result<Job, JobSchedulerError> {
    Job::new_async_tz(cron, timezone, move |_id, _scheduler| {
        let resolver = resolver.clone();
        let executor = executor.clone();
        let gate = gate.clone();
        Box::pin(async move {
            let _attempt = gate.lock().await;
            let today = resolver.today();
            fire_trigger(&resolver, executor.as_ref(), kind, today).await;
        })
    })
}

/// One trigger firing: gate on the workday check, then run the attempt.
/// Returns `None` when the date is not a workday and the attempt was
/// skipped.
pub async fn fire_trigger(
    resolver: &WorkdayResolver,
    executor: &dyn Punch,
    kind: PunchKind,
    today: chrono::NaiveDate,
) -> Option<PunchReport> {
    if !resolver.is_workday(today).await {
        info!(%kind, %today, "not a workday, skipping attempt");
        return None;
    }

    info!(%kind, %today, "workday, starting attempt");
    let report = executor.punch(kind).await;
    let seconds = report.duration.as_secs_f64();
    match &report.outcome {
        PunchOutcome::Confirmed(message) => info!(%kind, %message, seconds, "attempt confirmed"),
        PunchOutcome::Unconfirmed => info!(%kind, seconds, "attempt finished without confirmation"),
        PunchOutcome::Failed(reason) => error!(%kind, %reason, seconds, "attempt failed"),
    }
    Some(report)
}
