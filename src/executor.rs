//! One punch attempt, end to end.
//!
//! The executor owns the fixed step sequence: jitter, launch, permission
//! grant, login, home navigation, geolocation override, probe, punch,
//! teardown. Every attempt gets a fresh browser session and the session is
//! released on every exit path.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::{error, info, instrument, warn};

use crate::browser::page::SessionLauncher;
use crate::config::Config;
use crate::diagnostics::DiagnosticsSink;
use crate::driver::{ActionOutcome, PunchKind, RemoteUiDriver};
use crate::errors::AutomationError;

/// How one attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PunchOutcome {
    /// The portal confirmed the punch with a success phrase.
    Confirmed(String),
    /// The click landed but no confirmation was observed.
    Unconfirmed,
    /// The attempt aborted before the punch could land.
    Failed(String),
}

impl PunchOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, PunchOutcome::Failed(_))
    }
}

/// One attempt's result plus its timing, for the trigger log.
#[derive(Debug, Clone)]
pub struct PunchReport {
    pub kind: PunchKind,
    pub outcome: PunchOutcome,
    /// When the attempt began, jitter included.
    pub started_at: DateTime<Utc>,
    pub duration: Duration,
}

/// Seam for the scheduler: triggers call this, tests substitute a stub.
#[async_trait]
pub trait Punch: Send + Sync {
    async fn punch(&self, kind: PunchKind) -> PunchReport;
}

/// Runs punch attempts against the remote portal.
pub struct PunchExecutor {
    launcher: Arc<dyn SessionLauncher>,
    config: Config,
    jitter: (Duration, Duration),
}

impl PunchExecutor {
    pub fn new(launcher: Arc<dyn SessionLauncher>, config: Config) -> Self {
        let jitter = (config.jitter_min, config.jitter_max);
        Self {
            launcher,
            config,
            jitter,
        }
    }

    /// Disable the pre-attempt jitter, for manual one-shot runs.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = (Duration::ZERO, Duration::ZERO);
        self
    }

    #[instrument(skip(self), fields(kind = %kind))]
    pub async fn attempt(&self, kind: PunchKind) -> PunchReport {
        let started_at = Utc::now();
        let clock = std::time::Instant::now();

        let delay = jitter_delay(self.jitter.0, self.jitter.1);
        if !delay.is_zero() {
            info!(seconds = delay.as_secs(), "jitter delay before attempt");
            tokio::time::sleep(delay).await;
        }

        let diagnostics = DiagnosticsSink::new(&self.config.data_dir);
        let mut driver = RemoteUiDriver::new(self.launcher.clone(), diagnostics, &self.config);

        let outcome = match self.run_steps(&mut driver, kind).await {
            Ok(outcome) => match outcome {
                ActionOutcome::Confirmed(message) => {
                    info!(%kind, %message, "punch confirmed");
                    PunchOutcome::Confirmed(message)
                }
                ActionOutcome::Unconfirmed => {
                    warn!(%kind, "punch landed without confirmation");
                    PunchOutcome::Unconfirmed
                }
            },
            Err(e) => {
                error!(%kind, error = %e, "punch attempt failed");
                PunchOutcome::Failed(e.to_string())
            }
        };

        driver.close().await;
        PunchReport {
            kind,
            outcome,
            started_at,
            duration: clock.elapsed(),
        }
    }

    async fn run_steps(
        &self,
        driver: &mut RemoteUiDriver,
        kind: PunchKind,
    ) -> Result<ActionOutcome, AutomationError> {
        driver.launch().await?;

        // A refused grant is survivable when the portal does not actually
        // demand a position; anything else at this step means the browser
        // itself is broken.
        match driver.grant_location_permission().await {
            Ok(()) => {}
            Err(AutomationError::Permission(e)) => {
                warn!(error = %e, "geolocation grant refused, continuing");
            }
            Err(e) => return Err(e),
        }

        driver.login(&self.config.credentials).await?;
        driver.goto_home().await?;

        if let Err(e) = driver.set_geolocation().await {
            warn!(error = %e, "geolocation override failed, continuing");
        }
        if let Err(e) = driver.verify_location_permission().await {
            warn!(error = %e, "geolocation probe failed, continuing");
        }

        driver.perform_action(kind).await
    }
}

#[async_trait]
impl Punch for PunchExecutor {
    async fn punch(&self, kind: PunchKind) -> PunchReport {
        self.attempt(kind).await
    }
}

/// Uniform random delay in `[min, max]`. Spreads attempts away from the
/// exact trigger second so the portal does not see a metronome.
pub fn jitter_delay(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let span = (max - min).as_millis() as u64;
    let offset = rand::thread_rng().gen_range(0..=span);
    min + Duration::from_millis(offset)
}
