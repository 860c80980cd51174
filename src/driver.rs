//! The per-session automation state machine: launch, permission setup,
//! login, geolocation, punch action, teardown.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::browser::locator::{self, ElementHandle, Strategy};
use crate::browser::page::{self, PageSession, SessionLauncher};
use crate::config::{Config, Credentials, GeoPoint};
use crate::diagnostics::DiagnosticsSink;
use crate::errors::AutomationError;

/// Bound on the post-login navigation.
pub const LOGIN_NAV_TIMEOUT: Duration = Duration::from_secs(15);
/// Settle period after clicking the punch control, before scanning for a
/// confirmation phrase.
const ACTION_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PunchKind {
    ClockIn,
    ClockOut,
}

impl PunchKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PunchKind::ClockIn => "clock-in",
            PunchKind::ClockOut => "clock-out",
        }
    }
}

impl fmt::Display for PunchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one punch action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The portal displayed a success phrase after the click.
    Confirmed(String),
    /// The click landed but no confirmation phrase was found.
    Unconfirmed,
}

/// Drives one browser session through the login flow and a punch action.
/// Sessions are exclusively owned and never reused across attempts.
pub struct RemoteUiDriver {
    launcher: Arc<dyn SessionLauncher>,
    diagnostics: DiagnosticsSink,
    login_url: String,
    home_url: String,
    geolocation: GeoPoint,
    session: Option<Arc<dyn PageSession>>,
}

impl RemoteUiDriver {
    pub fn new(
        launcher: Arc<dyn SessionLauncher>,
        diagnostics: DiagnosticsSink,
        config: &Config,
    ) -> Self {
        Self {
            launcher,
            diagnostics,
            login_url: config.login_url.clone(),
            home_url: config.home_url.clone(),
            geolocation: config.geolocation,
            session: None,
        }
    }

    fn session(&self) -> Result<&Arc<dyn PageSession>, AutomationError> {
        self.session
            .as_ref()
            .ok_or_else(|| AutomationError::Transport("no active browser session".into()))
    }

    #[instrument(skip(self))]
    pub async fn launch(&mut self) -> Result<(), AutomationError> {
        let session = self.launcher.launch().await?;
        self.session = Some(session);
        Ok(())
    }

    /// Pre-authorize geolocation for the portal origin so the prompt never
    /// blocks the flow.
    pub async fn grant_location_permission(&self) -> Result<(), AutomationError> {
        let origin = origin_of(&self.home_url);
        self.session()?.grant_geolocation(&origin).await?;
        info!(%origin, "geolocation pre-authorized");
        Ok(())
    }

    #[instrument(skip(self, credentials))]
    pub async fn login(&self, credentials: &Credentials) -> Result<(), AutomationError> {
        let session = self.session()?.clone();
        let page = session.as_ref();

        session
            .navigate(&self.login_url)
            .await
            .map_err(|e| AutomationError::Login(format!("could not open login page: {e}")))?;

        let company = self
            .locate_or_diagnose(page, "company-code field", &company_code_strategies())
            .await
            .map_err(login_error)?;
        locator::fill(page, company, &credentials.company_code)
            .await
            .map_err(login_error)?;

        let employee = self
            .locate_or_diagnose(page, "employee-id field", &employee_id_strategies())
            .await
            .map_err(login_error)?;
        locator::fill(page, employee, &credentials.employee_id)
            .await
            .map_err(login_error)?;

        let password = self
            .locate_or_diagnose(page, "password field", &password_strategies())
            .await
            .map_err(login_error)?;
        locator::fill(page, password, &credentials.password)
            .await
            .map_err(login_error)?;

        let submit = self
            .locate_or_diagnose(page, "login submit control", &submit_strategies())
            .await
            .map_err(login_error)?;
        locator::click(page, submit).await.map_err(login_error)?;

        match session.wait_for_navigation(LOGIN_NAV_TIMEOUT).await {
            Ok(()) => {}
            Err(AutomationError::Timeout(_)) => {
                // The load event can fire before the watch is in place;
                // a changed location still proves the navigation happened.
                let here = self.current_url(page).await;
                if here.is_empty() || here == self.login_url {
                    return Err(AutomationError::Login(
                        "no navigation after submitting credentials".into(),
                    ));
                }
                debug!(%here, "load event missed but location changed");
            }
            Err(e) => {
                return Err(AutomationError::Login(format!(
                    "waiting for post-login navigation: {e}"
                )))
            }
        }

        info!("logged in");
        Ok(())
    }

    pub async fn goto_home(&self) -> Result<(), AutomationError> {
        self.session()?.navigate(&self.home_url).await
    }

    /// Best-effort coordinate override; the executor logs failures and
    /// proceeds.
    pub async fn set_geolocation(&self) -> Result<(), AutomationError> {
        self.session()?.set_geolocation(self.geolocation).await?;
        info!(
            latitude = self.geolocation.latitude,
            longitude = self.geolocation.longitude,
            "geolocation override set"
        );
        Ok(())
    }

    /// Diagnostic probe: reports whether the page can obtain a coordinate.
    /// Never gates the punch action.
    pub async fn verify_location_permission(&self) -> Result<bool, AutomationError> {
        let session = self.session()?;
        match page::probe_geolocation(session.as_ref()).await? {
            Some(point) => {
                info!(
                    latitude = point.latitude,
                    longitude = point.longitude,
                    "geolocation probe returned a coordinate"
                );
                Ok(true)
            }
            None => {
                warn!("geolocation probe returned no coordinate");
                Ok(false)
            }
        }
    }

    #[instrument(skip(self))]
    pub async fn perform_action(&self, kind: PunchKind) -> Result<ActionOutcome, AutomationError> {
        let session = self.session()?.clone();
        let page = session.as_ref();

        let here = self.current_url(page).await;
        if here != self.home_url {
            session.navigate(&self.home_url).await?;
        }

        let label = format!("{kind} control");
        let control = match locator::locate(page, &label, &action_strategies(kind)).await {
            Ok(control) => control,
            Err(e) => {
                self.capture_diagnostics(page, &label).await;
                return Err(AutomationError::ActionNotFound(e.to_string()));
            }
        };
        locator::click(page, control)
            .await
            .map_err(|e| AutomationError::ActionNotFound(e.to_string()))?;
        info!(%kind, "action control clicked");

        tokio::time::sleep(ACTION_SETTLE).await;
        Ok(self.scan_confirmation(page, kind).await)
    }

    /// Scan known notification regions for a success/failure phrase after
    /// the click. Verification is best-effort: an unreadable page still
    /// counts as an unconfirmed completion.
    async fn scan_confirmation(&self, page: &dyn PageSession, kind: PunchKind) -> ActionOutcome {
        const SCAN: &str = "(() => Array.from(document.querySelectorAll(\
            '.alert, .message, .notification, .success, .el-message, .toast'))\
            .map((el) => (el.textContent || '').trim())\
            .filter((text) => text.length > 0))()";

        let messages: Vec<String> = match page.evaluate(SCAN).await {
            Ok(value) => serde_json::from_value(value).unwrap_or_default(),
            Err(e) => {
                warn!(%kind, error = %e, "could not scan notification regions");
                return ActionOutcome::Unconfirmed;
            }
        };

        for message in &messages {
            if message.contains("成功") || message.contains("完成") {
                info!(%kind, %message, "punch confirmed by portal");
                return ActionOutcome::Confirmed(message.clone());
            }
        }
        if let Some(failure) = messages
            .iter()
            .find(|m| m.contains("失敗") || m.contains("錯誤"))
        {
            warn!(%kind, message = %failure, "portal reported a failure phrase");
        } else {
            info!(%kind, "no confirmation phrase found");
        }
        ActionOutcome::Unconfirmed
    }

    /// Release the browser session. Invoked on every exit path.
    pub async fn close(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "error closing browser session");
            }
        }
    }

    async fn current_url(&self, page: &dyn PageSession) -> String {
        page.evaluate("location.href")
            .await
            .ok()
            .and_then(|v| v.as_str().map(String::from))
            .unwrap_or_default()
    }

    async fn locate_or_diagnose(
        &self,
        page: &dyn PageSession,
        what: &str,
        strategies: &[Strategy],
    ) -> Result<ElementHandle, AutomationError> {
        match locator::locate(page, what, strategies).await {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.capture_diagnostics(page, what).await;
                Err(e)
            }
        }
    }

    async fn capture_diagnostics(&self, page: &dyn PageSession, label: &str) {
        let screenshot = match page.screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!(error = %e, "screenshot capture failed");
                None
            }
        };
        let candidates = match locator::dump_candidates(page).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "candidate dump failed");
                Vec::new()
            }
        };
        match self
            .diagnostics
            .capture_failure(label, screenshot.as_deref(), &candidates)
        {
            Ok(artifacts) => warn!(
                screenshot = ?artifacts.screenshot,
                elements = %artifacts.elements.display(),
                "wrote locate-failure diagnostics"
            ),
            Err(e) => warn!(error = %e, "failed to write diagnostics"),
        }
    }
}

fn login_error(e: AutomationError) -> AutomationError {
    AutomationError::Login(e.to_string())
}

fn origin_of(url: &str) -> String {
    match url.find("://") {
        Some(scheme_end) => {
            let rest = &url[scheme_end + 3..];
            match rest.find('/') {
                Some(path) => url[..scheme_end + 3 + path].to_string(),
                None => url.to_string(),
            }
        }
        None => url.to_string(),
    }
}

fn company_code_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css("input[placeholder=\"公司代碼\"]"),
        Strategy::css("input[placeholder*=\"公司\"]"),
        Strategy::css("input[type=\"text\"]:first-of-type"),
    ]
}

fn employee_id_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css("input[placeholder=\"員工編號\"]"),
        Strategy::css("input[placeholder*=\"員工\"]"),
        Strategy::css("input[type=\"text\"]:nth-of-type(2)"),
    ]
}

fn password_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css("input[placeholder=\"密碼\"]"),
        Strategy::css("input[type=\"password\"]"),
    ]
}

fn submit_strategies() -> Vec<Strategy> {
    vec![
        Strategy::css(".login-btn"),
        Strategy::css("#login-btn"),
        Strategy::tag_text("button", "登入"),
        Strategy::tag_text("span", "登入"),
        Strategy::keywords(&["登入", "登錄", "login", "sign in"]),
    ]
}

fn action_strategies(kind: PunchKind) -> Vec<Strategy> {
    match kind {
        PunchKind::ClockIn => vec![
            Strategy::tag_text("span", "上班"),
            Strategy::css("[data-action=\"punch-in\"]"),
            Strategy::css(".punch-in-btn"),
            Strategy::css("#punch-in"),
            Strategy::tag_text("button", "上班打卡"),
            Strategy::tag_text("button", "上班"),
            Strategy::tag_text("a", "上班"),
            Strategy::keywords(&["上班", "打卡", "punch"]),
        ],
        PunchKind::ClockOut => vec![
            Strategy::tag_text("span", "下班"),
            Strategy::css("[data-action=\"punch-out\"]"),
            Strategy::css(".punch-out-btn"),
            Strategy::css("#punch-out"),
            Strategy::tag_text("button", "下班打卡"),
            Strategy::tag_text("button", "下班"),
            Strategy::tag_text("a", "下班"),
            Strategy::keywords(&["下班", "打卡", "punch"]),
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_strips_path() {
        assert_eq!(
            origin_of("https://portal.nueip.com/home"),
            "https://portal.nueip.com"
        );
        assert_eq!(
            origin_of("https://portal.nueip.com"),
            "https://portal.nueip.com"
        );
    }

    #[test]
    fn password_strategies_prefer_placeholder_then_type() {
        let strategies = password_strategies();
        assert!(matches!(&strategies[0], Strategy::Css(s) if s.contains("placeholder")));
        assert!(matches!(&strategies[1], Strategy::Css(s) if s.contains("type=\"password\"")));
    }

    #[test]
    fn action_strategies_are_kind_specific() {
        let clock_in = action_strategies(PunchKind::ClockIn);
        let clock_out = action_strategies(PunchKind::ClockOut);
        assert!(clock_in.iter().any(|s| s.to_string().contains("上班")));
        assert!(clock_out.iter().any(|s| s.to_string().contains("下班")));
        assert!(!clock_in.iter().any(|s| s.to_string().contains("下班")));
    }

    #[test]
    fn punch_kind_display() {
        assert_eq!(PunchKind::ClockIn.to_string(), "clock-in");
        assert_eq!(PunchKind::ClockOut.to_string(), "clock-out");
    }
}
