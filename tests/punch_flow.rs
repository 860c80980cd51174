//! End-to-end punch attempts against a scripted page session: the happy
//! path, the permission-refused path and the locate-failure path with its
//! diagnostic artifacts.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use punchbot::browser::{Evaluate, PageSession, SessionLauncher};
use punchbot::config::{Config, Credentials, GeoPoint, TAIPEI};
use punchbot::driver::PunchKind;
use punchbot::errors::AutomationError;
use punchbot::executor::{PunchExecutor, PunchOutcome};

const HOME_URL: &str = "https://portal.example.test/home";

fn test_config(data_dir: &std::path::Path) -> Config {
    Config {
        credentials: Credentials {
            company_code: "ACME".into(),
            employee_id: "A1234".into(),
            password: "hunter2".into(),
        },
        login_url: "https://portal.example.test/login".into(),
        home_url: HOME_URL.into(),
        browser_path: PathBuf::from("/usr/bin/true"),
        headless: true,
        data_dir: data_dir.to_path_buf(),
        calendar_bases: vec![],
        clock_in_cron: "0 0 9 * * *".into(),
        clock_out_cron: "0 5 18 * * *".into(),
        timezone: chrono_tz::Asia::Taipei,
        jitter_min: Duration::ZERO,
        jitter_max: Duration::ZERO,
        geolocation: TAIPEI,
    }
}

/// A page whose script evaluation is keyed on recognizable fragments of
/// the scripts the crate generates.
struct ScriptedPage {
    /// When false, every element probe reports "no match".
    elements_exist: bool,
    /// When set, `grant_geolocation` is refused.
    refuse_grant: bool,
    closed: Arc<AtomicBool>,
    navigations: Mutex<Vec<String>>,
}

impl ScriptedPage {
    fn new(elements_exist: bool, refuse_grant: bool, closed: Arc<AtomicBool>) -> Self {
        Self {
            elements_exist,
            refuse_grant,
            closed,
            navigations: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Evaluate for ScriptedPage {
    async fn evaluate(&self, expression: &str) -> Result<Value, AutomationError> {
        if expression.contains("__pbHits.push") {
            // Element probe.
            return Ok(json!(if self.elements_exist { 0 } else { -1 }));
        }
        if expression.contains("el.click()") || expression.contains("dispatchEvent") {
            return Ok(json!(true));
        }
        if expression == "location.href" {
            return Ok(json!(HOME_URL));
        }
        if expression.contains("getCurrentPosition") {
            return Ok(json!({ "ok": true, "lat": 25.0330, "lon": 121.5654 }));
        }
        if expression.contains("tagName") {
            // Candidate dump.
            return Ok(json!([{
                "tag": "BUTTON",
                "text": "某個按鈕",
                "class": "por-button",
                "id": "",
                "has_click_handler": true,
            }]));
        }
        if expression.contains(".el-message") {
            // Notification scan.
            return Ok(json!(["打卡成功"]));
        }
        Ok(Value::Null)
    }
}

#[async_trait]
impl PageSession for ScriptedPage {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        self.navigations.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn wait_for_navigation(&self, _deadline: Duration) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        Ok(b"\x89PNG fake".to_vec())
    }

    async fn set_geolocation(&self, _point: GeoPoint) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn grant_geolocation(&self, origin: &str) -> Result<(), AutomationError> {
        if self.refuse_grant {
            Err(AutomationError::Permission(format!(
                "grant refused for {origin}"
            )))
        } else {
            Ok(())
        }
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct ScriptedLauncher {
    elements_exist: bool,
    refuse_grant: bool,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl SessionLauncher for ScriptedLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageSession>, AutomationError> {
        Ok(Arc::new(ScriptedPage::new(
            self.elements_exist,
            self.refuse_grant,
            self.closed.clone(),
        )))
    }
}

#[tokio::test(start_paused = true)]
async fn full_attempt_confirms_and_closes_the_session() {
    let dir = tempfile::tempdir().unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let launcher = Arc::new(ScriptedLauncher {
        elements_exist: true,
        refuse_grant: false,
        closed: closed.clone(),
    });
    let executor = PunchExecutor::new(launcher, test_config(dir.path()));

    let before = chrono::Utc::now();
    let report = executor.attempt(PunchKind::ClockIn).await;

    assert_eq!(
        report.outcome,
        PunchOutcome::Confirmed("打卡成功".to_string())
    );
    assert_eq!(report.kind, PunchKind::ClockIn);
    assert!(report.started_at >= before && report.started_at <= chrono::Utc::now());
    assert!(report.duration < Duration::from_secs(60));
    assert!(closed.load(Ordering::SeqCst), "session must be released");
}

#[tokio::test(start_paused = true)]
async fn refused_geolocation_grant_does_not_abort_the_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let launcher = Arc::new(ScriptedLauncher {
        elements_exist: true,
        refuse_grant: true,
        closed: closed.clone(),
    });
    let executor = PunchExecutor::new(launcher, test_config(dir.path()));

    let report = executor.attempt(PunchKind::ClockOut).await;

    assert_eq!(
        report.outcome,
        PunchOutcome::Confirmed("打卡成功".to_string())
    );
    assert!(closed.load(Ordering::SeqCst));
}

#[tokio::test(start_paused = true)]
async fn login_locate_failure_fails_closed_with_diagnostics() {
    let dir = tempfile::tempdir().unwrap();
    let closed = Arc::new(AtomicBool::new(false));
    let launcher = Arc::new(ScriptedLauncher {
        elements_exist: false,
        refuse_grant: false,
        closed: closed.clone(),
    });
    let executor = PunchExecutor::new(launcher, test_config(dir.path()));

    let report = executor.attempt(PunchKind::ClockIn).await;

    match report.outcome {
        PunchOutcome::Failed(reason) => assert!(reason.contains("login failed"), "{reason}"),
        other => panic!("expected a failure, got {other:?}"),
    }
    assert!(closed.load(Ordering::SeqCst), "session must be released");

    // One screenshot and one element dump for the failed locate.
    let diagnostics = dir.path().join("diagnostics");
    let entries: Vec<_> = std::fs::read_dir(&diagnostics)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert!(entries.iter().any(|name| name.ends_with(".png")));
    assert!(entries.iter().any(|name| name.ends_with("-elements.json")));
    let dump = entries
        .iter()
        .find(|name| name.ends_with("-elements.json"))
        .unwrap();
    let body = std::fs::read_to_string(diagnostics.join(dump)).unwrap();
    assert!(body.contains("某個按鈕"));
}
