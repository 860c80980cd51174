//! Chrome DevTools Protocol transport.
//!
//! Owns one browser process and one WebSocket connection for the lifetime
//! of a punch attempt. Commands are JSON `{id, method, params, sessionId?}`
//! messages; responses are routed back through a pending map keyed by id,
//! and protocol events fan out on a broadcast channel for bounded waits.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::process::{Child, Command};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, instrument, warn};

use crate::browser::page::{Evaluate, PageSession, SessionLauncher, NAVIGATION_TIMEOUT};
use crate::config::{Config, GeoPoint};
use crate::errors::AutomationError;

const LAUNCH_TIMEOUT: Duration = Duration::from_secs(20);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Flags the target portal tolerates well in containers and CI hosts.
const BROWSER_FLAGS: &[&str] = &[
    "--no-sandbox",
    "--disable-setuid-sandbox",
    "--disable-dev-shm-usage",
    "--disable-accelerated-2d-canvas",
    "--no-first-run",
    "--no-zygote",
    "--disable-gpu",
    "--disable-features=VizDisplayCompositor",
];

type PendingMap = HashMap<u64, oneshot::Sender<Result<Value, String>>>;
type Pending = Arc<Mutex<PendingMap>>;

/// A protocol event, e.g. `Page.loadEventFired`.
#[derive(Debug, Clone)]
pub struct CdpEvent {
    pub method: String,
    pub session_id: Option<String>,
    #[allow(dead_code)]
    pub params: Value,
}

#[derive(Debug, Deserialize)]
struct CdpErrorBody {
    #[allow(dead_code)]
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Incoming {
    Response {
        id: u64,
        result: Option<Value>,
        error: Option<CdpErrorBody>,
    },
    Event {
        method: String,
        #[serde(default)]
        params: Value,
        #[serde(rename = "sessionId")]
        session_id: Option<String>,
    },
}

struct ProcHandle {
    child: Child,
    profile: TempDir,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

/// One Chrome process plus its attached page session.
pub struct BrowserSession {
    sender: mpsc::UnboundedSender<Message>,
    pending: Pending,
    events: broadcast::Sender<CdpEvent>,
    next_id: AtomicU64,
    session_id: String,
    proc: Mutex<Option<ProcHandle>>,
}

impl BrowserSession {
    /// Spawn the browser, discover its DevTools endpoint, attach to a fresh
    /// page target and enable the domains the driver needs.
    #[instrument(skip(executable, headless), fields(executable = %executable.display()))]
    pub async fn launch(executable: &Path, headless: bool) -> Result<Self, AutomationError> {
        let profile = tempfile::Builder::new()
            .prefix("punchbot-profile-")
            .tempdir()
            .map_err(|e| AutomationError::Launch(format!("failed to create profile dir: {e}")))?;

        let mut cmd = Command::new(executable);
        cmd.arg(format!("--user-data-dir={}", profile.path().display()))
            .arg("--remote-debugging-port=0")
            .args(BROWSER_FLAGS);
        if headless {
            cmd.arg("--headless=new");
        }
        cmd.arg("about:blank")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            AutomationError::Launch(format!("failed to start {}: {e}", executable.display()))
        })?;

        let ws_url = wait_for_devtools(profile.path(), &mut child).await?;
        debug!(%ws_url, "devtools endpoint ready");

        let (ws, _) = connect_async(&ws_url)
            .await
            .map_err(|e| AutomationError::Transport(format!("devtools connect failed: {e}")))?;
        let (mut sink, mut stream) = ws.split();

        let (sender, mut outbox) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(msg) = outbox.recv().await {
                if let Err(e) = sink.send(msg).await {
                    debug!(error = %e, "devtools send failed");
                    break;
                }
            }
        });

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (events, _) = broadcast::channel(256);
        let reader = {
            let pending = pending.clone();
            let events = events.clone();
            tokio::spawn(async move {
                while let Some(Ok(msg)) = stream.next().await {
                    if !msg.is_text() {
                        continue;
                    }
                    let text = msg.into_text().unwrap_or_default();
                    match serde_json::from_str::<Incoming>(&text) {
                        Ok(Incoming::Response { id, result, error }) => {
                            if let Some(tx) = pending.lock().await.remove(&id) {
                                let _ = tx.send(match error {
                                    Some(e) => Err(e.message),
                                    None => Ok(result.unwrap_or(Value::Null)),
                                });
                            }
                        }
                        Ok(Incoming::Event {
                            method,
                            params,
                            session_id,
                        }) => {
                            let _ = events.send(CdpEvent {
                                method,
                                session_id,
                                params,
                            });
                        }
                        Err(e) => debug!(error = %e, "unrecognized devtools message"),
                    }
                }
                debug!("devtools stream ended");
            })
        };

        let mut session = Self {
            sender,
            pending,
            events,
            next_id: AtomicU64::new(1),
            session_id: String::new(),
            proc: Mutex::new(Some(ProcHandle {
                child,
                profile,
                reader,
                writer,
            })),
        };

        let target = session
            .command(None, "Target.createTarget", json!({"url": "about:blank"}))
            .await?;
        let target_id = target
            .get("targetId")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::Protocol("createTarget returned no targetId".into()))?
            .to_string();

        let attached = session
            .command(
                None,
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
            )
            .await?;
        session.session_id = attached
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::Protocol("attachToTarget returned no sessionId".into()))?
            .to_string();

        let sid = session.page_session();
        session.command(Some(&sid), "Page.enable", json!({})).await?;
        session.command(Some(&sid), "Runtime.enable", json!({})).await?;

        info!(headless, "browser session launched");
        Ok(session)
    }

    /// Send one command and wait for its reply.
    async fn command(
        &self,
        session: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, AutomationError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut message = json!({"id": id, "method": method, "params": params});
        if let Some(session) = session {
            message["sessionId"] = json!(session);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self.sender.send(Message::Text(message.to_string())).is_err() {
            self.pending.lock().await.remove(&id);
            return Err(AutomationError::Transport(format!(
                "{method}: browser connection closed"
            )));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(AutomationError::Timeout(format!("{method} got no reply")))
            }
            Ok(Err(_)) => Err(AutomationError::Transport(format!(
                "{method}: reply channel dropped"
            ))),
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(message))) => Err(AutomationError::Protocol(format!("{method}: {message}"))),
        }
    }

    fn page_session(&self) -> String {
        self.session_id.clone()
    }

    async fn wait_load(
        &self,
        rx: &mut broadcast::Receiver<CdpEvent>,
        deadline: Duration,
    ) -> Result<(), AutomationError> {
        let wait = async {
            loop {
                match rx.recv().await {
                    Ok(event)
                        if event.method == "Page.loadEventFired"
                            && event.session_id.as_deref() == Some(&self.session_id) =>
                    {
                        return Ok(())
                    }
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(AutomationError::Transport("event stream closed".into()))
                    }
                }
            }
        };
        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| AutomationError::Timeout(format!("no load event within {deadline:?}")))?
    }
}

#[async_trait]
impl Evaluate for BrowserSession {
    async fn evaluate(&self, expression: &str) -> Result<Value, AutomationError> {
        let result = self
            .command(
                Some(&self.page_session()),
                "Runtime.evaluate",
                json!({
                    "expression": expression,
                    "returnByValue": true,
                    "awaitPromise": true,
                }),
            )
            .await?;

        if let Some(details) = result.get("exceptionDetails") {
            let text = details
                .pointer("/exception/description")
                .and_then(Value::as_str)
                .or_else(|| details.get("text").and_then(Value::as_str))
                .unwrap_or("unknown exception");
            return Err(AutomationError::Protocol(format!("script threw: {text}")));
        }
        Ok(result.pointer("/result/value").cloned().unwrap_or(Value::Null))
    }
}

#[async_trait]
impl PageSession for BrowserSession {
    async fn navigate(&self, url: &str) -> Result<(), AutomationError> {
        debug!(%url, "navigating");
        let mut rx = self.events.subscribe();
        let result = self
            .command(Some(&self.page_session()), "Page.navigate", json!({"url": url}))
            .await?;
        if let Some(error) = result.get("errorText").and_then(Value::as_str) {
            if !error.is_empty() {
                return Err(AutomationError::Transport(format!(
                    "navigation to {url} failed: {error}"
                )));
            }
        }
        self.wait_load(&mut rx, NAVIGATION_TIMEOUT).await
    }

    async fn wait_for_navigation(&self, deadline: Duration) -> Result<(), AutomationError> {
        let mut rx = self.events.subscribe();
        self.wait_load(&mut rx, deadline).await
    }

    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError> {
        let result = self
            .command(
                Some(&self.page_session()),
                "Page.captureScreenshot",
                json!({"format": "png", "captureBeyondViewport": true}),
            )
            .await?;
        let data = result
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| AutomationError::Protocol("screenshot returned no data".into()))?;
        BASE64
            .decode(data)
            .map_err(|e| AutomationError::Protocol(format!("screenshot payload: {e}")))
    }

    async fn set_geolocation(&self, point: GeoPoint) -> Result<(), AutomationError> {
        self.command(
            Some(&self.page_session()),
            "Emulation.setGeolocationOverride",
            json!({
                "latitude": point.latitude,
                "longitude": point.longitude,
                "accuracy": 50,
            }),
        )
        .await?;
        Ok(())
    }

    async fn grant_geolocation(&self, origin: &str) -> Result<(), AutomationError> {
        // Browser-scope command; a protocol refusal here is a permission
        // problem, not a dead transport.
        match self
            .command(
                None,
                "Browser.grantPermissions",
                json!({"origin": origin, "permissions": ["geolocation"]}),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(AutomationError::Protocol(message)) => Err(AutomationError::Permission(message)),
            Err(other) => Err(other),
        }
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let Some(mut proc) = self.proc.lock().await.take() else {
            return Ok(());
        };
        let _ = tokio::time::timeout(CLOSE_TIMEOUT, self.command(None, "Browser.close", json!({})))
            .await;
        proc.reader.abort();
        proc.writer.abort();
        if let Err(e) = proc.child.kill().await {
            warn!(error = %e, "failed to kill browser process");
        }
        drop(proc.profile);
        info!("browser session closed");
        Ok(())
    }
}

/// Poll the profile directory for `DevToolsActivePort`, which the browser
/// writes once its debugging endpoint is listening.
async fn wait_for_devtools(profile: &Path, child: &mut Child) -> Result<String, AutomationError> {
    let port_file = profile.join("DevToolsActivePort");
    let deadline = tokio::time::Instant::now() + LAUNCH_TIMEOUT;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(AutomationError::Launch(format!(
                "browser exited during startup: {status}"
            )));
        }
        if let Ok(raw) = std::fs::read_to_string(&port_file) {
            let mut lines = raw.lines();
            if let (Some(port), Some(path)) = (lines.next(), lines.next()) {
                if let Ok(port) = port.trim().parse::<u16>() {
                    return Ok(format!("ws://127.0.0.1:{port}{path}"));
                }
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(AutomationError::Launch(
                "timed out waiting for the devtools endpoint".into(),
            ));
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Launch capability bound to a host-resolved executable path.
pub struct ChromeLauncher {
    executable: PathBuf,
    headless: bool,
}

impl ChromeLauncher {
    pub fn new(config: &Config) -> Self {
        Self {
            executable: config.browser_path.clone(),
            headless: config.headless,
        }
    }
}

#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Arc<dyn PageSession>, AutomationError> {
        let session = BrowserSession::launch(&self.executable, self.headless).await?;
        Ok(Arc::new(session))
    }
}
