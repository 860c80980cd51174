//! The page-operation seam between the driver and a live browser.
//!
//! `RemoteUiDriver` only ever talks to `dyn PageSession`, so tests can
//! substitute a scripted page and the executor can receive the launch
//! capability from the host instead of probing the filesystem itself.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use crate::config::GeoPoint;
use crate::errors::AutomationError;

/// Bound on a full page navigation, load event included.
pub const NAVIGATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Runs a script in the page and returns its JSON value. Promises are
/// awaited before the value is returned.
#[async_trait]
pub trait Evaluate: Send + Sync {
    async fn evaluate(&self, expression: &str) -> Result<Value, AutomationError>;
}

/// One live browser page session.
#[async_trait]
pub trait PageSession: Evaluate {
    /// Navigate and wait for the load event, bounded by
    /// [`NAVIGATION_TIMEOUT`].
    async fn navigate(&self, url: &str) -> Result<(), AutomationError>;

    /// Wait for the next load event, e.g. after activating a submit
    /// control that triggers a navigation.
    async fn wait_for_navigation(&self, deadline: Duration) -> Result<(), AutomationError>;

    /// Full-page PNG capture.
    async fn screenshot(&self) -> Result<Vec<u8>, AutomationError>;

    /// Override the coordinates the page observes.
    async fn set_geolocation(&self, point: GeoPoint) -> Result<(), AutomationError>;

    /// Pre-authorize geolocation for an origin so the prompt never blocks
    /// the flow.
    async fn grant_geolocation(&self, origin: &str) -> Result<(), AutomationError>;

    /// Release the session. Safe to call on every exit path.
    async fn close(&self) -> Result<(), AutomationError>;
}

/// Launches one browser session from a host-resolved executable. The core
/// never searches the filesystem for a browser itself.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self) -> Result<Arc<dyn PageSession>, AutomationError>;
}

/// Ask the page for its current position once. `Ok(Some)` means a
/// coordinate came back; `Ok(None)` means the lookup was denied or failed.
/// Diagnostic only, never gates the punch action.
pub async fn probe_geolocation<E: Evaluate + ?Sized>(
    page: &E,
) -> Result<Option<GeoPoint>, AutomationError> {
    const PROBE: &str = r#"new Promise((resolve) => {
  navigator.geolocation.getCurrentPosition(
    (pos) => resolve({ ok: true, lat: pos.coords.latitude, lon: pos.coords.longitude }),
    (err) => resolve({ ok: false, error: err.message }),
    { timeout: 5000 }
  );
})"#;

    let value = page.evaluate(PROBE).await?;
    if value.get("ok").and_then(Value::as_bool).unwrap_or(false) {
        let latitude = value.get("lat").and_then(Value::as_f64).unwrap_or_default();
        let longitude = value.get("lon").and_then(Value::as_f64).unwrap_or_default();
        Ok(Some(GeoPoint {
            latitude,
            longitude,
        }))
    } else {
        if let Some(error) = value.get("error").and_then(Value::as_str) {
            warn!(error, "geolocation lookup failed in page");
        }
        Ok(None)
    }
}
