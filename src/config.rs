//! Application configuration.
//!
//! Everything the components in this crate need is collected into one
//! [`Config`] value built once at startup. No component reads the ambient
//! environment after construction; credentials, URLs and feature toggles are
//! passed into constructors explicitly.

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono_tz::Tz;

const DEFAULT_LOGIN_URL: &str = "https://portal.nueip.com/login";
const DEFAULT_HOME_URL: &str = "https://portal.nueip.com/home";
const DEFAULT_TIMEZONE: &str = "Asia/Taipei";

/// 09:00 local time, every day. Six-field cron (seconds first).
const DEFAULT_CLOCK_IN_CRON: &str = "0 0 9 * * *";
/// 18:05 local time, every day.
const DEFAULT_CLOCK_OUT_CRON: &str = "0 5 18 * * *";

/// Default calendar mirrors, consulted in order. Both serve the same
/// year-keyed JSON arrays; the second is only tried when the first fails.
const DEFAULT_CALENDAR_BASES: [&str; 2] = [
    "https://cdn.jsdelivr.net/gh/ruyut/TaiwanCalendar/data",
    "https://fastly.jsdelivr.net/gh/ruyut/TaiwanCalendar/data",
];

/// Portal login credentials.
#[derive(Clone)]
pub struct Credentials {
    pub company_code: String,
    pub employee_id: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("company_code", &self.company_code)
            .field("employee_id", &self.employee_id)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// A fixed geographic reference point reported to the portal.
#[derive(Debug, Clone, Copy)]
pub struct GeoPoint {
    pub latitude: f64,
    pub longitude: f64,
}

/// Taipei city center, the reference point the portal expects a punch from.
pub const TAIPEI: GeoPoint = GeoPoint {
    latitude: 25.0330,
    longitude: 121.5654,
};

#[derive(Debug, Clone)]
pub struct Config {
    pub credentials: Credentials,
    pub login_url: String,
    pub home_url: String,
    /// Resolved browser executable. The host resolves this path; the core
    /// only consumes it.
    pub browser_path: PathBuf,
    pub headless: bool,
    /// Directory holding persisted year calendars and diagnostic artifacts.
    pub data_dir: PathBuf,
    /// Calendar source base URLs, in priority order.
    pub calendar_bases: Vec<String>,
    pub clock_in_cron: String,
    pub clock_out_cron: String,
    pub timezone: Tz,
    /// Bounds of the randomized pre-attempt delay.
    pub jitter_min: Duration,
    pub jitter_max: Duration,
    pub geolocation: GeoPoint,
}

impl Config {
    /// Build the configuration from the process environment. Called exactly
    /// once, before any component is constructed.
    pub fn from_env() -> Result<Self> {
        let credentials = Credentials {
            company_code: require("COMPANY_CODE")?,
            employee_id: require("EMPLOYEE_ID")?,
            password: require("PASSWORD")?,
        };

        let browser_path = PathBuf::from(require("CHROME_PATH")?);
        if !browser_path.is_file() {
            bail!(
                "CHROME_PATH does not point to an executable: {}",
                browser_path.display()
            );
        }

        let headless = !flag("SHOW_BROWSER");

        let data_dir = match env::var("PUNCHBOT_DATA_DIR") {
            Ok(dir) => PathBuf::from(dir),
            Err(_) => dirs::data_dir()
                .context("no data directory available; set PUNCHBOT_DATA_DIR")?
                .join("punchbot"),
        };

        let timezone: Tz = env::var("PUNCHBOT_TZ")
            .unwrap_or_else(|_| DEFAULT_TIMEZONE.to_string())
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid PUNCHBOT_TZ: {e}"))?;

        Ok(Self {
            credentials,
            login_url: env::var("LOGIN_URL").unwrap_or_else(|_| DEFAULT_LOGIN_URL.to_string()),
            home_url: env::var("HOME_URL").unwrap_or_else(|_| DEFAULT_HOME_URL.to_string()),
            browser_path,
            headless,
            data_dir,
            calendar_bases: calendar_bases_from_env(),
            clock_in_cron: DEFAULT_CLOCK_IN_CRON.to_string(),
            clock_out_cron: DEFAULT_CLOCK_OUT_CRON.to_string(),
            timezone,
            jitter_min: Duration::ZERO,
            jitter_max: Duration::from_secs(60),
            geolocation: TAIPEI,
        })
    }
}

fn require(key: &str) -> Result<String> {
    let value = env::var(key).with_context(|| format!("missing required environment variable {key}"))?;
    if value.trim().is_empty() {
        bail!("environment variable {key} is set but empty");
    }
    Ok(value)
}

fn flag(key: &str) -> bool {
    matches!(
        env::var(key).unwrap_or_default().to_lowercase().as_str(),
        "1" | "true" | "yes"
    )
}

fn calendar_bases_from_env() -> Vec<String> {
    match env::var("CALENDAR_BASE_URLS") {
        Ok(raw) => raw
            .split(',')
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Err(_) => DEFAULT_CALENDAR_BASES.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            company_code: "ACME".into(),
            employee_id: "A1234".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn default_calendar_bases_are_ordered() {
        let bases = DEFAULT_CALENDAR_BASES;
        assert_eq!(bases.len(), 2);
        assert!(bases[0].starts_with("https://cdn.jsdelivr.net"));
    }
}
