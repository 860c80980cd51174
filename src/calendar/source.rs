use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::calendar::model::YearCalendar;
use crate::errors::CalendarError;

/// Bound on one calendar fetch. Exceeding it is a `SourceUnavailable`.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const USER_AGENT: &str = concat!("punchbot/", env!("CARGO_PKG_VERSION"));

/// One origin of year-keyed holiday data. Sources are consulted in priority
/// order and never merged; the first success wins.
#[async_trait]
pub trait CalendarSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_year(&self, year: i32) -> Result<YearCalendar, CalendarError>;
}

/// HTTP-backed source: `GET {base_url}/{year}.json`, expecting a JSON array
/// of `{date, week, isHoliday, description}` entries.
pub struct RemoteCalendarSource {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl RemoteCalendarSource {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            client: reqwest::Client::new(),
        }
    }

    fn year_url(&self, year: i32) -> String {
        format!("{}/{year}.json", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CalendarSource for RemoteCalendarSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_year(&self, year: i32) -> Result<YearCalendar, CalendarError> {
        let url = self.year_url(year);
        debug!(source = %self.name, %url, "fetching year calendar");

        let response = self
            .client
            .get(&url)
            .timeout(FETCH_TIMEOUT)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CalendarError::SourceUnavailable(format!("{url}: request timed out"))
                } else {
                    CalendarError::SourceUnavailable(format!("{url}: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(CalendarError::SourceUnavailable(format!(
                "{url}: HTTP {status}"
            )));
        }

        let entries: Vec<serde_json::Value> = response
            .json()
            .await
            .map_err(|e| CalendarError::SourceFormat(format!("{url}: {e}")))?;

        Ok(YearCalendar::from_entries(year, entries))
    }
}
