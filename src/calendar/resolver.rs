use std::collections::HashMap;
use std::time::{Duration, Instant};

use chrono::{Datelike, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use crate::calendar::model::CalendarDay;
use crate::calendar::model::YearCalendar;
use crate::calendar::source::CalendarSource;
use crate::calendar::store::CalendarStore;

/// How long a memoized per-date answer stays valid. A configuration
/// constant, not a protocol requirement.
const QUERY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

struct ResolverState {
    years: HashMap<i32, YearCalendar>,
    recent: HashMap<NaiveDate, (Instant, bool)>,
}

/// Decides whether a date is a business day.
///
/// Resolution order: weekend arithmetic, in-memory year cache, persisted
/// file, then each configured source in priority order. When no calendar
/// data can be obtained the answer defaults to "is a workday" so the punch
/// is attempted rather than silently skipped.
pub struct WorkdayResolver {
    store: CalendarStore,
    sources: Vec<Box<dyn CalendarSource>>,
    timezone: Tz,
    state: Mutex<ResolverState>,
}

impl WorkdayResolver {
    pub fn new(store: CalendarStore, sources: Vec<Box<dyn CalendarSource>>, timezone: Tz) -> Self {
        Self {
            store,
            sources,
            timezone,
            state: Mutex::new(ResolverState {
                years: HashMap::new(),
                recent: HashMap::new(),
            }),
        }
    }

    /// Today's date in the resolver's timezone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.timezone).date_naive()
    }

    pub async fn is_today_workday(&self) -> bool {
        self.is_workday(self.today()).await
    }

    /// Never fails: always returns a definite answer.
    #[instrument(level = "debug", skip(self))]
    pub async fn is_workday(&self, date: NaiveDate) -> bool {
        let weekday = date.weekday();
        if matches!(weekday, Weekday::Sat | Weekday::Sun) {
            debug!(%date, ?weekday, "weekend, not a workday");
            return false;
        }

        let mut state = self.state.lock().await;
        if let Some((resolved_at, answer)) = state.recent.get(&date) {
            if resolved_at.elapsed() < QUERY_TTL {
                return *answer;
            }
        }

        self.ensure_year(&mut state, date.year()).await;

        let answer = match state.years.get(&date.year()).and_then(|c| c.get(date)) {
            Some(day) if day.is_holiday => {
                info!(%date, description = %day.description, "listed holiday, not a workday");
                false
            }
            Some(_) => {
                debug!(%date, "listed workday");
                true
            }
            None => {
                warn!(%date, "no calendar data for date, defaulting to workday");
                true
            }
        };
        state.recent.insert(date, (Instant::now(), answer));
        answer
    }

    /// The calendar entry for a date, if one is obtainable.
    pub async fn date_info(&self, date: NaiveDate) -> Option<CalendarDay> {
        let mut state = self.state.lock().await;
        self.ensure_year(&mut state, date.year()).await;
        state
            .years
            .get(&date.year())
            .and_then(|c| c.get(date))
            .cloned()
    }

    pub async fn loaded_years(&self) -> Vec<i32> {
        let state = self.state.lock().await;
        let mut years: Vec<i32> = state.years.keys().copied().collect();
        years.sort_unstable();
        years
    }

    pub async fn preload_years(&self, years: &[i32]) {
        let mut state = self.state.lock().await;
        for &year in years {
            self.ensure_year(&mut state, year).await;
        }
    }

    /// Drop both the in-memory cache and the persisted year files.
    pub async fn clear_cache(&self) {
        let mut state = self.state.lock().await;
        state.years.clear();
        state.recent.clear();
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "failed to clear persisted calendar data");
        }
    }

    /// Make the year calendar resident in memory if any tier can provide
    /// it. Absence after this call means every tier failed; callers fall
    /// back to the conservative default.
    async fn ensure_year(&self, state: &mut ResolverState, year: i32) {
        if state.years.contains_key(&year) {
            return;
        }

        match self.store.load(year) {
            Ok(Some(calendar)) => {
                info!(year, days = calendar.len(), "year calendar loaded from local file");
                state.years.insert(year, calendar);
                return;
            }
            Ok(None) => debug!(year, "no persisted calendar file"),
            Err(e) => warn!(year, error = %e, "failed to read persisted calendar file"),
        }

        for source in &self.sources {
            info!(year, source = source.name(), "fetching year calendar");
            match source.fetch_year(year).await {
                Ok(calendar) => {
                    if let Err(e) = self.store.save(&calendar) {
                        warn!(year, error = %e, "failed to persist fetched calendar");
                    }
                    info!(year, source = source.name(), days = calendar.len(), "year calendar fetched");
                    state.years.insert(year, calendar);
                    return;
                }
                Err(e) => {
                    warn!(year, source = source.name(), error = %e, "calendar source failed");
                }
            }
        }

        warn!(year, "no calendar data obtainable, conservative workday default applies");
    }
}
