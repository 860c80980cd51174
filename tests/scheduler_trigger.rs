//! Trigger firings gate on the workday check before any attempt starts.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use punchbot::calendar::{
    CalendarDay, CalendarSource, CalendarStore, WorkdayResolver, YearCalendar,
};
use punchbot::driver::PunchKind;
use punchbot::errors::CalendarError;
use punchbot::executor::{Punch, PunchOutcome, PunchReport};
use punchbot::scheduler::fire_trigger;

struct CountingPunch {
    calls: AtomicUsize,
}

#[async_trait]
impl Punch for CountingPunch {
    async fn punch(&self, kind: PunchKind) -> PunchReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        PunchReport {
            kind,
            outcome: PunchOutcome::Confirmed("打卡成功".to_string()),
            started_at: chrono::Utc::now(),
            duration: std::time::Duration::from_secs(12),
        }
    }
}

struct FixedSource {
    days: Vec<CalendarDay>,
}

#[async_trait]
impl CalendarSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch_year(&self, year: i32) -> Result<YearCalendar, CalendarError> {
        let mut calendar = YearCalendar::new(year);
        for day in &self.days {
            calendar.insert(day.clone());
        }
        Ok(calendar)
    }
}

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn resolver(dir: &std::path::Path, days: Vec<CalendarDay>) -> WorkdayResolver {
    WorkdayResolver::new(
        CalendarStore::new(dir).unwrap(),
        vec![Box::new(FixedSource { days })],
        chrono_tz::Asia::Taipei,
    )
}

#[tokio::test]
async fn weekend_trigger_never_starts_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), vec![]);
    let punch = CountingPunch {
        calls: AtomicUsize::new(0),
    };

    // 2024-06-08 is a Saturday.
    let outcome = fire_trigger(&resolver, &punch, PunchKind::ClockIn, date(2024, 6, 8)).await;

    assert!(outcome.is_none());
    assert_eq!(punch.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn listed_holiday_trigger_never_starts_an_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(
        dir.path(),
        vec![CalendarDay {
            date: date(2024, 6, 10),
            week: "一".into(),
            is_holiday: true,
            description: "端午節".into(),
        }],
    );
    let punch = CountingPunch {
        calls: AtomicUsize::new(0),
    };

    let outcome = fire_trigger(&resolver, &punch, PunchKind::ClockOut, date(2024, 6, 10)).await;

    assert!(outcome.is_none());
    assert_eq!(punch.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn workday_trigger_runs_the_attempt_and_reports_its_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver(dir.path(), vec![]);
    let punch = CountingPunch {
        calls: AtomicUsize::new(0),
    };

    // 2024-06-11 is a Tuesday with no holiday listing.
    let report = fire_trigger(&resolver, &punch, PunchKind::ClockIn, date(2024, 6, 11))
        .await
        .unwrap();

    assert_eq!(
        report.outcome,
        PunchOutcome::Confirmed("打卡成功".to_string())
    );
    assert_eq!(report.kind, PunchKind::ClockIn);
    assert_eq!(punch.calls.load(Ordering::SeqCst), 1);
}
