use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// One calendar date's business-day status, as published by the calendar
/// sources: `{"date": "20240101", "week": "一", "isHoliday": true,
/// "description": "開國紀念日"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarDay {
    #[serde(with = "compact_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub week: String,
    #[serde(rename = "isHoliday")]
    pub is_holiday: bool,
    #[serde(default)]
    pub description: String,
}

/// The authoritative set of per-date holiday flags for one calendar year,
/// ordered by date. Replaced wholesale when the year is re-fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearCalendar {
    year: i32,
    days: BTreeMap<NaiveDate, CalendarDay>,
}

impl YearCalendar {
    pub fn new(year: i32) -> Self {
        Self {
            year,
            days: BTreeMap::new(),
        }
    }

    /// Build a calendar from a raw JSON array. Entries that do not carry a
    /// parseable date and a boolean holiday flag are dropped, not fatal.
    pub fn from_entries(year: i32, entries: Vec<serde_json::Value>) -> Self {
        let total = entries.len();
        let mut calendar = Self::new(year);
        for entry in entries {
            match serde_json::from_value::<CalendarDay>(entry) {
                Ok(day) => calendar.insert(day),
                Err(e) => debug!(year, error = %e, "dropping malformed calendar entry"),
            }
        }
        if calendar.len() < total {
            debug!(
                year,
                kept = calendar.len(),
                total,
                "filtered malformed calendar entries"
            );
        }
        calendar
    }

    pub fn insert(&mut self, day: CalendarDay) {
        self.days.insert(day.date, day);
    }

    pub fn get(&self, date: NaiveDate) -> Option<&CalendarDay> {
        self.days.get(&date)
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn days(&self) -> impl Iterator<Item = &CalendarDay> {
        self.days.values()
    }
}

mod compact_date {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y%m%d";

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format(FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDate::parse_from_str(&raw, FORMAT).map_err(serde::de::Error::custom)
    }
}
