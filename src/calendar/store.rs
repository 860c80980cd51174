use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::calendar::model::{CalendarDay, YearCalendar};
use crate::errors::CalendarError;

/// File-backed persistence for year calendars: one `{year}.json` per year
/// under the data directory, pretty-printed, overwritten wholesale on a
/// successful fetch.
#[derive(Debug, Clone)]
pub struct CalendarStore {
    dir: PathBuf,
}

impl CalendarStore {
    pub fn new(data_dir: &Path) -> Result<Self, CalendarError> {
        let dir = data_dir.join("calendars");
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn year_path(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{year}.json"))
    }

    /// Load a persisted year, `Ok(None)` when no file exists. An unreadable
    /// or unparseable file is an error; the resolver treats it as a miss.
    pub fn load(&self, year: i32) -> Result<Option<YearCalendar>, CalendarError> {
        let path = self.year_path(year);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&path)?;
        let entries: Vec<serde_json::Value> = serde_json::from_str(&raw)?;
        let calendar = YearCalendar::from_entries(year, entries);
        debug!(year, days = calendar.len(), path = %path.display(), "loaded year calendar from file");
        Ok(Some(calendar))
    }

    pub fn save(&self, calendar: &YearCalendar) -> Result<(), CalendarError> {
        let days: Vec<&CalendarDay> = calendar.days().collect();
        let json = serde_json::to_string_pretty(&days)?;
        let path = self.year_path(calendar.year());
        fs::write(&path, json)?;
        info!(year = calendar.year(), days = days.len(), path = %path.display(), "persisted year calendar");
        Ok(())
    }

    /// Remove every persisted year file. Only invoked by an explicit
    /// cache-clear operation.
    pub fn clear(&self) -> Result<(), CalendarError> {
        let mut removed = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                fs::remove_file(&path)?;
                removed += 1;
            }
        }
        info!(removed, "cleared persisted calendar data");
        Ok(())
    }
}
