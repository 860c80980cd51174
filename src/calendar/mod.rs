//! Workday resolution: per-year holiday calendars with a tiered
//! memory → file → remote-source fallback and a conservative default.

pub mod model;
pub mod resolver;
pub mod source;
pub mod store;

pub use model::{CalendarDay, YearCalendar};
pub use resolver::WorkdayResolver;
pub use source::{CalendarSource, RemoteCalendarSource};
pub use store::CalendarStore;
