//! Automated attendance punching against the NUEIP web portal.
//!
//! The crate is layered bottom-up: a Chrome DevTools transport
//! ([`browser`]), a strategy-based element locator, a login/punch driver
//! ([`driver`]), a per-attempt executor ([`executor`]), a tiered workday
//! resolver ([`calendar`]) and a cron trigger layer ([`scheduler`]). The
//! binary in `main.rs` wires these together from environment
//! configuration.

pub mod browser;
pub mod calendar;
pub mod config;
pub mod diagnostics;
pub mod driver;
pub mod errors;
pub mod executor;
pub mod scheduler;

pub use config::{Config, Credentials, GeoPoint};
pub use driver::{ActionOutcome, PunchKind, RemoteUiDriver};
pub use errors::{AutomationError, CalendarError};
pub use executor::{Punch, PunchExecutor, PunchOutcome, PunchReport};
pub use scheduler::PunchScheduler;
