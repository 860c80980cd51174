//! Browser session plumbing: a Chrome DevTools Protocol transport, the
//! page-operation seam the driver works against, and multi-strategy
//! element location for unstable target markup.

pub mod cdp;
pub mod locator;
pub mod page;

pub use cdp::{BrowserSession, ChromeLauncher};
pub use locator::{CandidateElement, ElementHandle, Strategy};
pub use page::{Evaluate, PageSession, SessionLauncher};
