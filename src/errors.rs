use thiserror::Error;

/// Errors raised by the calendar fetch/persist layer.
///
/// `SourceUnavailable` and `SourceFormat` are recovered locally by the
/// resolver, which falls back to the next source or to the conservative
/// workday default. They never propagate past `WorkdayResolver`.
#[derive(Error, Debug)]
pub enum CalendarError {
    #[error("calendar source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("calendar source returned an unparseable payload: {0}")]
    SourceFormat(String),

    #[error("calendar store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("calendar store serialization error: {0}")]
    Store(#[from] serde_json::Error),
}

/// Errors raised by the browser automation layer.
///
/// All of these abort the current punch attempt only; `Permission` raised
/// while granting geolocation is non-fatal by policy and the executor
/// proceeds with the flow.
#[derive(Error, Debug)]
pub enum AutomationError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("permission setup failed: {0}")]
    Permission(String),

    #[error("login failed: {0}")]
    Login(String),

    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("action control not found: {0}")]
    ActionNotFound(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("browser transport error: {0}")]
    Transport(String),

    #[error("devtools protocol error: {0}")]
    Protocol(String),
}
