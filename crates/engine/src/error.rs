use std::fmt;

/// Errors at the decode boundary. Inside the engine nothing is fatal:
/// malformed individual records degrade to skipped events or
/// issue-flagged rows instead of surfacing here.
#[derive(Debug)]
pub enum PlanError {
    /// TOML parse / deserialization error in a settings document.
    SettingsParse(String),
    /// JSON parse / deserialization error in a snapshot document.
    SnapshotParse(String),
}

impl fmt::Display for PlanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SettingsParse(msg) => write!(f, "settings parse error: {msg}"),
            Self::SnapshotParse(msg) => write!(f, "snapshot parse error: {msg}"),
        }
    }
}

impl std::error::Error for PlanError {}
