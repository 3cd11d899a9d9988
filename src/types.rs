use serde::{Deserialize, Serialize};
use std::fmt;

/// The three backend resources the dashboard reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Resource {
    Opportunities,
    Stats,
    Status,
}

impl Resource {
    pub const ALL: [Resource; 3] = [Resource::Opportunities, Resource::Stats, Resource::Status];

    pub fn path(&self) -> &'static str {
        match self {
            Resource::Opportunities => "opportunities",
            Resource::Stats => "stats",
            Resource::Status => "status",
        }
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

/// `{success, data}` wrapper returned by every backend resource.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

/// What the store does with the last good snapshot when a cycle fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep showing the previous snapshot next to the error.
    #[default]
    RetainLastGood,
    /// Drop the snapshot and show only the error.
    ClearOnError,
}

impl std::str::FromStr for FailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "retain_last_good" | "retain" => Ok(FailurePolicy::RetainLastGood),
            "clear_on_error" | "clear" => Ok(FailurePolicy::ClearOnError),
            other => Err(format!("unknown failure policy: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling,
    Stopped,
}

impl PollerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            PollerState::Idle => 0,
            PollerState::Polling => 1,
            PollerState::Stopped => 2,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            0 => PollerState::Idle,
            1 => PollerState::Polling,
            _ => PollerState::Stopped,
        }
    }
}
