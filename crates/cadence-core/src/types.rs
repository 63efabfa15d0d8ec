use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a scheduled task definition.
///
/// Opaque to the scheduler. New ids are UUIDv7 so they sort by creation time,
/// but any string an admin chooses (e.g. `"search-feed"`) is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Stable identifier of the process instance that executes tasks.
///
/// Run history is scoped by host, so two nodes sharing a database each keep
/// their own notion of "last run".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostId(pub String);

impl HostId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Resolve the host identity: explicit override, then the OS hostname,
    /// then `"localhost"`.
    pub fn resolve(configured: Option<&str>) -> Self {
        if let Some(id) = configured.map(str::trim).filter(|s| !s.is_empty()) {
            return Self(id.to_string());
        }
        match hostname::get() {
            Ok(name) => {
                let name = name.to_string_lossy().trim().to_string();
                if name.is_empty() {
                    Self::localhost()
                } else {
                    Self(name)
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "hostname lookup failed, using localhost");
                Self::localhost()
            }
        }
    }

    pub fn localhost() -> Self {
        Self("localhost".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
