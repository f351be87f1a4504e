// Wire types shared between the pool controller and the control interface.
//
// Grounded on `original_source/server/convert.go` and `original_source/types.go`:
// the Go server flattens its live `Pool`/`VmHandle` structs into these shapes
// for JSON responses rather than serializing internal state directly.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum PoolState {
    Active,
    Paused,
    Stopping,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    pub name: String,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    pub state: PoolState,
    pub cur_runners: usize,
    pub min_runners: u32,
    pub max_runners: u32,
    pub runners: Vec<RunnerStatus>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VersionInfo {
    pub name: String,
    pub version: String,
    pub commit: String,
    pub date: String,
}

impl VersionInfo {
    pub fn current() -> Self {
        Self {
            name: "fireactions".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit: option_env!("FIREACTIONS_COMMIT").unwrap_or("unknown").to_string(),
            date: option_env!("FIREACTIONS_BUILD_DATE").unwrap_or("unknown").to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}
