//! Task DTOs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Optional parameters for a commit request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommitRequest {
    /// Abandon the commit task if it has not been claimed by this time
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}
