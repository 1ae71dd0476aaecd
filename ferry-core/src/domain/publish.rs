//! Publish domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::item::Item;

/// A batch of staged path mappings awaiting commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publish {
    pub id: Uuid,

    /// CDN environment this publish targets (e.g. "live")
    pub env: String,

    pub status: PublishStatus,

    /// Optimistic concurrency version, bumped on every status transition
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// Failure detail recorded when the publish ends FAILED
    pub error: Option<String>,

    /// Items ordered by web path
    #[serde(default)]
    pub items: Vec<Item>,
}

/// Lifecycle state of a publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PublishStatus {
    /// Accepting items
    Pending,

    /// A commit task holds the publish; items are frozen
    Committing,

    /// Every item is live in the CDN table
    Complete,

    /// The last commit attempt failed; may be committed again manually
    Failed,
}

impl PublishStatus {
    pub const fn is_terminal(self) -> bool {
        matches!(self, PublishStatus::Complete | PublishStatus::Failed)
    }

    /// Items may only be added or removed while pending.
    pub const fn accepts_items(self) -> bool {
        matches!(self, PublishStatus::Pending)
    }

    /// Whether a new commit task may be requested in this state.
    ///
    /// FAILED publishes stay committable so an operator can retry them; the
    /// retry re-enters COMMITTING without reopening the item set.
    pub const fn is_committable(self) -> bool {
        matches!(self, PublishStatus::Pending | PublishStatus::Failed)
    }

    /// Forward-only transition table.
    pub const fn can_transition_to(self, next: PublishStatus) -> bool {
        matches!(
            (self, next),
            (PublishStatus::Pending, PublishStatus::Committing)
                | (PublishStatus::Failed, PublishStatus::Committing)
                | (PublishStatus::Committing, PublishStatus::Complete)
                | (PublishStatus::Committing, PublishStatus::Failed)
        )
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            PublishStatus::Pending => "PENDING",
            PublishStatus::Committing => "COMMITTING",
            PublishStatus::Complete => "COMPLETE",
            PublishStatus::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for PublishStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PublishStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PublishStatus::Pending),
            "COMMITTING" => Ok(PublishStatus::Committing),
            "COMPLETE" => Ok(PublishStatus::Complete),
            "FAILED" => Ok(PublishStatus::Failed),
            other => Err(format!("unknown publish status: {}", other)),
        }
    }
}
