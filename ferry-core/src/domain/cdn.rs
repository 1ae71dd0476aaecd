//! CDN table record types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A live mapping in the CDN-facing key-value table
///
/// Keyed by (environment, web path). The value is fully determined by the
/// publish that wrote it, so rewriting the same entry is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnEntry {
    pub web_path: String,
    pub object_key: String,
    pub content_type: Option<String>,

    /// Metadata version: the publish that produced this mapping
    pub publish_id: Uuid,
}
