//! Item domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Object key marking a path for removal from the CDN table
pub const ABSENT_OBJECT_KEY: &str = "absent";

/// One path mapping within a publish
///
/// Exactly one of `object_key` and `link_to` is set once validated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub publish_id: Uuid,

    /// Normalized web path, unique within the publish
    pub web_path: String,

    /// SHA-256 key of a previously uploaded blob, or `absent`
    pub object_key: Option<String>,

    pub content_type: Option<String>,

    /// Normalized path this item aliases
    pub link_to: Option<String>,
}

impl Item {
    pub fn is_absent(&self) -> bool {
        self.object_key.as_deref() == Some(ABSENT_OBJECT_KEY)
    }

    pub fn is_link(&self) -> bool {
        self.link_to.is_some()
    }
}
