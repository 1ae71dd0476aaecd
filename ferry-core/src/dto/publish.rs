//! Publish DTOs

use serde::{Deserialize, Serialize};

/// One item as submitted by a client, before validation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemInput {
    pub web_uri: String,
    #[serde(default)]
    pub object_key: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub link_to: Option<String>,
}

/// Request to drop staged items from a pending publish
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoveItems {
    pub paths: Vec<String>,
}
