//! Item validation
//!
//! Normalizes client-submitted items and enforces the structural rules an
//! item must satisfy before it can be staged in a publish.

use std::sync::LazyLock;

use regex::Regex;
use uuid::Uuid;

use crate::domain::item::{ABSENT_OBJECT_KEY, Item};
use crate::dto::publish::ItemInput;

/// Filename reserved for generated directory indexes
pub const AUTOINDEX_FILENAME: &str = ".__exodus_autoindex";

// TYPE/SUBTYPE[+SUFFIX][;PARAMETER=VALUE]
static MIMETYPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[-\w]+/[-.\w]+(\+[-\w]*)?(;[-\w]+=[-\w]+)?").expect("static regex")
});

static ORIGIN_FILES_BASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/content)?/origin/files/sha256/").expect("static regex")
});

// sha256/<first two of digest>/<digest>/<basename>
static ORIGIN_FILES_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/content)?/origin/files/sha256/[0-f]{2}/[0-f]{64}/[^/]{1,300}$")
        .expect("static regex")
});

/// An item rejected by validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidItem(pub String);

impl std::fmt::Display for InvalidItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for InvalidItem {}

/// Normalize a web path: leading `/`, no empty, `.` or `..` segments.
pub fn normalize_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    format!("/{}", segments.join("/"))
}

pub fn is_sha256_hex(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl ItemInput {
    /// Validate and normalize into an item of `publish_id`.
    pub fn validate(self, publish_id: Uuid) -> Result<Item, InvalidItem> {
        if self.web_uri.is_empty() {
            return Err(InvalidItem("item has no web URI".to_string()));
        }
        let web_path = normalize_path(&self.web_uri);

        let object_key = non_empty(self.object_key);
        let content_type = non_empty(self.content_type);
        let link_to = non_empty(self.link_to);

        if link_to.is_some() && object_key.is_some() {
            return Err(InvalidItem(format!(
                "both link target and object key present for {}",
                web_path
            )));
        }
        if link_to.is_some() && content_type.is_some() {
            return Err(InvalidItem(format!(
                "content type specified for link {}",
                web_path
            )));
        }

        let link_to = link_to.map(|l| normalize_path(&l));

        match object_key.as_deref() {
            Some(ABSENT_OBJECT_KEY) => {
                if content_type.is_some() {
                    return Err(InvalidItem(format!(
                        "cannot set content type on absent item {}",
                        web_path
                    )));
                }
            }
            Some(key) if !is_sha256_hex(key) => {
                return Err(InvalidItem(format!(
                    "invalid object key for {}: must be a sha256 hex digest",
                    web_path
                )));
            }
            Some(_) => {}
            None if link_to.is_none() => {
                return Err(InvalidItem(format!(
                    "no object key or link target for {}",
                    web_path
                )));
            }
            None => {}
        }

        if let Some(ct) = &content_type {
            if !MIMETYPE_PATTERN.is_match(ct) {
                return Err(InvalidItem(format!("invalid content type: {}", ct)));
            }
        }

        let filename = web_path.rsplit('/').next().unwrap_or_default();
        if filename == AUTOINDEX_FILENAME && object_key.as_deref() != Some(ABSENT_OBJECT_KEY) {
            return Err(InvalidItem(format!(
                "invalid URI {}: filename is reserved",
                web_path
            )));
        }

        check_origin_files(&web_path, object_key.as_deref())?;

        Ok(Item {
            publish_id,
            web_path,
            object_key,
            content_type,
            link_to,
        })
    }
}

/// Paths under `/origin/files/sha256` must be content addressed by the
/// object they hold.
fn check_origin_files(web_path: &str, object_key: Option<&str>) -> Result<(), InvalidItem> {
    if !ORIGIN_FILES_BASE.is_match(web_path) {
        return Ok(());
    }

    if !ORIGIN_FILES_PATTERN.is_match(web_path) {
        return Err(InvalidItem(format!(
            "origin path {} does not match {}",
            web_path,
            ORIGIN_FILES_PATTERN.as_str()
        )));
    }

    let mut parts = web_path
        .split_once("/files/sha256/")
        .map(|(_, rest)| rest)
        .unwrap_or_default()
        .split('/');
    let prefix = parts.next().unwrap_or_default();
    let digest = parts.next().unwrap_or_default();

    if !digest.starts_with(prefix) {
        return Err(InvalidItem(format!(
            "origin path {} contains mismatched sha256sum ({}, {})",
            web_path, prefix, digest
        )));
    }

    match object_key {
        Some(key) if key == ABSENT_OBJECT_KEY || key == digest => Ok(()),
        other => Err(InvalidItem(format!(
            "invalid object key {} for origin path {}",
            other.unwrap_or("(none)"),
            web_path
        ))),
    }
}
