//! Storage key parsing and path normalization.

use crate::{Error, Result};
use std::fmt;

/// A validated `bucket/object-key` pair.
///
/// Keys arrive as plain strings composed by the driver. A single leading `/`
/// is ignored, the first `/` separates the bucket from the object key, and the
/// bucket is lower-cased since object stores treat bucket names that way.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectKey {
    bucket: String,
    key: String,
}

impl ObjectKey {
    /// Parse a storage key, rejecting anything without both a bucket and an object key.
    pub fn parse(path: &str) -> Result<Self> {
        let full = path.strip_prefix('/').unwrap_or(path);
        match full.split_once('/') {
            Some((bucket, key)) if !bucket.is_empty() && !key.is_empty() => Ok(Self {
                bucket: bucket.to_lowercase(),
                key: key.to_string(),
            }),
            _ => Err(Error::InvalidKey(path.to_string())),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Join path segments with `/` and lexically clean the result.
///
/// Empty segments are ignored. Cleaning collapses repeated separators, drops
/// `.` elements, resolves `..` against the preceding element and removes any
/// trailing separator. A rooted input stays rooted; an empty result is `.`.
pub fn clean_path(parts: &[&str]) -> String {
    let joined = parts
        .iter()
        .filter(|p| !p.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    clean(&joined)
}

fn clean(path: &str) -> String {
    if path.is_empty() {
        return ".".to_string();
    }

    let rooted = path.starts_with('/');
    let mut elements: Vec<&str> = Vec::new();

    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => match elements.last() {
                Some(last) if *last != ".." => {
                    elements.pop();
                }
                _ if rooted => {}
                _ => elements.push(".."),
            },
            other => elements.push(other),
        }
    }

    let body = elements.join("/");
    if rooted {
        format!("/{body}")
    } else if body.is_empty() {
        ".".to_string()
    } else {
        body
    }
}
