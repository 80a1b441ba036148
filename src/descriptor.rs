use serde_derive::{Deserialize, Serialize};

use crate::policy::BenchArgs;

pub const DEFAULT_CATEGORY: &str = "other";

/// One benchmarkable image.
///
/// Catalog entries are never mutated by a run; [`BenchmarkDescriptor::tagged`]
/// hands out a copy carrying the tag that should be pulled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkDescriptor {
    /// Image name, `repo` or `repo:tag`.
    pub name: String,
    /// Image name without the tag.
    pub repo: String,
    pub category: String,
}

impl BenchmarkDescriptor {
    pub fn new(name: &str, category: &str) -> BenchmarkDescriptor {
        BenchmarkDescriptor {
            name: name.to_string(),
            repo: image_repo(name).to_string(),
            category: category.to_string(),
        }
    }

    /// Returns a run-specific copy named `repo:tag`.
    pub fn tagged(&self, tag: &str) -> BenchmarkDescriptor {
        BenchmarkDescriptor {
            name: format!("{}:{}", self.repo, tag),
            repo: self.repo.clone(),
            category: self.category.clone(),
        }
    }
}

/// A catalog entry as it appears in YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogEntry {
    pub image: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default)]
    pub bench_args: Option<BenchArgs>,
}

fn default_category() -> String {
    DEFAULT_CATEGORY.to_string()
}

/// The part of an image reference before the tag.
///
/// A colon inside a registry host (`localhost:5000/redis`) is not a tag
/// separator, so only the last path component is inspected.
pub fn image_repo(reference: &str) -> &str {
    match split_tag(reference) {
        Some((repo, _)) => repo,
        None => reference,
    }
}

pub fn image_tag(reference: &str) -> Option<&str> {
    split_tag(reference).map(|(_, tag)| tag)
}

fn split_tag(reference: &str) -> Option<(&str, &str)> {
    let last_slash = reference.rfind('/').map(|i| i + 1).unwrap_or(0);
    let colon = reference[last_slash..].find(':')? + last_slash;
    Some((&reference[..colon], &reference[colon + 1..]))
}
