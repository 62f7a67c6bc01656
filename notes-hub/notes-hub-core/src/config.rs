use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::tree::DEFAULT_MAX_DEPTH;

/// Runtime settings for a [`DocumentService`](crate::DocumentService).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Directory holding one JSON file per document.
    pub data_dir: PathBuf,
    /// Directory holding the propagation journal.
    pub journal_dir: PathBuf,
    /// HS256 secret for bearer tokens. Without one, caller ids are trusted.
    pub jwt_secret: Option<String>,
    /// Deepest descendant level touched by archive/restore propagation.
    pub max_tree_depth: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            journal_dir: PathBuf::from("journal"),
            jwt_secret: None,
            max_tree_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl HubConfig {
    /// Data and journal directories under a common root.
    pub fn in_dir(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            data_dir: root.join("data"),
            journal_dir: root.join("journal"),
            ..Self::default()
        }
    }

    /// Load configuration from `NOTES_HUB_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let max_tree_depth = match get("NOTES_HUB_MAX_TREE_DEPTH") {
            Some(raw) => raw
                .trim()
                .parse()
                .with_context(|| format!("invalid NOTES_HUB_MAX_TREE_DEPTH: {:?}", raw))?,
            None => defaults.max_tree_depth,
        };
        Ok(Self {
            data_dir: get("NOTES_HUB_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.data_dir),
            journal_dir: get("NOTES_HUB_JOURNAL_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.journal_dir),
            jwt_secret: get("NOTES_HUB_JWT_SECRET").filter(|s| !s.is_empty()),
            max_tree_depth,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = HubConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, HubConfig::default());
        assert_eq!(config.max_tree_depth, DEFAULT_MAX_DEPTH);
    }

    #[test]
    fn reads_overrides() {
        let config = HubConfig::from_lookup(lookup(&[
            ("NOTES_HUB_DATA_DIR", "/srv/notes/data"),
            ("NOTES_HUB_JOURNAL_DIR", "/srv/notes/journal"),
            ("NOTES_HUB_JWT_SECRET", "s3cret"),
            ("NOTES_HUB_MAX_TREE_DEPTH", " 64 "),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/srv/notes/data"));
        assert_eq!(config.journal_dir, PathBuf::from("/srv/notes/journal"));
        assert_eq!(config.jwt_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.max_tree_depth, 64);
    }

    #[test]
    fn empty_secret_means_none() {
        let config = HubConfig::from_lookup(lookup(&[("NOTES_HUB_JWT_SECRET", "")])).unwrap();
        assert!(config.jwt_secret.is_none());
    }

    #[test]
    fn rejects_bad_depth() {
        assert!(HubConfig::from_lookup(lookup(&[("NOTES_HUB_MAX_TREE_DEPTH", "deep")])).is_err());
    }

    #[test]
    fn in_dir_nests_directories() {
        let config = HubConfig::in_dir("/tmp/hub");
        assert_eq!(config.data_dir, PathBuf::from("/tmp/hub/data"));
        assert_eq!(config.journal_dir, PathBuf::from("/tmp/hub/journal"));
    }
}
