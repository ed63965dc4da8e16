//! Which request paths are subject to throttling.

use crate::config::PathsConfig;

/// Decides whether a path goes through the bot filter.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    excluded_prefixes: Vec<String>,
    excluded_extensions: Vec<String>,
}

impl PathFilter {
    pub fn new(excluded_prefixes: Vec<String>, excluded_extensions: Vec<String>) -> Self {
        Self {
            excluded_prefixes,
            excluded_extensions: excluded_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// Returns `true` if requests for `path` should be classified.
    pub fn applies(&self, path: &str) -> bool {
        if self
            .excluded_prefixes
            .iter()
            .any(|prefix| path.starts_with(prefix.as_str()))
        {
            return false;
        }

        let last_segment = path.rsplit('/').next().unwrap_or(path);
        match last_segment.rsplit_once('.') {
            Some((_, ext)) => !self
                .excluded_extensions
                .iter()
                .any(|excluded| excluded.eq_ignore_ascii_case(ext)),
            None => true,
        }
    }
}

impl From<&PathsConfig> for PathFilter {
    fn from(config: &PathsConfig) -> Self {
        Self::new(
            config.excluded_prefixes.clone(),
            config.excluded_extensions.clone(),
        )
    }
}
