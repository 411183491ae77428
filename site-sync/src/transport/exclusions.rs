//! Paths that never cross the wire, whatever the transport or direction.
//!
//! Patterns without a slash match a file or directory name at any depth.
//! Patterns with a slash are anchored at the tree root and cover everything
//! beneath them.

/// Secrets, caches and local-only helpers.
pub const DEFAULT_EXCLUSIONS: &[&str] = &[
    "wp-config.php",
    "wp-config-local.php",
    "wp-content/cache",
    "wp-content/mu-plugins/cw-local-login.php",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExclusionSet {
    patterns: Vec<String>,
}

impl Default for ExclusionSet {
    fn default() -> Self {
        Self::new(DEFAULT_EXCLUSIONS.iter().copied())
    }
}

impl ExclusionSet {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .map(|p: String| p.trim_matches('/').to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    /// `--exclude` arguments for rsync. Slash patterns get a leading `/`
    /// so rsync anchors them at the transfer root.
    pub fn rsync_args(&self) -> Vec<String> {
        self.patterns
            .iter()
            .flat_map(|p| {
                let pattern = if p.contains('/') {
                    format!("/{p}")
                } else {
                    p.clone()
                };
                ["--exclude".to_string(), pattern]
            })
            .collect()
    }

    /// `--exclude=` arguments for a tar archive whose single top-level entry is `leaf`.
    pub fn tar_args(&self, leaf: &str) -> Vec<String> {
        self.patterns
            .iter()
            .map(|p| {
                if p.contains('/') {
                    format!("--exclude={leaf}/{p}")
                } else {
                    format!("--exclude={p}")
                }
            })
            .collect()
    }

    /// Whether a `/`-separated path relative to the tree root is excluded.
    pub fn is_excluded(&self, relative: &str) -> bool {
        let relative = relative.trim_matches('/');
        let name = relative.rsplit('/').next().unwrap_or(relative);

        self.patterns.iter().any(|p| {
            if p.contains('/') {
                relative == p
                    || relative
                        .strip_prefix(p.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            } else {
                name == p
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_matches() {
        let set = ExclusionSet::default();

        assert!(set.is_excluded("wp-config.php"));
        assert!(set.is_excluded("wp-content/cache"));
        assert!(set.is_excluded("wp-content/cache/page/index.html"));
        assert!(set.is_excluded("wp-content/mu-plugins/cw-local-login.php"));
        // Name patterns apply at any depth.
        assert!(set.is_excluded("blog/wp-config.php"));

        assert!(!set.is_excluded("wp-content/cached-assets/a.css"));
        assert!(!set.is_excluded("wp-content/plugins/cache/readme.txt"));
        assert!(!set.is_excluded("index.php"));
    }

    #[test]
    fn test_rsync_and_tar_arguments() {
        let set = ExclusionSet::new(["wp-config.php", "/wp-content/cache/"]);

        assert_eq!(
            set.rsync_args(),
            vec!["--exclude", "wp-config.php", "--exclude", "/wp-content/cache"]
        );
        assert_eq!(
            set.tar_args("public_html"),
            vec![
                "--exclude=wp-config.php",
                "--exclude=public_html/wp-content/cache"
            ]
        );
    }
}
