// build metadata printed by the version flag

/// Version information baked in at compile time
///
/// The semantic version always comes from Cargo.toml. Git information is
/// captured by build.rs and is absent when building outside a git checkout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVersion {
    /// Semantic version from Cargo.toml (e.g., "0.1.0")
    pub semantic: String,

    /// Git describe output (e.g., "v0.1.0-7-g644da27")
    ///
    /// Includes the most recent tag, commits since tag, short hash and a
    /// "-dirty" suffix for uncommitted changes.
    pub git_describe: Option<String>,

    /// Full git commit hash
    pub git_hash: Option<String>,

    /// Cargo profile the binary was built with ("debug" or "release")
    pub profile: Option<String>,
}

impl BuildVersion {
    /// Get the version of the running binary
    pub fn current() -> Self {
        Self {
            semantic: env!("CARGO_PKG_VERSION").to_string(),
            git_describe: option_env!("CHUNKPIPE_GIT_DESCRIBE").map(String::from),
            git_hash: option_env!("CHUNKPIPE_GIT_HASH").map(String::from),
            profile: option_env!("CHUNKPIPE_BUILD_PROFILE").map(String::from),
        }
    }

    /// One-line version string
    ///
    /// # Examples
    ///
    /// ```
    /// use common::version::BuildVersion;
    ///
    /// let v = BuildVersion {
    ///     semantic: "0.1.0".to_string(),
    ///     git_describe: Some("v0.1.0-7-g644da27".to_string()),
    ///     git_hash: None,
    ///     profile: None,
    /// };
    ///
    /// assert_eq!(v.display(), "0.1.0 (v0.1.0-7-g644da27)");
    /// ```
    pub fn display(&self) -> String {
        if let Some(ref git_describe) = self.git_describe {
            format!("{} ({})", self.semantic, git_describe)
        } else {
            self.semantic.clone()
        }
    }

    /// Multi-line report with every known field, one `key: value` per line
    pub fn report(&self, name: &str) -> String {
        let mut lines = vec![format!("{name} {}", self.display())];
        if let Some(ref hash) = self.git_hash {
            lines.push(format!("commit: {hash}"));
        }
        if let Some(ref profile) = self.profile {
            lines.push(format!("profile: {profile}"));
        }
        lines.join("\n")
    }
}

impl std::fmt::Display for BuildVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_version() {
        let version = BuildVersion::current();
        assert!(!version.semantic.is_empty());
        assert!(version.report("chunkpipe").starts_with("chunkpipe "));
    }

    #[test]
    fn test_display() {
        let v1 = BuildVersion {
            semantic: "0.1.0".to_string(),
            git_describe: None,
            git_hash: None,
            profile: None,
        };
        assert_eq!(v1.display(), "0.1.0");
        assert_eq!(v1.to_string(), "0.1.0");
    }

    #[test]
    fn test_report() {
        let v = BuildVersion {
            semantic: "0.1.0".to_string(),
            git_describe: Some("v0.1.0-2-gabcdef0".to_string()),
            git_hash: Some("abcdef0123".to_string()),
            profile: Some("release".to_string()),
        };
        assert_eq!(
            v.report("chunkpipe"),
            "chunkpipe 0.1.0 (v0.1.0-2-gabcdef0)\ncommit: abcdef0123\nprofile: release"
        );
    }
}
