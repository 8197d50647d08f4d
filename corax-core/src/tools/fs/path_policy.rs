//! Path resolution and allow/deny policy for the filesystem tools.

use glob::Pattern;
use std::path::{Component, Path, PathBuf};

use crate::config::FilesystemPolicyConfig;

/// Compiled filesystem policy: the workspace root, extra allowed
/// directories, and blacklist globs.
#[derive(Debug, Clone)]
pub struct PathPolicy {
    workspace_root: PathBuf,
    allowed_directories: Vec<PathBuf>,
    blacklist: Vec<Pattern>,
    blacklist_raw: Vec<String>,
}

impl PathPolicy {
    pub fn new(workspace_root: PathBuf, config: &FilesystemPolicyConfig) -> Self {
        let workspace_root = normalize(&workspace_root);
        let mut allowed_directories: Vec<PathBuf> = Vec::new();
        for dir in &config.allowed_directories {
            let normalized = normalize(Path::new(dir));
            if let Ok(canonical) = std::fs::canonicalize(&normalized)
                && canonical != normalized
            {
                allowed_directories.push(canonical);
            }
            allowed_directories.push(normalized);
        }
        // The working directory is always allowed; its canonical form too,
        // so symlinked workspaces survive the post-resolution re-check.
        if let Ok(canonical) = std::fs::canonicalize(&workspace_root)
            && canonical != workspace_root
        {
            allowed_directories.insert(0, canonical);
        }
        allowed_directories.insert(0, workspace_root.clone());

        let blacklist = config
            .blacklist
            .iter()
            .filter_map(|pattern| Pattern::new(pattern).ok())
            .collect();

        Self {
            workspace_root,
            allowed_directories,
            blacklist,
            blacklist_raw: config.blacklist.clone(),
        }
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Resolve a user-supplied path against the workspace. Absolute paths
    /// must fall inside the allow set; relative paths are joined to the
    /// workspace root. Returns a normalized absolute path.
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let candidate = Path::new(path);
        let absolute = if candidate.is_absolute() {
            normalize(candidate)
        } else {
            normalize(&self.workspace_root.join(candidate))
        };

        if !self.is_path_allowed(&absolute) {
            return Err(format!(
                "path {} is outside the working directory and allowed directories",
                absolute.display()
            ));
        }
        if self.is_blacklisted(&absolute) {
            return Err(format!(
                "path {} is blocked by the filesystem blacklist",
                absolute.display()
            ));
        }
        Ok(absolute)
    }

    /// True iff `path` equals or descends (by component boundary) from an
    /// allowed directory.
    pub fn is_path_allowed(&self, path: &Path) -> bool {
        self.allowed_directories
            .iter()
            .any(|allowed| path == allowed || path.starts_with(allowed))
    }

    /// True iff the basename or the full path matches any blacklist entry.
    pub fn is_blacklisted(&self, path: &Path) -> bool {
        let basename = path
            .file_name()
            .map(|name| name.to_string_lossy())
            .unwrap_or_default();
        let full = path.to_string_lossy();
        self.blacklist
            .iter()
            .any(|pattern| pattern.matches(&basename) || pattern.matches(&full))
            || self
                .blacklist_raw
                .iter()
                .any(|entry| entry.as_str() == basename || entry.as_str() == full)
    }
}

/// Lexically normalize a path: strip `.` components and fold `..` without
/// touching the filesystem, so traversal cannot escape the allow check.
pub(crate) fn normalize(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push(Component::ParentDir);
                }
            }
            other => normalized.push(other),
        }
    }
    normalized
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> PathPolicy {
        let config = FilesystemPolicyConfig {
            allowed_directories: vec!["/opt/shared".to_string()],
            blacklist: vec![".env".to_string(), "*.pem".to_string()],
            ..FilesystemPolicyConfig::default()
        };
        PathPolicy::new(PathBuf::from("/work/project"), &config)
    }

    #[test]
    fn relative_paths_resolve_under_workspace() {
        let policy = policy();
        assert_eq!(
            policy.resolve("src/main.rs").expect("allowed"),
            PathBuf::from("/work/project/src/main.rs")
        );
    }

    #[test]
    fn traversal_cannot_escape() {
        let policy = policy();
        let error = policy.resolve("../../etc/passwd").unwrap_err();
        assert!(error.contains("outside the working directory"));
    }

    #[test]
    fn absolute_paths_need_allowlist_membership() {
        let policy = policy();
        assert!(policy.resolve("/opt/shared/data.txt").is_ok());
        assert!(policy.resolve("/etc/passwd").is_err());
    }

    #[test]
    fn boundary_is_per_component() {
        let policy = policy();
        // "/opt/shared-evil" shares a string prefix but not a component.
        assert!(!policy.is_path_allowed(Path::new("/opt/shared-evil/x")));
        assert!(policy.is_path_allowed(Path::new("/opt/shared/x")));
    }

    #[test]
    fn blacklist_matches_basename_and_glob() {
        let policy = policy();
        assert!(policy.is_blacklisted(Path::new("/work/project/.env")));
        assert!(policy.is_blacklisted(Path::new("/work/project/certs/server.pem")));
        assert!(!policy.is_blacklisted(Path::new("/work/project/src/main.rs")));
    }

    #[test]
    fn blacklist_takes_precedence_over_allowlist() {
        let policy = policy();
        let error = policy.resolve(".env").unwrap_err();
        assert!(error.contains("blacklist"));
    }
}
