use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context};

/// The sandbox every operation is confined to: a canonical root directory and
/// the workspace relative paths that may never be touched.
#[derive(Debug, Clone)]
pub struct WorkspaceBoundary {
    root: PathBuf,
    protected: Vec<Vec<String>>,
}

impl WorkspaceBoundary {
    pub fn new(root: &Path, protected_paths: &[String]) -> anyhow::Result<Self> {
        let root = root
            .canonicalize()
            .with_context(|| format!("Workspace root does not exist: {}", root.display()))?;
        if !root.is_dir() {
            bail!("Workspace root is not a directory: {}", root.display());
        }

        let protected = protected_paths
            .iter()
            .map(|p| segments(p))
            .filter(|segments| !segments.is_empty())
            .collect();

        Ok(Self { root, protected })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the protected entry covering `relative`, if any. A protected
    /// path covers itself and everything beneath it.
    pub fn protected_prefix(&self, relative: &Path) -> Option<String> {
        let candidate = segments_of(relative);
        self.protected
            .iter()
            .find(|protected| candidate.starts_with(protected))
            .map(|protected| protected.join("/"))
    }

    /// Returns a protected entry lying strictly below `relative`, if any. Such
    /// a directory cannot be removed or replaced without taking the
    /// protected path along.
    pub fn contains_protected(&self, relative: &Path) -> Option<String> {
        let base = segments_of(relative);
        self.protected
            .iter()
            .find(|protected| protected.len() > base.len() && protected.starts_with(&base))
            .map(|protected| protected.join("/"))
    }

    /// Protected paths lying strictly below `dir`, expressed relative to it as
    /// exclusion globs for the directory itself and its contents.
    pub fn protected_excludes(&self, dir: &Path) -> Vec<String> {
        let Ok(relative) = dir.strip_prefix(&self.root) else {
            return Vec::new();
        };
        let base = segments_of(relative);
        self.protected
            .iter()
            .filter(|protected| protected.len() > base.len() && protected.starts_with(&base))
            .flat_map(|protected| {
                let rest = protected[base.len()..].join("/");
                [format!("{rest}/**"), rest]
            })
            .collect()
    }

    /// Workspace relative form of an absolute path inside the root, always
    /// with `/` separators. The root itself is `.`.
    pub fn relative(&self, path: &Path) -> String {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return path.display().to_string();
        };
        let parts: Vec<String> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        if parts.is_empty() {
            ".".to_string()
        } else {
            parts.join("/")
        }
    }
}

fn segments_of(relative: &Path) -> Vec<String> {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect()
}

fn segments(path: &str) -> Vec<String> {
    path.split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .map(String::from)
        .collect()
}
