use std::io;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::error::{ToolError, ToolResult};
use crate::security::boundary::WorkspaceBoundary;

/// Outcome of validating one candidate path. Rejections carry a reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathVerdict {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl PathVerdict {
    fn accept() -> Self {
        Self {
            valid: true,
            reason: None,
        }
    }

    fn reject(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// Confines caller supplied paths to the workspace. Validation never touches
/// the filesystem beyond reading metadata, so it is safe to call
/// speculatively.
#[derive(Debug, Clone)]
pub struct PathValidator {
    boundary: Arc<WorkspaceBoundary>,
}

impl PathValidator {
    pub fn new(boundary: Arc<WorkspaceBoundary>) -> Self {
        Self { boundary }
    }

    pub fn boundary(&self) -> &WorkspaceBoundary {
        &self.boundary
    }

    pub fn validate(&self, candidate: &str) -> PathVerdict {
        match self.resolve(candidate) {
            Ok(_) => PathVerdict::accept(),
            Err(ToolError::PathRejected(reason)) => PathVerdict::reject(reason),
            Err(e) => PathVerdict::reject(e.to_string()),
        }
    }

    /// Resolves a workspace relative path to the absolute location it names,
    /// rejecting anything that could land outside the root or inside a
    /// protected path. Symlinks are followed, including a final one.
    pub fn resolve(&self, candidate: &str) -> ToolResult<PathBuf> {
        let joined = self.join(candidate)?;
        self.confine(&joined, candidate)
    }

    /// Resolution for operations that mutate their target. The parent is
    /// canonicalized but the last component is kept as named, so a symlink
    /// is itself renamed or deleted rather than the file it points at. A
    /// final symlink must still point inside the workspace. The root itself
    /// is refused.
    pub fn resolve_target(&self, candidate: &str) -> ToolResult<PathBuf> {
        let joined = self.join(candidate)?;
        let root = self.boundary.root();
        let (Some(parent), Some(name)) = (joined.parent(), joined.file_name()) else {
            return Err(root_rejection());
        };
        if joined == root {
            return Err(root_rejection());
        }

        let target = self.confine(parent, candidate)?.join(name);
        let relative = target.strip_prefix(root).unwrap_or(&target);
        if let Some(protected) = self.boundary.protected_prefix(relative) {
            return Err(ToolError::PathRejected(format!(
                "{candidate} is inside protected path {protected}"
            )));
        }

        let is_symlink = target
            .symlink_metadata()
            .is_ok_and(|metadata| metadata.file_type().is_symlink());
        if is_symlink {
            self.confine(&target, candidate)?;
        }
        Ok(target)
    }

    /// Like [`resolve_target`](Self::resolve_target) for operations that
    /// replace or remove a whole tree. A directory holding a protected path
    /// is refused too, since mutating it would take the protected path along.
    pub fn resolve_subtree_target(&self, candidate: &str) -> ToolResult<PathBuf> {
        let target = self.resolve_target(candidate)?;
        let relative = target
            .strip_prefix(self.boundary.root())
            .unwrap_or(&target);
        if let Some(protected) = self.boundary.contains_protected(relative) {
            return Err(ToolError::PathRejected(format!(
                "{candidate} contains protected path {protected}"
            )));
        }
        Ok(target)
    }

    /// Screens the raw candidate and joins its components onto the root.
    fn join(&self, candidate: &str) -> ToolResult<PathBuf> {
        if let Some(reason) = syntactic_rejection(candidate) {
            return Err(ToolError::PathRejected(reason.to_string()));
        }

        let mut joined = self.boundary.root().to_path_buf();
        for component in Path::new(candidate).components() {
            match component {
                Component::Normal(name) => joined.push(name),
                Component::CurDir => {}
                // Already screened, but never let one through if it slips past.
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ToolError::PathRejected(
                        "Path traversal detected".to_string(),
                    ));
                }
            }
        }
        Ok(joined)
    }

    /// Canonicalizes `path` and checks the result against the root and the
    /// protected paths.
    fn confine(&self, path: &Path, candidate: &str) -> ToolResult<PathBuf> {
        let root = self.boundary.root();
        let resolved = resolve_existing_prefix(path).map_err(|e| {
            ToolError::PathRejected(format!("Unable to resolve {candidate}: {e}"))
        })?;

        let Ok(relative) = resolved.strip_prefix(root) else {
            return Err(ToolError::PathRejected(format!(
                "{candidate} is outside the workspace"
            )));
        };

        if let Some(protected) = self.boundary.protected_prefix(relative) {
            return Err(ToolError::PathRejected(format!(
                "{candidate} is inside protected path {protected}"
            )));
        }

        Ok(resolved)
    }

    pub fn relative(&self, path: &Path) -> String {
        self.boundary.relative(path)
    }
}

fn root_rejection() -> ToolError {
    ToolError::PathRejected("The workspace root cannot be modified".to_string())
}

/// Checks performed on the raw string, before any normalization gets a chance
/// to absorb an escape attempt.
fn syntactic_rejection(candidate: &str) -> Option<&'static str> {
    if candidate.contains('\0') {
        return Some("Path contains a null byte");
    }
    if candidate.split(['/', '\\']).any(|segment| segment == "..") {
        return Some("Path traversal detected");
    }
    if candidate.starts_with('~') {
        return Some("Home directory shorthand is not allowed");
    }
    if candidate.starts_with('/') || candidate.starts_with('\\') {
        return Some("Absolute paths are not allowed");
    }
    let bytes = candidate.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        return Some("Absolute paths are not allowed");
    }
    None
}

/// Canonicalizes the longest prefix of `path` that exists and re-appends the
/// rest, so symlinks pointing out of the workspace are seen through even when
/// the final component does not exist yet.
fn resolve_existing_prefix(path: &Path) -> io::Result<PathBuf> {
    let mut existing = path.to_path_buf();
    let mut missing = Vec::new();

    loop {
        match existing.symlink_metadata() {
            // A dangling symlink fails here and is rejected by the caller.
            Ok(_) => break,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let Some(name) = existing.file_name() else {
                    return Err(e);
                };
                missing.push(name.to_os_string());
                if !existing.pop() {
                    return Err(e);
                }
            }
            Err(e) => return Err(e),
        }
    }

    let mut resolved = existing.canonicalize()?;
    for name in missing.into_iter().rev() {
        resolved.push(name);
    }
    Ok(resolved)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;

    fn validator(root: &Path) -> PathValidator {
        let boundary =
            WorkspaceBoundary::new(root, &[".git".to_string(), ".env".to_string()]).unwrap();
        PathValidator::new(Arc::new(boundary))
    }

    #[rstest]
    #[case("../../etc/passwd")]
    #[case("src/../../outside")]
    #[case("src\\..\\..\\outside")]
    #[case("..")]
    #[case("/etc/passwd")]
    #[case("\\windows\\system32")]
    #[case("C:\\Windows")]
    #[case("c:/windows")]
    #[case("~/.ssh/id_rsa")]
    #[case("~")]
    #[case("file\0.txt")]
    fn test_rejects_before_normalization(#[case] candidate: &str) {
        let temp = tempfile::tempdir().unwrap();
        let verdict = validator(temp.path()).validate(candidate);
        assert!(!verdict.valid, "{candidate:?} should be rejected");
        assert!(verdict.reason.is_some());
    }

    #[rstest]
    #[case("")]
    #[case(".")]
    #[case("src/main.rs")]
    #[case("./src/new_file.rs")]
    #[case("missing/dir/file.txt")]
    #[case(".github/workflows/ci.yml")]
    #[case("name..with..dots.txt")]
    fn test_accepts_descendants(#[case] candidate: &str) {
        let temp = tempfile::tempdir().unwrap();
        fs::create_dir(temp.path().join("src")).unwrap();
        fs::write(temp.path().join("src").join("main.rs"), "fn main() {}").unwrap();

        let verdict = validator(temp.path()).validate(candidate);
        assert!(verdict.valid, "{candidate:?} rejected: {:?}", verdict.reason);
    }

    #[rstest]
    #[case(".git")]
    #[case(".git/config")]
    #[case(".env")]
    fn test_rejects_protected_paths(#[case] candidate: &str) {
        let temp = tempfile::tempdir().unwrap();
        let verdict = validator(temp.path()).validate(candidate);
        assert!(!verdict.valid);
        assert!(verdict.reason.unwrap().contains("protected"));
    }

    #[test]
    fn test_resolve_returns_absolute_location() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let validator = validator(temp.path());
        let resolved = validator.resolve("src/lib.rs")?;
        assert_eq!(resolved, temp.path().canonicalize()?.join("src").join("lib.rs"));
        assert_eq!(validator.relative(&resolved), "src/lib.rs");
        Ok(())
    }

    #[test]
    fn test_resolve_target_refuses_root() {
        let temp = tempfile::tempdir().unwrap();
        let validator = validator(temp.path());
        assert!(validator.resolve(".").is_ok());
        assert!(matches!(
            validator.resolve_target("."),
            Err(ToolError::PathRejected(_))
        ));
        assert!(validator.resolve_target("file.txt").is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_escape_is_rejected() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        let outside = tempfile::tempdir()?;
        fs::write(outside.path().join("secret.txt"), "secret")?;
        std::os::unix::fs::symlink(outside.path(), workspace.path().join("link"))?;

        let validator = validator(workspace.path());
        assert!(!validator.validate("link/secret.txt").valid);
        assert!(!validator.validate("link/new.txt").valid);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_dangling_symlink_is_rejected() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        let outside = tempfile::tempdir()?;
        std::os::unix::fs::symlink(
            outside.path().join("not-yet"),
            workspace.path().join("dangling"),
        )?;

        assert!(!validator(workspace.path()).validate("dangling").valid);
        Ok(())
    }

    #[test]
    fn test_subtree_target_refuses_ancestors_of_protected_paths() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let boundary = WorkspaceBoundary::new(temp.path(), &["config/secrets".to_string()])?;
        let validator = PathValidator::new(Arc::new(boundary));

        let err = validator.resolve_subtree_target("config").unwrap_err();
        assert!(matches!(err, ToolError::PathRejected(_)));
        assert!(err.to_string().contains("config/secrets"));
        assert!(validator.resolve_subtree_target("config/public").is_ok());
        // Plain targets only care about what they name.
        assert!(validator.resolve_target("config").is_ok());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_target_keeps_final_symlink_unresolved() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        fs::create_dir(workspace.path().join("real"))?;
        fs::write(workspace.path().join("real").join("data.txt"), "data")?;
        std::os::unix::fs::symlink(
            workspace.path().join("real").join("data.txt"),
            workspace.path().join("alias.txt"),
        )?;

        let validator = validator(workspace.path());
        let target = validator.resolve_target("alias.txt")?;
        assert_eq!(validator.relative(&target), "alias.txt");
        assert!(target.symlink_metadata()?.file_type().is_symlink());

        let followed = validator.resolve("alias.txt")?;
        assert_eq!(validator.relative(&followed), "real/data.txt");
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_target_refuses_final_symlink_leaving_workspace() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        let outside = tempfile::tempdir()?;
        fs::write(outside.path().join("secret.txt"), "secret")?;
        std::os::unix::fs::symlink(
            outside.path().join("secret.txt"),
            workspace.path().join("escape.txt"),
        )?;
        std::os::unix::fs::symlink(
            workspace.path().join(".git"),
            workspace.path().join("git-alias"),
        )?;
        fs::create_dir(workspace.path().join(".git"))?;

        let validator = validator(workspace.path());
        assert!(matches!(
            validator.resolve_target("escape.txt"),
            Err(ToolError::PathRejected(_))
        ));
        assert!(matches!(
            validator.resolve_target("git-alias"),
            Err(ToolError::PathRejected(_))
        ));
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_inside_workspace_is_followed() -> anyhow::Result<()> {
        let workspace = tempfile::tempdir()?;
        fs::create_dir(workspace.path().join("real"))?;
        std::os::unix::fs::symlink(workspace.path().join("real"), workspace.path().join("alias"))?;

        let validator = validator(workspace.path());
        let resolved = validator.resolve("alias/file.txt")?;
        assert_eq!(validator.relative(&resolved), "real/file.txt");
        Ok(())
    }
}
