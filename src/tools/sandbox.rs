use crate::core::sanitize_name;
use crate::errors::ToolError;
use std::path::{Component as PathComponent, Path, PathBuf};
use tracing::{debug, warn};

/// The single directory every file tool operation is confined to.
#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Creates the sandbox, making sure the root directory exists.
    ///
    /// # Arguments
    /// * `root` - Output directory, relative to the working directory or absolute
    ///
    /// # Returns
    /// * `Result<Self, ToolError>` - The sandbox with a canonical absolute root
    pub fn new(root: impl AsRef<Path>) -> Result<Self, ToolError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(|source| ToolError::Io {
            path: root.display().to_string(),
            source,
        })?;
        let root = root.canonicalize().map_err(|source| ToolError::Io {
            path: root.display().to_string(),
            source,
        })?;
        debug!("Sandbox root: {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sanitizes every segment of `filename` and resolves it under the root.
    ///
    /// # Returns
    /// * `Ok((absolute, relative))` - The resolved path and its `/`-joined relative form
    /// * `Err(ToolError::Sandbox)` - The request tried to leave the root
    pub fn resolve(&self, filename: &str) -> Result<(PathBuf, String), ToolError> {
        let normalized = filename.replace('\\', "/");
        let mut segments = Vec::new();
        for raw in normalized.split('/') {
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed == "." {
                continue;
            }
            let segment = sanitize_name(trimmed);
            if segment == ".." || trimmed == ".." || segment.split('/').any(|s| s == "..") {
                warn!("Rejected path with parent segment: {}", filename);
                return Err(ToolError::Sandbox(filename.to_string()));
            }
            segments.push(segment);
        }
        if segments.is_empty() {
            return Err(ToolError::MissingParam("filename"));
        }

        let relative = segments.join("/");
        let absolute = normalize(&self.root.join(&relative));
        if !absolute.starts_with(&self.root) {
            warn!("Rejected path outside sandbox: {}", filename);
            return Err(ToolError::Sandbox(filename.to_string()));
        }
        Ok((absolute, relative))
    }

    /// Writes `content` to `filename`, creating parent directories.
    ///
    /// # Returns
    /// * `Result<String, ToolError>` - The sandbox-relative path that was written
    pub async fn write(&self, filename: &str, content: &str) -> Result<String, ToolError> {
        let (absolute, relative) = self.resolve(filename)?;
        if let Some(parent) = absolute.parent() {
            let existing = deepest_existing(parent).await;
            self.check_real_path(&existing, &relative).await?;
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ToolError::Io {
                    path: relative.clone(),
                    source,
                })?;
            self.check_real_path(parent, &relative).await?;
        }
        if let Ok(meta) = tokio::fs::symlink_metadata(&absolute).await {
            if meta.file_type().is_symlink() {
                warn!("Refusing to write through symlink: {}", relative);
                return Err(ToolError::Sandbox(relative));
            }
        }
        tokio::fs::write(&absolute, content)
            .await
            .map_err(|source| ToolError::Io {
                path: relative.clone(),
                source,
            })?;
        Ok(relative)
    }

    /// Reads `filename` as UTF-8 text.
    pub async fn read(&self, filename: &str) -> Result<(String, String), ToolError> {
        let (absolute, relative) = self.resolve(filename)?;
        if !tokio::fs::try_exists(&absolute).await.unwrap_or(false) {
            return Err(ToolError::NotFound(relative));
        }
        self.check_real_path(&absolute, &relative).await?;
        let content = tokio::fs::read_to_string(&absolute)
            .await
            .map_err(|source| ToolError::Io {
                path: relative.clone(),
                source,
            })?;
        Ok((content, relative))
    }

    /// Rejects paths that escape the root through a symlink.
    async fn check_real_path(&self, path: &Path, relative: &str) -> Result<(), ToolError> {
        let real = tokio::fs::canonicalize(path)
            .await
            .map_err(|source| ToolError::Io {
                path: relative.to_string(),
                source,
            })?;
        if real.starts_with(&self.root) {
            Ok(())
        } else {
            Err(ToolError::Sandbox(relative.to_string()))
        }
    }
}

/// Closest ancestor of `path` (or `path` itself) that is present on disk, dangling links
/// included.
async fn deepest_existing(path: &Path) -> PathBuf {
    let mut current = path.to_path_buf();
    while tokio::fs::symlink_metadata(&current).await.is_err() {
        if !current.pop() {
            break;
        }
    }
    current
}

/// Lexical normalization of `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            PathComponent::ParentDir => {
                out.pop();
            }
            PathComponent::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sandbox() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path().join("output")).unwrap();
        (dir, sandbox)
    }

    #[tokio::test]
    async fn write_then_read_returns_same_content() {
        let (_dir, sandbox) = sandbox();
        let content = "<!DOCTYPE html>\n<p>Kayaks & paddles</p>\n";
        let rel = sandbox
            .write("kayak_site/Coder/index.html", content)
            .await
            .unwrap();
        assert_eq!(rel, "kayak_site/Coder/index.html");
        let (read, read_rel) = sandbox.read(&rel).await.unwrap();
        assert_eq!(read, content);
        assert_eq!(read_rel, rel);
    }

    #[tokio::test]
    async fn parent_segments_are_rejected() {
        let (dir, sandbox) = sandbox();
        for bad in ["../escape.txt", "a/../../escape.txt", "..\\escape.txt", "a/ .. /b"] {
            let err = sandbox.write(bad, "nope").await.unwrap_err();
            assert!(matches!(err, ToolError::Sandbox(_)), "{} -> {:?}", bad, err);
        }
        assert!(!dir.path().join("escape.txt").exists());
        assert!(matches!(
            sandbox.read("../output/x").await.unwrap_err(),
            ToolError::Sandbox(_)
        ));
    }

    #[test]
    fn forbidden_characters_and_whitespace_are_cleaned() {
        let (_dir, sandbox) = sandbox();
        let (abs, rel) = sandbox.resolve("/my proj/<Coder>/spe|cs?.md").unwrap();
        assert_eq!(rel, "my_proj/Coder/specs.md");
        assert!(abs.starts_with(sandbox.root()));
    }

    #[test]
    fn empty_paths_are_refused() {
        let (_dir, sandbox) = sandbox();
        assert!(matches!(
            sandbox.resolve(" / ./ "),
            Err(ToolError::MissingParam("filename"))
        ));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn write_through_file_symlink_is_refused() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("outside.txt");
        std::fs::write(&outside, "original").unwrap();
        std::fs::create_dir_all(sandbox.root().join("proj")).unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.root().join("proj/link.txt")).unwrap();

        let err = sandbox.write("proj/link.txt", "overwritten").await.unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)), "{:?}", err);
        assert_eq!(std::fs::read_to_string(&outside).unwrap(), "original");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinked_directory_does_not_create_outside_dirs() {
        let (dir, sandbox) = sandbox();
        let outside = dir.path().join("elsewhere");
        std::fs::create_dir_all(&outside).unwrap();
        std::os::unix::fs::symlink(&outside, sandbox.root().join("escape")).unwrap();

        let err = sandbox
            .write("escape/deep/nested/file.txt", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)), "{:?}", err);
        assert!(!outside.join("deep").exists());
    }

    #[tokio::test]
    async fn missing_file_is_reported() {
        let (_dir, sandbox) = sandbox();
        assert!(matches!(
            sandbox.read("nothing/here.md").await,
            Err(ToolError::NotFound(_))
        ));
    }
}
