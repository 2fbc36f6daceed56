//! Per-group attachment storage.
//!
//! The agent sees attachments under a fixed workspace root
//! (`/workspace/ipc/files/<name>`); on the host each registered group gets its
//! own directory under `<data_dir>/ipc/<folder>/`.

use std::path::{Component, Path, PathBuf};

use crate::{errors::Error, Result};

/// Workspace root as seen by the agent.
pub const WORKSPACE_ROOT: &str = "/workspace/ipc";

const FILES_DIR: &str = "files";

#[derive(Clone, Debug)]
pub struct GroupStorage {
    root: PathBuf,
}

/// A persisted inbound attachment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SavedAttachment {
    pub host_path: PathBuf,
    /// Path handed to the agent.
    pub logical_path: String,
}

impl GroupStorage {
    /// `root` is the directory holding one subdirectory per group folder.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn group_dir(&self, folder: &str) -> Result<PathBuf> {
        validate_folder(folder)?;
        Ok(self.root.join(folder))
    }

    pub fn files_dir(&self, folder: &str) -> Result<PathBuf> {
        Ok(self.group_dir(folder)?.join(FILES_DIR))
    }

    /// Persist an inbound attachment as `<id>-<name>` in the group's files dir.
    pub async fn save_attachment(
        &self,
        folder: &str,
        file_id: &str,
        file_name: &str,
        bytes: &[u8],
    ) -> Result<SavedAttachment> {
        let dir = self.files_dir(folder)?;
        tokio::fs::create_dir_all(&dir).await?;

        let safe_name = format!(
            "{}-{}",
            sanitize_filename(file_id),
            sanitize_filename(file_name)
        );
        let host_path = dir.join(&safe_name);
        tokio::fs::write(&host_path, bytes).await?;

        Ok(SavedAttachment {
            host_path,
            logical_path: format!("{WORKSPACE_ROOT}/{FILES_DIR}/{safe_name}"),
        })
    }

    /// Map a path the agent used back to the host.
    ///
    /// Accepts `/workspace/ipc/<relative>` and bare/relative names (resolved
    /// under the group's files dir). Other absolute paths and anything that
    /// climbs out of its root are rejected.
    pub fn resolve_attachment(&self, folder: &str, logical: &str) -> Result<PathBuf> {
        let group_dir = self.group_dir(folder)?;

        let workspace_prefix = format!("{WORKSPACE_ROOT}/");
        let relative = if let Some(rest) = logical.strip_prefix(&workspace_prefix) {
            PathBuf::from(rest)
        } else if Path::new(logical).is_relative() {
            Path::new(FILES_DIR).join(logical)
        } else {
            return Err(Error::InvalidPath {
                path: PathBuf::from(logical),
                reason: format!("outside {WORKSPACE_ROOT}"),
            });
        };

        let escapes = relative.as_os_str().is_empty()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
        if escapes {
            return Err(Error::InvalidPath {
                path: PathBuf::from(logical),
                reason: "path escapes the group directory".to_string(),
            });
        }

        Ok(group_dir.join(relative))
    }
}

fn validate_folder(folder: &str) -> Result<()> {
    let ok = !folder.is_empty()
        && folder != "."
        && folder != ".."
        && !folder.contains(['/', '\\'])
        && !folder.starts_with('.');
    if ok {
        Ok(())
    } else {
        Err(Error::InvalidPath {
            path: PathBuf::from(folder),
            reason: "invalid group folder name".to_string(),
        })
    }
}

pub fn sanitize_filename(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            out.push(ch);
        } else {
            out.push('_');
        }
    }
    let out = out.trim_start_matches('.').to_string();
    if out.is_empty() {
        "file".to_string()
    } else {
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        PathBuf::from(format!("/tmp/{prefix}-{}-{ts}", std::process::id()))
    }

    #[test]
    fn resolves_workspace_and_bare_paths() {
        let st = GroupStorage::new("/data/ipc");
        assert_eq!(
            st.resolve_attachment("main", "/workspace/ipc/files/report.pdf")
                .unwrap(),
            PathBuf::from("/data/ipc/main/files/report.pdf")
        );
        assert_eq!(
            st.resolve_attachment("main", "report.pdf").unwrap(),
            PathBuf::from("/data/ipc/main/files/report.pdf")
        );
        assert_eq!(
            st.resolve_attachment("main", "/workspace/ipc/out/chart.png")
                .unwrap(),
            PathBuf::from("/data/ipc/main/out/chart.png")
        );
    }

    #[test]
    fn rejects_escaping_paths() {
        let st = GroupStorage::new("/data/ipc");
        assert!(st.resolve_attachment("main", "../secret").is_err());
        assert!(st
            .resolve_attachment("main", "/workspace/ipc/../../etc/passwd")
            .is_err());
        assert!(st.resolve_attachment("main", "/etc/passwd").is_err());
        assert!(st.resolve_attachment("../main", "a.txt").is_err());
        assert!(st.resolve_attachment("", "a.txt").is_err());
    }

    #[test]
    fn sanitizes_names() {
        assert_eq!(sanitize_filename("my file (1).png"), "my_file__1_.png");
        assert_eq!(sanitize_filename("../../x"), "_.._x");
        assert_eq!(sanitize_filename(""), "file");
    }

    #[tokio::test]
    async fn saves_attachment_under_group_files_dir() {
        let root = scratch("relay-storage");
        let st = GroupStorage::new(&root);

        let saved = st
            .save_attachment("team", "F01", "notes.txt", b"hello")
            .await
            .unwrap();
        assert_eq!(saved.logical_path, "/workspace/ipc/files/F01-notes.txt");
        assert_eq!(saved.host_path, root.join("team/files/F01-notes.txt"));
        assert_eq!(std::fs::read(&saved.host_path).unwrap(), b"hello");

        let _ = std::fs::remove_dir_all(&root);
    }
}
