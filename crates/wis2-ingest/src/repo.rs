//! Content repository keyed by (topic, file name)
//!
//! The filesystem layout is `<root>/<topic segments as nested dirs>/<name>`,
//! so `origin/a/wis2/x` + `f.bufr` lands at `<root>/origin/a/wis2/x/f.bufr`.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::RepoError;

/// Result type alias for repository operations
pub type Result<T> = std::result::Result<T, RepoError>;

/// Storage for verified files
#[async_trait]
pub trait Repository: Send + Sync {
    /// Whether a file is already stored under (topic, name)
    async fn exists(&self, topic: &str, name: &str) -> Result<bool>;

    /// Move the file at `source` into the repository, returning its final path
    async fn store(&self, topic: &str, name: &str, source: &Path) -> Result<PathBuf>;

    /// Open a stored file for reading
    async fn get(&self, topic: &str, name: &str) -> Result<tokio::fs::File>;
}

/// Repository rooted at a local directory
#[derive(Debug, Clone)]
pub struct FsRepository {
    root: PathBuf,
}

fn check_segment<'a>(segment: &'a str, what: &str) -> Result<&'a str> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains('/')
        || segment.contains('\\')
    {
        return Err(RepoError::InvalidKey(format!("{} segment '{}'", what, segment)));
    }
    Ok(segment)
}

impl FsRepository {
    /// Open a repository at `root`, which must be an existing directory
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let metadata = std::fs::metadata(&root).map_err(|e| RepoError::io(&root, e))?;
        if !metadata.is_dir() {
            return Err(RepoError::NotADirectory(root));
        }
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding files for `topic`
    pub fn topic_dir(&self, topic: &str) -> Result<PathBuf> {
        let mut dir = self.root.clone();
        for segment in topic.split('/') {
            dir.push(check_segment(segment, "topic")?);
        }
        Ok(dir)
    }

    /// Final path for (topic, name)
    pub fn path_for(&self, topic: &str, name: &str) -> Result<PathBuf> {
        Ok(self.topic_dir(topic)?.join(check_segment(name, "file name")?))
    }
}

/// Copy `source` next to `dest` and rename it into place
fn copy_into_place(source: &Path, dir: &Path, dest: &Path) -> io::Result<()> {
    let mut tmp = NamedTempFile::new_in(dir)?;
    let mut input = std::fs::File::open(source)?;
    io::copy(&mut input, tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(dest).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl Repository for FsRepository {
    async fn exists(&self, topic: &str, name: &str) -> Result<bool> {
        let path = self.path_for(topic, name)?;
        tokio::fs::try_exists(&path)
            .await
            .map_err(|e| RepoError::io(&path, e))
    }

    async fn store(&self, topic: &str, name: &str, source: &Path) -> Result<PathBuf> {
        let dest = self.path_for(topic, name)?;
        let dir = self.topic_dir(topic)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RepoError::io(&dir, e))?;

        match tokio::fs::rename(source, &dest).await {
            Ok(()) => {},
            Err(rename_err) => {
                // typically a cross-device move out of the system temp dir
                debug!(error = %rename_err, dest = %dest.display(), "Rename failed, copying instead");
                let (from, to, into) = (source.to_path_buf(), dest.clone(), dir.clone());
                tokio::task::spawn_blocking(move || copy_into_place(&from, &into, &to))
                    .await
                    .map_err(|e| RepoError::io(&dest, io::Error::other(e)))?
                    .map_err(|e| RepoError::io(&dest, e))?;
                if let Err(e) = tokio::fs::remove_file(source).await {
                    warn!(error = %e, path = %source.display(), "Failed to remove source after copy");
                }
            },
        }

        Ok(dest)
    }

    async fn get(&self, topic: &str, name: &str) -> Result<tokio::fs::File> {
        let path = self.path_for(topic, name)?;
        tokio::fs::File::open(&path)
            .await
            .map_err(|e| RepoError::io(&path, e))
    }
}
