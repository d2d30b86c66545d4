use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// A directory owned by exactly one in-flight request. It is removed when the
/// guard is dropped, on success and failure paths alike; removal failures are
/// logged and never returned.
#[derive(Debug)]
pub struct ScratchDir {
    path: Option<PathBuf>,
}

impl ScratchDir {
    /// Creates the directory (and parents). An existing directory is reused.
    pub fn create(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        fs::create_dir_all(&path)?;
        debug!(path = %path.display(), "created scratch directory");
        Ok(Self { path: Some(path) })
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }

    /// Removes the directory now and reports the outcome.
    pub fn close(mut self) -> io::Result<()> {
        match self.path.take() {
            Some(path) => remove(&path),
            None => Ok(()),
        }
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(error) = remove(&path) {
                warn!(path = %path.display(), %error, "failed to remove scratch directory");
            }
        }
    }
}

fn remove(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed scratch directory");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(error) => Err(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn removes_directory_on_drop() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().join("req-1");
        {
            let scratch = ScratchDir::create(&path).expect("create");
            fs::write(scratch.path().join("package.json"), "{}").expect("write");
            assert!(path.is_dir());
        }
        assert!(!path.exists());
    }

    #[test]
    fn create_reuses_existing_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().join(".nola-temp");
        fs::create_dir(&path).expect("pre-existing dir");

        let scratch = ScratchDir::create(&path).expect("existing directory is fine");
        assert_eq!(scratch.path(), path.as_path());
    }

    #[test]
    fn close_tolerates_already_removed_directory() {
        let root = tempfile::tempdir().expect("tempdir");
        let path = root.path().join("req-2");
        let scratch = ScratchDir::create(&path).expect("create");
        fs::remove_dir_all(&path).expect("external removal");

        scratch.close().expect("missing directory is not an error");
    }
}
