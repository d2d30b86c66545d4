//! Zip packing and unpacking for dependency artifacts and function code.

use std::fs::{self, File, Metadata};
use std::io::{self, Seek, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

const DIRECTORY_MODE: u32 = 0o755;
const EXECUTABLE_MODE: u32 = 0o755;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O failed for {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

fn io_error(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Zips `source_dir` so that every entry sits under `prefix/`. A missing
/// source directory yields an archive holding only the empty `prefix/`
/// directory. Returns the number of entries written.
pub fn pack_directory(
    source_dir: &Path,
    prefix: &str,
    destination: &Path,
) -> Result<usize, ArchiveError> {
    let file = File::create(destination).map_err(io_error(destination))?;
    let mut zip = ZipWriter::new(file);
    let prefix = prefix.trim_matches('/');

    zip.add_directory(format!("{prefix}/"), directory_options())?;
    let mut entries = 1;
    if source_dir.is_dir() {
        entries += pack_entries(&mut zip, source_dir, prefix)?;
    } else {
        debug!(dir = %source_dir.display(), "source directory absent, packing empty directory");
    }

    zip.finish()?;
    Ok(entries)
}

/// Zips a single executable under `entry_name` with mode 0755.
pub fn pack_executable(
    executable: &Path,
    entry_name: &str,
    destination: &Path,
) -> Result<(), ArchiveError> {
    let mut source = File::open(executable).map_err(io_error(executable))?;
    let file = File::create(destination).map_err(io_error(destination))?;
    let mut zip = ZipWriter::new(file);

    zip.start_file(entry_name, file_options(EXECUTABLE_MODE))?;
    io::copy(&mut source, &mut zip).map_err(io_error(executable))?;
    zip.finish()?;
    Ok(())
}

fn pack_entries<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    dir: &Path,
    archive_dir: &str,
) -> Result<usize, ArchiveError> {
    let mut children = fs::read_dir(dir)
        .map_err(io_error(dir))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(dir))?;
    children.sort_by_key(|entry| entry.file_name());

    let mut written = 0;
    for child in children {
        let path = child.path();
        let name = format!("{archive_dir}/{}", child.file_name().to_string_lossy());
        let file_type = child.file_type().map_err(io_error(&path))?;

        if file_type.is_symlink() {
            let metadata = match fs::metadata(&path) {
                Ok(metadata) => metadata,
                Err(error) => {
                    warn!(path = %path.display(), %error, "skipping dangling symlink");
                    continue;
                }
            };
            if metadata.is_dir() {
                debug!(path = %path.display(), "skipping directory symlink");
                continue;
            }
            write_file(zip, &path, &name, &metadata)?;
            written += 1;
        } else if file_type.is_dir() {
            zip.add_directory(format!("{name}/"), directory_options())?;
            written += 1 + pack_entries(zip, &path, &name)?;
        } else {
            let metadata = child.metadata().map_err(io_error(&path))?;
            write_file(zip, &path, &name, &metadata)?;
            written += 1;
        }
    }

    Ok(written)
}

fn write_file<W: Write + Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    name: &str,
    metadata: &Metadata,
) -> Result<(), ArchiveError> {
    zip.start_file(name, file_options(file_mode(metadata)))?;
    let mut source = File::open(path).map_err(io_error(path))?;
    io::copy(&mut source, zip).map_err(io_error(path))?;
    Ok(())
}

fn directory_options() -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Stored)
        .unix_permissions(DIRECTORY_MODE)
}

fn file_options(mode: u32) -> FileOptions {
    FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(mode)
}

#[cfg(unix)]
fn file_mode(metadata: &Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o777
}

#[cfg(not(unix))]
fn file_mode(_metadata: &Metadata) -> u32 {
    0o644
}

/// An opened archive. Opening validates the central directory, so callers can
/// decide to replace existing files only once the archive is known readable.
pub struct ArchiveReader {
    archive: ZipArchive<File>,
}

impl ArchiveReader {
    pub fn open(path: &Path) -> Result<Self, ArchiveError> {
        let file = File::open(path).map_err(io_error(path))?;
        Ok(Self {
            archive: ZipArchive::new(file)?,
        })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.len() == 0
    }

    /// Extracts every entry whose name stays inside `destination`. Returns the
    /// number of entries extracted.
    pub fn extract_into(mut self, destination: &Path) -> Result<usize, ArchiveError> {
        fs::create_dir_all(destination).map_err(io_error(destination))?;

        let mut extracted = 0;
        for index in 0..self.archive.len() {
            let mut entry = self.archive.by_index(index)?;
            let Some(relative) = entry.enclosed_name().map(Path::to_path_buf) else {
                warn!(entry = entry.name(), "skipping archive entry outside destination");
                continue;
            };
            let output_path = destination.join(relative);

            if entry.is_dir() {
                fs::create_dir_all(&output_path).map_err(io_error(&output_path))?;
            } else {
                if let Some(parent) = output_path.parent() {
                    fs::create_dir_all(parent).map_err(io_error(parent))?;
                }
                let mut output = File::create(&output_path).map_err(io_error(&output_path))?;
                io::copy(&mut entry, &mut output).map_err(io_error(&output_path))?;
            }

            #[cfg(unix)]
            if let Some(mode) = entry.unix_mode() {
                use std::os::unix::fs::PermissionsExt;
                let permissions = fs::Permissions::from_mode(mode & 0o7777);
                if let Err(error) = fs::set_permissions(&output_path, permissions) {
                    warn!(path = %output_path.display(), %error, "failed to restore permissions");
                }
            }

            extracted += 1;
        }

        Ok(extracted)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;

    use super::*;

    fn entry_names(path: &Path) -> Vec<String> {
        let mut archive = ZipArchive::new(File::open(path).expect("open zip")).expect("read zip");
        (0..archive.len())
            .map(|index| archive.by_index(index).expect("entry").name().to_string())
            .collect()
    }

    #[test]
    fn packs_tree_under_prefix() {
        let dir = tempfile::tempdir().expect("tempdir");
        let modules = dir.path().join("node_modules");
        fs::create_dir_all(modules.join("left-pad")).expect("mkdir");
        fs::write(modules.join("left-pad/index.js"), "module.exports = 1;").expect("write");
        fs::write(modules.join(".package-lock.json"), "{}").expect("write");

        let zip_path = dir.path().join("node_modules.zip");
        let entries = pack_directory(&modules, "node_modules", &zip_path).expect("pack");

        assert_eq!(entries, 4);
        assert_eq!(
            entry_names(&zip_path),
            vec![
                "node_modules/",
                "node_modules/.package-lock.json",
                "node_modules/left-pad/",
                "node_modules/left-pad/index.js",
            ]
        );
    }

    #[test]
    fn missing_source_packs_empty_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let zip_path = dir.path().join("node_modules.zip");

        let entries =
            pack_directory(&dir.path().join("absent"), "node_modules", &zip_path).expect("pack");

        assert_eq!(entries, 1);
        assert_eq!(entry_names(&zip_path), vec!["node_modules/"]);
    }

    #[test]
    fn unpack_restores_files_and_directories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let modules = dir.path().join("src/node_modules");
        fs::create_dir_all(modules.join("a/b")).expect("mkdir");
        fs::write(modules.join("a/b/c.txt"), "payload").expect("write");

        let zip_path = dir.path().join("out.zip");
        pack_directory(&modules, "node_modules", &zip_path).expect("pack");

        let target = dir.path().join("project");
        let reader = ArchiveReader::open(&zip_path).expect("open");
        assert_eq!(reader.len(), 4);
        reader.extract_into(&target).expect("extract");

        let mut contents = String::new();
        File::open(target.join("node_modules/a/b/c.txt"))
            .expect("extracted file")
            .read_to_string(&mut contents)
            .expect("read");
        assert_eq!(contents, "payload");
    }

    #[test]
    fn open_rejects_non_zip_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let bogus = dir.path().join("bogus.zip");
        fs::write(&bogus, "not a zip").expect("write");

        let error = ArchiveReader::open(&bogus).err().expect("should fail");
        assert!(matches!(error, ArchiveError::Zip(_)));
    }

    #[cfg(unix)]
    #[test]
    fn executable_entry_keeps_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().expect("tempdir");
        let binary = dir.path().join("builder_lambda");
        fs::write(&binary, b"\x7fELF").expect("write");

        let zip_path = dir.path().join("builder.zip");
        pack_executable(&binary, "bootstrap", &zip_path).expect("pack");

        let mut archive = ZipArchive::new(File::open(&zip_path).expect("open")).expect("zip");
        let entry = archive.by_name("bootstrap").expect("bootstrap entry");
        assert_eq!(entry.unix_mode().map(|mode| mode & 0o777), Some(0o755));

        let target = dir.path().join("out");
        ArchiveReader::open(&zip_path)
            .expect("open")
            .extract_into(&target)
            .expect("extract");
        let mode = fs::metadata(target.join("bootstrap"))
            .expect("metadata")
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[cfg(unix)]
    #[test]
    fn file_symlinks_are_followed_and_directory_symlinks_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let modules = dir.path().join("node_modules");
        fs::create_dir_all(modules.join("pkg/bin")).expect("mkdir");
        fs::create_dir_all(modules.join(".bin")).expect("mkdir");
        fs::write(modules.join("pkg/bin/cli.js"), "#!/usr/bin/env node").expect("write");
        std::os::unix::fs::symlink("../pkg/bin/cli.js", modules.join(".bin/cli"))
            .expect("file symlink");
        std::os::unix::fs::symlink("pkg", modules.join("alias")).expect("dir symlink");

        let zip_path = dir.path().join("node_modules.zip");
        pack_directory(&modules, "node_modules", &zip_path).expect("pack");

        let names = entry_names(&zip_path);
        assert!(names.contains(&"node_modules/.bin/cli".to_string()));
        assert!(!names.iter().any(|name| name.starts_with("node_modules/alias")));
    }
}
