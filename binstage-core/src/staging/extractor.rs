//! Archive extraction for downloaded tool artifacts.
//!
//! This module unpacks tar.gz, tar.xz and zip archives into a scoped scratch
//! directory, locates the requested executable and places it at its staged
//! path with executable permissions. It also reads single members straight
//! out of an archive for completion harvesting.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::types::ArchiveFormat;
use crate::error::{IoContext, Result, StageError};

/// Permission bits applied to every staged executable.
const EXECUTABLE_MODE: u32 = 0o755;

// ============================================================================
// Extractor
// ============================================================================

/// Extracts executables out of downloaded artifacts.
#[derive(Debug, Clone)]
pub struct ArchiveExtractor {
    scratch_root: PathBuf,
}

impl ArchiveExtractor {
    /// Scratch directories are created (and removed) under `scratch_root`.
    pub fn new(scratch_root: impl Into<PathBuf>) -> Self {
        Self {
            scratch_root: scratch_root.into(),
        }
    }

    /// Places `path_in_archive` from `archive_path` at `dest_path` and marks it executable.
    ///
    /// The member is looked up verbatim first, then by base name anywhere in
    /// the archive. When several files share the base name the one with the
    /// fewest path components wins, ties broken lexicographically. Artifacts
    /// that are not archives are copied as-is.
    pub fn extract(&self, archive_path: &Path, path_in_archive: &str, dest_path: &Path) -> Result<()> {
        let format = ArchiveFormat::from_name(&archive_path.to_string_lossy());

        if !format.is_archive() {
            debug!("{} is a raw binary, copying directly", archive_path.display());
            return place_executable(archive_path, dest_path);
        }

        fs::create_dir_all(&self.scratch_root).at(&self.scratch_root)?;
        // Dropped on every return path, removing the scratch tree.
        let scratch = tempfile::Builder::new()
            .prefix("extract-")
            .tempdir_in(&self.scratch_root)
            .at(&self.scratch_root)?;

        unpack(archive_path, scratch.path(), format)
            .map_err(|e| StageError::extraction(archive_path, e))?;

        let source = locate(scratch.path(), path_in_archive).ok_or_else(|| StageError::NotFound {
            member: path_in_archive.to_string(),
            archive: archive_path.to_path_buf(),
        })?;
        debug!("Found {} at {}", path_in_archive, source.display());

        place_executable(&source, dest_path)?;
        info!("Successfully placed executable at {}", dest_path.display());
        Ok(())
    }
}

/// Finds `path_in_archive` under `root`, verbatim or by base name.
fn locate(root: &Path, path_in_archive: &str) -> Option<PathBuf> {
    let relative = Path::new(path_in_archive);
    if is_safe_relative(relative) {
        let direct = root.join(relative);
        if direct.is_file() {
            return Some(direct);
        }
    }

    let base_name = relative.file_name()?;
    WalkDir::new(root)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == base_name)
        .map(|entry| entry.into_path())
        .min_by(|a, b| {
            a.components()
                .count()
                .cmp(&b.components().count())
                .then_with(|| a.cmp(b))
        })
}

fn is_safe_relative(path: &Path) -> bool {
    !path.as_os_str().is_empty()
        && path
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// Copies `source` to `dest` through a temporary sibling, then sets 0o755.
fn place_executable(source: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).at(parent)?;
    }

    let mut partial = dest.as_os_str().to_owned();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    let placed = fs::copy(source, &partial)
        .at(&partial)
        .and_then(|_| make_executable(&partial))
        .and_then(|_| fs::rename(&partial, dest).at(dest));

    if placed.is_err() && partial.exists() {
        if let Err(e) = fs::remove_file(&partial) {
            debug!("Could not remove {}: {}", partial.display(), e);
        }
    }
    placed
}

// ============================================================================
// Archive Unpacking
// ============================================================================

/// Unpacks an archive into `dest_dir`.
fn unpack(archive_path: &Path, dest_dir: &Path, format: ArchiveFormat) -> io::Result<()> {
    debug!(
        "Extracting {:?} archive {} to {}",
        format,
        archive_path.display(),
        dest_dir.display()
    );

    fs::create_dir_all(dest_dir)?;

    match format {
        ArchiveFormat::Zip => extract_zip(archive_path, dest_dir),
        ArchiveFormat::TarGz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(flate2::read::GzDecoder::new(reader), dest_dir)
        }
        ArchiveFormat::TarXz => {
            let reader = BufReader::new(File::open(archive_path)?);
            extract_tar(xz2::read::XzDecoder::new(reader), dest_dir)
        }
        ArchiveFormat::Raw => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "not an archive",
        )),
    }
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> io::Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(zip_error)?;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i).map_err(zip_error)?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => path.to_owned(),
            None => {
                debug!("Skipping unsafe path in zip");
                continue;
            }
        };

        let dest_path = dest_dir.join(&entry_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut outfile = File::create(&dest_path)?;
            io::copy(&mut entry, &mut outfile)?;
        }
    }

    debug!("ZIP extraction complete");
    Ok(())
}

fn extract_tar<R: Read>(reader: R, dest_dir: &Path) -> io::Result<()> {
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        let entry_type = entry.header().entry_type();

        // Links could point outside dest_dir.
        if entry_type.is_symlink() || entry_type.is_hard_link() {
            warn!("Skipping symlink/hardlink in tar archive");
            continue;
        }

        let path = entry.path()?.into_owned();
        if path.is_absolute() || path.components().any(|c| c == Component::ParentDir) {
            warn!("Skipping unsafe path in tar: {:?}", path);
            continue;
        }

        let dest_path = dest_dir.join(&path);

        if entry_type.is_dir() {
            fs::create_dir_all(&dest_path)?;
        } else if entry_type.is_file() {
            if let Some(parent) = dest_path.parent() {
                fs::create_dir_all(parent)?;
            }

            let mut outfile = File::create(&dest_path)?;
            io::copy(&mut entry, &mut outfile)?;
            outfile.flush()?;
        }
    }

    debug!("TAR extraction complete");
    Ok(())
}

fn zip_error(e: zip::result::ZipError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

// ============================================================================
// Single Member Reads
// ============================================================================

/// Reads one member, by exact path, straight out of an archive.
pub fn read_member(archive_path: &Path, member: &str) -> Result<Vec<u8>> {
    let not_found = || StageError::NotFound {
        member: member.to_string(),
        archive: archive_path.to_path_buf(),
    };

    match ArchiveFormat::from_name(&archive_path.to_string_lossy()) {
        ArchiveFormat::Zip => {
            let file = File::open(archive_path).at(archive_path)?;
            let mut archive = zip::ZipArchive::new(file)
                .map_err(|e| StageError::extraction(archive_path, e))?;
            let mut entry = match archive.by_name(member) {
                Ok(entry) => entry,
                Err(zip::result::ZipError::FileNotFound) => return Err(not_found()),
                Err(e) => return Err(StageError::extraction(archive_path, e)),
            };
            let mut buf = Vec::new();
            entry
                .read_to_end(&mut buf)
                .map_err(|e| StageError::extraction(archive_path, e))?;
            Ok(buf)
        }
        ArchiveFormat::TarGz => {
            let reader = BufReader::new(File::open(archive_path).at(archive_path)?);
            read_tar_member(flate2::read::GzDecoder::new(reader), member)
                .map_err(|e| StageError::extraction(archive_path, e))?
                .ok_or_else(not_found)
        }
        ArchiveFormat::TarXz => {
            let reader = BufReader::new(File::open(archive_path).at(archive_path)?);
            read_tar_member(xz2::read::XzDecoder::new(reader), member)
                .map_err(|e| StageError::extraction(archive_path, e))?
                .ok_or_else(not_found)
        }
        ArchiveFormat::Raw => Err(StageError::extraction(archive_path, "not an archive")),
    }
}

fn read_tar_member<R: Read>(reader: R, member: &str) -> io::Result<Option<Vec<u8>>> {
    let wanted = normalize_member(Path::new(member));
    let mut archive = tar::Archive::new(reader);

    for entry_result in archive.entries()? {
        let mut entry = entry_result?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        if normalize_member(&entry.path()?) == wanted {
            let mut buf = Vec::new();
            entry.read_to_end(&mut buf)?;
            return Ok(Some(buf));
        }
    }

    Ok(None)
}

/// Drops `.` components so `./a/b` and `a/b` compare equal.
fn normalize_member(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

// ============================================================================
// Unix Permissions
// ============================================================================

/// Sets owner/group/other execute (mode 0o755) on a file.
///
/// On Windows, this is a no-op.
#[allow(unused_variables)]
pub fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        fs::set_permissions(path, fs::Permissions::from_mode(EXECUTABLE_MODE)).at(path)?;
        debug!("Set executable permission on {}", path.display());
    }

    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Archive builders shared with the pipeline and completion tests.

    use super::*;

    pub(crate) fn write_tar_gz(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
        let mut builder = tar::Builder::new(encoder);

        for (name, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_path(name).unwrap();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append(&header, *data).unwrap();
        }

        builder.into_inner().unwrap().finish().unwrap();
    }

    pub(crate) fn tar_gz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("a.tar.gz");
        write_tar_gz(&path, files);
        fs::read(path).unwrap()
    }

    pub(crate) fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);

        for (name, data) in files {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }

        zip.finish().unwrap();
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::{write_tar_gz, write_zip};
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ArchiveExtractor) {
        let temp_dir = TempDir::new().unwrap();
        let extractor = ArchiveExtractor::new(temp_dir.path().join("scratch"));
        (temp_dir, extractor)
    }

    fn scratch_is_empty(temp_dir: &TempDir) -> bool {
        let scratch = temp_dir.path().join("scratch");
        !scratch.exists() || fs::read_dir(scratch).unwrap().next().is_none()
    }

    #[test]
    fn test_extract_tar_gz_verbatim_path() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("foo-1.2.3.tar.gz");
        write_tar_gz(&archive, &[("foo-1.2.3/foo", b"#!/bin/sh\necho foo\n"), ("README", b"hi")]);
        let dest = temp_dir.path().join("out/foo-1.2.3");

        extractor.extract(&archive, "foo-1.2.3/foo", &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"#!/bin/sh\necho foo\n");
        assert!(scratch_is_empty(&temp_dir));
    }

    #[test]
    fn test_extract_falls_back_to_recursive_search() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("tool.tar.gz");
        write_tar_gz(&archive, &[("nested/dir/tool", b"binary")]);
        let dest = temp_dir.path().join("tool-1.0");

        extractor.extract(&archive, "bin/tool", &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"binary");
    }

    #[test]
    fn test_recursive_search_prefers_shallowest_then_lexicographic() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("tool.zip");
        write_zip(
            &archive,
            &[
                ("z/deep/er/tool", b"deepest"),
                ("b/tool", b"b-level"),
                ("a/tool", b"a-level"),
            ],
        );
        let dest = temp_dir.path().join("tool-1.0");

        extractor.extract(&archive, "missing/tool", &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"a-level");
    }

    #[test]
    fn test_extract_zip() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("tool.zip");
        write_zip(&archive, &[("tool.exe", b"MZ"), ("docs/readme.txt", b"docs")]);
        let dest = temp_dir.path().join("tool-2.0");

        extractor.extract(&archive, "tool.exe", &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"MZ");
    }

    #[test]
    fn test_extract_raw_binary() {
        let (temp_dir, extractor) = setup();
        let raw = temp_dir.path().join("jq-linux-amd64");
        fs::write(&raw, b"\x7fELF").unwrap();
        let dest = temp_dir.path().join("staged/jq-1.7");

        extractor.extract(&raw, "jq", &dest).unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"\x7fELF");
        assert!(raw.exists());
    }

    #[test]
    fn test_missing_member_is_not_found_and_cleans_up() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("tool.tar.gz");
        write_tar_gz(&archive, &[("other", b"x")]);
        let dest = temp_dir.path().join("tool-1.0");

        let err = extractor.extract(&archive, "bin/tool", &dest).unwrap_err();

        assert!(matches!(err, StageError::NotFound { .. }));
        assert!(!dest.exists());
        assert!(scratch_is_empty(&temp_dir));
    }

    #[test]
    fn test_corrupt_archive_is_extraction_error() {
        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("broken.tar.gz");
        fs::write(&archive, b"definitely not gzip").unwrap();

        let err = extractor
            .extract(&archive, "tool", &temp_dir.path().join("tool-1"))
            .unwrap_err();

        assert!(matches!(err, StageError::Extraction { .. }));
        assert!(scratch_is_empty(&temp_dir));
    }

    #[cfg(unix)]
    #[test]
    fn test_extraction_is_idempotent() {
        use std::os::unix::fs::PermissionsExt;

        let (temp_dir, extractor) = setup();
        let archive = temp_dir.path().join("tool.tar.gz");
        write_tar_gz(&archive, &[("tool", b"same bytes")]);
        let first = temp_dir.path().join("first/tool-1");
        let second = temp_dir.path().join("second/tool-1");

        extractor.extract(&archive, "tool", &first).unwrap();
        extractor.extract(&archive, "tool", &second).unwrap();

        assert_eq!(fs::read(&first).unwrap(), fs::read(&second).unwrap());
        let mode_a = fs::metadata(&first).unwrap().permissions().mode() & 0o777;
        let mode_b = fs::metadata(&second).unwrap().permissions().mode() & 0o777;
        assert_eq!(mode_a, 0o755);
        assert_eq!(mode_a, mode_b);
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_placement_removes_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("tool");
        fs::write(&source, b"binary").unwrap();

        // A non-empty directory in the way makes the final rename fail.
        let dest = temp_dir.path().join("tool-1.0");
        fs::create_dir_all(dest.join("occupied")).unwrap();

        assert!(place_executable(&source, &dest).is_err());
        assert!(!temp_dir.path().join("tool-1.0.partial").exists());
        assert!(dest.join("occupied").is_dir());
    }

    #[test]
    fn test_make_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp_dir = TempDir::new().unwrap();
        let file_path = temp_dir.path().join("script.sh");
        fs::write(&file_path, b"#!/bin/bash\necho hello").unwrap();
        fs::set_permissions(&file_path, fs::Permissions::from_mode(0o644)).unwrap();

        make_executable(&file_path).unwrap();

        let metadata = fs::metadata(&file_path).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_tar_symlink_escape_blocked() {
        let temp_dir = TempDir::new().unwrap();
        let archive_path = temp_dir.path().join("malicious.tar.gz");
        let extract_dir = temp_dir.path().join("extracted");
        let escape_target = temp_dir.path().join("escaped_file.txt");

        {
            let file = File::create(&archive_path).unwrap();
            let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
            let mut builder = tar::Builder::new(encoder);

            let mut header = tar::Header::new_gnu();
            header.set_entry_type(tar::EntryType::Symlink);
            header.set_size(0);
            header.set_mode(0o777);
            builder
                .append_link(&mut header, "escape_link", "../escaped_file.txt")
                .unwrap();

            let data = b"This should NOT appear outside extraction dir!";
            let mut file_header = tar::Header::new_gnu();
            file_header.set_path("escape_link").unwrap();
            file_header.set_size(data.len() as u64);
            file_header.set_mode(0o644);
            file_header.set_cksum();
            builder.append(&file_header, &data[..]).unwrap();

            builder.into_inner().unwrap().finish().unwrap();
        }

        unpack(&archive_path, &extract_dir, ArchiveFormat::TarGz).unwrap();

        assert!(!escape_target.exists());
        assert!(extract_dir.join("escape_link").is_file());
    }

    #[test]
    fn test_read_member_from_tar_and_zip() {
        let temp_dir = TempDir::new().unwrap();
        let tgz = temp_dir.path().join("tool.tgz");
        write_tar_gz(&tgz, &[("./complete/_tool", b"#compdef tool")]);
        let zip = temp_dir.path().join("tool.zip");
        write_zip(&zip, &[("completions/tool.bash", b"complete -F _tool tool")]);

        assert_eq!(read_member(&tgz, "complete/_tool").unwrap(), b"#compdef tool");
        assert_eq!(
            read_member(&zip, "completions/tool.bash").unwrap(),
            b"complete -F _tool tool"
        );
        assert!(matches!(
            read_member(&zip, "completions/tool.fish"),
            Err(StageError::NotFound { .. })
        ));
        assert!(matches!(
            read_member(&tgz, "_tool"),
            Err(StageError::NotFound { .. })
        ));
    }
}
