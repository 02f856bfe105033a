//! Packages apps into `.ipa` archives.
//!
//! An `.ipa` is a zip whose only top-level entry is `Payload/`, holding the
//! `.app` bundle.  The bundle is first copied to `<work>/Payload/<bundle>` and
//! that tree is then zipped into `<work>/<name>.ipa`, where `<name>` is the
//! bundle name without its extension.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use sideload_core::domain::staging::{sanitize_archive_name, ARCHIVE_EXTENSION};
use tracing::debug;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::application::ports::{ArchiveError, Archiver};

const PAYLOAD_DIR: &str = "Payload";

/// Zip-backed [`Archiver`].
#[derive(Debug, Default, Clone)]
pub struct ZipArchiver;

impl ZipArchiver {
    pub fn new() -> Self {
        Self
    }
}

impl Archiver for ZipArchiver {
    fn package(&self, source: &Path, work_dir: &Path) -> Result<PathBuf, ArchiveError> {
        if source.is_dir() {
            return package_bundle(source, work_dir);
        }
        if source.is_file() && has_ipa_extension(source) {
            let stem = archive_stem(source);
            let target = work_dir.join(format!("{stem}.{ARCHIVE_EXTENSION}"));
            fs::copy(source, &target)?;
            debug!("using prebuilt archive {}", source.display());
            return Ok(target);
        }
        Err(ArchiveError::UnsupportedInput(source.to_path_buf()))
    }
}

fn package_bundle(bundle: &Path, work_dir: &Path) -> Result<PathBuf, ArchiveError> {
    let bundle_name = bundle
        .file_name()
        .ok_or_else(|| ArchiveError::UnsupportedInput(bundle.to_path_buf()))?;

    let payload = work_dir.join(PAYLOAD_DIR);
    copy_tree(bundle, &payload.join(bundle_name))?;

    let target = work_dir.join(format!("{}.{ARCHIVE_EXTENSION}", archive_stem(bundle)));
    zip_tree(&payload, work_dir, &target)?;
    debug!("packaged {} into {}", bundle.display(), target.display());
    Ok(target)
}

fn archive_stem(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    sanitize_archive_name(&stem)
}

fn has_ipa_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ARCHIVE_EXTENSION))
}

fn copy_tree(from: &Path, to: &Path) -> io::Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let dest = to.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

/// Zips `root` so entries are named relative to `base` (`Payload/...`).
fn zip_tree(root: &Path, base: &Path, target: &Path) -> Result<(), ArchiveError> {
    let mut zip = ZipWriter::new(BufWriter::new(File::create(target)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        let name = entry_name(entry.path(), base)?;

        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(zip_error)?;
        } else {
            #[cfg(unix)]
            let options = {
                use std::os::unix::fs::PermissionsExt;
                options.unix_permissions(entry.metadata().map_err(io::Error::from)?.permissions().mode())
            };
            zip.start_file(name, options).map_err(zip_error)?;
            let mut reader = BufReader::new(File::open(entry.path())?);
            io::copy(&mut reader, &mut zip)?;
        }
    }

    zip.finish().map_err(zip_error)?.flush()?;
    Ok(())
}

/// Zip entry names always use `/`.
fn entry_name(path: &Path, base: &Path) -> Result<String, ArchiveError> {
    let relative = path
        .strip_prefix(base)
        .map_err(|_| ArchiveError::UnsupportedInput(path.to_path_buf()))?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

fn zip_error(e: zip::result::ZipError) -> ArchiveError {
    ArchiveError::Zip(e.to_string())
}
