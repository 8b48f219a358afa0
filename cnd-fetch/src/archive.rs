use crate::error::FetchError;
use anyhow::{Context, Result};
use log::debug;
use std::{
    fs::{self, File},
    io,
    path::Path,
};
use zip::{result::ZipError, ZipArchive};

#[cfg(target_family = "unix")]
use std::fs::{set_permissions, Permissions};
#[cfg(target_family = "unix")]
use std::os::unix::fs::PermissionsExt;

/// Unpacks every entry of the zip file at `archive_path` under `dest_dir`, replacing files that
/// are already there. Returns the number of files written.
pub(crate) fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<usize> {
    debug!(
        "extracting zip file at {} into {}",
        archive_path.display(),
        dest_dir.display(),
    );

    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open file at {}", archive_path.display()))?;
    let mut zip = ZipArchive::new(file).map_err(|e| extraction_error(archive_path, &e))?;

    let mut files = 0;
    for i in 0..zip.len() {
        let mut entry = zip
            .by_index(i)
            .map_err(|e| extraction_error(archive_path, &e))?;
        let Some(rel_path) = entry.enclosed_name() else {
            return Err(FetchError::Extraction {
                path: archive_path.to_path_buf(),
                reason: format!(
                    "entry `{}` would be written outside of the archive root",
                    entry.name()
                ),
            }
            .into());
        };
        let out_path = dest_dir.join(rel_path);

        if entry.is_dir() {
            debug!("creating directory {}", out_path.display());
            fs::create_dir_all(&out_path)
                .with_context(|| format!("Cannot create directory {}", out_path.display()))?;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Cannot create directory {}", parent.display()))?;
        }
        debug!("extracting {} to {}", entry.name(), out_path.display());
        let mut writer = File::create(&out_path)
            .with_context(|| format!("Cannot write to {}", out_path.display()))?;
        io::copy(&mut entry, &mut writer).map_err(|e| FetchError::Extraction {
            path: archive_path.to_path_buf(),
            reason: format!("failed to unpack `{}`: {e}", entry.name()),
        })?;

        #[cfg(target_family = "unix")]
        if let Some(mode) = entry.unix_mode() {
            set_permissions(&out_path, Permissions::from_mode(mode & 0o7777)).with_context(
                || format!("Cannot set permissions on {}", out_path.display()),
            )?;
        }

        files += 1;
    }

    debug!("extracted {files} files");
    Ok(files)
}

fn extraction_error(archive_path: &Path, e: &ZipError) -> FetchError {
    FetchError::Extraction {
        path: archive_path.to_path_buf(),
        reason: e.to_string(),
    }
}
