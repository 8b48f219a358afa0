use crate::{archive::extract_zip, error::FetchError};
use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use std::{
    ffi::OsString,
    fs,
    path::{Path, PathBuf},
};

// The previous installation `cnd` is moved aside to `.cnd.cnd-fetch-old` while it is replaced.
const BACKUP_SUFFIX: &str = ".cnd-fetch-old";

/// Unpacks a downloaded release archive and moves its payload directory into place.
#[derive(Debug)]
pub(crate) struct Installer {
    extract_dir: PathBuf,
    payload_dir_name: String,
    install_path: PathBuf,
}

impl Installer {
    pub(crate) fn new(
        extract_dir: PathBuf,
        payload_dir_name: String,
        install_path: PathBuf,
    ) -> Self {
        Installer {
            extract_dir,
            payload_dir_name,
            install_path,
        }
    }

    pub(crate) fn install_path(&self) -> &Path {
        &self.install_path
    }

    /// Extracts the archive, checks that it holds the payload directory, and replaces the install
    /// path with that directory. The archive and the extraction directory are gone afterwards
    /// whether or not this succeeds. Once the payload is in place this returns `Ok`, even if
    /// removing the leftovers fails.
    pub(crate) fn install(&self, archive_path: &Path) -> Result<()> {
        let res = self.try_install(archive_path);
        if res.is_err() {
            self.clean_up_after_failure(archive_path);
        }
        res
    }

    fn try_install(&self, archive_path: &Path) -> Result<()> {
        self.prepare_extract_dir()?;

        info!("Extracting asset...");
        extract_zip(archive_path, &self.extract_dir)?;
        fs::remove_file(archive_path).with_context(|| {
            format!(
                "failed to remove downloaded archive at {}",
                archive_path.display()
            )
        })?;

        let payload = self.payload_path()?;
        self.replace_install_dir(&payload)?;

        // The new installation is in place from here on, so cleanup failures are not errors.
        remove_leftover("temporary directory", &self.extract_dir);
        info!(
            "Installed the {} directory into {}",
            self.payload_dir_name,
            self.install_path.display()
        );

        Ok(())
    }

    // Anything left over from an earlier run that died part way through is discarded.
    fn prepare_extract_dir(&self) -> Result<()> {
        if self.extract_dir.symlink_metadata().is_ok() {
            debug!(
                "removing stale extraction directory {}",
                self.extract_dir.display()
            );
            remove_path(&self.extract_dir).with_context(|| {
                format!(
                    "failed to remove stale directory {}",
                    self.extract_dir.display()
                )
            })?;
        }
        fs::create_dir_all(&self.extract_dir).with_context(|| {
            format!(
                "failed to create temporary directory {}",
                self.extract_dir.display()
            )
        })
    }

    fn payload_path(&self) -> Result<PathBuf> {
        let payload = self.extract_dir.join(&self.payload_dir_name);
        if !payload.is_dir() {
            return Err(FetchError::MissingPayloadDir {
                name: self.payload_dir_name.clone(),
            }
            .into());
        }
        debug!("found payload directory at {}", payload.display());
        Ok(payload)
    }

    /// Moves `payload` to the install path. An existing installation is first renamed to a
    /// sibling backup path and is only deleted once the new one is in place. If the move fails,
    /// the backup is renamed back.
    fn replace_install_dir(&self, payload: &Path) -> Result<()> {
        let backup = self.backup_path()?;
        if backup.symlink_metadata().is_ok() {
            warn!(
                "removing backup left behind by an earlier run at {}",
                backup.display()
            );
            remove_path(&backup)
                .with_context(|| format!("failed to remove stale backup {}", backup.display()))?;
        }

        if let Some(parent) = self.install_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let had_previous = self.install_path.symlink_metadata().is_ok();
        if had_previous {
            debug!(
                "moving previous installation {} aside to {}",
                self.install_path.display(),
                backup.display(),
            );
            fs::rename(&self.install_path, &backup).with_context(|| {
                format!(
                    "failed to move previous installation {} to {}",
                    self.install_path.display(),
                    backup.display(),
                )
            })?;
        }

        debug!(
            "moving {} to {}",
            payload.display(),
            self.install_path.display()
        );
        if let Err(e) = fs::rename(payload, &self.install_path) {
            if had_previous {
                if let Err(restore) = fs::rename(&backup, &self.install_path) {
                    warn!(
                        "could not restore previous installation from {}: {restore}",
                        backup.display(),
                    );
                }
            }
            return Err(e).with_context(|| {
                format!(
                    "failed to move {} to {}",
                    payload.display(),
                    self.install_path.display(),
                )
            });
        }

        if had_previous {
            remove_leftover("previous installation", &backup);
        }

        Ok(())
    }

    fn backup_path(&self) -> Result<PathBuf> {
        let name = self.install_path.file_name().ok_or_else(|| {
            anyhow!(
                "install path {} does not end in a directory name",
                self.install_path.display()
            )
        })?;
        let mut backup_name = OsString::from(".");
        backup_name.push(name);
        backup_name.push(BACKUP_SUFFIX);
        Ok(self.install_path.with_file_name(backup_name))
    }

    fn clean_up_after_failure(&self, archive_path: &Path) {
        for path in [archive_path, self.extract_dir.as_path()] {
            if path.symlink_metadata().is_err() {
                continue;
            }
            debug!("cleaning up {}", path.display());
            remove_leftover("leftover", path);
        }
    }
}

// Failures are logged and otherwise ignored. Returns whether the path is gone.
fn remove_leftover(what: &str, path: &Path) -> bool {
    match remove_path(path) {
        Ok(()) => true,
        Err(e) => {
            warn!("could not remove {what} {}: {e}", path.display());
            false
        }
    }
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    if path.symlink_metadata()?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
