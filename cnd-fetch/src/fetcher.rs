use crate::{download::Downloader, github::GitHub, installer::Installer};
use anyhow::Result;
use log::{debug, info};
use reqwest::Client;
use std::path::{Path, PathBuf};

/// `Fetcher` downloads the release archive and installs its payload directory. Use the
/// [`FetcherBuilder`](crate::FetcherBuilder) struct to create a new `Fetcher` instance. Its
/// configuration cannot change once it is built.
#[derive(Debug)]
pub struct Fetcher {
    github: GitHub,
    asset_name: String,
    archive_path: PathBuf,
    downloader: Downloader,
    installer: Installer,
    reqwest_client: Client,
}

impl Fetcher {
    pub(crate) fn new(
        github: GitHub,
        asset_name: String,
        archive_path: PathBuf,
        downloader: Downloader,
        installer: Installer,
        reqwest_client: Client,
    ) -> Fetcher {
        Fetcher {
            github,
            asset_name,
            archive_path,
            downloader,
            installer,
            reqwest_client,
        }
    }

    /// The directory that [`Fetcher::run`] replaces.
    #[must_use]
    pub fn install_path(&self) -> &Path {
        self.installer.install_path()
    }

    /// Fetch the release, download its asset, and install the payload directory. Each step runs
    /// only after the previous one has finished.
    ///
    /// # Errors
    ///
    /// Every failure is fatal. The error is a [`FetchError`](crate::FetchError) where the cause
    /// can be classified and a plain I/O or HTTP error with context otherwise:
    ///
    /// * The release API returned something other than 200, or a body that cannot be parsed.
    /// * The release has no asset with the configured name.
    /// * The download failed, returned a non-200 status, or redirected too many times.
    /// * The archive is corrupt or does not contain the payload directory.
    /// * A temporary file or directory could not be created, removed, or renamed.
    ///
    /// The install directory is only touched once the archive has been extracted and validated.
    /// Temporary files are removed on a best-effort basis when a step fails.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Fetching release info for {}...",
            self.github.project_name()
        );
        let release = self.github.fetch_release(&self.reqwest_client).await?;
        debug!("got release {}", release.tag());

        let asset = release.find_asset(&self.asset_name)?;
        info!("Downloading asset: {}", asset.url);
        self.downloader
            .download(&self.reqwest_client, &asset.url, &self.archive_path)
            .await?;

        self.installer.install(&self.archive_path)?;
        info!(
            "Done! The {} directory is ready.",
            self.install_path().display()
        );

        Ok(())
    }
}
