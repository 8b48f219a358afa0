/// The `builder` module contains the `FetcherBuilder` struct which is used to create a `Fetcher`
/// instance.
use crate::{
    download::{Downloader, DEFAULT_MAX_REDIRECTS},
    error::FetchError,
    fetcher::Fetcher,
    github::GitHub,
    installer::Installer,
    DEFAULT_ASSET_NAME, DEFAULT_INSTALL_DIR, DEFAULT_PAYLOAD_DIR, DEFAULT_PROJECT,
    EXTRACT_DIR_NAME,
};
use anyhow::Result;
use log::debug;
use reqwest::{
    header::{HeaderMap, HeaderValue, USER_AGENT},
    redirect, Client,
};
use std::{
    env,
    path::{Component, Path, PathBuf},
    time::Duration,
};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// `FetcherBuilder` is used to create a [`Fetcher`] instance. Every setting has a default, so
/// `FetcherBuilder::new().build()` gives a fetcher that installs the latest
/// `sidprasad/copeanddrag` release into `./cnd`.
#[derive(Debug, Default)]
#[allow(clippy::module_name_repetitions)]
pub struct FetcherBuilder<'a> {
    project: Option<&'a str>,
    tag: Option<&'a str>,
    asset_name: Option<&'a str>,
    payload_dir: Option<&'a str>,
    install_dir: Option<PathBuf>,
    work_dir: Option<PathBuf>,
    token: Option<&'a str>,
    api_base_url: Option<&'a str>,
    timeout: Option<Duration>,
    max_redirects: Option<usize>,
}

impl<'a> FetcherBuilder<'a> {
    /// Returns a new empty `FetcherBuilder`.
    #[must_use]
    pub fn new() -> Self {
        FetcherBuilder::default()
    }

    /// Set the GitHub project to fetch from, as `owner/repo`. Defaults to
    /// `sidprasad/copeanddrag`.
    #[must_use]
    pub fn project(mut self, project: &'a str) -> Self {
        self.project = Some(project);
        self
    }

    /// Set the release tag to fetch. By default the most recent release is used.
    #[must_use]
    pub fn tag(mut self, tag: &'a str) -> Self {
        self.tag = Some(tag);
        self
    }

    /// Set the name of the release asset to download. Defaults to `cnd.zip`.
    #[must_use]
    pub fn asset_name(mut self, asset_name: &'a str) -> Self {
        self.asset_name = Some(asset_name);
        self
    }

    /// Set the name of the top-level directory the archive must contain. This directory becomes
    /// the installed directory. Defaults to `dist`.
    #[must_use]
    pub fn payload_dir(mut self, payload_dir: &'a str) -> Self {
        self.payload_dir = Some(payload_dir);
        self
    }

    /// Set the directory to install into. A relative path is resolved against the work
    /// directory. Defaults to `cnd`. Any existing directory at this path is replaced.
    #[must_use]
    pub fn install_dir<P: AsRef<Path>>(mut self, install_dir: P) -> Self {
        self.install_dir = Some(install_dir.as_ref().to_path_buf());
        self
    }

    /// Set the directory that holds the downloaded archive and the temporary extraction
    /// directory. Defaults to the current directory.
    #[must_use]
    pub fn work_dir<P: AsRef<Path>>(mut self, work_dir: P) -> Self {
        self.work_dir = Some(work_dir.as_ref().to_path_buf());
        self
    }

    /// Set a token to use for GitHub API requests. If this is not set then this will be taken
    /// from the `GITHUB_TOKEN` env var if it is set.
    #[must_use]
    pub fn token(mut self, token: &'a str) -> Self {
        self.token = Some(token);
        self
    }

    /// Set the base URL for the GitHub API. This is useful for testing or for GitHub
    /// Enterprise. This should be something like `https://github.my-corp.example.com/api/v3`.
    #[must_use]
    pub fn api_base_url(mut self, api_base_url: &'a str) -> Self {
        self.api_base_url = Some(api_base_url);
        self
    }

    /// Set the timeout applied to each HTTP request. Defaults to 60 seconds.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set how many redirects the asset download may follow. Defaults to 10.
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.max_redirects = Some(max_redirects);
        self
    }

    /// Builds a new [`Fetcher`] instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError::InvalidConfig`] error if the project is not in `owner/repo` form,
    /// if the asset or payload names are not plain file names, if the install directory would
    /// contain the work directory or overlap the temporary paths, or if the timeout or redirect
    /// limit is zero. It can also fail if the current directory cannot be determined or the HTTP
    /// client cannot be created.
    pub fn build(self) -> Result<Fetcher> {
        let (owner, repo) = parse_project_name(self.project.unwrap_or(DEFAULT_PROJECT))?;
        let asset_name = plain_name("asset name", self.asset_name.unwrap_or(DEFAULT_ASSET_NAME))?;
        let payload_dir =
            plain_name("payload directory", self.payload_dir.unwrap_or(DEFAULT_PAYLOAD_DIR))?;

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        if timeout.is_zero() {
            return Err(invalid("the timeout must be greater than zero"));
        }
        let max_redirects = self.max_redirects.unwrap_or(DEFAULT_MAX_REDIRECTS);
        if max_redirects == 0 {
            return Err(invalid("the redirect limit must be at least 1"));
        }

        let api_base_url = self
            .api_base_url
            .map(|u| {
                Url::parse(u)
                    .map_err(|e| invalid(&format!("could not parse API base URL `{u}`: {e}")))
            })
            .transpose()?;

        let work_dir = match &self.work_dir {
            Some(d) => d.clone(),
            None => env::current_dir()?,
        };
        let install_path = install_path(&work_dir, self.install_dir.as_deref())?;
        let archive_path = work_dir.join(asset_name);
        let extract_dir = work_dir.join(EXTRACT_DIR_NAME);
        for temp in [&extract_dir, &archive_path] {
            if install_path.starts_with(temp) || temp.starts_with(&install_path) {
                return Err(invalid(&format!(
                    "the install directory {} overlaps the temporary path {}",
                    install_path.display(),
                    temp.display()
                )));
            }
        }
        debug!("archive path = {}", archive_path.display());
        debug!("extract dir = {}", extract_dir.display());
        debug!("install path = {}", install_path.display());

        Ok(Fetcher::new(
            GitHub::new(
                owner,
                repo,
                self.tag.map(String::from),
                api_base_url,
                self.token.map(String::from),
            ),
            asset_name.to_string(),
            archive_path,
            Downloader::new(max_redirects),
            Installer::new(extract_dir, payload_dir.to_string(), install_path),
            reqwest_client(timeout)?,
        ))
    }
}

fn invalid(msg: &str) -> anyhow::Error {
    FetchError::InvalidConfig(msg.to_string()).into()
}

fn parse_project_name(project: &str) -> Result<(String, String)> {
    let parts = project.trim_matches('/').split('/').collect::<Vec<_>>();
    match parts.as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            debug!("Parsed project {project} = {owner} / {repo}");
            Ok(((*owner).to_string(), (*repo).to_string()))
        }
        _ => Err(invalid(&format!(
            "could not parse owner and repo name from `{project}`, expected something like \
             `sidprasad/copeanddrag`"
        ))),
    }
}

// The asset and payload names are joined onto directories, so they must not contain a path.
fn plain_name<'n>(what: &str, name: &'n str) -> Result<&'n str> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) if !name.contains(['/', '\\']) => Ok(name),
        _ => Err(invalid(&format!(
            "the {what} `{name}` must be a plain file name"
        ))),
    }
}

fn install_path(work_dir: &Path, install_dir: Option<&Path>) -> Result<PathBuf> {
    let install_dir = install_dir.unwrap_or_else(|| Path::new(DEFAULT_INSTALL_DIR));
    if install_dir
        .components()
        .any(|c| matches!(c, Component::ParentDir))
    {
        return Err(invalid(&format!(
            "the install directory `{}` must not contain `..`",
            install_dir.display()
        )));
    }
    if !matches!(install_dir.components().next_back(), Some(Component::Normal(_))) {
        return Err(invalid(&format!(
            "the install directory `{}` must end in a directory name",
            install_dir.display()
        )));
    }

    // The install directory is deleted and replaced, so it must not contain the work directory.
    let path = work_dir.join(install_dir);
    if work_dir.starts_with(&path) {
        return Err(invalid(&format!(
            "the install directory {} contains the work directory {}",
            path.display(),
            work_dir.display()
        )));
    }
    Ok(path)
}

fn reqwest_client(timeout: Duration) -> Result<Client> {
    let builder = Client::builder()
        .gzip(true)
        .timeout(timeout)
        // Redirects are followed by `Downloader` so that it can bound them.
        .redirect(redirect::Policy::none());

    let mut headers = HeaderMap::new();
    headers.insert(
        USER_AGENT,
        HeaderValue::from_str(&format!("cnd-fetch version {}", super::VERSION))?,
    );
    Ok(builder.default_headers(headers).build()?)
}
