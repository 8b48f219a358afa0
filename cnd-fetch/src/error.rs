use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;
use url::Url;

/// The ways a fetch can fail that callers may want to tell apart. These are always returned inside
/// an [`anyhow::Error`], so use `downcast_ref::<FetchError>()` to inspect them. Filesystem and
/// transport errors are not listed here. They come back as the underlying `std::io::Error` or
/// `reqwest::Error` with context describing the path or URL involved.
#[derive(Debug, Error)]
#[allow(clippy::module_name_repetitions)]
pub enum FetchError {
    #[error("failed to fetch release info from {url}: {status}")]
    ReleaseStatus { url: Url, status: StatusCode },

    #[error("could not parse the release info returned by {url}")]
    ReleaseParse {
        url: Url,
        #[source]
        source: serde_json::Error,
    },

    #[error("asset \"{name}\" not found in the release")]
    AssetNotFound { name: String },

    #[error("failed to download asset from {url}: {status}")]
    DownloadStatus { url: Url, status: StatusCode },

    #[error("got a {status} redirect from {url} without a usable Location header")]
    RedirectWithoutLocation { url: Url, status: StatusCode },

    #[error("gave up downloading {url} after following {max} redirects")]
    TooManyRedirects { url: Url, max: usize },

    #[error("could not extract {}: {reason}", path.display())]
    Extraction { path: PathBuf, reason: String },

    #[error("the extracted archive does not contain a '{name}' directory")]
    MissingPayloadDir { name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}
