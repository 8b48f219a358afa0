//! A library for fetching the Cope and Drag (`cnd`) web bundle from its GitHub releases.
//!
//! It finds the latest release of a GitHub project, downloads a named zip asset from it, unpacks
//! that archive, and installs one top-level directory from the archive at a fixed path, replacing
//! whatever was there before. It is meant to be run as a dependency-fetch step before a build,
//! not as a general package manager.
//!
//! This project also ships a CLI tool named `fetch-cnd`.
//!
//! The main entry point for programmatic use is the [`FetcherBuilder`] struct. Here is an example
//! of its usage:
//!
//! ```ignore
//! use cnd_fetch::FetcherBuilder;
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let fetcher = FetcherBuilder::new()
//!         .project("sidprasad/copeanddrag")
//!         .asset_name("cnd.zip")
//!         .payload_dir("dist")
//!         .install_dir("cnd")
//!         .build()?;
//!
//!     fetcher.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## What a Run Does
//!
//! Calling [`Fetcher::run`] performs these steps in order. Any failure stops the run.
//!
//! 1. Gets `/repos/{owner}/{repo}/releases/latest` from the GitHub API.
//! 2. Picks the first asset whose name is exactly the configured asset name.
//! 3. Downloads it to `<work dir>/<asset name>`, following up to 10 redirects.
//! 4. Unpacks it into `<work dir>/temp_dist` and deletes the downloaded file.
//! 5. Checks that the archive had the payload directory (`dist` by default) at its top level.
//! 6. Replaces the install directory (`cnd` by default) with that payload directory.
//! 7. Deletes `<work dir>/temp_dist`.
//!
//! The previous installation is moved aside to a hidden sibling (`.cnd.cnd-fetch-old` for `cnd`)
//! before the new one is renamed into place, and is only deleted once that rename succeeds. Once
//! the new installation is in place the run counts as a success, and failing to delete the
//! leftovers only logs a warning. The install directory, the work
//! directory, and the temporary paths should all live on the same filesystem.
//!
//! Two runs must not target the same install directory at the same time. Nothing here guards
//! against that.
//!
//! ## Features
//!
//! This crate offers several features to control the TLS dependency used by `reqwest`:
//!
#![doc = document_features::document_features!()]

mod archive;
mod builder;
mod download;
mod error;
mod fetcher;
mod github;
mod installer;
mod release;

pub use crate::{builder::FetcherBuilder, error::FetchError, fetcher::Fetcher};

// The version of the `cnd-fetch` crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// The project whose releases are fetched by default.
pub const DEFAULT_PROJECT: &str = "sidprasad/copeanddrag";
/// The release asset downloaded by default.
pub const DEFAULT_ASSET_NAME: &str = "cnd.zip";
/// The top-level directory the archive must contain by default.
pub const DEFAULT_PAYLOAD_DIR: &str = "dist";
/// The directory the payload is installed as by default, relative to the work directory.
pub const DEFAULT_INSTALL_DIR: &str = "cnd";
/// The name of the temporary extraction directory inside the work directory.
pub const EXTRACT_DIR_NAME: &str = "temp_dist";

#[cfg(feature = "logging")]
use fern::{
    colors::{Color, ColoredLevelConfig},
    Dispatch,
};

/// This function initializes logging for the application. It's public for the sake of the
/// `fetch-cnd` binary, but it lives in the library crate so that test code can also enable
/// logging.
///
/// # Errors
///
/// This can return a `log::SetLoggerError` error.
#[cfg(feature = "logging")]
pub fn init_logger(level: log::LevelFilter) -> Result<(), log::SetLoggerError> {
    let line_colors = ColoredLevelConfig::new()
        .error(Color::Red)
        .warn(Color::Yellow)
        .info(Color::BrightBlack)
        .debug(Color::BrightBlack)
        .trace(Color::BrightBlack);
    let level_colors = line_colors.info(Color::Green).debug(Color::Black);

    Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{color_line}[{target}][{level}{color_line}] {message}\x1B[0m",
                color_line = format_args!(
                    "\x1B[{}m",
                    line_colors.get_color(&record.level()).to_fg_str()
                ),
                target = record.target(),
                level = level_colors.color(record.level()),
                message = message,
            ));
        })
        .level(level)
        // These are very noisy.
        .level_for("hyper", log::LevelFilter::Error)
        .level_for("hyper_util", log::LevelFilter::Error)
        .level_for("reqwest", log::LevelFilter::Error)
        .chain(std::io::stderr())
        .apply()
}
