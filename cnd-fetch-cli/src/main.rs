use anyhow::{Error, Result};
use clap::{value_parser, Arg, ArgAction, ArgGroup, ArgMatches, Command};
use cnd_fetch::{
    Fetcher, FetcherBuilder, DEFAULT_ASSET_NAME, DEFAULT_INSTALL_DIR, DEFAULT_PAYLOAD_DIR,
    DEFAULT_PROJECT,
};
use log::error;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
enum FetchCndError {
    #[error("{0:}")]
    InvalidArgsError(String),
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let cmd = cmd();
    let matches = cmd.get_matches();
    let res = init_logger_from_matches(&matches);
    if let Err(e) = res {
        eprintln!("Error creating logger: {e}");
        std::process::exit(126);
    }

    let status = match make_fetcher(&matches) {
        Ok(f) => match f.run().await {
            Ok(()) => 0,
            Err(e) => {
                print_err(&e);
                1
            }
        },
        Err(e) => {
            print_err(&e);
            127
        }
    };
    std::process::exit(status);
}

const MAX_TERM_WIDTH: usize = 100;

fn cmd() -> Command {
    Command::new("fetch-cnd")
        .version(env!("CARGO_PKG_VERSION"))
        .about(concat!(
            "Installs the payload of the latest Cope and Drag release. The release asset is",
            " downloaded and unpacked, and the directory it contains replaces the install",
            " directory.",
        ))
        .arg(
            Arg::new("project")
                .long("project")
                .short('p')
                .default_value(DEFAULT_PROJECT)
                .help("The GitHub project to fetch the release from, as owner/repo."),
        )
        .arg(
            Arg::new("tag")
                .long("tag")
                .short('t')
                .help("The release tag to fetch. Defaults to the latest release."),
        )
        .arg(
            Arg::new("asset")
                .long("asset")
                .short('a')
                .default_value(DEFAULT_ASSET_NAME)
                .help("The name of the zip file attached to the release."),
        )
        .arg(
            Arg::new("payload-dir")
                .long("payload-dir")
                .default_value(DEFAULT_PAYLOAD_DIR)
                .help(concat!(
                    "The top-level directory that the zip file must contain. This directory is",
                    " what gets installed.",
                )),
        )
        .arg(
            Arg::new("out")
                .long("out")
                .short('o')
                .default_value(DEFAULT_INSTALL_DIR)
                .help(concat!(
                    "The directory to install into. Relative paths are resolved against the work",
                    " directory. Anything already at this path is deleted.",
                )),
        )
        .arg(Arg::new("work-dir").long("work-dir").short('w').help(concat!(
            "The directory that holds the downloaded zip file and the temporary extraction",
            " directory. Defaults to the current directory.",
        )))
        .arg(Arg::new("token").long("token").help(concat!(
            "A GitHub token to use for the release API request. If this is not set, the",
            " GITHUB_TOKEN env var is used if it is set.",
        )))
        .arg(Arg::new("api-base-url").long("api-base-url").help(concat!(
            "The base URL for the GitHub API. This is useful for testing or if you want to",
            " operate against GitHub Enterprise. This should be something like",
            " `https://github.my-corp.example.com/api/v3`.",
        )))
        .arg(
            Arg::new("timeout")
                .long("timeout")
                .value_parser(value_parser!(u64).range(1..))
                .default_value("60")
                .help("The timeout for each HTTP request, in seconds."),
        )
        .arg(
            Arg::new("max-redirects")
                .long("max-redirects")
                .value_parser(value_parser!(u64).range(1..=100))
                .default_value("10")
                .help("The number of redirects to follow when downloading the release asset."),
        )
        .arg(
            Arg::new("debug")
                .short('d')
                .long("debug")
                .action(ArgAction::SetTrue)
                .help("Enable debugging output."),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .help("Suppresses everything but errors."),
        )
        .group(ArgGroup::new("log-level").args(["debug", "quiet"]))
        .max_term_width(MAX_TERM_WIDTH)
}

pub(crate) fn init_logger_from_matches(matches: &ArgMatches) -> Result<(), log::SetLoggerError> {
    let level = if matches.get_flag("debug") {
        log::LevelFilter::Debug
    } else if matches.get_flag("quiet") {
        log::LevelFilter::Error
    } else {
        log::LevelFilter::Info
    };

    cnd_fetch::init_logger(level)
}

fn make_fetcher(matches: &ArgMatches) -> Result<Fetcher> {
    validate_args(matches)?;

    let mut builder = FetcherBuilder::new();
    if let Some(p) = matches.get_one::<String>("project") {
        builder = builder.project(p);
    }
    if let Some(t) = matches.get_one::<String>("tag") {
        builder = builder.tag(t);
    }
    if let Some(a) = matches.get_one::<String>("asset") {
        builder = builder.asset_name(a);
    }
    if let Some(d) = matches.get_one::<String>("payload-dir") {
        builder = builder.payload_dir(d);
    }
    if let Some(o) = matches.get_one::<String>("out") {
        builder = builder.install_dir(o);
    }
    if let Some(w) = matches.get_one::<String>("work-dir") {
        builder = builder.work_dir(w);
    }
    if let Some(t) = matches.get_one::<String>("token") {
        builder = builder.token(t);
    }
    if let Some(u) = matches.get_one::<String>("api-base-url") {
        builder = builder.api_base_url(u);
    }
    if let Some(t) = matches.get_one::<u64>("timeout") {
        builder = builder.timeout(Duration::from_secs(*t));
    }
    if let Some(r) = matches.get_one::<u64>("max-redirects") {
        builder = builder.max_redirects(usize::try_from(*r)?);
    }

    builder.build()
}

fn validate_args(matches: &ArgMatches) -> Result<()> {
    for a in ["project", "asset", "payload-dir", "out", "work-dir", "tag", "token"] {
        if matches
            .get_one::<String>(a)
            .is_some_and(|v| v.trim().is_empty())
        {
            return Err(
                FetchCndError::InvalidArgsError(format!("The --{a} option cannot be empty"))
                    .into(),
            );
        }
    }

    Ok(())
}

fn print_err(e: &Error) {
    error!("{e:#}");
    if let Some(fe) = e.downcast_ref::<FetchCndError>() {
        match fe {
            FetchCndError::InvalidArgsError(_) => {
                println!();
                if let Err(e) = cmd().print_help() {
                    eprintln!("Error printing help: {e}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cmd_is_valid() {
        cmd().debug_assert();
    }

    #[test]
    fn defaults_match_the_library() {
        let matches = cmd().get_matches_from(["fetch-cnd"]);
        assert_eq!(
            matches.get_one::<String>("project").map(String::as_str),
            Some("sidprasad/copeanddrag")
        );
        assert_eq!(
            matches.get_one::<String>("asset").map(String::as_str),
            Some("cnd.zip")
        );
        assert_eq!(
            matches.get_one::<String>("payload-dir").map(String::as_str),
            Some("dist")
        );
        assert_eq!(
            matches.get_one::<String>("out").map(String::as_str),
            Some("cnd")
        );
        assert_eq!(matches.get_one::<u64>("timeout"), Some(&60));
        assert_eq!(matches.get_one::<u64>("max-redirects"), Some(&10));
    }

    #[test]
    fn empty_option_is_rejected() {
        let matches = cmd().get_matches_from(["fetch-cnd", "--asset", ""]);
        let err = make_fetcher(&matches).unwrap_err();
        assert!(err.downcast_ref::<FetchCndError>().is_some());
    }

    #[test]
    fn invalid_project_is_rejected() {
        let matches = cmd().get_matches_from(["fetch-cnd", "--project", "copeanddrag"]);
        let err = make_fetcher(&matches).unwrap_err();
        assert!(err.downcast_ref::<cnd_fetch::FetchError>().is_some());
    }

    #[test]
    fn zero_timeout_is_rejected_by_clap() {
        let res = cmd().try_get_matches_from(["fetch-cnd", "--timeout", "0"]);
        assert!(res.is_err());
    }
}
