use crate::{error::FetchError, release::Release};
use anyhow::{Context, Result};
use log::debug;
use reqwest::{
    header::{HeaderValue, ACCEPT, AUTHORIZATION},
    Client, RequestBuilder, StatusCode,
};
use std::{env, sync::LazyLock};
use url::Url;

pub(crate) static DEFAULT_API_BASE_URL: LazyLock<Url> =
    LazyLock::new(|| Url::parse("https://api.github.com").unwrap());

pub(crate) const TOKEN_ENV_VAR: &str = "GITHUB_TOKEN";

#[derive(Debug)]
pub(crate) struct GitHub {
    owner: String,
    repo: String,
    tag: Option<String>,
    api_base_url: Url,
    token: Option<String>,
}

impl GitHub {
    pub(crate) fn new(
        owner: String,
        repo: String,
        tag: Option<String>,
        api_base_url: Option<Url>,
        mut token: Option<String>,
    ) -> Self {
        if token.is_none() {
            token = env::var(TOKEN_ENV_VAR).ok().filter(|t| !t.is_empty());
            if token.is_some() {
                debug!("Using GitHub token from the {TOKEN_ENV_VAR} environment variable.");
            }
        }

        Self {
            owner,
            repo,
            tag,
            api_base_url: api_base_url.unwrap_or_else(|| DEFAULT_API_BASE_URL.clone()),
            token,
        }
    }

    pub(crate) fn project_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }

    pub(crate) async fn fetch_release(&self, client: &Client) -> Result<Release> {
        let url = self.release_info_url()?;
        debug!("Getting release info from `{url}`");

        let mut req_builder = client
            .get(url.clone())
            .header(ACCEPT, HeaderValue::from_static("application/json"));
        req_builder = self.maybe_add_token_header(req_builder)?;
        let req = req_builder
            .build()
            .with_context(|| format!("failed to build HTTP request for {url}"))?;

        let resp = client
            .execute(req)
            .await
            .with_context(|| format!("failed to fetch release info from {url}"))?;
        let status = resp.status();
        if status != StatusCode::OK {
            return Err(FetchError::ReleaseStatus { url, status }.into());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("failed to read the release info body from {url}"))?;
        serde_json::from_str::<Release>(&body)
            .map_err(|source| FetchError::ReleaseParse { url, source }.into())
    }

    pub(crate) fn release_info_url(&self) -> Result<Url> {
        let mut url = self.api_base_url.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                FetchError::InvalidConfig(format!(
                    "the API base URL `{}` cannot have path segments",
                    self.api_base_url,
                ))
            })?;
            // Drops the empty segment a trailing slash leaves behind.
            segments
                .pop_if_empty()
                .push("repos")
                .push(&self.owner)
                .push(&self.repo)
                .push("releases");
            match &self.tag {
                Some(tag) => segments.push("tags").push(tag),
                None => segments.push("latest"),
            };
        }

        Ok(url)
    }

    fn maybe_add_token_header(&self, mut req_builder: RequestBuilder) -> Result<RequestBuilder> {
        if let Some(token) = self.token.as_deref() {
            debug!("Adding GitHub token to the release info request.");
            let bearer = format!("Bearer {token}");
            let mut auth_val = HeaderValue::from_str(&bearer)?;
            auth_val.set_sensitive(true);
            req_builder = req_builder.header(AUTHORIZATION, auth_val);
        } else {
            debug!("No token given.");
        }
        Ok(req_builder)
    }
}
