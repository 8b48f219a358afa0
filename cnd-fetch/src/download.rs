use crate::error::FetchError;
use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::{
    header::{HeaderValue, ACCEPT, LOCATION},
    Client, Response, StatusCode,
};
use std::{
    fs::{self, File},
    io::Write,
    path::Path,
};
use url::Url;

pub(crate) const DEFAULT_MAX_REDIRECTS: usize = 10;

/// Downloads release assets. The HTTP client it is given must not follow redirects itself, since
/// this type follows them in a bounded loop.
#[derive(Debug)]
pub(crate) struct Downloader {
    max_redirects: usize,
}

impl Downloader {
    pub(crate) fn new(max_redirects: usize) -> Self {
        Self { max_redirects }
    }

    /// Downloads `url` into `archive_path`. On failure the file at `archive_path` is removed, so
    /// a partial download is never left behind.
    pub(crate) async fn download(
        &self,
        client: &Client,
        url: &Url,
        archive_path: &Path,
    ) -> Result<()> {
        let res = self.download_to(client, url, archive_path).await;
        if res.is_err() {
            remove_partial_download(archive_path);
        }
        res
    }

    async fn download_to(&self, client: &Client, url: &Url, archive_path: &Path) -> Result<()> {
        let mut resp = self.follow_redirects(client, url).await?;

        debug!("writing download to {}", archive_path.display());
        let mut downloaded_file = File::create(archive_path).with_context(|| {
            format!(
                "failed to create file at {} for downloaded asset",
                archive_path.display()
            )
        })?;
        let mut size = 0;
        while let Some(c) = resp
            .chunk()
            .await
            .with_context(|| format!("failed to read chunk while downloading asset from {url}"))?
        {
            downloaded_file
                .write_all(c.as_ref())
                .with_context(|| format!("failed to write chunk to {}", archive_path.display()))?;
            size += c.len();
        }
        downloaded_file
            .sync_all()
            .with_context(|| format!("failed to flush {}", archive_path.display()))?;
        debug!("downloaded {size} bytes");

        Ok(())
    }

    /// Requests `url`, following redirects, and returns the final 200 response.
    async fn follow_redirects(&self, client: &Client, url: &Url) -> Result<Response> {
        let mut current = url.clone();
        for hop in 0..=self.max_redirects {
            debug!("requesting {current} (hop {hop})");
            let resp = client
                .get(current.clone())
                .header(ACCEPT, HeaderValue::from_static("application/octet-stream"))
                .send()
                .await
                .with_context(|| {
                    format!("failed to execute HTTP request to download asset from {current}")
                })?;

            let status = resp.status();
            if status == StatusCode::OK {
                return Ok(resp);
            }
            if !is_followable_redirect(status) {
                return Err(FetchError::DownloadStatus {
                    url: current,
                    status,
                }
                .into());
            }

            let next = redirect_target(&current, &resp).ok_or_else(|| {
                FetchError::RedirectWithoutLocation {
                    url: current.clone(),
                    status,
                }
            })?;
            debug!("following {status} redirect to {next}");
            current = next;
        }

        Err(FetchError::TooManyRedirects {
            url: url.clone(),
            max: self.max_redirects,
        }
        .into())
    }
}

fn is_followable_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

// A relative Location is resolved against the URL that returned it.
fn redirect_target(from: &Url, resp: &Response) -> Option<Url> {
    let location = resp.headers().get(LOCATION)?.to_str().ok()?;
    from.join(location).ok()
}

fn remove_partial_download(archive_path: &Path) {
    if !archive_path.exists() {
        return;
    }
    debug!("removing partial download at {}", archive_path.display());
    if let Err(e) = fs::remove_file(archive_path) {
        warn!(
            "could not remove partial download at {}: {e}",
            archive_path.display()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use rstest::rstest;
    use tempfile::tempdir;
    use test_log::test;

    fn client() -> Result<Client> {
        Ok(Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?)
    }

    #[test(tokio::test)]
    async fn download_direct() -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/cnd.zip")
            .match_header(ACCEPT.as_str(), "application/octet-stream")
            .with_status(200)
            .with_body(b"archive bytes")
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{}/cnd.zip", server.url()))?;
        Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await?;

        assert_eq!(fs::read(&archive_path)?, b"archive bytes");
        m.assert_async().await;

        Ok(())
    }

    #[rstest]
    #[case::found(302)]
    #[case::moved_permanently(301)]
    #[case::see_other(303)]
    #[case::temporary(307)]
    #[case::permanent(308)]
    #[tokio::test]
    async fn download_follows_redirect_chain(#[case] status: usize) -> Result<()> {
        let mut server = Server::new_async().await;
        let base = server.url();
        let a = server
            .mock("GET", "/a")
            .with_status(status)
            .with_header("location", &format!("{base}/b"))
            .with_body("redirect body from a")
            .create_async()
            .await;
        // A relative Location must work too.
        let b = server
            .mock("GET", "/b")
            .with_status(status)
            .with_header("location", "/c")
            .with_body("redirect body from b")
            .create_async()
            .await;
        let c = server
            .mock("GET", "/c")
            .with_status(200)
            .with_body("the real archive")
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{base}/a"))?;
        Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await?;

        assert_eq!(fs::read_to_string(&archive_path)?, "the real archive");
        a.assert_async().await;
        b.assert_async().await;
        c.assert_async().await;

        Ok(())
    }

    #[rstest]
    #[case::not_found(404)]
    #[case::forbidden(403)]
    #[case::server_error(500)]
    #[tokio::test]
    async fn download_error_status_removes_partial_file(#[case] status: usize) -> Result<()> {
        let mut server = Server::new_async().await;
        let m = server
            .mock("GET", "/cnd.zip")
            .with_status(status)
            .with_body("error page")
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        // Simulate a leftover partial file from an earlier attempt.
        fs::write(&archive_path, "partial")?;

        let url = Url::parse(&format!("{}/cnd.zip", server.url()))?;
        let err = Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await
            .unwrap_err();

        match err.downcast_ref::<FetchError>() {
            Some(FetchError::DownloadStatus { status: got, .. }) => {
                assert_eq!(usize::from(got.as_u16()), status);
            }
            _ => panic!("expected a DownloadStatus error, got {err:?}"),
        }
        assert!(!archive_path.exists(), "partial download was removed");
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn download_error_status_after_redirect() -> Result<()> {
        let mut server = Server::new_async().await;
        let base = server.url();
        let _a = server
            .mock("GET", "/a")
            .with_status(302)
            .with_header("location", &format!("{base}/gone"))
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{base}/a"))?;
        let err = Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await
            .unwrap_err();

        match err.downcast_ref::<FetchError>() {
            Some(FetchError::DownloadStatus { url, status }) => {
                assert_eq!(url.path(), "/gone");
                assert_eq!(*status, StatusCode::NOT_FOUND);
            }
            _ => panic!("expected a DownloadStatus error, got {err:?}"),
        }
        assert!(!archive_path.exists());

        Ok(())
    }

    #[test(tokio::test)]
    async fn redirect_loop_is_bounded() -> Result<()> {
        let max = 3;
        let mut server = Server::new_async().await;
        let base = server.url();
        let m = server
            .mock("GET", "/loop")
            .with_status(302)
            .with_header("location", &format!("{base}/loop"))
            .expect(max + 1)
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{base}/loop"))?;
        let err = Downloader::new(max)
            .download(&client()?, &url, &archive_path)
            .await
            .unwrap_err();

        assert!(
            matches!(
                err.downcast_ref::<FetchError>(),
                Some(FetchError::TooManyRedirects { max: 3, .. })
            ),
            "expected a TooManyRedirects error, got {err:?}",
        );
        assert!(!archive_path.exists());
        m.assert_async().await;

        Ok(())
    }

    #[test(tokio::test)]
    async fn redirect_count_at_the_limit_succeeds() -> Result<()> {
        let mut server = Server::new_async().await;
        let base = server.url();
        let _r1 = server
            .mock("GET", "/r1")
            .with_status(302)
            .with_header("location", &format!("{base}/r2"))
            .create_async()
            .await;
        let _r2 = server
            .mock("GET", "/r2")
            .with_status(302)
            .with_header("location", &format!("{base}/done"))
            .create_async()
            .await;
        let _done = server
            .mock("GET", "/done")
            .with_status(200)
            .with_body("ok")
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{base}/r1"))?;
        Downloader::new(2)
            .download(&client()?, &url, &archive_path)
            .await?;
        assert_eq!(fs::read_to_string(&archive_path)?, "ok");

        Ok(())
    }

    #[test(tokio::test)]
    async fn redirect_without_location_is_an_error() -> Result<()> {
        let mut server = Server::new_async().await;
        let _m = server
            .mock("GET", "/cnd.zip")
            .with_status(302)
            .create_async()
            .await;

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("{}/cnd.zip", server.url()))?;
        let err = Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await
            .unwrap_err();

        assert!(
            matches!(
                err.downcast_ref::<FetchError>(),
                Some(FetchError::RedirectWithoutLocation { .. })
            ),
            "expected a RedirectWithoutLocation error, got {err:?}",
        );
        assert!(!archive_path.exists());

        Ok(())
    }

    #[test(tokio::test)]
    async fn timeout_while_reading_body_removes_partial_file() -> Result<()> {
        // Sends the headers and a few bytes of the body, then stalls.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let addr = listener.local_addr()?;
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = std::io::Read::read(&mut stream, &mut buf);
                let _ = stream
                    .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\n\r\nfirst bytes");
                let _ = stream.flush();
                std::thread::sleep(std::time::Duration::from_secs(5));
            }
        });

        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        let url = Url::parse(&format!("http://{addr}/cnd.zip"))?;
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(std::time::Duration::from_millis(300))
            .build()?;
        let err = Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client, &url, &archive_path)
            .await
            .unwrap_err();

        assert!(
            err.chain()
                .filter_map(|e| e.downcast_ref::<reqwest::Error>())
                .any(reqwest::Error::is_timeout),
            "expected a timeout error, got {err:?}",
        );
        assert!(
            format!("{err:#}").contains("while downloading asset"),
            "error names the download step: {err:#}",
        );
        assert!(!archive_path.exists(), "partial download was removed");

        Ok(())
    }

    #[test(tokio::test)]
    async fn transport_error_removes_partial_file() -> Result<()> {
        let td = tempdir()?;
        let archive_path = td.path().join("cnd.zip");
        fs::write(&archive_path, "partial")?;

        // Nothing listens on port 1.
        let url = Url::parse("http://127.0.0.1:1/cnd.zip")?;
        let res = Downloader::new(DEFAULT_MAX_REDIRECTS)
            .download(&client()?, &url, &archive_path)
            .await;

        assert!(res.is_err());
        assert!(!archive_path.exists());

        Ok(())
    }
}
