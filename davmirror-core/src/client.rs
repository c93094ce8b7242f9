use std::fmt;
use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, Method, StatusCode};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use url::Url;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:oc="http://owncloud.org/ns">
  <d:prop>
    <d:getlastmodified/>
    <d:getcontenttype/>
    <oc:size/>
    <d:getetag/>
    <oc:favorite/>
  </d:prop>
</d:propfind>"#;

#[derive(Debug, Error)]
pub enum DavError {
    #[error("server unreachable: {0}")]
    Unreachable(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("username or password rejected")]
    AuthFailed,
    #[error("remote path not found: {0}")]
    NotFound(String),
    #[error("server returned {status}")]
    Server { status: StatusCode },
    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unsupported http method: {0}")]
    Method(&'static str),
}

impl From<reqwest::Error> for DavError {
    fn from(err: reqwest::Error) -> Self {
        DavError::Unreachable(Box::new(err))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Connectivity,
    Credentials,
    NotFound,
    Server,
    LocalStorage,
}

impl DavError {
    pub fn classification(&self) -> ErrorClass {
        match self {
            DavError::Unreachable(_) => ErrorClass::Connectivity,
            DavError::AuthFailed => ErrorClass::Credentials,
            DavError::NotFound(_) | DavError::Url(_) => ErrorClass::NotFound,
            DavError::Server { .. } | DavError::Method(_) => ErrorClass::Server,
            DavError::Io(_) => ErrorClass::LocalStorage,
        }
    }

    /// Whether the failure means the server cannot be used right now and the
    /// session should continue from the local cache.
    pub fn forces_offline(&self) -> bool {
        matches!(self, DavError::Unreachable(_) | DavError::Server { .. })
    }
}

/// Receives `(bytes_done, bytes_total)` while a download runs. `bytes_total`
/// is zero when the server sent no content length.
pub trait ProgressSink {
    fn on_progress(&mut self, done: u64, total: u64);
}

impl<F> ProgressSink for F
where
    F: FnMut(u64, u64),
{
    fn on_progress(&mut self, done: u64, total: u64) {
        self(done, total)
    }
}

pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn on_progress(&mut self, _done: u64, _total: u64) {}
}

/// Server location plus Basic-auth credentials.
#[derive(Clone)]
pub struct Credentials {
    base_url: Url,
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(
        base_url: &str,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, DavError> {
        Ok(Self {
            base_url: Url::parse(base_url)?,
            username: username.into(),
            password: password.into(),
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Remote paths already carry the `/remote.php/...` part, so they are
    /// appended to the base URL rather than resolved against it.
    fn resource_url(&self, path: &str) -> Result<Url, DavError> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.strip_prefix('/').unwrap_or(path);
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Clone)]
pub struct DavClient {
    http: Client,
    timeout: Duration,
}

impl DavClient {
    pub fn new() -> Result<Self, DavError> {
        Self::with_timeout(DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, DavError> {
        // Bounds each wait for body bytes during a download.
        let http = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { http, timeout })
    }

    /// Depth-one `PROPFIND` of `path`; returns the raw multistatus body.
    pub async fn list_directory(
        &self,
        credentials: &Credentials,
        path: &str,
    ) -> Result<String, DavError> {
        let url = credentials.resource_url(path)?;
        let method =
            Method::from_bytes(b"PROPFIND").map_err(|_| DavError::Method("PROPFIND"))?;
        debug!(%url, "listing remote directory");
        let response = self
            .http
            .request(method, url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .header("Depth", "1")
            .header(CONTENT_TYPE, "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .timeout(self.timeout)
            .send()
            .await?;
        let response = Self::check_status(response, path)?;
        Ok(response.text().await?)
    }

    /// Streams `path` into `target`, creating or truncating it. No temporary
    /// file is used: an interrupted transfer leaves a truncated `target`.
    pub async fn download_to_path<P>(
        &self,
        credentials: &Credentials,
        path: &str,
        target: &Path,
        progress: &mut P,
    ) -> Result<u64, DavError>
    where
        P: ProgressSink + ?Sized,
    {
        let url = credentials.resource_url(path)?;
        debug!(%url, target = %target.display(), "starting download");
        let response = self
            .http
            .get(url)
            .basic_auth(&credentials.username, Some(&credentials.password))
            .send()
            .await?;
        let response = Self::check_status(response, path)?;
        let total = response.content_length().unwrap_or(0);

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(target).await?;
        let mut stream = response.bytes_stream();
        let mut done = 0u64;
        progress.on_progress(done, total);

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            done += chunk.len() as u64;
            progress.on_progress(done, total);
        }

        file.flush().await?;
        file.sync_all().await?;
        info!(path, target = %target.display(), bytes = done, "download finished");
        Ok(done)
    }

    fn check_status(
        response: reqwest::Response,
        path: &str,
    ) -> Result<reqwest::Response, DavError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        match status {
            StatusCode::UNAUTHORIZED => Err(DavError::AuthFailed),
            StatusCode::NOT_FOUND => Err(DavError::NotFound(path.to_string())),
            status => Err(DavError::Server { status }),
        }
    }
}
