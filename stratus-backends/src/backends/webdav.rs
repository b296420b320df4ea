//! WebDAV backend

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use regex::Regex;
use reqwest::{Body, Client, Method, RequestBuilder, Response, StatusCode};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::io::ReaderStream;
use tracing::{debug, info, warn};
use url::Url;
use stratus_core::{Result, StorageErrorType, StratusError};
use crate::backends::{check_remote_name, config_error, connection_error, credential_options, protocol_error};
use crate::options::{BackendOptions, OptionDescriptor, OptionKind, AUTH_PASSWORD, AUTH_USERNAME};
use crate::registry::{BackendFactory, BackendProfile};
use crate::target::TargetUrl;
use crate::{Backend, RemoteEntry};

const USE_SSL: &str = "use-ssl";
const INTEGRATED_AUTH: &str = "integrated-authentication";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<D:propfind xmlns:D="DAV:"><D:prop><D:resourcetype/><D:getcontentlength/><D:getlastmodified/></D:prop></D:propfind>"#;

fn webdav_options() -> Vec<OptionDescriptor> {
    let mut options = credential_options();
    options.extend([
        OptionDescriptor::new(
            USE_SSL,
            OptionKind::Boolean,
            "Use HTTPS",
            "Connects to the server over HTTPS instead of plain HTTP.",
        ),
        OptionDescriptor::new(
            INTEGRATED_AUTH,
            OptionKind::Boolean,
            "Use integrated authentication",
            "Requests integrated Windows authentication. Not available here; \
             basic authentication with the supplied credentials is used instead.",
        ),
    ]);
    options
}

pub struct WebDavFactory;

impl BackendFactory for WebDavFactory {
    fn supported_options(&self, _profile: &BackendProfile) -> Vec<OptionDescriptor> {
        webdav_options()
    }

    fn construct(
        &self,
        profile: &BackendProfile,
        url: &TargetUrl,
        options: &BackendOptions,
    ) -> Result<Box<dyn Backend>> {
        let base_url = folder_url(url, options.get_bool(USE_SSL, false))?;
        if options.get_bool(INTEGRATED_AUTH, false) {
            warn!("Integrated authentication is not available, using basic authentication");
        }

        let client = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| config_error(format!("HTTP client: {}", e)))?;

        Ok(Box::new(WebDavBackend {
            profile: profile.clone(),
            client,
            base_url,
            username: options.get_non_empty(AUTH_USERNAME).map(str::to_string),
            password: options.get(AUTH_PASSWORD).map(str::to_string),
        }))
    }
}

/// `http(s)://host[:port]/path/` for a `webdav://` target
fn folder_url(url: &TargetUrl, use_ssl: bool) -> Result<Url> {
    let host = url
        .host()
        .ok_or_else(|| config_error("WebDAV target URL has no host"))?;
    let scheme = if use_ssl { "https" } else { "http" };
    let port = url.port().map(|p| format!(":{}", p)).unwrap_or_default();

    let mut path: String = url
        .trimmed_path()
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| format!("/{}", urlencoding::encode(s)))
        .collect();
    path.push('/');

    Url::parse(&format!("{}://{}{}{}", scheme, host, port, path))
        .map_err(|e| config_error(format!("Invalid WebDAV URL: {}", e)))
}

#[derive(Debug)]
pub struct WebDavBackend {
    profile: BackendProfile,
    client: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl WebDavBackend {
    fn file_url(&self, name: &str) -> Result<Url> {
        check_remote_name(name)?;
        self.base_url
            .join(&urlencoding::encode(name))
            .map_err(|e| config_error(format!("Invalid file name {}: {}", name, e)))
    }

    fn request(&self, method: Method, url: Url) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.username {
            Some(user) => builder.basic_auth(user, self.password.as_deref()),
            None => builder,
        }
    }

    async fn propfind(&self, depth: &str) -> Result<Response> {
        let method = Method::from_bytes(b"PROPFIND")
            .map_err(|e| protocol_error(e.to_string()))?;
        let response = self
            .request(method, self.base_url.clone())
            .header("Depth", depth)
            .header("Content-Type", "application/xml; charset=utf-8")
            .body(PROPFIND_BODY)
            .send()
            .await
            .map_err(send_error)?;
        check_status(response).await
    }
}

fn send_error(e: reqwest::Error) -> StratusError {
    if e.is_timeout() {
        connection_error("Request timed out")
    } else {
        connection_error(e.to_string())
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let error = match status {
        StatusCode::UNAUTHORIZED => StorageErrorType::AuthenticationFailed,
        StatusCode::FORBIDDEN => StorageErrorType::AccessDenied,
        StatusCode::NOT_FOUND => StorageErrorType::FileNotFound,
        StatusCode::INSUFFICIENT_STORAGE => StorageErrorType::QuotaExceeded,
        _ => {
            let body = response.text().await.unwrap_or_default();
            StorageErrorType::ProtocolError(format!("HTTP {}: {}", status, body.trim()))
        }
    };
    Err(StratusError::Storage(error))
}

/// Entries of a Depth 1 PROPFIND reply, without the folder itself
fn parse_multistatus(xml: &str, folder_path: &str) -> Vec<RemoteEntry> {
    static RESPONSE: OnceLock<Regex> = OnceLock::new();
    static HREF: OnceLock<Regex> = OnceLock::new();
    static LENGTH: OnceLock<Regex> = OnceLock::new();
    static MODIFIED: OnceLock<Regex> = OnceLock::new();
    static COLLECTION: OnceLock<Regex> = OnceLock::new();

    let response = RESPONSE.get_or_init(|| {
        Regex::new(r"(?s)<(?:\w+:)?response\b[^>]*>(.*?)</(?:\w+:)?response>").unwrap()
    });
    let href = HREF.get_or_init(|| Regex::new(r"(?s)<(?:\w+:)?href>\s*(.*?)\s*</(?:\w+:)?href>").unwrap());
    let length = LENGTH.get_or_init(|| {
        Regex::new(r"<(?:\w+:)?getcontentlength>\s*(\d+)\s*</(?:\w+:)?getcontentlength>").unwrap()
    });
    let modified = MODIFIED.get_or_init(|| {
        Regex::new(r"<(?:\w+:)?getlastmodified>\s*(.*?)\s*</(?:\w+:)?getlastmodified>").unwrap()
    });
    let collection = COLLECTION.get_or_init(|| Regex::new(r"<(?:\w+:)?collection\s*/?>").unwrap());

    let folder = folder_path.trim_end_matches('/');
    response
        .captures_iter(xml)
        .filter_map(|block| {
            let block = &block[1];
            let raw_href = href.captures(block)?[1].to_string();
            // Some servers answer with absolute URLs
            let path = Url::parse(&raw_href)
                .map(|u| u.path().to_string())
                .unwrap_or(raw_href);
            let path = path.trim_end_matches('/');
            if path == folder || path.is_empty() {
                return None;
            }

            let name = path.rsplit('/').next()?;
            let name = urlencoding::decode(name).map(|n| n.into_owned()).unwrap_or_else(|_| name.to_string());
            let is_folder = collection.is_match(block);
            Some(RemoteEntry {
                name,
                size: if is_folder {
                    None
                } else {
                    length.captures(block).and_then(|c| c[1].parse().ok())
                },
                last_modified: modified
                    .captures(block)
                    .and_then(|c| DateTime::parse_from_rfc2822(&c[1]).ok())
                    .map(|t| t.with_timezone(&Utc)),
                is_folder,
            })
        })
        .collect()
}

#[async_trait]
impl Backend for WebDavBackend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    fn supported_options(&self) -> Vec<OptionDescriptor> {
        webdav_options()
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let response = self.propfind("1").await?;
        let xml = response.text().await.map_err(send_error)?;
        let entries = parse_multistatus(&xml, self.base_url.path());
        debug!("PROPFIND {} returned {} entries", self.base_url, entries.len());
        Ok(entries)
    }

    async fn put(&self, remote_name: &str, source: Pin<Box<dyn AsyncRead + Send>>) -> Result<u64> {
        let url = self.file_url(remote_name)?;
        let sent = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&sent);
        let stream = ReaderStream::new(source).inspect(move |chunk| {
            if let Ok(bytes) = chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
        });

        let response = self
            .request(Method::PUT, url)
            .body(Body::wrap_stream(stream))
            .send()
            .await
            .map_err(send_error)?;
        check_status(response).await?;

        let written = sent.load(Ordering::Relaxed);
        info!("Uploaded {} via WebDAV ({} bytes)", remote_name, written);
        Ok(written)
    }

    async fn get(&self, remote_name: &str, mut destination: Pin<Box<dyn AsyncWrite + Send>>) -> Result<u64> {
        let url = self.file_url(remote_name)?;
        let response = self.request(Method::GET, url).send().await.map_err(send_error)?;
        let response = check_status(response).await?;

        let mut stream = response.bytes_stream();
        let mut read = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(send_error)?;
            destination.write_all(&chunk).await?;
            read += chunk.len() as u64;
        }
        destination.flush().await?;
        Ok(read)
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        let url = self.file_url(remote_name)?;
        let response = self.request(Method::DELETE, url).send().await.map_err(send_error)?;
        check_status(response).await?;
        Ok(())
    }

    async fn test(&self) -> Result<()> {
        self.propfind("0").await.map(|_| ())
    }
}
