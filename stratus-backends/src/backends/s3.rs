//! S3 compatible backend with AWS Signature Version 4 request signing
//!
//! Requests use path-style addressing (`https://server/bucket/key`) so that
//! non-AWS servers work without DNS wildcards.

use std::fmt;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use hmac::{Hmac, Mac};
use regex::Regex;
use reqwest::{Client, Method, Response, StatusCode};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use stratus_core::{Result, StorageErrorType, StratusError};
use crate::backends::{check_remote_name, config_error, connection_error};
use crate::options::{BackendOptions, OptionDescriptor, OptionKind, AUTH_PASSWORD, AUTH_USERNAME};
use crate::registry::{BackendFactory, BackendProfile};
use crate::target::TargetUrl;
use crate::{Backend, RemoteEntry};

type HmacSha256 = Hmac<Sha256>;

const ACCESS_KEY_ID: &str = "aws-access-key-id";
const SECRET_ACCESS_KEY: &str = "aws-secret-access-key";
const SERVER_NAME: &str = "s3-server-name";
const LOCATION_CONSTRAINT: &str = "s3-location-constraint";
const USE_SSL: &str = "use-ssl";

const DEFAULT_SERVER: &str = "s3.amazonaws.com";
const DEFAULT_REGION: &str = "us-east-1";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

fn s3_options() -> Vec<OptionDescriptor> {
    vec![
        OptionDescriptor::new(
            ACCESS_KEY_ID,
            OptionKind::String,
            "S3 access key ID",
            "The access key ID used to sign requests.",
        )
        .required(),
        OptionDescriptor::new(
            SECRET_ACCESS_KEY,
            OptionKind::Password,
            "S3 secret access key",
            "The secret key used to sign requests.",
        )
        .required(),
        OptionDescriptor::new(
            SERVER_NAME,
            OptionKind::String,
            "S3 server",
            "Host name of the S3 compatible service.",
        )
        .with_default(DEFAULT_SERVER),
        OptionDescriptor::new(
            LOCATION_CONSTRAINT,
            OptionKind::String,
            "Bucket region",
            "Region the bucket lives in. Used for request signing.",
        )
        .with_default(DEFAULT_REGION),
        OptionDescriptor::new(
            USE_SSL,
            OptionKind::Boolean,
            "Use HTTPS",
            "Connects to the service over HTTPS. Disable only for local test servers.",
        )
        .with_default("true"),
    ]
}

#[derive(Clone, PartialEq, Eq)]
pub struct S3Settings {
    pub bucket: String,
    pub prefix: String,
    pub server: String,
    pub region: String,
    pub use_ssl: bool,
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl S3Settings {
    pub fn resolve(url: &TargetUrl, options: &BackendOptions) -> Result<Self> {
        let bucket = url
            .host()
            .ok_or_else(|| config_error("S3 target URL must name a bucket: s3://bucket/prefix"))?
            .to_string();
        let access_key_id = options
            .get_non_empty(ACCESS_KEY_ID)
            .or_else(|| options.get_non_empty(AUTH_USERNAME))
            .ok_or_else(|| config_error(format!("Missing --{}", ACCESS_KEY_ID)))?
            .to_string();
        let secret_access_key = options
            .get_non_empty(SECRET_ACCESS_KEY)
            .or_else(|| options.get_non_empty(AUTH_PASSWORD))
            .ok_or_else(|| config_error(format!("Missing --{}", SECRET_ACCESS_KEY)))?
            .to_string();

        let prefix = url.trimmed_path();
        Ok(Self {
            bucket,
            prefix: if prefix.is_empty() { prefix } else { format!("{}/", prefix) },
            server: options.get_non_empty(SERVER_NAME).unwrap_or(DEFAULT_SERVER).to_string(),
            region: options.get_non_empty(LOCATION_CONSTRAINT).unwrap_or(DEFAULT_REGION).to_string(),
            use_ssl: options.get_bool(USE_SSL, true),
            access_key_id,
            secret_access_key,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}://{}", if self.use_ssl { "https" } else { "http" }, self.server)
    }

    /// `/bucket/key` with every segment URI-encoded
    fn object_path(&self, key: &str) -> String {
        std::iter::once(self.bucket.as_str())
            .chain(key.split('/'))
            .map(|segment| urlencoding::encode(segment).into_owned())
            .fold(String::new(), |mut path, segment| {
                path.push('/');
                path.push_str(&segment);
                path
            })
    }
}

impl fmt::Debug for S3Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("S3Settings")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .field("server", &self.server)
            .field("region", &self.region)
            .field("use_ssl", &self.use_ssl)
            .field("access_key_id", &self.access_key_id)
            .finish_non_exhaustive()
    }
}

fn hmac_sha256(key: &[u8], data: &str) -> Result<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| StratusError::Encryption(format!("HMAC initialization failed: {}", e)))?;
    mac.update(data.as_bytes());
    Ok(mac.finalize().into_bytes().to_vec())
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Derived key for one day, region and service
fn signing_key(secret: &str, date: &str, region: &str, service: &str) -> Result<Vec<u8>> {
    let k_date = hmac_sha256(format!("AWS4{}", secret).as_bytes(), date)?;
    let k_region = hmac_sha256(&k_date, region)?;
    let k_service = hmac_sha256(&k_region, service)?;
    hmac_sha256(&k_service, "aws4_request")
}

/// Query string with keys sorted and keys and values URI-encoded
fn canonical_query(query: &[(&str, String)]) -> String {
    let mut pairs: Vec<(String, String)> = query
        .iter()
        .map(|(k, v)| (urlencoding::encode(k).into_owned(), urlencoding::encode(v).into_owned()))
        .collect();
    pairs.sort();
    pairs
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&")
}

/// A signed request ready to send
struct SignedRequest {
    url: String,
    headers: Vec<(&'static str, String)>,
}

fn sign(
    settings: &S3Settings,
    method: &Method,
    path: &str,
    query: &[(&str, String)],
    payload_hash: &str,
    now: DateTime<Utc>,
) -> Result<SignedRequest> {
    let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
    let date = now.format("%Y%m%d").to_string();
    let query_string = canonical_query(query);

    let canonical_headers = format!(
        "host:{}\nx-amz-content-sha256:{}\nx-amz-date:{}\n",
        settings.server, payload_hash, amz_date
    );
    let signed_headers = "host;x-amz-content-sha256;x-amz-date";
    let canonical_request = format!(
        "{}\n{}\n{}\n{}\n{}\n{}",
        method.as_str(),
        path,
        query_string,
        canonical_headers,
        signed_headers,
        payload_hash
    );

    let scope = format!("{}/{}/s3/aws4_request", date, settings.region);
    let string_to_sign = format!(
        "AWS4-HMAC-SHA256\n{}\n{}\n{}",
        amz_date,
        scope,
        sha256_hex(canonical_request.as_bytes())
    );
    let key = signing_key(&settings.secret_access_key, &date, &settings.region, "s3")?;
    let signature = hex::encode(hmac_sha256(&key, &string_to_sign)?);

    let authorization = format!(
        "AWS4-HMAC-SHA256 Credential={}/{}, SignedHeaders={}, Signature={}",
        settings.access_key_id, scope, signed_headers, signature
    );

    let mut url = format!("{}{}", settings.endpoint(), path);
    if !query_string.is_empty() {
        url.push('?');
        url.push_str(&query_string);
    }

    Ok(SignedRequest {
        url,
        headers: vec![
            ("x-amz-date", amz_date),
            ("x-amz-content-sha256", payload_hash.to_string()),
            ("authorization", authorization),
        ],
    })
}

pub struct S3Factory;

impl BackendFactory for S3Factory {
    fn supported_options(&self, _profile: &BackendProfile) -> Vec<OptionDescriptor> {
        s3_options()
    }

    fn construct(
        &self,
        profile: &BackendProfile,
        url: &TargetUrl,
        options: &BackendOptions,
    ) -> Result<Box<dyn Backend>> {
        let settings = S3Settings::resolve(url, options)?;
        let client = Client::builder()
            .use_rustls_tls()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| config_error(format!("HTTP client: {}", e)))?;
        debug!("Configured S3 backend: {:?}", settings);
        Ok(Box::new(S3Backend { profile: profile.clone(), client, settings }))
    }
}

#[derive(Debug)]
pub struct S3Backend {
    profile: BackendProfile,
    client: Client,
    settings: S3Settings,
}

impl S3Backend {
    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let payload_hash = sha256_hex(body.as_deref().unwrap_or_default());
        let signed = sign(&self.settings, &method, path, query, &payload_hash, Utc::now())?;

        let mut request = self.client.request(method, &signed.url);
        for (name, value) in signed.headers {
            request = request.header(name, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        check_status(response).await
    }

    fn object_key(&self, remote_name: &str) -> Result<String> {
        check_remote_name(remote_name)?;
        Ok(format!("{}{}", self.settings.prefix, remote_name))
    }
}

async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let code = xml_values(&body, "Code").into_iter().next().unwrap_or_default();
    let error = match (status, code.as_str()) {
        (_, "InvalidAccessKeyId") | (_, "SignatureDoesNotMatch") => StorageErrorType::AuthenticationFailed,
        (StatusCode::FORBIDDEN, _) => StorageErrorType::AccessDenied,
        (_, "NoSuchBucket") => StorageErrorType::PathNotFound,
        (StatusCode::NOT_FOUND, _) => StorageErrorType::FileNotFound,
        _ => StorageErrorType::ProtocolError(format!("HTTP {} {}", status, code)),
    };
    Err(StratusError::Storage(error))
}

/// Text of every `<tag>` element, in document order
fn xml_values(xml: &str, tag: &str) -> Vec<String> {
    let re = Regex::new(&format!(r"(?s)<{0}>(.*?)</{0}>", regex::escape(tag)));
    match re {
        Ok(re) => re.captures_iter(xml).map(|c| unescape_xml(&c[1])).collect(),
        Err(_) => Vec::new(),
    }
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// Objects of one ListObjectsV2 page and the continuation token, if truncated
fn parse_list_page(xml: &str, prefix: &str) -> (Vec<RemoteEntry>, Option<String>) {
    static CONTENTS: OnceLock<Regex> = OnceLock::new();
    let contents = CONTENTS.get_or_init(|| Regex::new(r"(?s)<Contents>(.*?)</Contents>").unwrap());

    let entries = contents
        .captures_iter(xml)
        .filter_map(|block| {
            let block = &block[1];
            let key = xml_values(block, "Key").into_iter().next()?;
            let name = key.strip_prefix(prefix)?.to_string();
            if name.is_empty() || name.contains('/') {
                return None;
            }
            Some(RemoteEntry {
                name,
                size: xml_values(block, "Size").first().and_then(|s| s.parse().ok()),
                last_modified: xml_values(block, "LastModified")
                    .first()
                    .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
                    .map(|t| t.with_timezone(&Utc)),
                is_folder: false,
            })
        })
        .collect();

    let truncated = xml_values(xml, "IsTruncated").first().map_or(false, |v| v == "true");
    let token = if truncated {
        xml_values(xml, "NextContinuationToken").into_iter().next()
    } else {
        None
    };
    (entries, token)
}

#[async_trait]
impl Backend for S3Backend {
    fn profile(&self) -> &BackendProfile {
        &self.profile
    }

    fn supported_options(&self) -> Vec<OptionDescriptor> {
        s3_options()
    }

    async fn list(&self) -> Result<Vec<RemoteEntry>> {
        let path = format!("/{}", urlencoding::encode(&self.settings.bucket));
        let mut entries = Vec::new();
        let mut token: Option<String> = None;

        loop {
            let mut query = vec![
                ("list-type", "2".to_string()),
                ("prefix", self.settings.prefix.clone()),
            ];
            if let Some(token) = &token {
                query.push(("continuation-token", token.clone()));
            }

            let response = self.send(Method::GET, &path, &query, None).await?;
            let xml = response.text().await.map_err(|e| connection_error(e.to_string()))?;
            let (page, next) = parse_list_page(&xml, &self.settings.prefix);
            entries.extend(page);

            match next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!("Listed {} objects in s3://{}/{}", entries.len(), self.settings.bucket, self.settings.prefix);
        Ok(entries)
    }

    async fn put(&self, remote_name: &str, mut source: Pin<Box<dyn AsyncRead + Send>>) -> Result<u64> {
        let key = self.object_key(remote_name)?;
        let mut body = Vec::new();
        source.read_to_end(&mut body).await?;
        let size = body.len() as u64;

        self.send(Method::PUT, &self.settings.object_path(&key), &[], Some(body)).await?;
        info!("Uploaded {} to S3 ({} bytes)", key, size);
        Ok(size)
    }

    async fn get(&self, remote_name: &str, mut destination: Pin<Box<dyn AsyncWrite + Send>>) -> Result<u64> {
        let key = self.object_key(remote_name)?;
        let response = self.send(Method::GET, &self.settings.object_path(&key), &[], None).await?;

        let mut stream = response.bytes_stream();
        let mut read = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| connection_error(e.to_string()))?;
            destination.write_all(&chunk).await?;
            read += chunk.len() as u64;
        }
        destination.flush().await?;
        Ok(read)
    }

    async fn delete(&self, remote_name: &str) -> Result<()> {
        let key = self.object_key(remote_name)?;
        self.send(Method::DELETE, &self.settings.object_path(&key), &[], None).await?;
        Ok(())
    }

    async fn test(&self) -> Result<()> {
        let path = format!("/{}", urlencoding::encode(&self.settings.bucket));
        let query = [("list-type", "2".to_string()), ("max-keys", "1".to_string())];
        self.send(Method::GET, &path, &query, None).await.map(|_| ())
    }
}
