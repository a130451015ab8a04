//! Media download with manual redirect handling
//!
//! Opens a download stream for a URL:
//! - HTTP/HTTPS only
//! - Redirects (301, 302, 303, 307) are followed by hand, at most
//!   [`MAX_ALLOWED_REDIRECTS`] times, so every hop is visible and bounded
//! - Session cookies set by a redirect hop are sent to the next hop
//! - Separate connect and read timeouts
//! - Content-Disposition filename extraction
//!
//! The body is not buffered: [`Download::into_reader`] exposes it as an
//! `AsyncRead` for the blob store.

use std::time::Duration;

use futures_util::TryStreamExt;
use percent_encoding::percent_decode_str;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION, COOKIE, LOCATION, SET_COOKIE};
use reqwest::{Client, StatusCode};
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

use crate::media::store::sanitize_filename;

/// Maximum number of redirects followed before giving up
pub const MAX_ALLOWED_REDIRECTS: u32 = 5;

/// Default connect timeout in milliseconds (10s)
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default read timeout in milliseconds (30s)
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Errors that can occur while opening or reading a download
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("Bad URL {url}: {reason}")]
    BadUrl { url: String, reason: String },

    #[error("Connection to {url} failed: {reason}")]
    Connection { url: String, reason: String },

    #[error("No valid response from {url}: {reason}")]
    Response { url: String, reason: String },

    #[error("{url} responded with status {status}")]
    Status { url: String, status: u16 },

    #[error("Too many redirects (max {max}), next hop was {url}")]
    TooManyRedirects { url: String, max: u32 },

    #[error("Failed to read data from {url}: {reason}")]
    DataStream { url: String, reason: String },
}

/// Configuration for media downloads
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,

    /// Read timeout in milliseconds, applied to each read
    pub read_timeout_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl FetchConfig {
    /// Create a new config with custom connect timeout
    pub fn with_connect_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.connect_timeout_ms = timeout_ms;
        self
    }

    /// Create a new config with custom read timeout
    pub fn with_read_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.read_timeout_ms = timeout_ms;
        self
    }
}

/// An open download whose status was 2xx
#[derive(Debug)]
pub struct Download {
    /// URL that finally answered with success
    pub final_url: Url,

    /// Number of redirects followed
    pub redirects: u32,

    /// Filename from the final response's Content-Disposition, if usable
    pub disposition_filename: Option<String>,

    response: reqwest::Response,
}

impl Download {
    /// Turn the response body into a reader. Body read errors surface as
    /// `std::io::Error`s from the reader.
    pub fn into_reader(self) -> impl AsyncRead + Send + Unpin {
        let stream = self.response.bytes_stream().map_err(std::io::Error::other);
        StreamReader::new(Box::pin(stream))
    }
}

/// Downloads media, following redirects by hand
#[derive(Debug, Clone)]
pub struct MediaFetcher {
    config: FetchConfig,
}

impl Default for MediaFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaFetcher {
    /// Create a new MediaFetcher with default configuration
    pub fn new() -> Self {
        Self {
            config: FetchConfig::default(),
        }
    }

    /// Create a new MediaFetcher with custom configuration
    pub fn with_config(config: FetchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Open `url`, following up to [`MAX_ALLOWED_REDIRECTS`] redirects.
    ///
    /// Returns once a 2xx response arrives; the body has not been read yet.
    pub async fn open(&self, url: &str) -> Result<Download, FetchError> {
        let mut current = parse_http_url(url)?;

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))
            .read_timeout(Duration::from_millis(self.config.read_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Connection {
                url: url.to_string(),
                reason: format!("Failed to create HTTP client: {}", e),
            })?;

        let mut cookie: Option<String> = None;
        let mut redirects = 0;

        loop {
            let mut request = client.get(current.clone());
            if let Some(cookie) = &cookie {
                request = request.header(COOKIE, cookie);
            }

            let response = request
                .send()
                .await
                .map_err(|e| classify_request_error(&current, e))?;
            let status = response.status();

            if is_followed_redirect(status) {
                if redirects >= MAX_ALLOWED_REDIRECTS {
                    let url = response
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(current.as_str())
                        .to_string();
                    return Err(FetchError::TooManyRedirects {
                        url,
                        max: MAX_ALLOWED_REDIRECTS,
                    });
                }

                let next = redirect_target(&current, response.headers())?;
                cookie = session_cookie(response.headers());
                redirects += 1;

                tracing::debug!(
                    from = %current,
                    to = %next,
                    status = status.as_u16(),
                    redirects = redirects,
                    "Following redirect"
                );
                current = next;
            } else if status.is_success() {
                let disposition_filename = response
                    .headers()
                    .get(CONTENT_DISPOSITION)
                    .and_then(|v| v.to_str().ok())
                    .and_then(content_disposition_filename)
                    .filter(|name| !sanitize_filename(name).is_empty());

                return Ok(Download {
                    final_url: current,
                    redirects,
                    disposition_filename,
                    response,
                });
            } else {
                return Err(FetchError::Status {
                    url: current.to_string(),
                    status: status.as_u16(),
                });
            }
        }
    }
}

fn parse_http_url(url: &str) -> Result<Url, FetchError> {
    let parsed = Url::parse(url).map_err(|e| FetchError::BadUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(FetchError::BadUrl {
            url: url.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(parsed)
}

fn is_followed_redirect(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
    )
}

fn redirect_target(current: &Url, headers: &HeaderMap) -> Result<Url, FetchError> {
    let location = headers
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| FetchError::BadUrl {
            url: current.to_string(),
            reason: "redirect without a usable Location header".to_string(),
        })?;
    let next = current.join(location).map_err(|e| FetchError::BadUrl {
        url: location.to_string(),
        reason: e.to_string(),
    })?;
    parse_http_url(next.as_str())
}

/// `name=value` pairs of every Set-Cookie header, attributes dropped
fn session_cookie(headers: &HeaderMap) -> Option<String> {
    let pairs: Vec<&str> = headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|v| v.split(';').next())
        .map(str::trim)
        .filter(|pair| pair.contains('='))
        .collect();
    (!pairs.is_empty()).then(|| pairs.join("; "))
}

fn classify_request_error(url: &Url, e: reqwest::Error) -> FetchError {
    let url = url.to_string();
    let reason = e.to_string();
    if e.is_builder() {
        FetchError::BadUrl { url, reason }
    } else if e.is_connect() || e.is_timeout() {
        FetchError::Connection { url, reason }
    } else {
        FetchError::Response { url, reason }
    }
}

/// Extract the filename from a Content-Disposition header value.
///
/// `filename*` (RFC 5987, percent-encoded) takes priority over `filename`.
/// Returns `None` for headers without a usable filename parameter.
pub fn content_disposition_filename(header: &str) -> Option<String> {
    let mut plain: Option<String> = None;
    let mut extended: Option<String> = None;

    for param in split_params(header).into_iter().skip(1) {
        let Some((key, value)) = param.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "filename" => plain = Some(unquote(value.trim())),
            "filename*" => {
                // charset'language'percent-encoded-value
                let mut parts = value.trim().splitn(3, '\'');
                let (Some(charset), Some(_lang), Some(encoded)) =
                    (parts.next(), parts.next(), parts.next())
                else {
                    continue;
                };
                let bytes: Vec<u8> = percent_decode_str(encoded).collect();
                extended = if charset.eq_ignore_ascii_case("utf-8") {
                    String::from_utf8(bytes).ok()
                } else {
                    Some(bytes.iter().map(|&b| b as char).collect())
                };
            }
            _ => {}
        }
    }

    extended.or(plain).filter(|name| !name.is_empty())
}

/// Split on `;` outside of double quotes
fn split_params(header: &str) -> Vec<&str> {
    let mut params = Vec::new();
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in header.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            ';' if !in_quotes => {
                params.push(header[start..i].trim());
                start = i + 1;
            }
            _ => {}
        }
    }
    params.push(header[start..].trim());
    params
}

fn unquote(value: &str) -> String {
    let Some(inner) = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
    else {
        return value.to_string();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}
