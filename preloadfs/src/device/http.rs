//! Remote HTTP device.
//!
//! Resolves the resource size with a HEAD probe, then serves each
//! `read_at` with a ranged GET. Redirects are followed explicitly
//! (absolute and relative `Location`, bounded hop count) so that the final
//! URL is remembered and subsequent range requests skip the redirect chain.
//! A transfer interrupted mid-body is retried over a fresh connection for
//! the remaining range, up to a fixed attempt bound; bytes already obtained
//! are never thrown away.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use reqwest::{header, StatusCode, Url};
use tracing::{debug, warn};

use super::{Device, DeviceError};

/// Hop limit for explicit redirect following.
const MAX_REDIRECTS: usize = 8;

/// Total attempts for one ranged transfer before surfacing the failure.
const MAX_ATTEMPTS: usize = 4;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Byte-range source over HTTP/1.1.
pub struct HttpDevice {
    client: Client,
    url: Url,
    size: u64,
}

impl HttpDevice {
    /// Build the client and parse the locator. No network traffic happens
    /// until [`Device::open`].
    pub fn new(url: &str) -> Result<Self, DeviceError> {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        let url = Url::parse(url)
            .map_err(|e| DeviceError::Protocol(format!("invalid URL {url:?}: {e}")))?;
        Ok(Self {
            client,
            url,
            size: 0,
        })
    }

    /// One attempt at fetching `buf[*filled..]` starting at absolute offset
    /// `offset + *filled`.
    ///
    /// Bytes are streamed directly into `buf` and accounted in `*filled` as
    /// they arrive, so progress survives a mid-body failure. Returns `Ok`
    /// when the server finished the response body, which may still leave
    /// the buffer short.
    fn fetch_range(
        &mut self,
        buf: &mut [u8],
        offset: u64,
        filled: &mut usize,
    ) -> Result<(), DeviceError> {
        let start = offset + *filled as u64;
        let end = offset + buf.len() as u64 - 1;

        for _ in 0..MAX_REDIRECTS {
            let response = self
                .client
                .get(self.url.clone())
                .header(header::RANGE, format!("bytes={start}-{end}"))
                .send()?;
            let status = response.status();

            if status.is_redirection() {
                self.url = redirect_target(&self.url, &response)?;
                debug!(url = %self.url, "range request redirected");
                continue;
            }
            match status {
                StatusCode::PARTIAL_CONTENT => {}
                // A 200 ignores the range; the body only lines up with the
                // requested window when it starts at the beginning.
                StatusCode::OK if start == 0 => {}
                StatusCode::OK => {
                    return Err(DeviceError::Protocol(
                        "server ignored range request".into(),
                    ))
                }
                _ => return Err(DeviceError::Status(status.as_u16())),
            }

            return drain_body(response, buf, filled);
        }
        Err(DeviceError::TooManyRedirects(MAX_REDIRECTS))
    }
}

impl Device for HttpDevice {
    fn open(&mut self) -> Result<(), DeviceError> {
        for _ in 0..MAX_REDIRECTS {
            let response = self.client.head(self.url.clone()).send()?;
            let status = response.status();

            if status.is_redirection() {
                self.url = redirect_target(&self.url, &response)?;
                debug!(url = %self.url, "resource redirected");
                continue;
            }
            if status == StatusCode::OK {
                // A HEAD response has no body, so the size comes straight
                // from the header rather than reqwest's body size hint.
                self.size = response
                    .headers()
                    .get(header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| {
                        DeviceError::Protocol("response carries no Content-Length".into())
                    })?;
                debug!(url = %self.url, size = self.size, "resource resolved");
                return Ok(());
            }
            return Err(DeviceError::Status(status.as_u16()));
        }
        Err(DeviceError::TooManyRedirects(MAX_REDIRECTS))
    }

    fn size(&self) -> u64 {
        self.size
    }

    fn read_at(&mut self, buf: &mut [u8], offset: u64) -> Result<usize, DeviceError> {
        if offset >= self.size {
            return Ok(0);
        }
        let want = buf.len().min((self.size - offset) as usize);
        let mut filled = 0;

        for attempt in 1..=MAX_ATTEMPTS {
            match self.fetch_range(&mut buf[..want], offset, &mut filled) {
                Ok(()) => return Ok(filled),
                Err(e) if is_retryable(&e) && attempt < MAX_ATTEMPTS => {
                    debug!(error = %e, attempt, filled, "ranged transfer interrupted; retrying");
                }
                Err(e) => {
                    if filled > 0 {
                        warn!(
                            error = %e,
                            filled,
                            want,
                            "ranged transfer gave up; returning partial data"
                        );
                        return Ok(filled);
                    }
                    warn!(error = %e, offset, "ranged transfer failed");
                    return Err(e);
                }
            }
        }
        Ok(filled)
    }
}

/// Transport-level failures are retried; terminal statuses and protocol
/// violations are not.
fn is_retryable(e: &DeviceError) -> bool {
    matches!(e, DeviceError::Io(_) | DeviceError::Transport(_))
}

/// Resolve the `Location` header of a redirect against the current URL.
fn redirect_target(current: &Url, response: &Response) -> Result<Url, DeviceError> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or_else(|| DeviceError::Protocol("redirect without Location header".into()))?;
    let location = location
        .to_str()
        .map_err(|_| DeviceError::Protocol("non-ASCII Location header".into()))?;
    current
        .join(location)
        .map_err(|e| DeviceError::Protocol(format!("bad Location {location:?}: {e}")))
}

/// Stream a response body into `buf[*filled..]`, bumping `*filled`.
fn drain_body(mut response: Response, buf: &mut [u8], filled: &mut usize) -> Result<(), DeviceError> {
    while *filled < buf.len() {
        match response.read(&mut buf[*filled..]) {
            // Server finished the range, possibly short of what we asked.
            Ok(0) => return Ok(()),
            Ok(n) => *filled += n,
            Err(e) => return Err(DeviceError::Io(e)),
        }
    }
    Ok(())
}
