use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, Url};

use super::file::{Decoder, FileProvider, LineReader};
use super::http::{HttpAmmo, DEFAULT_TAG};
use crate::error::{Error, Result};

pub type UriListProvider = FileProvider<UriListDecoder>;

/// Host put on decoded requests; the gun replaces it with its target.
pub(crate) const BASE_URL: &str = "http://localhost/";

/// Decodes a URI list interleaved with sticky header lines:
///
/// ```text
/// [Host: example.com]
/// /index.html
/// [Cookie: a=b]
/// /api/v1 api
/// ```
///
/// Every URI line becomes a GET carrying the headers seen so far. An
/// optional second word on a URI line is the tag.
#[derive(Debug, Clone)]
pub struct UriListDecoder {
    base: Url,
    initial: HeaderMap,
    headers: HeaderMap,
}

impl UriListDecoder {
    pub fn new() -> Self {
        Self::with_headers(HeaderMap::new())
    }

    /// Starts every pass with `headers` already set.
    pub fn with_headers(headers: HeaderMap) -> Self {
        Self {
            base: base_url(),
            initial: headers.clone(),
            headers,
        }
    }

    /// Parses `[K: V]` lines into a header map for [`Self::with_headers`].
    pub fn parse_headers<S: AsRef<str>>(lines: &[S]) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (i, line) in lines.iter().enumerate() {
            apply_header_line(&mut headers, i as u64 + 1, line.as_ref().trim())?;
        }
        Ok(headers)
    }
}

impl Default for UriListDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Decoder for UriListDecoder {
    const NAME: &'static str = "uri provider";

    async fn decode(&mut self, input: &mut LineReader, ammo: &mut HttpAmmo) -> Result<bool> {
        while let Some((line, text)) = input.next_line().await? {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('[') {
                apply_header_line(&mut self.headers, line, text)?;
                continue;
            }

            let (uri, tag) = split_uri_tag(text);
            let url = self
                .base
                .join(uri)
                .map_err(|e| Error::decode(line, text, format!("invalid uri: {e}")))?;
            let req = ammo.prepare(Method::GET, url);
            req.headers_mut().clone_from(&self.headers);
            ammo.set_tag(tag.unwrap_or(DEFAULT_TAG));
            return Ok(true);
        }
        Ok(false)
    }

    fn reset(&mut self) {
        self.headers.clone_from(&self.initial);
    }
}

// ─── Shared line helpers ─────────────────────────────────────────

pub(crate) fn base_url() -> Url {
    Url::parse(BASE_URL).unwrap_or_else(|_| unreachable!("static base url parses"))
}

/// `"/path tag"` → (`/path`, `Some("tag")`).
pub(crate) fn split_uri_tag(text: &str) -> (&str, Option<&str>) {
    let mut parts = text.split_whitespace();
    let uri = parts.next().unwrap_or_default();
    (uri, parts.next())
}

/// Parses one `[Name: Value]` line and sets it on `headers`, replacing any
/// previous value under the same name.
pub(crate) fn apply_header_line(headers: &mut HeaderMap, line: u64, text: &str) -> Result<()> {
    let (name, value) = parse_header_line(text).map_err(|reason| Error::decode(line, text, reason))?;
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| Error::decode(line, text, "invalid header name"))?;
    let value =
        HeaderValue::from_str(value).map_err(|_| Error::decode(line, text, "invalid header value"))?;
    headers.insert(name, value);
    Ok(())
}

fn parse_header_line(text: &str) -> std::result::Result<(&str, &str), &'static str> {
    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or("header line should look like '[key: value]'")?;
    let (key, value) = inner.split_once(':').ok_or("missing colon in header line")?;
    let key = key.trim();
    if key.is_empty() {
        return Err("missing header key");
    }
    Ok((key, value.trim()))
}
