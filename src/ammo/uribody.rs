use std::io::ErrorKind;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, Url};

use super::file::{Decoder, FileProvider, LineReader};
use super::http::{HttpAmmo, DEFAULT_TAG};
use super::urilist::{apply_header_line, base_url, split_uri_tag};
use crate::error::{Error, Result};

pub type UriBodyProvider = FileProvider<UriBodyDecoder>;

/// Decodes requests with bodies. Each entry is a header line
/// `<size> <uri> [tag]` followed by exactly `size` bytes of body:
///
/// ```text
/// 5 /upload upload
/// hello
/// 0 /empty
/// ```
///
/// `[K: V]` lines set sticky headers as in URI lists.
#[derive(Debug)]
pub struct UriBodyDecoder {
    method: Method,
    base: Url,
    headers: HeaderMap,
    body: Vec<u8>,
}

impl UriBodyDecoder {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            base: base_url(),
            headers: HeaderMap::new(),
            body: Vec::new(),
        }
    }
}

impl Default for UriBodyDecoder {
    fn default() -> Self {
        Self::new(Method::POST)
    }
}

#[async_trait]
impl Decoder for UriBodyDecoder {
    const NAME: &'static str = "uripost provider";

    async fn decode(&mut self, input: &mut LineReader, ammo: &mut HttpAmmo) -> Result<bool> {
        let (line, header, size, url) = loop {
            let Some((line, text)) = input.next_line().await? else {
                return Ok(false);
            };
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            if text.starts_with('[') {
                apply_header_line(&mut self.headers, line, text)?;
                continue;
            }

            let (size, rest) = text.split_once(char::is_whitespace).unwrap_or((text, ""));
            let size: u64 = size
                .parse()
                .map_err(|_| Error::decode(line, text, format!("invalid body size {size:?}")))?;
            let (uri, tag) = split_uri_tag(rest.trim());
            if uri.is_empty() {
                return Err(Error::decode(line, text, "missing uri"));
            }
            let url = self
                .base
                .join(uri)
                .map_err(|e| Error::decode(line, text, format!("invalid uri: {e}")))?;
            ammo.set_tag(tag.unwrap_or(DEFAULT_TAG));
            break (line, text.to_owned(), size, url);
        };

        input.read_block(size, &mut self.body).await.map_err(|e| {
            if e.kind() == ErrorKind::UnexpectedEof {
                Error::decode(line, &header, format!("body is shorter than {size} bytes"))
            } else {
                Error::SourceRead(e)
            }
        })?;

        let req = ammo.prepare(self.method.clone(), url);
        req.headers_mut().clone_from(&self.headers);
        *req.body_mut() = Some(self.body.clone().into());
        Ok(true)
    }

    fn reset(&mut self) {
        self.headers.clear();
    }
}
