use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue, HOST};
use reqwest::{Method, Url};
use serde::Deserialize;

use super::file::{Decoder, FileProvider, LineReader};
use super::http::{HttpAmmo, DEFAULT_TAG};
use crate::error::{Error, Result};

pub type JsonLineProvider = FileProvider<JsonLineDecoder>;

/// One request per line:
/// `{"host": "example.com", "method": "GET", "uri": "/x", "headers": {...}, "tag": "x"}`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Line {
    host: String,
    #[serde(default = "default_method")]
    method: String,
    uri: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    tag: String,
}

fn default_method() -> String {
    "GET".into()
}

#[derive(Debug, Default)]
pub struct JsonLineDecoder {
    url: String,
}

impl JsonLineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn fill(&mut self, line: u64, text: &str, ammo: &mut HttpAmmo) -> Result<()> {
        let data: Line =
            serde_json::from_str(text).map_err(|e| Error::decode(line, text, e.to_string()))?;

        let method = Method::from_bytes(data.method.as_bytes())
            .map_err(|_| Error::decode(line, text, format!("invalid method {:?}", data.method)))?;
        self.url.clear();
        self.url.push_str("http://");
        self.url.push_str(&data.host);
        self.url.push_str(&data.uri);
        let url = Url::parse(&self.url).map_err(|e| Error::decode(line, text, e.to_string()))?;

        let req = ammo.prepare(method, url);
        for (name, value) in &data.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| Error::decode(line, text, format!("invalid header name {name:?}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|_| Error::decode(line, text, format!("invalid header value {value:?}")))?;
            req.headers_mut().insert(name, value);
        }
        // The gun rewrites the URL to its target; the original host travels
        // in the Host header.
        if !req.headers().contains_key(HOST) {
            let host = HeaderValue::from_str(&data.host)
                .map_err(|_| Error::decode(line, text, format!("invalid host {:?}", data.host)))?;
            req.headers_mut().insert(HOST, host);
        }
        ammo.set_tag(if data.tag.is_empty() { DEFAULT_TAG } else { data.tag.as_str() });
        Ok(())
    }
}

#[async_trait]
impl Decoder for JsonLineDecoder {
    const NAME: &'static str = "jsonline provider";

    async fn decode(&mut self, input: &mut LineReader, ammo: &mut HttpAmmo) -> Result<bool> {
        while let Some((line, text)) = input.next_line().await? {
            let text = text.trim();
            if text.is_empty() {
                continue;
            }
            self.fill(line, text, ammo)?;
            return Ok(true);
        }
        Ok(false)
    }
}
