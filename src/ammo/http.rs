use std::any::Any;

use reqwest::header::HeaderMap;
use reqwest::{Method, Request, Url};

use super::{Ammo, AmmoKind};
use crate::sample::{self, Sample};

/// Tag used when an input does not name one.
pub const DEFAULT_TAG: &str = "REQUEST";

/// A prepared HTTP request plus its tag.
///
/// Decoders refill the same instance for every shot it is recycled for;
/// the ammo keeps no per-shot state.
#[derive(Debug, Default)]
pub struct HttpAmmo {
    request: Option<Request>,
    tag: String,
}

impl HttpAmmo {
    /// Resets the held request to `method url` with no headers and no body,
    /// reusing the existing request object when there is one.
    pub fn prepare(&mut self, method: Method, url: Url) -> &mut Request {
        let req = match self.request.take() {
            Some(mut req) => {
                *req.method_mut() = method;
                *req.url_mut() = url;
                req.headers_mut().clear();
                *req.body_mut() = None;
                req
            }
            None => Request::new(method, url),
        };
        self.request.insert(req)
    }

    pub fn set_tag(&mut self, tag: &str) {
        self.tag.clear();
        self.tag.push_str(tag);
    }

    pub fn headers(&self) -> Option<&HeaderMap> {
        self.request.as_ref().map(Request::headers)
    }

    pub fn prepared(&self) -> Option<&Request> {
        self.request.as_ref()
    }

    /// A copy of the prepared request ready for dispatch, and a fresh
    /// sample tagged with this ammo's label.
    pub fn request(&self) -> Option<(Request, Box<Sample>)> {
        let req = self.request.as_ref()?.try_clone()?;
        Some((req, sample::acquire(&self.tag)))
    }
}

impl Ammo for HttpAmmo {
    fn kind(&self) -> AmmoKind {
        AmmoKind::Http
    }

    fn tag(&self) -> &str {
        &self.tag
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderValue, ACCEPT};

    #[test]
    fn prepare_reuses_request_in_place() {
        let mut ammo = HttpAmmo::default();
        let req = ammo.prepare(Method::POST, Url::parse("http://a/x").unwrap());
        req.headers_mut().insert(ACCEPT, HeaderValue::from_static("*/*"));
        *req.body_mut() = Some(b"payload".to_vec().into());

        let req = ammo.prepare(Method::GET, Url::parse("http://b/y").unwrap());
        assert_eq!(*req.method(), Method::GET);
        assert_eq!(req.url().as_str(), "http://b/y");
        assert!(req.headers().is_empty());
        assert!(req.body().is_none());
    }

    #[test]
    fn request_yields_copy_and_tagged_sample() {
        let mut ammo = HttpAmmo::default();
        ammo.set_tag("index");
        ammo.prepare(Method::GET, Url::parse("http://host/index").unwrap());

        let (req, sample) = ammo.request().unwrap();
        assert_eq!(req.url().path(), "/index");
        assert_eq!(sample.tag(), "index");
        assert_eq!(sample.rtt(), 0);
        sample::release(sample);

        // The ammo still holds its own request.
        assert!(ammo.prepared().is_some());
    }

    #[test]
    fn unprepared_ammo_has_no_request() {
        assert!(HttpAmmo::default().request().is_none());
    }
}
