//! Request/response types shared by the pipeline and its transports.

use http::header::{CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method};
use url::Url;

/// Whether a request carries (and captures) the session cookies.
///
/// Has no default; every call states it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Include,
    Omit,
}

impl Credentials {
    pub fn included(self) -> bool {
        matches!(self, Credentials::Include)
    }
}

/// `application/x-www-form-urlencoded` request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormBody(String);

impl FormBody {
    pub const CONTENT_TYPE: &'static str = "application/x-www-form-urlencoded";

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut serializer = url::form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs {
            serializer.append_pair(key.as_ref(), value.as_ref());
        }
        Self(serializer.finish())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Per-call options accepted by [`RequestPipeline::request`](super::RequestPipeline::request).
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<FormBody>,
    pub credentials: Credentials,
}

impl RequestOptions {
    pub fn get(credentials: Credentials) -> Self {
        Self {
            method: Method::GET,
            body: None,
            credentials,
        }
    }

    /// Submit a form body with the given method. GET submissions carry the
    /// fields in the query string instead of a body.
    pub fn submit(method: Method, body: FormBody, credentials: Credentials) -> Self {
        Self {
            method,
            body: Some(body),
            credentials,
        }
    }
}

/// Fully prepared request handed to a transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Option<String>,
}

/// Raw response as produced by a transport (redirects not followed).
#[derive(Debug, Clone)]
pub struct TransportResponse {
    pub status: u16,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: String,
}

impl TransportResponse {
    /// `Location` of a 3xx response, if any.
    pub fn redirect_location(&self) -> Option<&str> {
        if !matches!(self.status, 301 | 302 | 303 | 307 | 308) {
            return None;
        }
        self.headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.trim().is_empty())
    }
}

/// Final, non-redirect response returned to callers.
#[derive(Debug, Clone)]
pub struct PageResponse {
    status: u16,
    url: Url,
    headers: HeaderMap,
    body: String,
}

impl PageResponse {
    pub fn new(status: u16, url: Url, headers: HeaderMap, body: String) -> Self {
        Self {
            status,
            url,
            headers,
            body,
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// URL of the last hop after redirects.
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn host(&self) -> Option<&str> {
        self.url.host_str()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    pub fn into_text(self) -> String {
        self.body
    }
}

impl From<TransportResponse> for PageResponse {
    fn from(response: TransportResponse) -> Self {
        PageResponse::new(response.status, response.url, response.headers, response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn form_body_encodes_pairs_in_order() {
        let body = FormBody::from_pairs([("_flowId", "SYW0001000-flow"), ("q", "情報 理工")]);
        assert_eq!(
            body.as_str(),
            "_flowId=SYW0001000-flow&q=%E6%83%85%E5%A0%B1+%E7%90%86%E5%B7%A5"
        );
    }

    #[test]
    fn redirect_location_requires_redirect_status() {
        let mut headers = HeaderMap::new();
        headers.insert(LOCATION, HeaderValue::from_static("/next"));
        let mut response = TransportResponse {
            status: 302,
            url: Url::parse("https://host.example/start").unwrap(),
            headers,
            body: String::new(),
        };
        assert_eq!(response.redirect_location(), Some("/next"));
        response.status = 200;
        assert_eq!(response.redirect_location(), None);
    }
}
