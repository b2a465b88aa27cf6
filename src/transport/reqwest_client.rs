//! Reqwest-based implementation of the [`HttpTransport`] trait.
//!
//! The client is built with redirects disabled and without a cookie provider
//! so the pipeline observes every intermediate 30x and owns the session cookies.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, redirect::Policy};

use super::client::{HttpTransport, TransportError};
use super::types::{OutboundRequest, TransportResponse};
use crate::modules::proxy::ProxySettings;

/// Construction parameters for [`ReqwestTransport`].
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub proxy: ProxySettings,
    pub timeout: Option<Duration>,
    pub user_agent: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            proxy: ProxySettings::Disabled,
            timeout: Some(Duration::from_secs(60)),
            user_agent: format!("campusweb-rs/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, reqwest::Error> {
        let mut builder = Client::builder()
            .redirect(Policy::none())
            .user_agent(config.user_agent.clone());
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = config.proxy.apply(builder)?.build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client. It must have redirects disabled, otherwise the
    /// pipeline never sees the intermediate responses whose cookies it needs.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.as_str())
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.body(body.clone());
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let url = response.url().clone();
        let headers = response.headers().clone();
        // `text` honours the charset announced in Content-Type (some pages are Shift_JIS).
        let body = response.text().await.map_err(classify)?;

        Ok(TransportResponse {
            status,
            url,
            headers,
            body,
        })
    }
}

/// Connect, timeout and body failures are transient; anything else is fatal.
fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() || err.is_body() {
        TransportError::Transient(err.to_string())
    } else {
        TransportError::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_with_defaults() {
        assert!(ReqwestTransport::new(&TransportConfig::default()).is_ok());
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let transport = ReqwestTransport::new(&TransportConfig {
            timeout: Some(Duration::from_secs(2)),
            ..TransportConfig::default()
        })
        .unwrap();
        let request = OutboundRequest {
            method: http::Method::GET,
            url: url::Url::parse("http://127.0.0.1:9/").unwrap(),
            headers: http::HeaderMap::new(),
            body: None,
        };
        let err = transport.send(&request).await.unwrap_err();
        assert!(err.is_transient(), "{err}");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_not_retried() {
        let transport = ReqwestTransport::new(&TransportConfig::default()).unwrap();
        let request = OutboundRequest {
            method: http::Method::GET,
            url: url::Url::parse("ftp://127.0.0.1/listing").unwrap(),
            headers: http::HeaderMap::new(),
            body: None,
        };
        let err = transport.send(&request).await.unwrap_err();
        assert!(!err.is_transient(), "{err}");
    }
}
