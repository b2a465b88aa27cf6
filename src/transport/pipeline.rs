//! Cookie-bearing request pipeline.
//!
//! Wraps an [`HttpTransport`] with the steps every request to the campus
//! application goes through, in order:
//!
//! 1. attach stored cookies when the call includes credentials,
//! 2. send with transport-level redirects disabled, retrying transient
//!    network failures a bounded number of times,
//! 3. capture `Set-Cookie` from every hop (credentials only) and follow
//!    redirects manually as body-less GETs, up to a fixed bound,
//! 4. hand back the first non-redirect response.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use cookie_store::CookieStore;
use http::header::{CONTENT_TYPE, COOKIE, HeaderValue, SET_COOKIE};
use http::{HeaderMap, Method};
use reqwest::cookie::CookieStore as _;
use reqwest_cookie_store::CookieStoreRwLock;
use thiserror::Error;
use tokio::time::sleep;
use url::Url;

use super::client::HttpTransport;
use super::types::{FormBody, OutboundRequest, PageResponse, RequestOptions, TransportResponse};
use crate::modules::events::{
    ErrorEvent, EventDispatcher, PipelineEvent, RedirectEvent, RequestEvent, ResponseEvent,
    RetryEvent,
};

pub const DEFAULT_MAX_REDIRECTS: usize = 10;
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_redirects: usize,
    /// Total attempts per hop, first try included.
    pub retry_attempts: u32,
    pub retry_backoff: Duration,
    /// Form fields whose values never reach pipeline events.
    pub redacted_fields: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_redirects: DEFAULT_MAX_REDIRECTS,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
            redacted_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("request to {url} failed after {attempts} attempt(s): {message}")]
    Transport {
        url: Url,
        attempts: u32,
        message: String,
    },
    #[error("gave up after {hops} redirect(s), next hop was {url}")]
    NavigationLoop { url: Url, hops: usize },
    #[error("cannot resolve '{reference}' against {base}")]
    InvalidUrl { base: Url, reference: String },
    #[error("failed to build http client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for PipelineError {
    fn from(err: reqwest::Error) -> Self {
        PipelineError::Client(err.to_string())
    }
}

pub struct RequestPipeline {
    transport: Arc<dyn HttpTransport>,
    jar: Arc<CookieStoreRwLock>,
    config: PipelineConfig,
    events: EventDispatcher,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn HttpTransport>, jar: CookieStore, config: PipelineConfig) -> Self {
        Self {
            transport,
            jar: Arc::new(CookieStoreRwLock::new(jar)),
            config,
            events: EventDispatcher::with_logging(),
        }
    }

    pub fn with_events(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Snapshot of the current cookie jar.
    pub fn jar(&self) -> CookieStore {
        self.jar.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn replace_jar(&self, jar: CookieStore) {
        *self.jar.write().unwrap_or_else(|e| e.into_inner()) = jar;
    }

    /// Perform a request, following redirects until a non-redirect response.
    pub async fn request(&self, url: Url, options: RequestOptions) -> Result<PageResponse, PipelineError> {
        let include = options.credentials.included();
        let mut method = options.method;
        let mut body = options.body;
        let mut current = url;
        let mut hops = 0usize;

        loop {
            let response = self
                .send_with_retry(&method, &current, body.as_ref(), include)
                .await?;
            if include {
                self.capture_cookies(&response);
            }

            let Some(location) = response.redirect_location() else {
                return Ok(response.into());
            };
            let next = response
                .url
                .join(location)
                .map_err(|_| PipelineError::InvalidUrl {
                    base: response.url.clone(),
                    reference: location.to_string(),
                })?;

            if hops >= self.config.max_redirects {
                let err = PipelineError::NavigationLoop { url: next, hops };
                self.events.dispatch(PipelineEvent::Error(ErrorEvent {
                    url: response.url.clone(),
                    error: err.to_string(),
                    timestamp: Utc::now(),
                }));
                return Err(err);
            }
            hops += 1;

            self.events.dispatch(PipelineEvent::Redirect(RedirectEvent {
                from: response.url.clone(),
                to: next.clone(),
                status: response.status,
                hop: hops,
                timestamp: Utc::now(),
            }));

            method = Method::GET;
            body = None;
            current = next;
        }
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&FormBody>,
        include: bool,
    ) -> Result<TransportResponse, PipelineError> {
        let attempts_allowed = self.config.retry_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let request = self.prepare(method, url, body, include);

            self.events.dispatch(PipelineEvent::Request(RequestEvent {
                url: request.url.clone(),
                method: request.method.clone(),
                attempt,
                with_credentials: include,
                timestamp: Utc::now(),
            }));

            let started = Instant::now();
            match self.transport.send(&request).await {
                Ok(response) => {
                    self.events.dispatch(PipelineEvent::Response(ResponseEvent {
                        url: response.url.clone(),
                        method: request.method.clone(),
                        status: response.status,
                        latency: started.elapsed(),
                        request_body: request
                            .body
                            .as_deref()
                            .map(|body| redact_form(body, &self.config.redacted_fields)),
                        timestamp: Utc::now(),
                    }));
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < attempts_allowed => {
                    self.events.dispatch(PipelineEvent::Retry(RetryEvent {
                        url: request.url.clone(),
                        attempt: attempt + 1,
                        reason: err.to_string(),
                        scheduled_after: self.config.retry_backoff,
                        timestamp: Utc::now(),
                    }));
                    if !self.config.retry_backoff.is_zero() {
                        sleep(self.config.retry_backoff).await;
                    }
                }
                Err(err) => {
                    self.events.dispatch(PipelineEvent::Error(ErrorEvent {
                        url: request.url.clone(),
                        error: err.to_string(),
                        timestamp: Utc::now(),
                    }));
                    return Err(PipelineError::Transport {
                        url: request.url,
                        attempts: attempt,
                        message: err.to_string(),
                    });
                }
            }
        }
    }

    fn prepare(
        &self,
        method: &Method,
        url: &Url,
        body: Option<&FormBody>,
        include: bool,
    ) -> OutboundRequest {
        let mut target = url.clone();
        let mut headers = HeaderMap::new();
        let mut payload = None;

        if let Some(form) = body {
            if *method == Method::GET {
                target.set_query(Some(form.as_str()));
            } else {
                headers.insert(CONTENT_TYPE, HeaderValue::from_static(FormBody::CONTENT_TYPE));
                payload = Some(form.as_str().to_string());
            }
        }

        if include {
            if let Some(cookies) = self.jar.cookies(&target) {
                headers.insert(COOKIE, cookies);
            }
        }

        OutboundRequest {
            method: method.clone(),
            url: target,
            headers,
            body: payload,
        }
    }

    fn capture_cookies(&self, response: &TransportResponse) {
        let mut set_cookies = response.headers.get_all(SET_COOKIE).iter();
        self.jar.set_cookies(&mut set_cookies, &response.url);
    }
}

/// Replace the values of `secrets` in an urlencoded body with `<redacted>`.
fn redact_form(body: &str, secrets: &[String]) -> String {
    if secrets.is_empty() {
        return body.to_string();
    }
    body.split('&')
        .map(|pair| {
            let key = pair.split_once('=').map_or(pair, |(key, _)| key);
            let name: String = url::form_urlencoded::parse(key.as_bytes())
                .map(|(name, _)| name)
                .collect();
            if secrets.iter().any(|secret| *secret == name) {
                format!("{key}=<redacted>")
            } else {
                pair.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("&")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::client::TransportError;
    use crate::transport::types::Credentials;
    use async_trait::async_trait;
    use http::header::LOCATION;
    use std::sync::Mutex;

    type Scripted = Result<TransportResponse, TransportError>;

    struct StubTransport {
        responses: Mutex<Vec<Scripted>>,
        seen: Mutex<Vec<OutboundRequest>>,
    }

    impl StubTransport {
        fn new(responses: Vec<Scripted>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<OutboundRequest> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HttpTransport for StubTransport {
        async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError> {
            self.seen.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .expect("no more stub responses")
        }
    }

    fn response(status: u16, url: &str, location: Option<&str>, cookies: &[&str]) -> Scripted {
        let mut headers = HeaderMap::new();
        if let Some(location) = location {
            headers.insert(LOCATION, HeaderValue::from_str(location).unwrap());
        }
        for cookie in cookies {
            headers.append(SET_COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        Ok(TransportResponse {
            status,
            url: Url::parse(url).unwrap(),
            headers,
            body: format!("<html>{status}</html>"),
        })
    }

    fn pipeline(transport: Arc<StubTransport>) -> RequestPipeline {
        RequestPipeline::new(
            transport,
            CookieStore::default(),
            PipelineConfig {
                retry_backoff: Duration::ZERO,
                ..PipelineConfig::default()
            },
        )
    }

    fn has_cookie(jar: &CookieStore, name: &str) -> bool {
        jar.iter_unexpired().any(|cookie| cookie.name() == name)
    }

    #[tokio::test]
    async fn follows_redirect_chain_and_keeps_every_cookie() {
        let transport = StubTransport::new(vec![
            response(302, "https://app.example/sso", Some("https://idp.example/login"), &["app=1; Path=/"]),
            response(302, "https://idp.example/login", Some("/login?step=2"), &["idp=2; Path=/"]),
            response(200, "https://idp.example/login?step=2", None, &["idp_step=3; Path=/"]),
        ]);
        let pipeline = pipeline(transport.clone());

        let body = FormBody::from_pairs([("a", "b")]);
        let page = pipeline
            .request(
                Url::parse("https://app.example/sso").unwrap(),
                RequestOptions::submit(Method::POST, body, Credentials::Include),
            )
            .await
            .unwrap();

        assert_eq!(page.status(), 200);
        assert_eq!(page.url().as_str(), "https://idp.example/login?step=2");

        let jar = pipeline.jar();
        for name in ["app", "idp", "idp_step"] {
            assert!(has_cookie(&jar, name), "missing cookie {name}");
        }

        let seen = transport.seen();
        assert_eq!(seen.len(), 3);
        assert_eq!(seen[0].method, Method::POST);
        assert_eq!(seen[0].body.as_deref(), Some("a=b"));
        // Redirect hops are body-less GETs that already carry the captured cookies.
        assert_eq!(seen[1].method, Method::GET);
        assert!(seen[1].body.is_none());
        assert_eq!(seen[2].url.as_str(), "https://idp.example/login?step=2");
        assert_eq!(seen[2].headers.get(COOKIE).unwrap(), "idp=2");
    }

    #[tokio::test]
    async fn omitted_credentials_neither_send_nor_capture() {
        let transport = StubTransport::new(vec![
            response(200, "https://app.example/a", None, &["first=1"]),
            response(200, "https://app.example/b", None, &["second=2"]),
        ]);
        let pipeline = pipeline(transport.clone());
        pipeline.replace_jar({
            let mut jar = CookieStore::default();
            jar.parse("kept=1", &Url::parse("https://app.example/").unwrap())
                .unwrap();
            jar
        });

        pipeline
            .request(Url::parse("https://app.example/a").unwrap(), RequestOptions::get(Credentials::Omit))
            .await
            .unwrap();
        pipeline
            .request(Url::parse("https://app.example/b").unwrap(), RequestOptions::get(Credentials::Include))
            .await
            .unwrap();

        let seen = transport.seen();
        assert!(seen[0].headers.get(COOKIE).is_none());
        assert_eq!(seen[1].headers.get(COOKIE).unwrap(), "kept=1");
        let jar = pipeline.jar();
        assert!(!has_cookie(&jar, "first"));
        assert!(has_cookie(&jar, "second"));
    }

    #[tokio::test]
    async fn redirect_bound_raises_navigation_loop() {
        let hops: Vec<Scripted> = (0..=DEFAULT_MAX_REDIRECTS)
            .map(|_| response(302, "https://app.example/loop", Some("/loop"), &[]))
            .collect();
        let pipeline = pipeline(StubTransport::new(hops));
        let err = pipeline
            .request(Url::parse("https://app.example/loop").unwrap(), RequestOptions::get(Credentials::Include))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::NavigationLoop { hops, .. } if hops == DEFAULT_MAX_REDIRECTS));
    }

    #[tokio::test]
    async fn retries_transient_failures() {
        let transport = StubTransport::new(vec![
            Err(TransportError::Transient("connection reset".into())),
            Err(TransportError::Transient("dns".into())),
            response(200, "https://app.example/", None, &[]),
        ]);
        let pipeline = pipeline(transport.clone());
        let page = pipeline
            .request(Url::parse("https://app.example/").unwrap(), RequestOptions::get(Credentials::Omit))
            .await
            .unwrap();
        assert_eq!(page.status(), 200);
        assert_eq!(transport.seen().len(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_retry_budget() {
        let failures: Vec<Scripted> = (0..DEFAULT_RETRY_ATTEMPTS)
            .map(|_| Err(TransportError::Transient("connection reset".into())))
            .collect();
        let transport = StubTransport::new(failures);
        let pipeline = pipeline(transport.clone());
        let err = pipeline
            .request(Url::parse("https://app.example/").unwrap(), RequestOptions::get(Credentials::Omit))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Transport { attempts, .. } if attempts == DEFAULT_RETRY_ATTEMPTS));
        assert_eq!(transport.seen().len(), DEFAULT_RETRY_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn http_error_status_is_not_retried() {
        let transport = StubTransport::new(vec![response(500, "https://app.example/", None, &[])]);
        let pipeline = pipeline(transport.clone());
        let page = pipeline
            .request(Url::parse("https://app.example/").unwrap(), RequestOptions::get(Credentials::Omit))
            .await
            .unwrap();
        assert_eq!(page.status(), 500);
        assert_eq!(transport.seen().len(), 1);
    }

    #[tokio::test]
    async fn get_submission_moves_fields_into_query() {
        let transport = StubTransport::new(vec![response(200, "https://app.example/s?x=1", None, &[])]);
        let pipeline = pipeline(transport.clone());
        pipeline
            .request(
                Url::parse("https://app.example/s").unwrap(),
                RequestOptions::submit(Method::GET, FormBody::from_pairs([("x", "1")]), Credentials::Omit),
            )
            .await
            .unwrap();
        let seen = transport.seen();
        assert_eq!(seen[0].url.as_str(), "https://app.example/s?x=1");
        assert!(seen[0].body.is_none());
    }

    struct RecordingHandler(Mutex<Vec<Option<String>>>);

    impl crate::modules::events::EventHandler for RecordingHandler {
        fn handle(&self, event: &PipelineEvent) {
            if let PipelineEvent::Response(response) = event {
                self.0.lock().unwrap().push(response.request_body.clone());
            }
        }
    }

    #[tokio::test]
    async fn secret_fields_are_redacted_from_events() {
        let transport = StubTransport::new(vec![response(500, "https://idp.example/login", None, &[])]);
        let recorder = Arc::new(RecordingHandler(Mutex::new(Vec::new())));
        let mut events = EventDispatcher::with_logging();
        events.register_handler(recorder.clone());
        let pipeline = RequestPipeline::new(
            transport.clone(),
            CookieStore::default(),
            PipelineConfig {
                redacted_fields: vec!["j_password".into(), "authcode".into()],
                ..PipelineConfig::default()
            },
        )
        .with_events(events);

        let body = FormBody::from_pairs([("j_username", "alice"), ("j_password", "hunter2")]);
        pipeline
            .request(
                Url::parse("https://idp.example/login").unwrap(),
                RequestOptions::submit(Method::POST, body, Credentials::Include),
            )
            .await
            .unwrap();

        let recorded = recorder.0.lock().unwrap().clone();
        assert_eq!(
            recorded,
            vec![Some("j_username=alice&j_password=<redacted>".to_string())]
        );
        // The transport still receives the real value.
        assert_eq!(
            transport.seen()[0].body.as_deref(),
            Some("j_username=alice&j_password=hunter2")
        );
    }

    #[test]
    fn redaction_keeps_other_fields_verbatim() {
        let secrets = vec!["authcode".to_string()];
        assert_eq!(redact_form("authcode=123456&login=Login", &secrets), "authcode=<redacted>&login=Login");
        assert_eq!(redact_form("a=1&b=2", &secrets), "a=1&b=2");
        assert_eq!(redact_form("authcode=1", &[]), "authcode=1");
    }
}
