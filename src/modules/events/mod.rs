//! Event hooks around the request pipeline.
//!
//! Every hop the pipeline performs (request, response, redirect, retry,
//! failure) is broadcast to registered handlers. [`LoggingHandler`] is always
//! installed and turns events into `log` records.

use chrono::{DateTime, Utc};
use http::Method;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Emitted before each transport attempt.
#[derive(Debug, Clone)]
pub struct RequestEvent {
    pub url: Url,
    pub method: Method,
    pub attempt: u32,
    pub with_credentials: bool,
    pub timestamp: DateTime<Utc>,
}

/// Emitted for every response received, redirects included.
#[derive(Debug, Clone)]
pub struct ResponseEvent {
    pub url: Url,
    pub method: Method,
    pub status: u16,
    pub latency: Duration,
    /// Form body that was sent, kept for diagnosing rejected submissions.
    pub request_body: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RedirectEvent {
    pub from: Url,
    pub to: Url,
    pub status: u16,
    pub hop: usize,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub url: Url,
    pub attempt: u32,
    pub reason: String,
    pub scheduled_after: Duration,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub url: Url,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Request(RequestEvent),
    Response(ResponseEvent),
    Redirect(RedirectEvent),
    Retry(RetryEvent),
    Error(ErrorEvent),
}

/// Trait implemented by event handlers.
pub trait EventHandler: Send + Sync {
    fn handle(&self, event: &PipelineEvent);
}

/// Dispatcher that broadcasts events to registered handlers.
#[derive(Default, Clone)]
pub struct EventDispatcher {
    handlers: Vec<Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Dispatcher with only the [`LoggingHandler`] registered.
    pub fn with_logging() -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register_handler(Arc::new(LoggingHandler));
        dispatcher
    }

    pub fn register_handler(&mut self, handler: Arc<dyn EventHandler>) {
        self.handlers.push(handler);
    }

    pub fn dispatch(&self, event: PipelineEvent) {
        for handler in &self.handlers {
            handler.handle(&event);
        }
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// Logs events using the `log` crate.
#[derive(Debug)]
pub struct LoggingHandler;

impl EventHandler for LoggingHandler {
    fn handle(&self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Request(req) => {
                log::debug!("-> {} {}", req.method, req.url);
            }
            PipelineEvent::Response(resp) => {
                log::debug!(
                    "<- {} {} -> {} ({:.2}s)",
                    resp.method,
                    resp.url,
                    resp.status,
                    resp.latency.as_secs_f64()
                );
                let is_redirect = (300..400).contains(&resp.status);
                if !is_redirect && !(200..300).contains(&resp.status) {
                    match resp.request_body {
                        Some(ref body) => log::warn!(
                            "{} {} answered {} for body: {}",
                            resp.method,
                            resp.url,
                            resp.status,
                            body
                        ),
                        None => log::warn!("{} {} answered {}", resp.method, resp.url, resp.status),
                    }
                }
            }
            PipelineEvent::Redirect(redirect) => {
                log::debug!(
                    "redirect #{} ({}) {} -> {}",
                    redirect.hop,
                    redirect.status,
                    redirect.from,
                    redirect.to
                );
            }
            PipelineEvent::Retry(retry) => {
                log::info!(
                    "retry {} attempt {} after {:.2}s: {}",
                    retry.url,
                    retry.attempt,
                    retry.scheduled_after.as_secs_f64(),
                    retry.reason
                );
            }
            PipelineEvent::Error(error) => {
                log::warn!("request to {} failed: {}", error.url, error.error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingHandler(std::sync::Mutex<usize>);

    impl EventHandler for CountingHandler {
        fn handle(&self, _event: &PipelineEvent) {
            *self.0.lock().unwrap() += 1;
        }
    }

    #[test]
    fn dispatches_to_handlers() {
        let mut dispatcher = EventDispatcher::with_logging();
        let counter = Arc::new(CountingHandler(std::sync::Mutex::new(0)));
        dispatcher.register_handler(counter.clone());
        dispatcher.dispatch(PipelineEvent::Error(ErrorEvent {
            url: Url::parse("https://example.com").unwrap(),
            error: "timeout".into(),
            timestamp: Utc::now(),
        }));
        assert_eq!(*counter.0.lock().unwrap(), 1);
    }
}
