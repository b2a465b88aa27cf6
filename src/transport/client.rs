//! Transport abstraction underneath the request pipeline.

use async_trait::async_trait;
use thiserror::Error;

use super::types::{OutboundRequest, TransportResponse};

/// Sends one prepared request and returns the raw response.
///
/// Implementations must not follow redirects or keep cookies of their own;
/// both are the pipeline's job.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &OutboundRequest) -> Result<TransportResponse, TransportError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Network-level hiccup (connection reset, DNS, timeout); worth retrying.
    #[error("transient network failure: {0}")]
    Transient(String),
    #[error("transport failure: {0}")]
    Fatal(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}
