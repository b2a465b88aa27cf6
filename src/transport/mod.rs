//! HTTP plumbing: the transport seam, its reqwest implementation and the
//! cookie/redirect/retry pipeline layered on top.

pub mod client;
pub mod pipeline;
pub mod reqwest_client;
pub mod types;

pub use client::{HttpTransport, TransportError};
pub use pipeline::{PipelineConfig, PipelineError, RequestPipeline};
pub use reqwest_client::{ReqwestTransport, TransportConfig};
pub use types::{Credentials, FormBody, OutboundRequest, PageResponse, RequestOptions, TransportResponse};
