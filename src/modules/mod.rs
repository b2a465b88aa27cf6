//! Cross-cutting services module
//!
//! Cookie persistence, proxy selection, pipeline events and bounded task
//! concurrency.

pub mod credentials;
pub mod events;
pub mod proxy;
pub mod task_group;

// Re-export commonly used types
pub use credentials::{CredentialStore, CredentialStoreError, DEFAULT_CREDENTIALS_PATH};
pub use events::{
    ErrorEvent, EventDispatcher, EventHandler, LoggingHandler, PipelineEvent, RedirectEvent,
    RequestEvent, ResponseEvent, RetryEvent,
};
pub use proxy::ProxySettings;
pub use task_group::{TaskGroup, TaskGroupError};
