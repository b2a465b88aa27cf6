//! # campusweb-rs
//!
//! An authenticated session client for the UEC CampusSquare web application,
//! which sits behind a Shibboleth identity provider and offers no API: every
//! operation is a sequence of HTML form submissions tied to a server-side
//! session.
//!
//! ## Features
//!
//! - Cookie-bearing request pipeline with manual redirect handling and retries
//! - Cookie persistence between runs
//! - Login handshake with optional multi-factor step-up
//! - Flow dispatch by menu entry name
//! - Lazy walk over paginated, quickly expiring search results
//! - Throttled detail fetching
//!
//! ## Example
//!
//! ```no_run
//! use campusweb_rs::{ClientConfig, LoginCredentials, SearchQuery, Session};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let session = Session::new(ClientConfig::default())?;
//!     let credentials = LoginCredentials::from_env()?;
//!     let prompt = || async { 123456u32 };
//!     session.ensure_authenticated(&credentials, Some(&prompt)).await?;
//!
//!     let mut walker = session.search(SearchQuery::new().grade("1年").term("前学期"));
//!     while let Some(reference) = walker.next().await {
//!         let reference = reference?;
//!         println!("{:?}", reference.digest);
//!     }
//!     Ok(())
//! }
//! ```

mod session;

pub mod campus;
pub mod config;
pub mod modules;
pub mod transport;

pub use crate::session::{CampusError, CampusResult, Session};

pub use crate::campus::{
    AuthError,
    AuthState,
    DetailError,
    DetailPage,
    FieldPatch,
    FormError,
    FormSnapshot,
    ListingError,
    ListingReference,
    ListingWalker,
    LoginOutcome,
    MenuHandle,
    NavigationError,
    RoutingOptions,
    SearchQuery,
    StepUpPrompt,
    collect_details,
    fetch_detail,
};

pub use crate::config::{
    ClientConfig,
    ClientConfigBuilder,
    ConfigError,
    ListingLayout,
    LoginCredentials,
    PipelineSettings,
    SiteConfig,
};

pub use crate::modules::{
    CredentialStore,
    CredentialStoreError,
    EventDispatcher,
    EventHandler,
    LoggingHandler,
    PipelineEvent,
    ProxySettings,
    TaskGroup,
    TaskGroupError,
};

pub use crate::transport::{
    Credentials,
    FormBody,
    HttpTransport,
    OutboundRequest,
    PageResponse,
    PipelineConfig,
    PipelineError,
    RequestOptions,
    RequestPipeline,
    ReqwestTransport,
    TransportConfig,
    TransportError,
    TransportResponse,
};

pub use cookie_store::CookieStore;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
