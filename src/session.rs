use std::sync::Arc;

use cookie_store::CookieStore;
use thiserror::Error;
use url::Url;

use crate::campus::{
	AuthError, DetailError, DetailPage, FormError, ListingError, ListingWalker, LoginOutcome, MenuHandle,
	NavigationError, SearchQuery, StepUpPrompt,
};
use crate::config::{ClientConfig, ConfigError, LoginCredentials};
use crate::modules::credentials::{CredentialStore, CredentialStoreError};
use crate::modules::events::{EventDispatcher, EventHandler};
use crate::transport::{
	HttpTransport, PageResponse, PipelineError, RequestOptions, RequestPipeline, ReqwestTransport,
};

/// Convenient result alias.
pub type CampusResult<T> = Result<T, CampusError>;

/// Top-level error type.
#[derive(Debug, Error)]
pub enum CampusError {
	#[error("configuration error: {0}")]
	Config(#[from] ConfigError),
	#[error("HTTP client error: {0}")]
	Http(#[from] reqwest::Error),
	#[error("request pipeline error: {0}")]
	Pipeline(#[from] PipelineError),
	#[error("form error: {0}")]
	Form(#[from] FormError),
	#[error("login failed: {0}")]
	Auth(#[from] AuthError),
	#[error("navigation failed: {0}")]
	Navigation(#[from] NavigationError),
	#[error("listing failed: {0}")]
	Listing(#[from] ListingError),
	#[error("detail collection failed: {0}")]
	Detail(#[from] DetailError),
	#[error("could not persist credentials: {0}")]
	Credentials(#[from] CredentialStoreError),
}

struct SessionInner {
	config: ClientConfig,
	pipeline: RequestPipeline,
	store: CredentialStore,
}

/// Authenticated handle on the campus application.
///
/// Clones share one cookie jar, so a clone can be moved into a spawned task.
#[derive(Clone)]
pub struct Session {
	inner: Arc<SessionInner>,
}

impl Session {
	/// Build a session over a reqwest transport, restoring stored cookies.
	pub fn new(config: ClientConfig) -> CampusResult<Self> {
		config.validate()?;
		let transport = ReqwestTransport::new(&config.transport_config())?;
		Ok(Self::with_transport(config, Arc::new(transport)))
	}

	/// Build a session over any transport, restoring stored cookies.
	pub fn with_transport(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
		let store = CredentialStore::new(config.credentials_path.clone());
		let jar = store.load();
		Self::assemble(config, transport, store, jar, EventDispatcher::with_logging())
	}

	/// Build a session with an explicit starting jar; the credential file is
	/// written on login but never read.
	pub fn from_parts(config: ClientConfig, transport: Arc<dyn HttpTransport>, jar: CookieStore) -> Self {
		let store = CredentialStore::new(config.credentials_path.clone());
		Self::assemble(config, transport, store, jar, EventDispatcher::with_logging())
	}

	/// Same as [`Session::with_transport`] with an extra event handler.
	pub fn with_event_handler(
		config: ClientConfig,
		transport: Arc<dyn HttpTransport>,
		handler: Arc<dyn EventHandler>,
	) -> Self {
		let store = CredentialStore::new(config.credentials_path.clone());
		let jar = store.load();
		let mut events = EventDispatcher::with_logging();
		events.register_handler(handler);
		Self::assemble(config, transport, store, jar, events)
	}

	fn assemble(
		config: ClientConfig,
		transport: Arc<dyn HttpTransport>,
		store: CredentialStore,
		jar: CookieStore,
		events: EventDispatcher,
	) -> Self {
		let pipeline = RequestPipeline::new(transport, jar, config.pipeline_config()).with_events(events);
		Self {
			inner: Arc::new(SessionInner {
				config,
				pipeline,
				store,
			}),
		}
	}

	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	/// Perform a request through the cookie-bearing pipeline.
	pub async fn request(&self, url: Url, options: RequestOptions) -> Result<PageResponse, PipelineError> {
		self.inner.pipeline.request(url, options).await
	}

	/// Snapshot of the current cookie jar.
	pub fn cookies(&self) -> CookieStore {
		self.inner.pipeline.jar()
	}

	/// Forget every cookie, in memory only.
	pub fn clear_cookies(&self) {
		self.inner.pipeline.replace_jar(CookieStore::default());
	}

	/// Write the current jar to the credential file.
	pub fn save_credentials(&self) -> Result<(), CredentialStoreError> {
		self.inner.store.save(&self.cookies())
	}

	pub async fn is_logged_in(&self) -> CampusResult<bool> {
		Ok(crate::campus::is_logged_in(self).await?)
	}

	/// Log in unless the stored session is still valid; a fresh login is
	/// persisted through the credential store.
	pub async fn ensure_authenticated(
		&self,
		credentials: &LoginCredentials,
		prompt: Option<&dyn StepUpPrompt>,
	) -> CampusResult<LoginOutcome> {
		let outcome = crate::campus::login(self, credentials, prompt).await?;
		if outcome.is_fresh_login() {
			self.save_credentials()?;
			log::info!("saved session cookies to {}", self.inner.store.path().display());
		}
		Ok(outcome)
	}

	pub async fn fetch_menu(&self) -> CampusResult<MenuHandle> {
		Ok(crate::campus::fetch_menu(self).await?)
	}

	/// Open the flow behind a menu entry.
	pub async fn open_flow(&self, menu: &MenuHandle, flow_name: &str) -> CampusResult<PageResponse> {
		Ok(crate::campus::dispatch(self, menu, flow_name).await?)
	}

	/// Lazy walker over every result of `query`.
	pub fn search(&self, query: SearchQuery) -> ListingWalker {
		ListingWalker::new(self.clone(), query)
	}

	/// Walk `query` and fetch every detail page, throttled by
	/// `detail_concurrency`.
	pub async fn collect_details(&self, query: SearchQuery) -> CampusResult<Vec<DetailPage>> {
		let capacity = self.inner.config.detail_concurrency;
		Ok(crate::campus::collect_details(self, self.search(query), capacity).await?)
	}
}
