use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::modules::credentials::DEFAULT_CREDENTIALS_PATH;
use crate::modules::proxy::ProxySettings;
use crate::transport::{PipelineConfig, TransportConfig};

pub const USERNAME_ENV: &str = "DUS_USERNAME";
pub const PASSWORD_ENV: &str = "DUS_PASSWORD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid JSON configuration: {0}")]
    Json(#[from] serde_json::Error),
    #[error("unsupported configuration format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("environment variable {0} is not set")]
    MissingEnv(&'static str),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Hosts, entry point and login form layout of the deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub app_host: String,
    pub identity_host: String,
    pub entry_url: Url,
    /// Substring of the URL that marks the multi-factor step-up page.
    pub step_up_path: String,
    pub assertion_path: String,
    pub interstitial_form: String,
    pub username_field: String,
    pub password_field: String,
    pub login_error_selector: String,
    pub step_up_code_field: String,
    pub step_up_submitter: String,
    pub menu_frame_selector: String,
    pub link_form_name: String,
    pub flow_id_field: String,
    pub flow_handler: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            app_host: "campusweb.office.uec.ac.jp".into(),
            identity_host: "shibboleth.cc.uec.ac.jp".into(),
            entry_url: Url::parse("https://campusweb.office.uec.ac.jp/campusweb/ssologin.do")
                .expect("default entry url is valid"),
            step_up_path: "/mfa/MFAuth.php".into(),
            assertion_path: "/idp/profile/SAML2/Redirect/SSO".into(),
            interstitial_form: "form1".into(),
            username_field: "j_username".into(),
            password_field: "j_password".into(),
            login_error_selector: ".form-error".into(),
            step_up_code_field: "authcode".into(),
            step_up_submitter: "login".into(),
            menu_frame_selector: "frame[name=menu]".into(),
            link_form_name: "linkForm".into(),
            flow_id_field: "_flowId".into(),
            flow_handler: "moveFunc".into(),
        }
    }
}

/// Markup of the paginated search listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingLayout {
    pub flow_name: String,
    pub search_form_selector: String,
    pub page_size: usize,
    pub page_size_field: String,
    pub table_selector: String,
    pub reference_column: String,
    pub reference_handler: String,
    pub input_form_selector: String,
    pub error_selector: String,
    pub count_marker: String,
    pub count_prefix: String,
    pub count_suffix: String,
}

impl Default for ListingLayout {
    fn default() -> Self {
        Self {
            flow_name: "シラバス参照".into(),
            search_form_selector: "#jikanwariSearchForm".into(),
            page_size: 20,
            page_size_field: "_displayCount".into(),
            table_selector: "table[class=normal]".into(),
            reference_column: "参照".into(),
            reference_handler: "refer".into(),
            input_form_selector: "#jikanwariInputForm".into(),
            error_selector: ".error".into(),
            count_marker: "の検索結果を表示".into(),
            count_prefix: "全部で".into(),
            count_suffix: "件あります".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub max_redirects: usize,
    pub retry_attempts: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
    /// Explicit proxy endpoint; takes precedence over `proxy_from_env`.
    pub proxy: Option<String>,
    /// Read `ALL_PROXY` when no explicit proxy is configured.
    pub proxy_from_env: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        let defaults = PipelineConfig::default();
        Self {
            max_redirects: defaults.max_redirects,
            retry_attempts: defaults.retry_attempts,
            retry_backoff_ms: defaults.retry_backoff.as_millis() as u64,
            timeout_secs: Some(60),
            user_agent: None,
            proxy: None,
            proxy_from_env: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub site: SiteConfig,
    pub listing: ListingLayout,
    pub pipeline: PipelineSettings,
    pub credentials_path: PathBuf,
    /// Detail pages fetched concurrently by `collect_details`.
    pub detail_concurrency: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            site: SiteConfig::default(),
            listing: ListingLayout::default(),
            pipeline: PipelineSettings::default(),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            detail_concurrency: 5,
        }
    }
}

impl ClientConfig {
    pub fn builder() -> ClientConfigBuilder {
        ClientConfigBuilder::new()
    }

    /// Load from a `.toml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&raw),
            Some("json") => Self::from_json_str(&raw),
            _ => Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        }
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listing.page_size == 0 {
            return Err(ConfigError::Invalid("listing.page_size must be positive".into()));
        }
        if self.site.app_host.is_empty() || self.site.identity_host.is_empty() {
            return Err(ConfigError::Invalid("site hosts must not be empty".into()));
        }
        if self.site.entry_url.host_str() != Some(self.site.app_host.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "entry url {} is not on app host {}",
                self.site.entry_url, self.site.app_host
            )));
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            max_redirects: self.pipeline.max_redirects,
            retry_attempts: self.pipeline.retry_attempts.max(1),
            retry_backoff: Duration::from_millis(self.pipeline.retry_backoff_ms),
            redacted_fields: vec![
                self.site.password_field.clone(),
                self.site.step_up_code_field.clone(),
            ],
        }
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        match self.pipeline.proxy.as_deref() {
            Some(endpoint) => ProxySettings::all(endpoint),
            None if self.pipeline.proxy_from_env => ProxySettings::from_env(),
            None => ProxySettings::Disabled,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let defaults = TransportConfig::default();
        TransportConfig {
            proxy: self.proxy_settings(),
            timeout: self.pipeline.timeout_secs.map(Duration::from_secs),
            user_agent: self.pipeline.user_agent.clone().unwrap_or(defaults.user_agent),
        }
    }
}

/// Fluent builder for [`ClientConfig`].
#[derive(Debug, Clone, Default)]
pub struct ClientConfigBuilder {
    config: ClientConfig,
}

impl ClientConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_site(mut self, site: SiteConfig) -> Self {
        self.config.site = site;
        self
    }

    pub fn with_listing(mut self, listing: ListingLayout) -> Self {
        self.config.listing = listing;
        self
    }

    pub fn with_credentials_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.credentials_path = path.into();
        self
    }

    pub fn with_proxy(mut self, endpoint: impl Into<String>) -> Self {
        self.config.pipeline.proxy = Some(endpoint.into());
        self
    }

    pub fn with_proxy_from_env(mut self) -> Self {
        self.config.pipeline.proxy_from_env = true;
        self
    }

    pub fn with_max_redirects(mut self, hops: usize) -> Self {
        self.config.pipeline.max_redirects = hops;
        self
    }

    pub fn with_retry(mut self, attempts: u32, backoff: Duration) -> Self {
        self.config.pipeline.retry_attempts = attempts.max(1);
        self.config.pipeline.retry_backoff_ms = backoff.as_millis() as u64;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.pipeline.timeout_secs = timeout.map(|t| t.as_secs().max(1));
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.pipeline.user_agent = Some(user_agent.into());
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.config.listing.page_size = page_size;
        self
    }

    pub fn with_detail_concurrency(mut self, capacity: usize) -> Self {
        self.config.detail_concurrency = capacity.max(1);
        self
    }

    pub fn build(self) -> Result<ClientConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Username and password for the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
}

impl LoginCredentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Read `DUS_USERNAME` and `DUS_PASSWORD`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let read = |name: &'static str| {
            std::env::var(name)
                .ok()
                .filter(|value| !value.is_empty())
                .ok_or(ConfigError::MissingEnv(name))
        };
        Ok(Self::new(read(USERNAME_ENV)?, read(PASSWORD_ENV)?))
    }
}

impl fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
