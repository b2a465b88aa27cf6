//! Explicit proxy selection.
//!
//! The transport never consults proxy environment variables on its own: the
//! caller decides up-front whether to route through a proxy, and the absence of
//! one is expressed as [`ProxySettings::Disabled`], which maps to
//! `reqwest::ClientBuilder::no_proxy`.

use reqwest::ClientBuilder;

/// Environment variables consulted by [`ProxySettings::from_env`], in order.
const PROXY_ENV_VARS: [&str; 2] = ["ALL_PROXY", "all_proxy"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ProxySettings {
    /// Connect directly.
    #[default]
    Disabled,
    /// Route every request through the given endpoint.
    All(String),
}

impl ProxySettings {
    pub fn all(endpoint: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        if endpoint.trim().is_empty() {
            Self::Disabled
        } else {
            Self::All(endpoint)
        }
    }

    /// Build settings from `ALL_PROXY`; unset or empty means no proxy.
    pub fn from_env() -> Self {
        let value = PROXY_ENV_VARS
            .iter()
            .find_map(|name| std::env::var(name).ok().filter(|v| !v.trim().is_empty()));
        Self::from_optional(value)
    }

    pub fn from_optional(endpoint: Option<String>) -> Self {
        endpoint.map(Self::all).unwrap_or_default()
    }

    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ProxySettings::Disabled => None,
            ProxySettings::All(endpoint) => Some(endpoint),
        }
    }

    /// Apply the selection to a reqwest client builder.
    pub fn apply(&self, builder: ClientBuilder) -> Result<ClientBuilder, reqwest::Error> {
        match self {
            ProxySettings::Disabled => Ok(builder.no_proxy()),
            ProxySettings::All(endpoint) => Ok(builder.proxy(reqwest::Proxy::all(endpoint)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_endpoint_means_disabled() {
        assert_eq!(ProxySettings::all("  "), ProxySettings::Disabled);
        assert_eq!(ProxySettings::from_optional(None), ProxySettings::Disabled);
        assert_eq!(
            ProxySettings::from_optional(Some("socks5://127.0.0.1:1080".into())).endpoint(),
            Some("socks5://127.0.0.1:1080")
        );
    }

    #[test]
    fn disabled_builds_a_client() {
        let builder = ProxySettings::Disabled
            .apply(reqwest::Client::builder())
            .unwrap();
        assert!(builder.build().is_ok());
    }
}
