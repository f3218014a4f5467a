//! offerwatch - trade offer polling and lifecycle management
//!
//! Watches the trade offers of one account, reports every state change as an
//! [`OfferEvent`](manager::OfferEvent), and sends, cancels and accepts offers
//! on request.
//!
//! # Library Usage
//!
//! ```rust,no_run
//! use offerwatch::manager::{OfferEvent, OfferManager};
//! use offerwatch::models::{AccountId, ManagerConfig};
//! use offerwatch::remote::{Credentials, HttpTransport};
//! ```

pub use offerwatch_cache as cache;
pub use offerwatch_manager as manager;
pub use offerwatch_models as models;
pub use offerwatch_remote as remote;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use offerwatch_cache::DescriptionCache;
use offerwatch_manager::{EventSink, OfferManager};
use offerwatch_models::{AccountId, ManagerConfig};
use offerwatch_remote::{Credentials, Endpoints, HttpTransport};
use serde::{Deserialize, Serialize};

/// Environment variable that overrides `remote.access_token`.
pub const ACCESS_TOKEN_ENV: &str = "OFFERWATCH_ACCESS_TOKEN";

/// Everything the binary reads from its TOML file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// 32-bit id of the account being watched.
    pub account_id: u32,
    #[serde(default)]
    pub manager: ManagerConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
}

/// Connection settings for the remote service.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub session_id: Option<String>,
    /// Raw `Cookie` header for community requests.
    pub cookie: Option<String>,
    pub api_base: Option<String>,
    pub community_base: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl RemoteConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            api_key: self.api_key.clone(),
            access_token: self.access_token.clone(),
            session_id: self.session_id.clone(),
        }
    }

    pub fn endpoints(&self) -> Endpoints {
        let defaults = Endpoints::default();
        Endpoints {
            api_base: self.api_base.clone().unwrap_or(defaults.api_base),
            community_base: self.community_base.clone().unwrap_or(defaults.community_base),
        }
    }
}

impl AppConfig {
    /// Parse a TOML document.
    pub fn from_toml(text: &str) -> Result<Self, anyhow::Error> {
        toml::from_str(text).context("Failed to parse config")
    }

    /// Apply environment overrides.
    pub fn with_env(mut self, access_token: Option<String>) -> Self {
        if let Some(token) = access_token.filter(|t| !t.is_empty()) {
            self.remote.access_token = Some(token);
        }
        self
    }
}

/// Build a manager over the real HTTP transport. `sinks` receive every event.
///
/// `shared_cache` is used only when `manager.cache.shared` is set; the
/// manager then never stops its sweeper.
pub fn build_manager(
    config: &AppConfig,
    sinks: Vec<Arc<dyn EventSink>>,
    shared_cache: Option<Arc<DescriptionCache>>,
) -> Result<OfferManager, anyhow::Error> {
    let mut transport = HttpTransport::new(config.remote.timeout_seconds.map(Duration::from_secs))
        .context("Failed to create HTTP transport")?;
    if let Some(cookie) = &config.remote.cookie {
        transport = transport.with_cookie(cookie.clone());
    }

    let mut builder = OfferManager::builder(AccountId(config.account_id))
        .config(config.manager.clone())
        .transport(Arc::new(transport))
        .credentials(config.remote.credentials())
        .endpoints(config.remote.endpoints());
    for sink in sinks {
        builder = builder.sink(sink);
    }
    if config.manager.cache.shared {
        let cache = shared_cache
            .unwrap_or_else(|| Arc::new(DescriptionCache::from_settings(&config.manager.cache)));
        builder = builder.shared_cache(cache);
    }
    builder.build().context("Failed to build offer manager")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
account_id = 46143802

[manager]
poll_interval_ms = 10000
cancel_time_ms = 600000
language = "szh"

[manager.cache]
max_items = 100

[manager.persistence]
save_poll_data = true

[remote]
api_key = "KEY"
session_id = "SESSION"
community_base = "http://localhost:9000"
"#;

    #[test]
    fn parses_a_full_config() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.account_id, 46143802);
        assert_eq!(config.manager.poll_interval_ms, 10_000);
        assert_eq!(config.manager.cancel_time_ms, Some(600_000));
        assert_eq!(config.manager.minimum_poll_interval_ms, 1_000);
        assert_eq!(config.manager.cache.max_items, 100);
        assert!(config.manager.persistence.save_poll_data);
        assert_eq!(config.remote.api_key.as_deref(), Some("KEY"));

        let endpoints = config.remote.endpoints();
        assert_eq!(endpoints.community_base, "http://localhost:9000");
        assert_eq!(endpoints.api_base, "https://api.steampowered.com");
    }

    #[test]
    fn sections_are_optional() {
        let config = AppConfig::from_toml("account_id = 1").unwrap();
        assert_eq!(config.manager, ManagerConfig::default());
        assert_eq!(config.remote, RemoteConfig::default());
        assert!(AppConfig::from_toml("[remote]").is_err());
    }

    #[test]
    fn env_token_overrides_file() {
        let config = AppConfig::from_toml(SAMPLE)
            .unwrap()
            .with_env(Some("TOKEN".to_string()));
        assert_eq!(config.remote.credentials().access_token.as_deref(), Some("TOKEN"));

        let config = config.with_env(Some(String::new()));
        assert_eq!(config.remote.access_token.as_deref(), Some("TOKEN"));
    }

    #[tokio::test]
    async fn builds_a_manager() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let manager = build_manager(&config, Vec::new(), None).unwrap();
        assert_eq!(manager.account(), AccountId(46143802));
        assert_eq!(manager.config().language.as_deref(), Some("schinese"));
        assert!(!manager.is_shut_down());
    }

    #[tokio::test]
    async fn shared_cache_is_reused() {
        let mut config = AppConfig::from_toml(SAMPLE).unwrap();
        config.manager.cache.shared = true;
        let cache = Arc::new(DescriptionCache::new(10));
        let first = build_manager(&config, Vec::new(), Some(cache.clone())).unwrap();
        let second = build_manager(&config, Vec::new(), Some(cache.clone())).unwrap();
        assert!(Arc::ptr_eq(first.cache(), second.cache()));

        config.manager.cache.shared = false;
        let private = build_manager(&config, Vec::new(), Some(cache.clone())).unwrap();
        assert!(!Arc::ptr_eq(private.cache(), &cache));
    }
}
