//! Configuration for MultiAuth
//!
//! A TOML document lists the auth providers, the identity providers and the
//! provider map linking them:
//!
//! ```toml
//! [auth_providers.corp]
//! type = "ldap"
//! uri = "ldaps://ldap.example.com"
//!
//! [identity_providers.corp]
//! type = "ldap"
//! mapping = { email = "mail", name = "cn" }
//!
//! [provider_map]
//! corp = "corp"
//! ```

use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::util::Mapping;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MultiAuthConfig {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub auth_providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub identity_providers: BTreeMap<String, ProviderConfig>,

    #[serde(default)]
    pub provider_map: BTreeMap<String, ProviderLinks>,
}

impl MultiAuthConfig {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config {}: {}", path, e)))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Apply `MULTIAUTH_*` environment overrides.
    pub fn apply_env(&mut self) {
        if let Ok(addr) = std::env::var("MULTIAUTH_BIND_ADDRESS") {
            self.server.bind_address = addr;
        }
        if let Ok(port) = std::env::var("MULTIAUTH_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }
        if let Ok(level) = std::env::var("MULTIAUTH_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Ok(format) = std::env::var("MULTIAUTH_LOG_FORMAT") {
            self.logging.format = format;
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (name, provider) in self.auth_providers.iter().chain(self.identity_providers.iter()) {
            if provider.kind.is_empty() {
                return Err(Error::Config(format!("Provider '{}' has no type", name)));
            }
        }

        for (auth, links) in &self.provider_map {
            if !self.auth_providers.contains_key(auth) {
                return Err(Error::Config(format!(
                    "Provider map references unknown auth provider '{}'",
                    auth
                )));
            }
            for link in links.clone().into_links() {
                if !self.identity_providers.contains_key(&link.identity_provider) {
                    return Err(Error::Config(format!(
                        "Provider map for '{}' references unknown identity provider '{}'",
                        auth, link.identity_provider
                    )));
                }
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 10500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

// ============================================================================
// Provider Configuration
// ============================================================================

/// One configured provider instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider type, e.g. "ldap" or "sql"
    #[serde(rename = "type")]
    pub kind: String,

    /// Backend specific settings
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl ProviderConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            settings: Map::new(),
        }
    }

    pub fn with_setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.to_string(), value);
        self
    }

    /// Deserialize the settings table into a backend specific type.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.settings.clone()))
            .map_err(|e| Error::Config(format!("Invalid {} provider settings: {}", self.kind, e)))
    }

    /// Settings shared by all identity providers.
    pub fn common(&self) -> Result<ProviderSettings> {
        self.parse()
    }
}

/// Settings every identity provider understands
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Human readable title
    #[serde(default)]
    pub title: Option<String>,

    /// Application key -> provider key
    #[serde(default)]
    pub mapping: Mapping,

    /// Application keys to keep in identity data
    #[serde(default)]
    pub identity_info_keys: Option<Vec<String>>,
}

/// Link from an auth provider to an identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLink {
    pub identity_provider: String,

    /// Applied to the auth data before it reaches the identity provider
    #[serde(default)]
    pub mapping: Mapping,
}

impl ProviderLink {
    pub fn new(identity_provider: impl Into<String>) -> Self {
        Self {
            identity_provider: identity_provider.into(),
            mapping: Mapping::new(),
        }
    }
}

/// A provider map entry: a name, a list of names, or a list of links
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProviderLinks {
    Single(String),
    Many(Vec<LinkEntry>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LinkEntry {
    Name(String),
    Link(ProviderLink),
}

impl ProviderLinks {
    pub fn into_links(self) -> Vec<ProviderLink> {
        match self {
            ProviderLinks::Single(name) => vec![ProviderLink::new(name)],
            ProviderLinks::Many(entries) => entries
                .into_iter()
                .map(|entry| match entry {
                    LinkEntry::Name(name) => ProviderLink::new(name),
                    LinkEntry::Link(link) => link,
                })
                .collect(),
        }
    }
}
