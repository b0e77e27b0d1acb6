//! Registry of provider types
//!
//! Maps a provider type name (the `type` key of a provider's configuration)
//! to the factories building auth and identity providers of that type.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::provider::{AuthProvider, IdentityProvider};

pub type AuthProviderFactory =
    Arc<dyn Fn(&str, &ProviderConfig) -> Result<Arc<dyn AuthProvider>> + Send + Sync>;

pub type IdentityProviderFactory =
    Arc<dyn Fn(&str, &ProviderConfig) -> Result<Arc<dyn IdentityProvider>> + Send + Sync>;

#[derive(Default, Clone)]
pub struct ProviderRegistry {
    auth: BTreeMap<String, AuthProviderFactory>,
    identity: BTreeMap<String, IdentityProviderFactory>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_auth_provider<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str, &ProviderConfig) -> Result<Arc<dyn AuthProvider>> + Send + Sync + 'static,
    {
        self.auth.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn register_identity_provider<F>(&mut self, kind: &str, factory: F)
    where
        F: Fn(&str, &ProviderConfig) -> Result<Arc<dyn IdentityProvider>> + Send + Sync + 'static,
    {
        self.identity.insert(kind.to_string(), Arc::new(factory));
    }

    pub fn auth_types(&self) -> Vec<&str> {
        self.auth.keys().map(String::as_str).collect()
    }

    pub fn identity_types(&self) -> Vec<&str> {
        self.identity.keys().map(String::as_str).collect()
    }

    pub fn build_auth_provider(&self, name: &str, config: &ProviderConfig) -> Result<Arc<dyn AuthProvider>> {
        let factory = self.auth.get(&config.kind).ok_or_else(|| {
            Error::Config(format!(
                "Unknown auth provider type '{}' for provider '{}'",
                config.kind, name
            ))
        })?;
        factory(name, config)
    }

    pub fn build_identity_provider(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<Arc<dyn IdentityProvider>> {
        let factory = self.identity.get(&config.kind).ok_or_else(|| {
            Error::Config(format!(
                "Unknown identity provider type '{}' for provider '{}'",
                config.kind, name
            ))
        })?;
        factory(name, config)
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("auth", &self.auth_types())
            .field("identity", &self.identity_types())
            .finish()
    }
}
