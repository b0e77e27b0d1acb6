//! The provider hub
//!
//! [`MultiAuth`] owns the configured auth and identity providers and the
//! provider map. A login goes through the auth provider first; the resulting
//! [`AuthInfo`] is then offered to each linked identity provider in order and
//! the first identity found wins.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::{MultiAuthConfig, ProviderLink};
use crate::data::{AuthInfo, Credentials, IdentityInfo, PROVIDER_KEY};
use crate::error::{Error, Result};
use crate::provider::{AuthProvider, Group, IdentityProvider};
use crate::registry::ProviderRegistry;
use crate::util::{convert_app_data, Criteria};

pub struct MultiAuth {
    auth_providers: BTreeMap<String, Arc<dyn AuthProvider>>,
    identity_providers: BTreeMap<String, Arc<dyn IdentityProvider>>,
    provider_map: BTreeMap<String, Vec<ProviderLink>>,
}

impl MultiAuth {
    pub fn builder() -> MultiAuthBuilder {
        MultiAuthBuilder::default()
    }

    /// Build every configured provider through `registry`.
    pub fn from_config(config: &MultiAuthConfig, registry: &ProviderRegistry) -> Result<Self> {
        config.validate()?;

        let mut builder = Self::builder();
        for (name, provider) in &config.auth_providers {
            builder = builder.auth_provider(registry.build_auth_provider(name, provider)?);
        }
        for (name, provider) in &config.identity_providers {
            builder = builder.identity_provider(registry.build_identity_provider(name, provider)?);
        }
        for (auth, links) in &config.provider_map {
            for link in links.clone().into_links() {
                builder = builder.link(auth, link);
            }
        }

        let multiauth = builder.build()?;
        info!(
            auth_providers = multiauth.auth_providers.len(),
            identity_providers = multiauth.identity_providers.len(),
            "MultiAuth initialized"
        );
        Ok(multiauth)
    }

    pub fn auth_providers(&self) -> impl Iterator<Item = &Arc<dyn AuthProvider>> {
        self.auth_providers.values()
    }

    pub fn identity_providers(&self) -> impl Iterator<Item = &Arc<dyn IdentityProvider>> {
        self.identity_providers.values()
    }

    pub fn auth_provider(&self, name: &str) -> Result<&Arc<dyn AuthProvider>> {
        self.auth_providers
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    pub fn identity_provider(&self, name: &str) -> Result<&Arc<dyn IdentityProvider>> {
        self.identity_providers
            .get(name)
            .ok_or_else(|| Error::ProviderNotFound(name.to_string()))
    }

    /// Identity providers linked to an auth provider, in lookup order.
    pub fn links(&self, auth_provider: &str) -> &[ProviderLink] {
        self.provider_map
            .get(auth_provider)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    // =========================================================================
    // Authentication
    // =========================================================================

    /// Authenticate with a local auth provider and resolve the identity.
    pub async fn login(&self, auth_provider: &str, credentials: &Credentials) -> Result<IdentityInfo> {
        let provider = self.auth_provider(auth_provider)?;
        if provider.is_external() {
            return Err(Error::NotSupported {
                provider: auth_provider.to_string(),
                operation: "local login",
            });
        }

        let auth_info = match provider.authenticate(credentials).await {
            Ok(info) => info,
            Err(e) => {
                warn!(provider = auth_provider, "Authentication failed: {}", e);
                return Err(e.with_provider(auth_provider));
            }
        };

        debug!(provider = auth_provider, "Authentication succeeded");
        self.handle_auth_success(&auth_info).await
    }

    /// Resolve the identity for a successful authentication.
    pub async fn handle_auth_success(&self, auth_info: &AuthInfo) -> Result<IdentityInfo> {
        let links = self.links(auth_info.provider());
        if links.is_empty() {
            return Err(Error::Config(format!(
                "No identity provider linked to '{}'",
                auth_info.provider()
            )));
        }

        for link in links {
            let provider = self.identity_provider(&link.identity_provider)?;
            let mapped = auth_info.map(&link.mapping)?;

            match provider.get_identity_from_auth(&mapped).await {
                Ok(Some(identity)) => {
                    info!(
                        auth_provider = auth_info.provider(),
                        identity_provider = provider.name(),
                        identifier = identity.identifier(),
                        "Identity resolved"
                    );
                    return Ok(identity);
                }
                Ok(None) => {
                    debug!(identity_provider = provider.name(), "No identity found");
                }
                Err(e) => return Err(e.with_provider(provider.name())),
            }
        }

        Err(Error::identity_retrieval("No identity found").with_provider(auth_info.provider()))
    }

    // =========================================================================
    // Identities
    // =========================================================================

    pub async fn get_identity(&self, provider: &str, identifier: &str) -> Result<Option<IdentityInfo>> {
        let provider = self.identity_provider(provider)?;
        if !provider.capabilities().get {
            return Err(Error::NotSupported {
                provider: provider.name().to_string(),
                operation: "get",
            });
        }
        provider.get_identity(identifier).await
    }

    /// Refresh an identity from the data previously returned by
    /// [`IdentityInfo::multiauth_data`].
    pub async fn refresh_identity(&self, identifier: &str, multiauth_data: &Value) -> Result<Option<IdentityInfo>> {
        let name = multiauth_data
            .get(PROVIDER_KEY)
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InvalidData(format!("multiauth data lacks '{}'", PROVIDER_KEY)))?;

        let provider = self.identity_provider(name)?;
        if !provider.capabilities().refresh {
            return Err(Error::NotSupported {
                provider: name.to_string(),
                operation: "refresh",
            });
        }
        provider.refresh_identity(identifier, multiauth_data).await
    }

    /// Search all identity providers supporting search, or only `providers`.
    pub async fn search_identities(
        &self,
        criteria: &Criteria,
        exact: bool,
        providers: Option<&[String]>,
    ) -> Result<Vec<IdentityInfo>> {
        let mut found = Vec::new();
        for provider in self.selected(providers)? {
            if !provider.capabilities().search {
                continue;
            }
            let provider_criteria = convert_app_data(criteria, &provider.settings().mapping);
            let identities = provider.search_identities(&provider_criteria, exact).await?;
            debug!(provider = provider.name(), count = identities.len(), "Identity search");
            found.extend(identities);
        }
        Ok(found)
    }

    pub async fn get_identity_groups(&self, provider: &str, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let provider = self.identity_provider(provider)?;
        if !provider.capabilities().identity_groups {
            return Err(Error::NotSupported {
                provider: provider.name().to_string(),
                operation: "identity groups",
            });
        }
        provider.get_identity_groups(identifier).await
    }

    // =========================================================================
    // Groups
    // =========================================================================

    pub async fn get_group(&self, provider: &str, name: &str) -> Result<Option<Arc<dyn Group>>> {
        let provider = self.identity_provider(provider)?;
        if !provider.capabilities().groups {
            return Err(Error::NotSupported {
                provider: provider.name().to_string(),
                operation: "groups",
            });
        }
        provider.get_group(name).await
    }

    pub async fn search_groups(
        &self,
        name: &str,
        exact: bool,
        providers: Option<&[String]>,
    ) -> Result<Vec<Arc<dyn Group>>> {
        let mut found = Vec::new();
        for provider in self.selected(providers)? {
            if !provider.capabilities().groups {
                continue;
            }
            found.extend(provider.search_groups(name, exact).await?);
        }
        Ok(found)
    }

    fn selected(&self, providers: Option<&[String]>) -> Result<Vec<&Arc<dyn IdentityProvider>>> {
        match providers {
            None => Ok(self.identity_providers.values().collect()),
            Some(names) => names.iter().map(|name| self.identity_provider(name)).collect(),
        }
    }
}

impl std::fmt::Debug for MultiAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiAuth")
            .field("auth_providers", &self.auth_providers.keys().collect::<Vec<_>>())
            .field("identity_providers", &self.identity_providers.keys().collect::<Vec<_>>())
            .field("provider_map", &self.provider_map)
            .finish()
    }
}

// ============================================================================
// Builder
// ============================================================================

#[derive(Default)]
pub struct MultiAuthBuilder {
    auth_providers: Vec<Arc<dyn AuthProvider>>,
    identity_providers: Vec<Arc<dyn IdentityProvider>>,
    links: Vec<(String, ProviderLink)>,
}

impl MultiAuthBuilder {
    pub fn auth_provider(mut self, provider: Arc<dyn AuthProvider>) -> Self {
        self.auth_providers.push(provider);
        self
    }

    pub fn identity_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.identity_providers.push(provider);
        self
    }

    pub fn link(mut self, auth_provider: &str, link: ProviderLink) -> Self {
        self.links.push((auth_provider.to_string(), link));
        self
    }

    pub fn build(self) -> Result<MultiAuth> {
        let mut auth_providers = BTreeMap::new();
        for provider in self.auth_providers {
            let name = provider.name().to_string();
            if auth_providers.insert(name.clone(), provider).is_some() {
                return Err(Error::Config(format!("Duplicate auth provider '{}'", name)));
            }
        }

        let mut identity_providers = BTreeMap::new();
        for provider in self.identity_providers {
            let name = provider.name().to_string();
            if identity_providers.insert(name.clone(), provider).is_some() {
                return Err(Error::Config(format!("Duplicate identity provider '{}'", name)));
            }
        }

        let mut provider_map: BTreeMap<String, Vec<ProviderLink>> = BTreeMap::new();
        for (auth, link) in self.links {
            if !auth_providers.contains_key(&auth) {
                return Err(Error::Config(format!("Unknown auth provider '{}' in provider map", auth)));
            }
            if !identity_providers.contains_key(&link.identity_provider) {
                return Err(Error::Config(format!(
                    "Unknown identity provider '{}' in provider map",
                    link.identity_provider
                )));
            }
            provider_map.entry(auth).or_default().push(link);
        }

        // Unmapped auth providers fall back to the identity provider of the same name
        for name in auth_providers.keys() {
            if !provider_map.contains_key(name) && identity_providers.contains_key(name) {
                provider_map.insert(name.clone(), vec![ProviderLink::new(name.clone())]);
            }
        }

        Ok(MultiAuth {
            auth_providers,
            identity_providers,
            provider_map,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProviderConfig, ProviderLinks};
    use crate::testing::{StubAuthProvider, StubIdentityProvider};
    use serde_json::json;

    fn hub() -> MultiAuth {
        let auth = StubAuthProvider::new("local").with_user("jdoe", "secret");
        let primary = StubIdentityProvider::new("primary");
        let fallback = StubIdentityProvider::new("fallback").with_identity("jdoe", &[("email", "jdoe@example.com")]);

        MultiAuth::builder()
            .auth_provider(Arc::new(auth))
            .identity_provider(Arc::new(primary))
            .identity_provider(Arc::new(fallback))
            .link("local", ProviderLink::new("primary"))
            .link("local", ProviderLink::new("fallback"))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_login_walks_links_in_order() {
        let multiauth = hub();
        let identity = multiauth
            .login("local", &Credentials::new("jdoe", "secret"))
            .await
            .unwrap();

        assert_eq!(identity.provider(), "fallback");
        assert_eq!(identity.identifier(), "jdoe");
        assert_eq!(identity.get_str("email"), Some("jdoe@example.com"));
    }

    #[tokio::test]
    async fn test_login_failures() {
        let multiauth = hub();

        let err = multiauth
            .login("local", &Credentials::new("jdoe", "wrong"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCredentials { .. }));
        assert_eq!(err.provider(), Some("local"));

        let err = multiauth
            .login("local", &Credentials::new("nobody", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchUser { .. }));

        let err = multiauth
            .login("missing", &Credentials::new("jdoe", "secret"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ProviderNotFound(_)));
    }

    #[tokio::test]
    async fn test_no_identity_found() {
        let multiauth = MultiAuth::builder()
            .auth_provider(Arc::new(StubAuthProvider::new("local").with_user("jdoe", "pw")))
            .identity_provider(Arc::new(StubIdentityProvider::new("local")))
            .build()
            .unwrap();

        // linked implicitly through the shared name
        assert_eq!(multiauth.links("local"), &[ProviderLink::new("local")]);

        let err = multiauth
            .login("local", &Credentials::new("jdoe", "pw"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::IdentityRetrievalFailed { .. }));
    }

    #[tokio::test]
    async fn test_link_mapping_is_applied() {
        let identity_provider =
            StubIdentityProvider::new("people").with_identity("jdoe", &[]).keyed_by("login");

        let multiauth = MultiAuth::builder()
            .auth_provider(Arc::new(StubAuthProvider::new("local").with_user("jdoe", "pw")))
            .identity_provider(Arc::new(identity_provider))
            .link(
                "local",
                ProviderLink {
                    identity_provider: "people".into(),
                    mapping: [("login".to_string(), "identifier".to_string())].into(),
                },
            )
            .build()
            .unwrap();

        let identity = multiauth.login("local", &Credentials::new("jdoe", "pw")).await.unwrap();
        assert_eq!(identity.provider(), "people");
    }

    #[tokio::test]
    async fn test_search_identities_uses_provider_mapping() {
        let mut provider = StubIdentityProvider::new("people")
            .with_identity("jdoe", &[("mail", "jdoe@example.com")])
            .with_identity("asmith", &[("mail", "asmith@example.com")]);
        provider.settings.mapping.insert("email".into(), "mail".into());

        let multiauth = MultiAuth::builder()
            .identity_provider(Arc::new(provider))
            .identity_provider(Arc::new(StubIdentityProvider::new("empty")))
            .build()
            .unwrap();

        let mut criteria = Criteria::new();
        criteria.insert("email".into(), "jdoe".into());

        let found = multiauth.search_identities(&criteria, false, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].identifier(), "jdoe");

        let found = multiauth.search_identities(&criteria, true, None).await.unwrap();
        assert!(found.is_empty());

        let only = vec!["empty".to_string()];
        let found = multiauth.search_identities(&criteria, false, Some(&only)).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_refresh_identity() {
        let multiauth = hub();
        let identity = multiauth.get_identity("fallback", "jdoe").await.unwrap().unwrap();

        let refreshed = multiauth
            .refresh_identity("jdoe", &identity.multiauth_data())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(refreshed, identity);

        let err = multiauth.refresh_identity("jdoe", &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_groups() {
        let provider = StubIdentityProvider::new("people")
            .with_identity("jdoe", &[])
            .with_group("admins", &["jdoe"]);
        let multiauth = MultiAuth::builder()
            .identity_provider(Arc::new(provider))
            .build()
            .unwrap();

        let group = multiauth.get_group("people", "admins").await.unwrap().unwrap();
        assert!(group.has_member("jdoe").await.unwrap());
        assert!(!group.has_member("asmith").await.unwrap());

        assert!(multiauth.get_group("people", "nobody").await.unwrap().is_none());

        let found = multiauth.search_groups("adm", false, None).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name(), "admins");
    }

    #[test]
    fn test_builder_rejects_unknown_links() {
        let result = MultiAuth::builder()
            .auth_provider(Arc::new(StubAuthProvider::new("local")))
            .link("local", ProviderLink::new("missing"))
            .build();
        assert!(matches!(result, Err(Error::Config(_))));

        let result = MultiAuth::builder()
            .auth_provider(Arc::new(StubAuthProvider::new("local")))
            .auth_provider(Arc::new(StubAuthProvider::new("local")))
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_from_config() {
        let mut registry = ProviderRegistry::new();
        registry.register_auth_provider("stub", |name, _| {
            Ok(Arc::new(StubAuthProvider::new(name)) as Arc<dyn AuthProvider>)
        });
        registry.register_identity_provider("stub", |name, _| {
            Ok(Arc::new(StubIdentityProvider::new(name)) as Arc<dyn IdentityProvider>)
        });

        let mut config = MultiAuthConfig::default();
        config.auth_providers.insert("a".into(), ProviderConfig::new("stub"));
        config.identity_providers.insert("b".into(), ProviderConfig::new("stub"));
        config
            .provider_map
            .insert("a".into(), ProviderLinks::Single("b".into()));

        let multiauth = MultiAuth::from_config(&config, &registry).unwrap();
        assert_eq!(multiauth.links("a"), &[ProviderLink::new("b")]);
        assert_eq!(multiauth.auth_providers().count(), 1);
    }
}
