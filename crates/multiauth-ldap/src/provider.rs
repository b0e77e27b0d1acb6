//! LDAP auth and identity providers

use std::sync::Arc;

use async_trait::async_trait;
use multiauth_core::{
    AuthInfo, AuthProvider, Capabilities, Credentials, Criteria, Error, Group, IdentityInfo, IdentityProvider,
    ProviderSettings, Result,
};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::context::LdapContext;
use crate::directory::{DirectoryConnector, DirectoryEntry};
use crate::group::LdapGroup;
use crate::settings::LdapSettings;

/// User attributes to fetch: the uid plus the mapped attributes, or all
/// attributes (empty list) when the provider has no mapping
pub(crate) fn requested_attrs<'a>(common: &'a ProviderSettings, uid_attr: &'a str) -> Vec<&'a str> {
    if common.mapping.is_empty() {
        return Vec::new();
    }

    let mut attrs = vec![uid_attr];
    for attr in common.mapping.values() {
        if !attrs.iter().any(|known| known.eq_ignore_ascii_case(attr)) {
            attrs.push(attr.as_str());
        }
    }
    attrs
}

/// Identity for a user entry, `None` when the entry lacks the uid attribute
pub(crate) fn entry_to_identity(
    provider: &str,
    common: &ProviderSettings,
    uid_attr: &str,
    entry: &DirectoryEntry,
) -> Option<Result<IdentityInfo>> {
    let identifier = entry.first(uid_attr)?;
    Some(IdentityInfo::from_provider_data(
        provider,
        common,
        identifier,
        Some(json!({ "dn": entry.dn })),
        &entry.to_attr_map(),
    ))
}

// ============================================================================
// Auth provider
// ============================================================================

/// Verifies credentials by binding as the user's entry
pub struct LdapAuthProvider {
    name: String,
    settings: Arc<LdapSettings>,
    connector: Arc<dyn DirectoryConnector>,
}

impl LdapAuthProvider {
    pub fn new(name: &str, settings: LdapSettings, connector: Arc<dyn DirectoryConnector>) -> Self {
        Self {
            name: name.to_string(),
            settings: Arc::new(settings),
            connector,
        }
    }

    async fn verify(&self, context: &mut LdapContext, credentials: &Credentials) -> Result<AuthInfo> {
        let uid_attr = self.settings.uid.as_str();
        let user = context
            .get_user_by_id(&credentials.username, &[uid_attr])
            .await?
            .ok_or(Error::NoSuchUser { provider: None })?;

        debug!("Found user DN: {}", user.dn);
        context.bind(&user.dn, &credentials.password).await?;

        let identifier = user.first(uid_attr).unwrap_or(&credentials.username);
        Ok(AuthInfo::with_identifier(&self.name, identifier))
    }
}

#[async_trait]
impl AuthProvider for LdapAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthInfo> {
        // An empty password would be an unauthenticated bind, which servers accept
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Err(Error::InvalidCredentials {
                provider: Some(self.name.clone()),
            });
        }

        let mut context = LdapContext::open(self.connector.as_ref(), self.settings.clone()).await?;
        let result = self.verify(&mut context, credentials).await;
        context.close().await;

        match &result {
            Ok(_) => info!(provider = %self.name, username = %credentials.username, "LDAP authentication succeeded"),
            Err(e) => debug!(provider = %self.name, username = %credentials.username, "LDAP authentication failed: {}", e),
        }

        result.map_err(|e| e.with_provider(&self.name))
    }
}

// ============================================================================
// Identity provider
// ============================================================================

/// Resolves identities and groups from user and group entries
pub struct LdapIdentityProvider {
    name: String,
    settings: Arc<LdapSettings>,
    common: Arc<ProviderSettings>,
    connector: Arc<dyn DirectoryConnector>,
}

impl LdapIdentityProvider {
    pub fn new(
        name: &str,
        settings: LdapSettings,
        common: ProviderSettings,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Self {
        Self {
            name: name.to_string(),
            settings: Arc::new(settings),
            common: Arc::new(common),
            connector,
        }
    }

    async fn context(&self) -> Result<LdapContext> {
        LdapContext::open(self.connector.as_ref(), self.settings.clone()).await
    }

    fn identity(&self, entry: &DirectoryEntry) -> Option<Result<IdentityInfo>> {
        let identity = entry_to_identity(&self.name, &self.common, &self.settings.uid, entry);
        if identity.is_none() {
            warn!(dn = %entry.dn, attribute = %self.settings.uid, "User entry has no identifier");
        }
        identity
    }

    fn group(&self, entry: &DirectoryEntry, fallback_name: Option<&str>) -> Option<Arc<dyn Group>> {
        let name = entry.first(&self.settings.gid).or(fallback_name)?;
        Some(Arc::new(LdapGroup::new(
            &self.name,
            name,
            entry.dn.clone(),
            self.settings.clone(),
            self.common.clone(),
            self.connector.clone(),
        )))
    }

    fn user_attrs(&self) -> Vec<&str> {
        requested_attrs(&self.common, &self.settings.uid)
    }

    async fn lookup_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        let mut context = self.context().await?;
        let result = context.get_user_by_id(identifier, &self.user_attrs()).await;
        context.close().await;

        match result? {
            Some(entry) => self.identity(&entry).transpose(),
            None => Ok(None),
        }
    }

    async fn identity_groups(&self, context: &mut LdapContext, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let member_of_attr = self.settings.member_of_attr.as_str();
        let user = context
            .get_user_by_id(identifier, &[member_of_attr])
            .await?
            .ok_or_else(|| Error::identity_retrieval(format!("No such user: {}", identifier)))?;

        if self.settings.ad_group_style {
            let tokens = context.token_groups(&user.dn).await?;
            let entries = context.groups_by_sid(&tokens).await?;
            return Ok(entries.iter().filter_map(|entry| self.group(entry, None)).collect());
        }

        let mut groups = Vec::new();
        for dn in user.values(member_of_attr) {
            match context.read(dn, &[self.settings.gid.as_str()]).await? {
                Some(entry) => groups.extend(self.group(&entry, None)),
                None => debug!(group = %dn, "Skipping unreadable group"),
            }
        }
        Ok(groups)
    }
}

#[async_trait]
impl IdentityProvider for LdapIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &ProviderSettings {
        &self.common
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn get_identity_from_auth(&self, auth_info: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let identifier = auth_info
            .get_str("identifier")
            .ok_or_else(|| Error::identity_retrieval("Authentication data has no identifier"))?;
        self.lookup_identity(identifier).await
    }

    async fn refresh_identity(&self, identifier: &str, _multiauth_data: &Value) -> Result<Option<IdentityInfo>> {
        self.lookup_identity(identifier).await
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        self.lookup_identity(identifier).await
    }

    async fn search_identities(&self, criteria: &Criteria, exact: bool) -> Result<Vec<IdentityInfo>> {
        let mut context = self.context().await?;
        let result = context.search_users(criteria, exact, &self.user_attrs()).await;
        context.close().await;

        result?.iter().filter_map(|entry| self.identity(entry)).collect()
    }

    async fn get_identity_groups(&self, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        let mut context = self.context().await?;
        let result = self.identity_groups(&mut context, identifier).await;
        context.close().await;
        result
    }

    async fn get_group(&self, name: &str) -> Result<Option<Arc<dyn Group>>> {
        let mut context = self.context().await?;
        let result = context.get_group_by_id(name, &[self.settings.gid.as_str()]).await;
        context.close().await;

        Ok(result?.and_then(|entry| self.group(&entry, Some(name))))
    }

    async fn search_groups(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        let criteria = Criteria::from([(self.settings.gid.clone(), name.to_string())]);

        let mut context = self.context().await?;
        let result = context.search_groups(&criteria, exact, &[self.settings.gid.as_str()]).await;
        context.close().await;

        Ok(result?.iter().filter_map(|entry| self.group(entry, None)).collect())
    }
}
