//! Local account providers

use std::sync::Arc;

use async_trait::async_trait;
use multiauth_core::{
    AuthInfo, AuthProvider, Capabilities, Credentials, Criteria, Error, IdentityInfo, IdentityProvider,
    ProviderSettings, Result,
};
use serde_json::{json, Value};
use tracing::debug;

use crate::store::{verify_password, SqlStore, UserRecord};

/// Checks passwords of logins stored under this provider's name
pub struct SqlAuthProvider {
    name: String,
    store: Arc<SqlStore>,
}

impl SqlAuthProvider {
    pub fn new(name: &str, store: Arc<SqlStore>) -> Self {
        Self {
            name: name.to_string(),
            store,
        }
    }
}

#[async_trait]
impl AuthProvider for SqlAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthInfo> {
        let (_, hash) = self
            .store
            .find_login(&self.name, &credentials.username)
            .await?
            .ok_or(Error::NoSuchUser {
                provider: Some(self.name.clone()),
            })?;

        match hash {
            Some(hash) if verify_password(&credentials.password, &hash) => {
                debug!(provider = %self.name, username = %credentials.username, "Password verified");
                Ok(AuthInfo::with_identifier(&self.name, &credentials.username))
            }
            _ => Err(Error::InvalidCredentials {
                provider: Some(self.name.clone()),
            }),
        }
    }
}

/// Resolves users of the account store; identifiers are user ids
pub struct SqlIdentityProvider {
    name: String,
    settings: ProviderSettings,
    store: Arc<SqlStore>,
}

impl SqlIdentityProvider {
    pub fn new(name: &str, settings: ProviderSettings, store: Arc<SqlStore>) -> Self {
        Self {
            name: name.to_string(),
            settings,
            store,
        }
    }

    fn identity(&self, user: &UserRecord) -> Result<IdentityInfo> {
        IdentityInfo::from_provider_data(
            &self.name,
            &self.settings,
            user.id.to_string(),
            Some(json!({ "user_id": user.id })),
            &user.to_attr_map(),
        )
    }

    async fn lookup(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        let id = match identifier.parse::<i64>() {
            Ok(id) => id,
            Err(_) => return Ok(None),
        };

        self.store.get_user(id).await?.map(|user| self.identity(&user)).transpose()
    }
}

#[async_trait]
impl IdentityProvider for SqlIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            get: true,
            search: true,
            refresh: true,
            ..Default::default()
        }
    }

    async fn get_identity_from_auth(&self, auth_info: &AuthInfo) -> Result<Option<IdentityInfo>> {
        let identifier = match auth_info.get_str("identifier") {
            Some(identifier) => identifier,
            None => return Ok(None),
        };

        self.store
            .find_user_by_login(auth_info.provider(), identifier)
            .await?
            .map(|user| self.identity(&user))
            .transpose()
    }

    async fn refresh_identity(&self, identifier: &str, multiauth_data: &Value) -> Result<Option<IdentityInfo>> {
        match multiauth_data.get("user_id").and_then(Value::as_i64) {
            Some(id) => self.lookup(&id.to_string()).await,
            None => self.lookup(identifier).await,
        }
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        self.lookup(identifier).await
    }

    async fn search_identities(&self, criteria: &Criteria, exact: bool) -> Result<Vec<IdentityInfo>> {
        self.store
            .search_users(criteria, exact)
            .await?
            .iter()
            .map(|user| self.identity(user))
            .collect()
    }
}
