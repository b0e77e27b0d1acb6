//! Provider traits
//!
//! Backends implement [`AuthProvider`] to verify credentials and
//! [`IdentityProvider`] to turn an authentication result into an identity.
//! Identity providers that know about groups hand out [`Group`] objects.

use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use serde_json::Value;

use crate::config::ProviderSettings;
use crate::data::{AuthInfo, Credentials, IdentityInfo};
use crate::error::{Error, Result};
use crate::util::Criteria;

/// Operations an identity provider supports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    pub get: bool,
    pub search: bool,
    pub refresh: bool,
    pub groups: bool,
    pub identity_groups: bool,
}

impl Capabilities {
    pub fn all() -> Self {
        Self {
            get: true,
            search: true,
            refresh: true,
            groups: true,
            identity_groups: true,
        }
    }
}

fn not_supported<T>(provider: &str, operation: &'static str) -> Result<T> {
    Err(Error::NotSupported {
        provider: provider.to_string(),
        operation,
    })
}

/// Authenticates a request against a credential backend
#[async_trait]
pub trait AuthProvider: Send + Sync {
    fn name(&self) -> &str;

    fn title(&self) -> &str {
        self.name()
    }

    /// External providers redirect to a third party instead of taking credentials.
    fn is_external(&self) -> bool {
        false
    }

    /// Verify the submitted credentials.
    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthInfo>;
}

/// Resolves identities from authentication data
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    fn name(&self) -> &str;

    fn settings(&self) -> &ProviderSettings;

    fn title(&self) -> &str {
        self.settings().title.as_deref().unwrap_or_else(|| self.name())
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Identity for the given auth data, `None` if this provider has none.
    async fn get_identity_from_auth(&self, auth_info: &AuthInfo) -> Result<Option<IdentityInfo>>;

    async fn refresh_identity(&self, _identifier: &str, _multiauth_data: &Value) -> Result<Option<IdentityInfo>> {
        not_supported(self.name(), "refresh")
    }

    async fn get_identity(&self, _identifier: &str) -> Result<Option<IdentityInfo>> {
        not_supported(self.name(), "get")
    }

    /// `criteria` already uses provider keys.
    async fn search_identities(&self, _criteria: &Criteria, _exact: bool) -> Result<Vec<IdentityInfo>> {
        not_supported(self.name(), "search")
    }

    async fn get_identity_groups(&self, _identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        not_supported(self.name(), "identity groups")
    }

    async fn get_group(&self, _name: &str) -> Result<Option<Arc<dyn Group>>> {
        not_supported(self.name(), "groups")
    }

    async fn search_groups(&self, _name: &str, _exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        not_supported(self.name(), "groups")
    }
}

/// A group exposed by an identity provider
#[async_trait]
pub trait Group: Send + Sync {
    /// Name of the identity provider owning the group
    fn provider(&self) -> &str;

    fn name(&self) -> &str;

    fn supports_member_list(&self) -> bool {
        false
    }

    /// Lazily enumerate the group's members.
    fn members(&self) -> BoxStream<'_, Result<IdentityInfo>>;

    async fn has_member(&self, identifier: &str) -> Result<bool>;
}

impl std::fmt::Debug for dyn Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("provider", &self.provider())
            .field("name", &self.name())
            .finish()
    }
}
