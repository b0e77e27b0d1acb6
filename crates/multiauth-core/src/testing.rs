//! In-memory providers for tests
//!
//! Enabled for this crate's own tests and for dependents through the
//! `testing` feature.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde_json::Value;

use crate::config::ProviderSettings;
use crate::data::{AuthInfo, Credentials, IdentityInfo};
use crate::error::{Error, Result};
use crate::provider::{AuthProvider, Capabilities, Group, IdentityProvider};
use crate::util::{AttrMap, Criteria};

/// Auth provider backed by a username -> password map
#[derive(Debug, Default)]
pub struct StubAuthProvider {
    name: String,
    users: BTreeMap<String, String>,
}

impl StubAuthProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            users: BTreeMap::new(),
        }
    }

    pub fn with_user(mut self, username: &str, password: &str) -> Self {
        self.users.insert(username.to_string(), password.to_string());
        self
    }
}

#[async_trait]
impl AuthProvider for StubAuthProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn authenticate(&self, credentials: &Credentials) -> Result<AuthInfo> {
        match self.users.get(&credentials.username) {
            None => Err(Error::NoSuchUser { provider: None }),
            Some(password) if *password != credentials.password => {
                Err(Error::InvalidCredentials { provider: None })
            }
            Some(_) => Ok(AuthInfo::with_identifier(&self.name, &credentials.username)),
        }
    }
}

/// Identity provider backed by in-memory identities and groups
#[derive(Debug, Default)]
pub struct StubIdentityProvider {
    name: String,
    pub settings: ProviderSettings,
    identifier_key: String,
    identities: BTreeMap<String, AttrMap>,
    groups: BTreeMap<String, Vec<String>>,
}

impl StubIdentityProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            settings: ProviderSettings::default(),
            identifier_key: "identifier".to_string(),
            identities: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    pub fn with_identity(mut self, identifier: &str, data: &[(&str, &str)]) -> Self {
        let data = data
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
            .collect();
        self.identities.insert(identifier.to_string(), data);
        self
    }

    pub fn with_group(mut self, name: &str, members: &[&str]) -> Self {
        self.groups
            .insert(name.to_string(), members.iter().map(|m| m.to_string()).collect());
        self
    }

    /// Auth data key holding the identifier
    pub fn keyed_by(mut self, key: &str) -> Self {
        self.identifier_key = key.to_string();
        self
    }

    fn identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        self.identities
            .get(identifier)
            .map(|data| IdentityInfo::from_provider_data(&self.name, &self.settings, identifier, None, data))
            .transpose()
    }

    fn group(&self, name: &str) -> Option<Arc<dyn Group>> {
        self.groups.get(name).map(|members| {
            let members = members
                .iter()
                .filter_map(|m| self.identity(m).ok().flatten())
                .collect();
            Arc::new(StubGroup {
                provider: self.name.clone(),
                name: name.to_string(),
                members,
            }) as Arc<dyn Group>
        })
    }
}

#[async_trait]
impl IdentityProvider for StubIdentityProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::all()
    }

    async fn get_identity_from_auth(&self, auth_info: &AuthInfo) -> Result<Option<IdentityInfo>> {
        match auth_info.get_str(&self.identifier_key) {
            Some(identifier) => self.identity(identifier),
            None => Ok(None),
        }
    }

    async fn refresh_identity(&self, identifier: &str, _multiauth_data: &Value) -> Result<Option<IdentityInfo>> {
        self.identity(identifier)
    }

    async fn get_identity(&self, identifier: &str) -> Result<Option<IdentityInfo>> {
        self.identity(identifier)
    }

    async fn search_identities(&self, criteria: &Criteria, exact: bool) -> Result<Vec<IdentityInfo>> {
        let matches = |data: &AttrMap| {
            criteria.iter().all(|(key, wanted)| {
                data.get(key).and_then(Value::as_str).is_some_and(|value| {
                    if exact {
                        value == wanted
                    } else {
                        value.contains(wanted.as_str())
                    }
                })
            })
        };

        self.identities
            .iter()
            .filter(|(_, data)| matches(*data))
            .map(|(identifier, data)| {
                IdentityInfo::from_provider_data(&self.name, &self.settings, identifier.as_str(), None, data)
            })
            .collect()
    }

    async fn get_identity_groups(&self, identifier: &str) -> Result<Vec<Arc<dyn Group>>> {
        Ok(self
            .groups
            .iter()
            .filter(|(_, members)| members.iter().any(|m| m == identifier))
            .filter_map(|(name, _)| self.group(name))
            .collect())
    }

    async fn get_group(&self, name: &str) -> Result<Option<Arc<dyn Group>>> {
        Ok(self.group(name))
    }

    async fn search_groups(&self, name: &str, exact: bool) -> Result<Vec<Arc<dyn Group>>> {
        Ok(self
            .groups
            .keys()
            .filter(|group| if exact { *group == name } else { group.contains(name) })
            .filter_map(|group| self.group(group))
            .collect())
    }
}

/// Group with a fixed member list
#[derive(Debug)]
pub struct StubGroup {
    provider: String,
    name: String,
    members: Vec<IdentityInfo>,
}

#[async_trait]
impl Group for StubGroup {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_member_list(&self) -> bool {
        true
    }

    fn members(&self) -> BoxStream<'_, Result<IdentityInfo>> {
        stream::iter(self.members.clone().into_iter().map(Ok)).boxed()
    }

    async fn has_member(&self, identifier: &str) -> Result<bool> {
        Ok(self.members.iter().any(|m| m.identifier() == identifier))
    }
}
