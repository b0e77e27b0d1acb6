//! Authentication and identity records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::config::ProviderSettings;
use crate::error::{Error, Result};
use crate::util::{convert_provider_data, first_str, AttrMap, Mapping};

/// Key under which an identity's provider name is stored in its multiauth data.
pub const PROVIDER_KEY: &str = "_provider";

/// Username/password pair submitted to a local login form
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

// ============================================================================
// AuthInfo
// ============================================================================

/// Result of a successful authentication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthInfo {
    provider: String,
    data: AttrMap,
}

impl AuthInfo {
    pub fn new(provider: impl Into<String>, data: AttrMap) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidData("AuthInfo cannot be empty".to_string()));
        }

        Ok(Self {
            provider: provider.into(),
            data,
        })
    }

    /// AuthInfo carrying only an `identifier`
    pub fn with_identifier(provider: impl Into<String>, identifier: impl Into<String>) -> Self {
        let mut data = AttrMap::new();
        data.insert("identifier".to_string(), Value::String(identifier.into()));
        Self {
            provider: provider.into(),
            data,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn data(&self) -> &AttrMap {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// First string value stored under `key`
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(first_str)
    }

    /// Rename keys according to `mapping` (application key -> provider key).
    ///
    /// Returns a new record; `self` is left untouched.
    pub fn map(&self, mapping: &Mapping) -> Result<AuthInfo> {
        if let Some(missing) = mapping.values().find(|key| !self.data.contains_key(*key)) {
            return Err(Error::MissingKey(missing.clone()));
        }

        Ok(AuthInfo {
            provider: self.provider.clone(),
            data: convert_provider_data(&self.data, mapping, None),
        })
    }
}

// ============================================================================
// IdentityInfo
// ============================================================================

/// Identity resolved by an identity provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityInfo {
    provider: String,
    identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    multiauth_data: Option<Value>,
    #[serde(default)]
    data: AttrMap,
}

impl IdentityInfo {
    pub fn new(provider: impl Into<String>, identifier: impl Into<String>, data: AttrMap) -> Result<Self> {
        let identifier = identifier.into();
        if identifier.is_empty() {
            return Err(Error::InvalidData("Identifier cannot be empty".to_string()));
        }

        Ok(Self {
            provider: provider.into(),
            identifier,
            multiauth_data: None,
            data,
        })
    }

    /// Build an identity from raw provider attributes, applying the
    /// provider's `mapping` and `identity_info_keys` settings.
    ///
    /// `multiauth_data` is kept alongside the `_provider` key returned by
    /// [`IdentityInfo::multiauth_data`].
    pub fn from_provider_data(
        provider: &str,
        settings: &ProviderSettings,
        identifier: impl Into<String>,
        multiauth_data: Option<Value>,
        raw: &AttrMap,
    ) -> Result<Self> {
        let data = convert_provider_data(raw, &settings.mapping, settings.identity_info_keys.as_deref());
        let mut identity = Self::new(provider, identifier, data)?;
        identity.multiauth_data = multiauth_data;
        Ok(identity)
    }

    pub fn with_multiauth_data(mut self, data: Value) -> Self {
        self.multiauth_data = Some(data);
        self
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn data(&self) -> &AttrMap {
        &self.data
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(first_str)
    }

    /// Data a host persists to refresh this identity later.
    ///
    /// Always an object carrying the provider name under `_provider`.
    pub fn multiauth_data(&self) -> Value {
        let mut object = match &self.multiauth_data {
            Some(Value::Object(map)) => map.clone(),
            Some(other) => {
                let mut map = Map::new();
                map.insert("data".to_string(), other.clone());
                map
            }
            None => Map::new(),
        };
        object.insert(PROVIDER_KEY.to_string(), Value::String(self.provider.clone()));
        Value::Object(object)
    }
}

impl std::fmt::Display for IdentityInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<IdentityInfo({}, {})>", self.provider, self.identifier)
    }
}
