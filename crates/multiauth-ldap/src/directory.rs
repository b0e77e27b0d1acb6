//! Directory access seam
//!
//! Providers talk to the directory through [`DirectoryConnector`] and
//! [`DirectorySession`] so the ldap3 client can be swapped for an in-memory
//! directory in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use multiauth_core::{AttrMap, Result};
use serde_json::Value;

use crate::settings::LdapSettings;

/// Entry returned by a directory search
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: &str, values: &[&str]) -> Self {
        self.attrs
            .insert(name.to_string(), values.iter().map(|v| v.to_string()).collect());
        self
    }

    pub fn with_bin_attr(mut self, name: &str, values: Vec<Vec<u8>>) -> Self {
        self.bin_attrs.insert(name.to_string(), values);
        self
    }

    /// Text values of an attribute; attribute names are case-insensitive
    pub fn values(&self, name: &str) -> &[String] {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    /// Raw bytes of an attribute, whether the server sent it as text or binary
    pub fn raw_values(&self, name: &str) -> Vec<Vec<u8>> {
        let binary = self
            .bin_attrs
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .flat_map(|(_, values)| values.iter().cloned());

        self.values(name)
            .iter()
            .map(|value| value.as_bytes().to_vec())
            .chain(binary)
            .collect()
    }

    /// Attributes as JSON lists, binary values decoded lossily
    pub fn to_attr_map(&self) -> AttrMap {
        let mut data: AttrMap = self
            .attrs
            .iter()
            .map(|(key, values)| {
                let values = values.iter().cloned().map(Value::String).collect();
                (key.clone(), Value::Array(values))
            })
            .collect();

        for (key, values) in &self.bin_attrs {
            let values = values
                .iter()
                .map(|value| Value::String(String::from_utf8_lossy(value).into_owned()))
                .collect();
            data.entry(key.clone()).or_insert(Value::Array(values));
        }

        data
    }
}

/// Opens sessions bound with the configured service account
#[async_trait]
pub trait DirectoryConnector: Send + Sync {
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>>;
}

/// A bound directory connection
///
/// An empty attribute list requests every user attribute.
#[async_trait]
pub trait DirectorySession: Send {
    /// Rebind the connection as another DN.
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()>;

    /// First entry matching `filter` under `base`.
    async fn find_one(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>>;

    /// Every entry matching `filter` under `base`, fetched page by page.
    async fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>>;

    /// Read a single entry by DN.
    async fn read(&mut self, dn: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>>;

    async fn unbind(&mut self) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_lookup_ignores_case() {
        let entry = DirectoryEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attr("memberOf", &["cn=staff,ou=groups,dc=example,dc=com"]);

        assert_eq!(entry.values("memberof").len(), 1);
        assert_eq!(entry.first("MEMBEROF"), Some("cn=staff,ou=groups,dc=example,dc=com"));
        assert!(entry.values("cn").is_empty());
    }

    #[test]
    fn test_raw_values_merge_text_and_binary() {
        let entry = DirectoryEntry::new("cn=admins")
            .with_attr("objectSid", &["abc"])
            .with_bin_attr("objectSid", vec![vec![1, 5, 0, 0]]);

        assert_eq!(entry.raw_values("objectsid"), vec![b"abc".to_vec(), vec![1, 5, 0, 0]]);
    }

    #[test]
    fn test_to_attr_map() {
        let entry = DirectoryEntry::new("uid=jdoe")
            .with_attr("uid", &["jdoe"])
            .with_attr("mail", &["jdoe@example.com", "john@example.com"]);

        let data = entry.to_attr_map();
        assert_eq!(data["uid"], json!(["jdoe"]));
        assert_eq!(data["mail"], json!(["jdoe@example.com", "john@example.com"]));
    }
}
