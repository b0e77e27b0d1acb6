//! LDAP provider settings
//!
//! Supports:
//! - OpenLDAP style directories (`memberOf` overlay)
//! - Active Directory (`tokenGroups` membership)
//! - TLS/STARTTLS connections

use multiauth_core::{Error, Result};
use serde::{Deserialize, Serialize};
use url::Url;

/// Settings shared by the LDAP auth and identity providers
#[derive(Clone, Serialize, Deserialize)]
pub struct LdapSettings {
    /// Server URI (ldap:// or ldaps://)
    /// Example: "ldaps://ldap.example.com:636"
    pub uri: String,

    /// DN used to bind every connection
    /// Example: "cn=admin,dc=example,dc=com"
    pub bind_dn: String,

    /// Password for the initial bind
    #[serde(default, skip_serializing)]
    pub bind_password: String,

    /// Demand a valid server certificate
    #[serde(default = "default_true")]
    pub tls: bool,

    /// Negotiate TLS over a plain ldap:// connection
    #[serde(default)]
    pub starttls: bool,

    /// Operation timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Page size for paged searches
    #[serde(default = "default_page_size")]
    pub page_size: i32,

    /// Attribute holding the user identifier
    #[serde(default = "default_uid")]
    pub uid: String,

    /// Base DN for user searches
    /// Example: "ou=people,dc=example,dc=com"
    #[serde(default)]
    pub user_base: String,

    /// Filter selecting user entries
    #[serde(default = "default_user_filter")]
    pub user_filter: String,

    /// Attribute holding the group name
    #[serde(default = "default_gid")]
    pub gid: String,

    /// Base DN for group searches
    #[serde(default)]
    pub group_base: String,

    /// Filter selecting group entries
    #[serde(default = "default_group_filter")]
    pub group_filter: String,

    /// Attribute listing the groups an entry belongs to
    #[serde(default = "default_member_of_attr")]
    pub member_of_attr: String,

    /// Test membership through Active Directory token groups
    #[serde(default)]
    pub ad_group_style: bool,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_page_size() -> i32 {
    1000
}

fn default_uid() -> String {
    "uid".to_string()
}

fn default_user_filter() -> String {
    "(objectClass=person)".to_string()
}

fn default_gid() -> String {
    "cn".to_string()
}

fn default_group_filter() -> String {
    "(objectClass=groupOfNames)".to_string()
}

fn default_member_of_attr() -> String {
    "memberOf".to_string()
}

impl Default for LdapSettings {
    fn default() -> Self {
        Self {
            uri: "ldap://localhost:389".to_string(),
            bind_dn: String::new(),
            bind_password: String::new(),
            tls: default_true(),
            starttls: false,
            timeout: default_timeout(),
            page_size: default_page_size(),
            uid: default_uid(),
            user_base: String::new(),
            user_filter: default_user_filter(),
            gid: default_gid(),
            group_base: String::new(),
            group_filter: default_group_filter(),
            member_of_attr: default_member_of_attr(),
            ad_group_style: false,
        }
    }
}

impl std::fmt::Debug for LdapSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapSettings")
            .field("uri", &self.uri)
            .field("bind_dn", &self.bind_dn)
            .field("tls", &self.tls)
            .field("starttls", &self.starttls)
            .field("user_base", &self.user_base)
            .field("group_base", &self.group_base)
            .field("ad_group_style", &self.ad_group_style)
            .finish_non_exhaustive()
    }
}

impl LdapSettings {
    /// Whether the URI already uses LDAPS
    pub fn is_ldaps(&self) -> bool {
        self.uri.starts_with("ldaps://")
    }

    /// Validate the settings needed to authenticate users
    pub fn validate(&self) -> Result<()> {
        let uri = Url::parse(&self.uri)
            .map_err(|e| Error::Config(format!("Invalid LDAP URI '{}': {}", self.uri, e)))?;

        if uri.scheme() != "ldap" && uri.scheme() != "ldaps" {
            return Err(Error::Config("LDAP URI must start with ldap:// or ldaps://".to_string()));
        }

        if self.bind_dn.is_empty() {
            return Err(Error::Config("Bind DN is required".to_string()));
        }

        if self.user_base.is_empty() {
            return Err(Error::Config("User base DN is required".to_string()));
        }

        if self.uid.is_empty() {
            return Err(Error::Config("User id attribute is required".to_string()));
        }

        if self.page_size <= 0 {
            return Err(Error::Config("Page size must be positive".to_string()));
        }

        Ok(())
    }

    /// Validate the settings needed to resolve identities and groups
    pub fn validate_identity(&self) -> Result<()> {
        self.validate()?;

        if self.group_base.is_empty() {
            return Err(Error::Config("Group base DN is required".to_string()));
        }

        if self.gid.is_empty() || self.member_of_attr.is_empty() {
            return Err(Error::Config(
                "Group id and member-of attributes are required".to_string(),
            ));
        }

        Ok(())
    }
}
