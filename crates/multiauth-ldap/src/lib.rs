//! LDAP backend for MultiAuth
//!
//! Registers the `ldap` provider type: an auth provider binding as the
//! user's entry, and an identity provider resolving users and (nested)
//! groups from OpenLDAP or Active Directory.

pub mod client;
pub mod context;
pub mod directory;
pub mod filter;
pub mod group;
pub mod provider;
pub mod settings;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use multiauth_core::{AuthProvider, IdentityProvider, ProviderRegistry};

pub use client::Ldap3Connector;
pub use directory::{DirectoryConnector, DirectoryEntry, DirectorySession};
pub use group::{GroupWalk, LdapGroup};
pub use provider::{LdapAuthProvider, LdapIdentityProvider};
pub use settings::LdapSettings;

/// Provider type name
pub const PROVIDER_TYPE: &str = "ldap";

/// Register the `ldap` provider type backed by real LDAP connections.
pub fn register(registry: &mut ProviderRegistry) {
    register_with(registry, Arc::new(Ldap3Connector));
}

/// Register the `ldap` provider type with a custom directory connector.
pub fn register_with(registry: &mut ProviderRegistry, connector: Arc<dyn DirectoryConnector>) {
    let auth_connector = connector.clone();
    registry.register_auth_provider(PROVIDER_TYPE, move |name, config| {
        let settings: LdapSettings = config.parse()?;
        settings.validate()?;
        Ok(Arc::new(LdapAuthProvider::new(name, settings, auth_connector.clone())) as Arc<dyn AuthProvider>)
    });

    registry.register_identity_provider(PROVIDER_TYPE, move |name, config| {
        let settings: LdapSettings = config.parse()?;
        settings.validate_identity()?;
        let common = config.common()?;
        Ok(Arc::new(LdapIdentityProvider::new(name, settings, common, connector.clone())) as Arc<dyn IdentityProvider>)
    });
}
