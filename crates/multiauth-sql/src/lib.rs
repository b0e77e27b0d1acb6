//! SQL backend for MultiAuth
//!
//! Local accounts kept in a sqlite database: logins with password hashes and
//! the users they belong to.

pub mod provider;
pub mod store;

use std::sync::Arc;

use multiauth_core::{AuthProvider, IdentityProvider, ProviderRegistry};

pub use provider::{SqlAuthProvider, SqlIdentityProvider};
pub use store::{hash_password, NewAccount, SqlSettings, SqlStore, UserRecord};

/// Provider type name
pub const PROVIDER_TYPE: &str = "sql";

/// Register the `sql` provider type.
///
/// Each provider opens its own lazily connected pool.
pub fn register(registry: &mut ProviderRegistry) {
    registry.register_auth_provider(PROVIDER_TYPE, |name, config| {
        let settings: SqlSettings = config.parse()?;
        let store = Arc::new(SqlStore::connect_lazy(&settings)?);
        Ok(Arc::new(SqlAuthProvider::new(name, store)) as Arc<dyn AuthProvider>)
    });

    registry.register_identity_provider(PROVIDER_TYPE, |name, config| {
        let settings: SqlSettings = config.parse()?;
        let store = Arc::new(SqlStore::connect_lazy(&settings)?);
        Ok(Arc::new(SqlIdentityProvider::new(name, config.common()?, store)) as Arc<dyn IdentityProvider>)
    });
}
