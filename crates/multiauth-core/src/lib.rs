//! MultiAuth Core Library
//!
//! Data model, provider traits and the provider hub shared by every
//! MultiAuth backend.

pub mod config;
pub mod data;
pub mod error;
pub mod multiauth;
pub mod provider;
pub mod registry;
pub mod util;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::{MultiAuthConfig, ProviderConfig, ProviderLink, ProviderSettings};
pub use data::{AuthInfo, Credentials, IdentityInfo};
pub use error::{Error, Result};
pub use multiauth::{MultiAuth, MultiAuthBuilder};
pub use provider::{AuthProvider, Capabilities, Group, IdentityProvider};
pub use registry::ProviderRegistry;
pub use util::{AttrMap, Criteria, Mapping};

/// MultiAuth version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
