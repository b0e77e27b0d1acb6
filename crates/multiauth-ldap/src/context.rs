//! Bound directory session with provider level queries

use std::sync::Arc;

use multiauth_core::{Criteria, Result};
use tracing::{debug, warn};

use crate::directory::{DirectoryConnector, DirectoryEntry, DirectorySession};
use crate::filter::{any_binary_filter, build_search_filter, member_of_filter};
use crate::settings::LdapSettings;

/// Session bound with the service account
///
/// Call [`LdapContext::close`] when done; a dropped context closes the
/// connection without a graceful unbind.
pub struct LdapContext {
    session: Box<dyn DirectorySession>,
    settings: Arc<LdapSettings>,
}

impl LdapContext {
    pub async fn open(connector: &dyn DirectoryConnector, settings: Arc<LdapSettings>) -> Result<Self> {
        let session = connector.connect(&settings).await?;
        Ok(Self { session, settings })
    }

    pub fn settings(&self) -> &LdapSettings {
        &self.settings
    }

    pub async fn close(mut self) {
        if let Err(e) = self.session.unbind().await {
            warn!("LDAP unbind failed: {}", e);
        }
    }

    /// Rebind as `dn`; fails with invalid credentials on a bad password
    pub async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.session.bind(dn, password).await
    }

    pub async fn get_user_by_id(&mut self, uid: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        let criteria = Criteria::from([(self.settings.uid.clone(), uid.to_string())]);
        let filter = match build_search_filter(&criteria, &self.settings.user_filter, true) {
            Some(filter) => filter,
            None => return Ok(None),
        };

        self.session.find_one(&self.settings.user_base, &filter, attrs).await
    }

    pub async fn get_group_by_id(&mut self, gid: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        let criteria = Criteria::from([(self.settings.gid.clone(), gid.to_string())]);
        let filter = match build_search_filter(&criteria, &self.settings.group_filter, true) {
            Some(filter) => filter,
            None => return Ok(None),
        };

        self.session.find_one(&self.settings.group_base, &filter, attrs).await
    }

    pub async fn search_users(&mut self, criteria: &Criteria, exact: bool, attrs: &[&str]) -> Result<Vec<DirectoryEntry>> {
        match build_search_filter(criteria, &self.settings.user_filter, exact) {
            Some(filter) => self.session.search(&self.settings.user_base, &filter, attrs).await,
            None => Ok(Vec::new()),
        }
    }

    pub async fn search_groups(&mut self, criteria: &Criteria, exact: bool, attrs: &[&str]) -> Result<Vec<DirectoryEntry>> {
        match build_search_filter(criteria, &self.settings.group_filter, exact) {
            Some(filter) => self.session.search(&self.settings.group_base, &filter, attrs).await,
            None => Ok(Vec::new()),
        }
    }

    /// Users directly in the group `group_dn`
    pub async fn users_in_group(&mut self, group_dn: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>> {
        let filter = member_of_filter(&self.settings.member_of_attr, group_dn, &self.settings.user_filter);
        self.session.search(&self.settings.user_base, &filter, attrs).await
    }

    /// Groups directly in the group `group_dn`
    pub async fn subgroups(&mut self, group_dn: &str) -> Result<Vec<DirectoryEntry>> {
        let filter = member_of_filter(&self.settings.member_of_attr, group_dn, &self.settings.group_filter);
        self.session.search(&self.settings.group_base, &filter, &[self.settings.gid.as_str()]).await
    }

    /// Security identifiers of every group the user belongs to, nested
    /// membership included (Active Directory only)
    pub async fn token_groups(&mut self, user_dn: &str) -> Result<Vec<Vec<u8>>> {
        let entry = self.session.read(user_dn, &["tokenGroups"]).await?;
        let tokens = entry.map(|e| e.raw_values("tokenGroups")).unwrap_or_default();
        debug!(user_dn, count = tokens.len(), "Fetched token groups");
        Ok(tokens)
    }

    /// Groups whose objectSid is one of `sids`
    pub async fn groups_by_sid(&mut self, sids: &[Vec<u8>]) -> Result<Vec<DirectoryEntry>> {
        match any_binary_filter("objectSid", sids, &self.settings.group_filter) {
            Some(filter) => {
                self.session.search(&self.settings.group_base, &filter, &[self.settings.gid.as_str()]).await
            }
            None => Ok(Vec::new()),
        }
    }

    pub async fn read(&mut self, dn: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        self.session.read(dn, attrs).await
    }
}
