//! LDAP groups and nested group traversal

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use multiauth_core::{Error, Group, IdentityInfo, ProviderSettings, Result};
use tracing::{debug, warn};

use crate::context::LdapContext;
use crate::directory::DirectoryConnector;
use crate::provider::{entry_to_identity, requested_attrs};
use crate::settings::LdapSettings;

/// Depth-first walk over a group and its nested groups
///
/// [`GroupWalk::start`] yields the root DN. Each following DN comes from
/// [`GroupWalk::resume`], fed with the subgroups of the DN yielded last.
/// Every DN is yielded at most once, compared case-insensitively, so cyclic
/// memberships terminate.
#[derive(Debug)]
pub struct GroupWalk {
    root: Option<String>,
    visited: HashSet<String>,
    stack: Vec<String>,
}

impl GroupWalk {
    pub fn new(root: impl Into<String>) -> Self {
        let root = root.into();
        let visited = HashSet::from([root.to_lowercase()]);
        Self {
            root: Some(root),
            visited,
            stack: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Option<String> {
        self.root.take()
    }

    pub fn resume<I>(&mut self, subgroups: I) -> Option<String>
    where
        I: IntoIterator<Item = String>,
    {
        let fresh: Vec<String> = subgroups
            .into_iter()
            .filter(|dn| self.visited.insert(dn.to_lowercase()))
            .collect();
        self.stack.extend(fresh.into_iter().rev());
        self.stack.pop()
    }
}

/// Group stored in an LDAP directory
pub struct LdapGroup {
    provider: String,
    name: String,
    dn: String,
    settings: Arc<LdapSettings>,
    common: Arc<ProviderSettings>,
    connector: Arc<dyn DirectoryConnector>,
}

impl LdapGroup {
    pub fn new(
        provider: &str,
        name: impl Into<String>,
        dn: impl Into<String>,
        settings: Arc<LdapSettings>,
        common: Arc<ProviderSettings>,
        connector: Arc<dyn DirectoryConnector>,
    ) -> Self {
        Self {
            provider: provider.to_string(),
            name: name.into(),
            dn: dn.into(),
            settings,
            common,
            connector,
        }
    }

    pub fn dn(&self) -> &str {
        &self.dn
    }

    async fn check_membership(&self, context: &mut LdapContext, identifier: &str) -> Result<bool> {
        let member_of_attr = self.settings.member_of_attr.as_str();
        let user = context
            .get_user_by_id(identifier, &[self.settings.uid.as_str(), member_of_attr])
            .await?
            .ok_or_else(|| Error::identity_retrieval(format!("No such user: {}", identifier)))?;

        if self.settings.ad_group_style {
            let sids = context
                .get_group_by_id(&self.name, &["objectSid"])
                .await?
                .map(|group| group.raw_values("objectSid"))
                .unwrap_or_default();
            if sids.is_empty() {
                return Ok(false);
            }

            let tokens = context.token_groups(&user.dn).await?;
            Ok(sids.iter().any(|sid| tokens.contains(sid)))
        } else {
            Ok(user
                .values(member_of_attr)
                .iter()
                .any(|dn| dn.eq_ignore_ascii_case(&self.dn)))
        }
    }
}

impl std::fmt::Debug for LdapGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LdapGroup")
            .field("provider", &self.provider)
            .field("name", &self.name)
            .field("dn", &self.dn)
            .finish()
    }
}

struct MemberScan {
    provider: String,
    settings: Arc<LdapSettings>,
    common: Arc<ProviderSettings>,
    connector: Arc<dyn DirectoryConnector>,
    context: Option<LdapContext>,
    walk: GroupWalk,
    current: Option<String>,
    started: bool,
    pending: VecDeque<IdentityInfo>,
}

impl MemberScan {
    /// Next member; the session is unbound before any error is returned
    async fn next_member(&mut self) -> Result<Option<IdentityInfo>> {
        let result = self.advance().await;
        if result.is_err() {
            if let Some(context) = self.context.take() {
                context.close().await;
            }
        }
        result
    }

    async fn advance(&mut self) -> Result<Option<IdentityInfo>> {
        loop {
            if let Some(identity) = self.pending.pop_front() {
                return Ok(Some(identity));
            }

            if self.context.is_none() {
                if self.started && self.current.is_none() {
                    return Ok(None);
                }
                self.context = Some(LdapContext::open(self.connector.as_ref(), self.settings.clone()).await?);
            }
            let context = match self.context.as_mut() {
                Some(context) => context,
                None => return Ok(None),
            };

            let next = match self.current.take() {
                Some(dn) => {
                    let subgroups = context.subgroups(&dn).await?;
                    self.walk.resume(subgroups.into_iter().map(|entry| entry.dn))
                }
                None if !self.started => {
                    self.started = true;
                    self.walk.start()
                }
                None => None,
            };

            let dn = match next {
                Some(dn) => dn,
                None => {
                    if let Some(context) = self.context.take() {
                        context.close().await;
                    }
                    return Ok(None);
                }
            };

            debug!(group = %dn, "Listing group members");
            let attrs = requested_attrs(&self.common, &self.settings.uid);
            let users = context.users_in_group(&dn, &attrs).await?;
            for entry in users {
                match entry_to_identity(&self.provider, &self.common, &self.settings.uid, &entry) {
                    Some(identity) => self.pending.push_back(identity?),
                    None => warn!(dn = %entry.dn, "Skipping member without an identifier"),
                }
            }
            self.current = Some(dn);
        }
    }
}

impl Drop for MemberScan {
    // Stream dropped before the walk finished
    fn drop(&mut self) {
        if let Some(context) = self.context.take() {
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn(context.close());
                }
                Err(_) => warn!("No runtime to unbind an abandoned LDAP session"),
            }
        }
    }
}

#[async_trait]
impl Group for LdapGroup {
    fn provider(&self) -> &str {
        &self.provider
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn supports_member_list(&self) -> bool {
        true
    }

    /// Users of this group and of every nested group, fetched lazily
    fn members(&self) -> BoxStream<'_, Result<IdentityInfo>> {
        let scan = MemberScan {
            provider: self.provider.clone(),
            settings: self.settings.clone(),
            common: self.common.clone(),
            connector: self.connector.clone(),
            context: None,
            walk: GroupWalk::new(self.dn.clone()),
            current: None,
            started: false,
            pending: VecDeque::new(),
        };

        stream::try_unfold(scan, |mut scan| async move {
            Ok(scan.next_member().await?.map(|identity| (identity, scan)))
        })
        .boxed()
    }

    async fn has_member(&self, identifier: &str) -> Result<bool> {
        if identifier.is_empty() {
            return Err(Error::identity_retrieval("Invalid identifier"));
        }

        let mut context = LdapContext::open(self.connector.as_ref(), self.settings.clone()).await?;
        let result = self.check_membership(&mut context, identifier).await;
        context.close().await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryEntry;
    use crate::testing::MemoryDirectory;
    use futures::TryStreamExt;

    const BASE: &str = "dc=example,dc=com";

    fn settings(ad_group_style: bool) -> Arc<LdapSettings> {
        Arc::new(LdapSettings {
            uri: "ldaps://ldap.example.com:636".to_string(),
            bind_dn: "uid=admin,DC=example,DC=com".to_string(),
            bind_password: "LemotdepassedeLDAP".to_string(),
            timeout: 10,
            user_base: format!("ou=people,{}", BASE),
            group_base: format!("ou=groups,{}", BASE),
            ad_group_style,
            ..Default::default()
        })
    }

    fn group_dn(name: &str) -> String {
        format!("cn={},ou=groups,{}", name, BASE)
    }

    fn directory() -> MemoryDirectory {
        let directory = MemoryDirectory::new();
        directory.set_password("uid=admin,DC=example,DC=com", "LemotdepassedeLDAP");
        directory
    }

    fn add_group(directory: &MemoryDirectory, name: &str, parents: &[&str]) {
        let parents: Vec<String> = parents.iter().map(|p| group_dn(p)).collect();
        let parents: Vec<&str> = parents.iter().map(String::as_str).collect();
        directory.add(
            DirectoryEntry::new(group_dn(name))
                .with_attr("objectClass", &["groupOfNames"])
                .with_attr("cn", &[name])
                .with_attr("memberOf", &parents),
        );
    }

    fn add_user(directory: &MemoryDirectory, uid: &str, groups: &[&str]) {
        let groups: Vec<String> = groups.iter().map(|g| group_dn(g)).collect();
        let groups: Vec<&str> = groups.iter().map(String::as_str).collect();
        directory.add(
            DirectoryEntry::new(format!("uid={},ou=people,{}", uid, BASE))
                .with_attr("objectClass", &["person"])
                .with_attr("uid", &[uid])
                .with_attr("memberOf", &groups),
        );
    }

    fn group(directory: &MemoryDirectory, name: &str, ad_group_style: bool) -> LdapGroup {
        LdapGroup::new(
            "ldap",
            name,
            group_dn(name),
            settings(ad_group_style),
            Arc::new(ProviderSettings::default()),
            Arc::new(directory.clone()),
        )
    }

    fn walk(root: &str, subgroups: &[(&str, &[&str])]) -> Vec<String> {
        let lookup = |dn: &str| -> Vec<String> {
            subgroups
                .iter()
                .find(|(parent, _)| *parent == dn)
                .map(|(_, children)| children.iter().map(|c| c.to_string()).collect())
                .unwrap_or_default()
        };

        let mut walk = GroupWalk::new(root);
        let mut visited = Vec::new();
        let mut current = walk.start();
        while let Some(dn) = current {
            current = walk.resume(lookup(&dn));
            visited.push(dn);
        }
        visited
    }

    #[test]
    fn test_walk_single_group() {
        assert_eq!(walk("group_dn_1", &[]), vec!["group_dn_1"]);
    }

    #[test]
    fn test_walk_children() {
        assert_eq!(
            walk("group_dn_1", &[("group_dn_1", &["group_dn_1.1", "group_dn_1.2"])]),
            vec!["group_dn_1", "group_dn_1.1", "group_dn_1.2"]
        );
    }

    #[test]
    fn test_walk_deep_tree_is_depth_first() {
        let visited = walk(
            "group_dn_1",
            &[
                ("group_dn_1", &["group_dn_1.1", "group_dn_1.2"]),
                ("group_dn_1.2", &["group_dn_1.2.1"]),
                ("group_dn_1.2.1", &["group_dn_1.2.1.1", "group_dn_1.2.1.2", "group_dn_1.2.1.3"]),
                ("group_dn_1.2.1.3", &[]),
            ],
        );

        assert_eq!(
            visited,
            vec![
                "group_dn_1",
                "group_dn_1.1",
                "group_dn_1.2",
                "group_dn_1.2.1",
                "group_dn_1.2.1.1",
                "group_dn_1.2.1.2",
                "group_dn_1.2.1.3",
            ]
        );
    }

    #[test]
    fn test_walk_survives_cycles() {
        let visited = walk(
            "cn=a",
            &[("cn=a", &["cn=b"]), ("cn=b", &["CN=A", "cn=c"]), ("cn=c", &["cn=b", "cn=a"])],
        );

        assert_eq!(visited, vec!["cn=a", "cn=b", "cn=c"]);
    }

    #[test]
    fn test_walk_start_only_once() {
        let mut walk = GroupWalk::new("cn=a");
        assert_eq!(walk.start().as_deref(), Some("cn=a"));
        assert_eq!(walk.start(), None);
        assert_eq!(walk.resume(Vec::new()), None);
    }

    async fn member_ids(group: &LdapGroup) -> Vec<String> {
        let members: Vec<IdentityInfo> = group.members().try_collect().await.unwrap();
        assert!(members.iter().all(|m| m.provider() == "ldap"));
        members.iter().map(|m| m.identifier().to_string()).collect()
    }

    #[tokio::test]
    async fn test_empty_group_has_no_members() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);

        assert!(member_ids(&group(&directory, "group_1", false)).await.is_empty());
        assert_eq!(directory.session_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_members_include_nested_groups() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        add_group(&directory, "group_1.1", &["group_1"]);
        add_group(&directory, "group_1.1.1", &["group_1.1"]);
        add_group(&directory, "unrelated", &[]);
        add_user(&directory, "user_1", &["group_1"]);
        add_user(&directory, "user_2", &["group_1"]);
        add_user(&directory, "user_3", &["group_1.1"]);
        add_user(&directory, "user_4", &["group_1.1"]);
        add_user(&directory, "user_5", &["group_1.1.1"]);
        add_user(&directory, "user_6", &["unrelated"]);

        assert_eq!(
            member_ids(&group(&directory, "group_1", false)).await,
            vec!["user_1", "user_2", "user_3", "user_4", "user_5"]
        );
    }

    #[tokio::test]
    async fn test_members_with_cyclic_groups() {
        let directory = directory();
        add_group(&directory, "group_1", &["group_1.1"]);
        add_group(&directory, "group_1.1", &["group_1"]);
        add_user(&directory, "user_1", &["group_1"]);
        add_user(&directory, "user_2", &["group_1.1"]);

        assert_eq!(member_ids(&group(&directory, "group_1", false)).await, vec!["user_1", "user_2"]);
    }

    #[tokio::test]
    async fn test_members_when_directory_is_down() {
        let directory = directory();
        directory.take_down();

        let result: Result<Vec<IdentityInfo>> = group(&directory, "group_1", false).members().try_collect().await;
        assert!(matches!(result, Err(Error::Directory(_))));
    }

    async fn wait_for_unbind(directory: &MemoryDirectory) -> (usize, usize) {
        for _ in 0..10 {
            if directory.session_counts().1 > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        directory.session_counts()
    }

    #[tokio::test]
    async fn test_dropped_member_stream_unbinds() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        add_user(&directory, "a", &["group_1"]);
        add_user(&directory, "b", &["group_1"]);

        let group = group(&directory, "group_1", false);
        let mut members = group.members();
        let first = members.next().await.unwrap().unwrap();
        assert_eq!(first.identifier(), "a");
        drop(members);

        assert_eq!(wait_for_unbind(&directory).await, (1, 1));
    }

    #[tokio::test]
    async fn test_failed_member_listing_unbinds() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        add_user(&directory, "a", &["group_1"]);

        let mut settings = (*settings(false)).clone();
        settings.user_filter = "(objectClass=person".to_string();
        let group = LdapGroup::new(
            "ldap",
            "group_1",
            group_dn("group_1"),
            Arc::new(settings),
            Arc::new(ProviderSettings::default()),
            Arc::new(directory.clone()),
        );

        let result: Result<Vec<IdentityInfo>> = group.members().try_collect().await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(directory.session_counts(), (1, 1));
    }

    #[tokio::test]
    async fn test_members_fetch_mapped_attributes() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        add_user(&directory, "a", &["group_1"]);

        let mut common = ProviderSettings::default();
        common.mapping.insert("email".to_string(), "mail".to_string());
        let group = LdapGroup::new(
            "ldap",
            "group_1",
            group_dn("group_1"),
            settings(false),
            Arc::new(common),
            Arc::new(directory.clone()),
        );

        assert_eq!(member_ids(&group).await, vec!["a"]);
        assert!(directory
            .requested_attrs()
            .contains(&vec!["uid".to_string(), "mail".to_string()]));
    }

    #[tokio::test]
    async fn test_has_member_slapd_ignores_dn_case() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        directory.add(
            DirectoryEntry::new(format!("uid=erin,ou=people,{}", BASE))
                .with_attr("objectClass", &["person"])
                .with_attr("uid", &["erin"])
                .with_attr("memberOf", &["CN=group_1,OU=groups,DC=example,DC=com"]),
        );

        assert!(group(&directory, "group_1", false).has_member("erin").await.unwrap());
    }

    #[tokio::test]
    async fn test_has_member_slapd() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);
        add_group(&directory, "group_2", &[]);
        add_user(&directory, "alice", &["group_1"]);
        add_user(&directory, "bob", &["group_2"]);
        add_user(&directory, "carol", &[]);
        add_user(&directory, "dave", &["group_2", "group_1"]);

        let group = group(&directory, "group_1", false);
        assert!(group.has_member("alice").await.unwrap());
        assert!(!group.has_member("bob").await.unwrap());
        assert!(!group.has_member("carol").await.unwrap());
        assert!(group.has_member("dave").await.unwrap());
    }

    fn add_ad_group(directory: &MemoryDirectory, name: &str, sids: &[&[u8]]) {
        directory.add(
            DirectoryEntry::new(group_dn(name))
                .with_attr("objectClass", &["groupOfNames"])
                .with_attr("cn", &[name])
                .with_bin_attr("objectSid", sids.iter().map(|s| s.to_vec()).collect()),
        );
    }

    fn add_ad_user(directory: &MemoryDirectory, uid: &str, tokens: &[&[u8]]) {
        directory.add(
            DirectoryEntry::new(format!("uid={},ou=people,{}", uid, BASE))
                .with_attr("objectClass", &["person"])
                .with_attr("uid", &[uid])
                .with_bin_attr("tokenGroups", tokens.iter().map(|t| t.to_vec()).collect()),
        );
    }

    #[tokio::test]
    async fn test_has_member_ad() {
        let cases: &[(&[&[u8]], &[&[u8]], bool)] = &[
            (&[], &[], false),
            (&[b"token<001>"], &[b"token<001>"], true),
            (&[b"token<002>"], &[b"token<001>", b"token<003>"], false),
            (&[b"token<002>"], &[b"token<001>", b"token<002>", b"token<003>"], true),
            (&[b"token<001>", b"token<003>"], &[b"token<002>"], false),
            (&[b"token<001>", b"token<002>", b"token<003>"], &[b"token<002>"], true),
        ];

        for (group_sids, user_tokens, expected) in cases {
            let directory = directory();
            add_ad_group(&directory, "group", group_sids);
            add_ad_user(&directory, "user_uid", user_tokens);

            let group = group(&directory, "group", true);
            assert_eq!(group.has_member("user_uid").await.unwrap(), *expected);
        }
    }

    #[tokio::test]
    async fn test_has_member_bad_identifier() {
        let directory = directory();
        let group = group(&directory, "group_1", false);

        assert!(matches!(
            group.has_member("").await,
            Err(Error::IdentityRetrievalFailed { .. })
        ));
        // No connection is opened for an invalid identifier
        assert_eq!(directory.session_counts(), (0, 0));
    }

    #[tokio::test]
    async fn test_has_member_unknown_user() {
        let directory = directory();
        add_group(&directory, "group_1", &[]);

        let group = group(&directory, "group_1", false);
        assert!(matches!(
            group.has_member("ghost").await,
            Err(Error::IdentityRetrievalFailed { .. })
        ));
        assert_eq!(directory.session_counts(), (1, 1));
    }
}
