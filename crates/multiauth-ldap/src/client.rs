//! ldap3 backed directory sessions
//!
//! Supports LDAP, LDAPS (SSL), and STARTTLS connections.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::adapters::{Adapter, EntriesOnly, PagedResults};
use ldap3::{Ldap, LdapConnAsync, LdapConnSettings, LdapError, LdapResult, Scope, SearchEntry, SearchOptions};
use multiauth_core::{Error, Result};
use tracing::{debug, warn};

use crate::directory::{DirectoryConnector, DirectoryEntry, DirectorySession};
use crate::settings::LdapSettings;

const UNREACHABLE: &str = "The LDAP server is unreachable";

/// Connector opening real LDAP connections
#[derive(Debug, Default, Clone, Copy)]
pub struct Ldap3Connector;

#[async_trait]
impl DirectoryConnector for Ldap3Connector {
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>> {
        let ldaps = settings.is_ldaps();
        if ldaps && settings.starttls {
            warn!(uri = %settings.uri, "Cannot use STARTTLS with an ldaps:// URI, ignoring starttls");
        }

        let timeout = Duration::from_secs(settings.timeout);
        let conn_settings = LdapConnSettings::new()
            .set_conn_timeout(timeout)
            .set_starttls(settings.starttls && !ldaps)
            .set_no_tls_verify(!settings.tls);

        debug!("Connecting to LDAP server: {}", settings.uri);

        let (conn, mut ldap) = LdapConnAsync::with_settings(conn_settings, &settings.uri)
            .await
            .map_err(map_ldap_error)?;

        ldap3::drive!(conn);

        ldap.with_timeout(timeout)
            .simple_bind(&settings.bind_dn, &settings.bind_password)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(|e| match map_ldap_error(e) {
                Error::InvalidCredentials { .. } => {
                    Error::Config(format!("Service bind failed for '{}': invalid credentials", settings.bind_dn))
                }
                other => other,
            })?;

        Ok(Box::new(Ldap3Session {
            ldap,
            timeout,
            page_size: settings.page_size,
        }))
    }
}

struct Ldap3Session {
    ldap: Ldap,
    timeout: Duration,
    page_size: i32,
}

#[async_trait]
impl DirectorySession for Ldap3Session {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.ldap
            .with_timeout(self.timeout)
            .simple_bind(dn, password)
            .await
            .map_err(map_ldap_error)?
            .success()
            .map_err(map_ldap_error)?;
        Ok(())
    }

    async fn find_one(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        debug!(base, filter, "LDAP lookup");

        let result = self
            .ldap
            .with_search_options(SearchOptions::new().sizelimit(1))
            .with_timeout(self.timeout)
            .search(base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(map_ldap_error)?;

        // Size limit exceeded is expected when more than one entry matches
        if result.1.rc != 0 && result.1.rc != 4 {
            return Err(map_result_code(&result.1));
        }

        Ok(result
            .0
            .into_iter()
            .map(SearchEntry::construct)
            .find(|entry| !entry.dn.is_empty())
            .map(DirectoryEntry::from))
    }

    async fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>> {
        debug!(base, filter, page_size = self.page_size, "LDAP paged search");

        let adapters: Vec<Box<dyn Adapter<_, _>>> = vec![
            Box::new(EntriesOnly::new()),
            Box::new(PagedResults::new(self.page_size)),
        ];

        let mut stream = self
            .ldap
            .with_timeout(self.timeout)
            .streaming_search_with(adapters, base, Scope::Subtree, filter, attrs.to_vec())
            .await
            .map_err(map_ldap_error)?;

        let mut entries = Vec::new();
        while let Some(entry) = stream.next().await.map_err(map_ldap_error)? {
            let entry = SearchEntry::construct(entry);
            if !entry.dn.is_empty() {
                entries.push(DirectoryEntry::from(entry));
            }
        }

        stream.finish().await.success().map_err(map_ldap_error)?;

        Ok(entries)
    }

    async fn read(&mut self, dn: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        let result = self
            .ldap
            .with_timeout(self.timeout)
            .search(dn, Scope::Base, "(objectClass=*)", attrs.to_vec())
            .await
            .map_err(map_ldap_error)?;

        match result.1.rc {
            0 => Ok(result.0.into_iter().next().map(|e| SearchEntry::construct(e).into())),
            // noSuchObject
            32 => Ok(None),
            _ => Err(map_result_code(&result.1)),
        }
    }

    async fn unbind(&mut self) -> Result<()> {
        self.ldap.unbind().await.map_err(map_ldap_error)
    }
}

impl From<SearchEntry> for DirectoryEntry {
    fn from(entry: SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
            bin_attrs: entry.bin_attrs,
        }
    }
}

fn map_ldap_error(err: LdapError) -> Error {
    match err {
        LdapError::LdapResult { result } => map_result_code(&result),
        LdapError::Timeout { .. } => Error::Directory("The operation timed out.".to_string()),
        LdapError::Io { source } => Error::Directory(format!("{}: {}", UNREACHABLE, source)),
        other => Error::Directory(other.to_string()),
    }
}

fn map_result_code(result: &LdapResult) -> Error {
    match result.rc {
        49 => Error::InvalidCredentials { provider: None },
        4 => Error::Directory("Size limit exceeded (try setting a smaller page size)".to_string()),
        3 => Error::Directory("The time limit for the operation has been exceeded.".to_string()),
        85 => Error::Directory("The operation timed out.".to_string()),
        87 => Error::Config(
            "The filter supplied to the operation is invalid. Check the user and group filters."
                .to_string(),
        ),
        51 | 52 | 81 => Error::Directory(UNREACHABLE.to_string()),
        rc => Error::Directory(format!("LDAP operation failed with code {}: {}", rc, result.text)),
    }
}
