//! In-memory directory for tests

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use multiauth_core::{Error, Result};

use crate::directory::{DirectoryConnector, DirectoryEntry, DirectorySession};
use crate::settings::LdapSettings;

#[derive(Debug, Default)]
struct State {
    entries: Vec<DirectoryEntry>,
    passwords: HashMap<String, String>,
    binds: Vec<String>,
    requested_attrs: Vec<Vec<String>>,
    sessions: usize,
    unbinds: usize,
    down: bool,
}

/// Directory holding entries in memory, with a small filter evaluator
#[derive(Debug, Clone, Default)]
pub struct MemoryDirectory {
    state: Arc<Mutex<State>>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, entry: DirectoryEntry) -> &Self {
        self.state.lock().unwrap().entries.push(entry);
        self
    }

    pub fn set_password(&self, dn: &str, password: &str) -> &Self {
        self.state
            .lock()
            .unwrap()
            .passwords
            .insert(dn.to_lowercase(), password.to_string());
        self
    }

    pub fn take_down(&self) {
        self.state.lock().unwrap().down = true;
    }

    /// DNs bound so far, service account included
    pub fn binds(&self) -> Vec<String> {
        self.state.lock().unwrap().binds.clone()
    }

    /// Attribute lists of every lookup and search, in order
    pub fn requested_attrs(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().requested_attrs.clone()
    }

    /// Sessions opened and closed
    pub fn session_counts(&self) -> (usize, usize) {
        let state = self.state.lock().unwrap();
        (state.sessions, state.unbinds)
    }

    fn bind(&self, dn: &str, password: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.binds.push(dn.to_string());
        match state.passwords.get(&dn.to_lowercase()) {
            Some(expected) if expected == password => Ok(()),
            _ => Err(Error::InvalidCredentials { provider: None }),
        }
    }

    fn search(&self, base: &str, filter: &str, attrs: &[&str], base_only: bool) -> Result<Vec<DirectoryEntry>> {
        let filter = Filter::parse(filter)?;
        let base = base.to_lowercase();
        let mut state = self.state.lock().unwrap();
        state
            .requested_attrs
            .push(attrs.iter().map(|attr| attr.to_string()).collect());

        Ok(state
            .entries
            .iter()
            .filter(|entry| {
                let dn = entry.dn.to_lowercase();
                if base_only {
                    dn == base
                } else {
                    dn == base || dn.ends_with(&format!(",{}", base))
                }
            })
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DirectoryConnector for MemoryDirectory {
    async fn connect(&self, settings: &LdapSettings) -> Result<Box<dyn DirectorySession>> {
        if self.state.lock().unwrap().down {
            return Err(Error::Directory("The LDAP server is unreachable".to_string()));
        }

        self.bind(&settings.bind_dn, &settings.bind_password)
            .map_err(|_| Error::Config("Service bind failed".to_string()))?;
        self.state.lock().unwrap().sessions += 1;

        Ok(Box::new(MemorySession { directory: self.clone() }))
    }
}

struct MemorySession {
    directory: MemoryDirectory,
}

#[async_trait]
impl DirectorySession for MemorySession {
    async fn bind(&mut self, dn: &str, password: &str) -> Result<()> {
        self.directory.bind(dn, password)
    }

    async fn find_one(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        Ok(self.directory.search(base, filter, attrs, false)?.into_iter().next())
    }

    async fn search(&mut self, base: &str, filter: &str, attrs: &[&str]) -> Result<Vec<DirectoryEntry>> {
        self.directory.search(base, filter, attrs, false)
    }

    async fn read(&mut self, dn: &str, attrs: &[&str]) -> Result<Option<DirectoryEntry>> {
        Ok(self.directory.search(dn, "(objectClass=*)", attrs, true)?.into_iter().next())
    }

    async fn unbind(&mut self) -> Result<()> {
        self.directory.state.lock().unwrap().unbinds += 1;
        Ok(())
    }
}

#[derive(Debug)]
enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Present(String),
    Equal(String, Vec<u8>),
    Substring(String, Vec<Vec<u8>>),
}

impl Filter {
    fn parse(input: &str) -> Result<Self> {
        let (filter, rest) = Self::parse_one(input.as_bytes())?;
        if !rest.is_empty() {
            return Err(invalid(input));
        }
        Ok(filter)
    }

    fn parse_one(input: &[u8]) -> Result<(Self, &[u8])> {
        let body = input.strip_prefix(b"(").ok_or_else(|| invalid_bytes(input))?;

        match body.first() {
            Some(b'&') | Some(b'|') => {
                let mut rest = &body[1..];
                let mut children = Vec::new();
                while rest.first() == Some(&b'(') {
                    let (child, tail) = Self::parse_one(rest)?;
                    children.push(child);
                    rest = tail;
                }
                let rest = rest.strip_prefix(b")").ok_or_else(|| invalid_bytes(input))?;
                let filter = if body[0] == b'&' {
                    Filter::And(children)
                } else {
                    Filter::Or(children)
                };
                Ok((filter, rest))
            }
            Some(b'!') => {
                let (child, rest) = Self::parse_one(&body[1..])?;
                let rest = rest.strip_prefix(b")").ok_or_else(|| invalid_bytes(input))?;
                Ok((Filter::Not(Box::new(child)), rest))
            }
            _ => {
                let end = body.iter().position(|b| *b == b')').ok_or_else(|| invalid_bytes(input))?;
                let item = std::str::from_utf8(&body[..end]).map_err(|_| invalid_bytes(input))?;
                let (attr, value) = item.split_once('=').ok_or_else(|| invalid(item))?;

                let filter = if value == "*" {
                    Filter::Present(attr.to_string())
                } else if value.contains('*') {
                    let parts = value.split('*').map(|part| unescape(part).to_ascii_lowercase());
                    Filter::Substring(attr.to_string(), parts.collect())
                } else {
                    Filter::Equal(attr.to_string(), unescape(value))
                };
                Ok((filter, &body[end + 1..]))
            }
        }
    }

    fn matches(&self, entry: &DirectoryEntry) -> bool {
        match self {
            Filter::And(children) => children.iter().all(|f| f.matches(entry)),
            Filter::Or(children) => children.iter().any(|f| f.matches(entry)),
            Filter::Not(child) => !child.matches(entry),
            Filter::Present(attr) => attr.eq_ignore_ascii_case("objectClass") || !entry.raw_values(attr).is_empty(),
            Filter::Equal(attr, wanted) => entry
                .raw_values(attr)
                .iter()
                .any(|value| value.eq_ignore_ascii_case(wanted)),
            Filter::Substring(attr, parts) => entry
                .raw_values(attr)
                .iter()
                .any(|value| substring_match(&value.to_ascii_lowercase(), parts)),
        }
    }
}

fn substring_match(value: &[u8], parts: &[Vec<u8>]) -> bool {
    let (first, rest) = match parts.split_first() {
        Some(split) => split,
        None => return true,
    };
    let mut remaining = match value.strip_prefix(first.as_slice()) {
        Some(remaining) => remaining,
        None => return false,
    };

    let (last, middle) = match rest.split_last() {
        Some(split) => split,
        None => return remaining.is_empty(),
    };
    for part in middle {
        match find(remaining, part) {
            Some(found) => remaining = &remaining[found + part.len()..],
            None => return false,
        }
    }
    remaining.ends_with(last)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    haystack.windows(needle.len()).position(|window| window == needle)
}

fn unescape(value: &str) -> Vec<u8> {
    let bytes = value.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 2 < bytes.len() {
            let byte = std::str::from_utf8(&bytes[i + 1..i + 3])
                .ok()
                .and_then(|hex| u8::from_str_radix(hex, 16).ok());
            if let Some(byte) = byte {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    out
}

fn invalid(filter: &str) -> Error {
    Error::Config(format!("Invalid filter: {}", filter))
}

fn invalid_bytes(filter: &[u8]) -> Error {
    invalid(&String::from_utf8_lossy(filter))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person() -> DirectoryEntry {
        DirectoryEntry::new("uid=jdoe,ou=people,dc=example,dc=com")
            .with_attr("objectClass", &["person"])
            .with_attr("uid", &["jdoe"])
            .with_attr("cn", &["John Doe"])
            .with_bin_attr("objectSid", vec![vec![1, 0xab]])
    }

    fn check(filter: &str) -> bool {
        Filter::parse(filter).unwrap().matches(&person())
    }

    #[test]
    fn test_filter_evaluation() {
        assert!(check("(&(uid=jdoe)(objectClass=person))"));
        assert!(check("(|(uid=nobody)(cn=*doe*))"));
        assert!(check("(cn=John*)"));
        assert!(check("(!(uid=nobody))"));
        assert!(check("(objectSid=\\01\\ab)"));
        assert!(!check("(&(uid=jdoe)(objectClass=groupOfNames))"));
        assert!(!check("(cn=*smith*)"));
        assert!(Filter::parse("(uid=jdoe").is_err());
    }
}
