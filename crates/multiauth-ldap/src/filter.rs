//! Search filter construction

use std::fmt::Write;

use multiauth_core::Criteria;

/// Build a conjunction of attribute assertions and a type filter.
///
/// Criteria with an empty key or value are dropped. Returns `None` when
/// nothing is left to search for, so callers never run an unrestricted
/// search by accident.
pub fn build_search_filter(criteria: &Criteria, type_filter: &str, exact: bool) -> Option<String> {
    let mut assertions = criteria
        .iter()
        .filter(|(key, value)| !key.is_empty() && !value.is_empty())
        .peekable();

    assertions.peek()?;

    let mut filter = String::from("(&");
    for (key, value) in assertions {
        let key = ldap3::ldap_escape(key);
        let value = ldap3::ldap_escape(value);
        // Writing to a String cannot fail
        let _ = if exact {
            write!(filter, "({}={})", key, value)
        } else {
            write!(filter, "({}=*{}*)", key, value)
        };
    }
    filter.push_str(type_filter);
    filter.push(')');

    Some(filter)
}

/// Filter matching entries whose `member_of_attr` holds `dn`
pub fn member_of_filter(member_of_attr: &str, dn: &str, type_filter: &str) -> String {
    format!("(&({}={}){})", member_of_attr, ldap3::ldap_escape(dn), type_filter)
}

/// Filter matching any of the given binary values of `attr`
pub fn any_binary_filter(attr: &str, values: &[Vec<u8>], type_filter: &str) -> Option<String> {
    if values.is_empty() {
        return None;
    }

    let mut filter = String::from("(&(|");
    for value in values {
        filter.push('(');
        filter.push_str(attr);
        filter.push('=');
        filter.push_str(&escape_binary(value));
        filter.push(')');
    }
    filter.push(')');
    filter.push_str(type_filter);
    filter.push(')');

    Some(filter)
}

/// Escape every byte as `\xx` (RFC 4515), e.g. binary `objectSid` values
pub fn escape_binary(value: &[u8]) -> String {
    value.iter().map(|byte| format!("\\{}", hex::encode([*byte]))).collect()
}
