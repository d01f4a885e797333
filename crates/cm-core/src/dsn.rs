//! Connection descriptor parsing.
//!
//! A descriptor has the shape
//! `[scheme://][user[:password]@][protocol[(address)]]/database[?k=v&...]`.
//! The optional `scheme://` prefix selects a driver in the registry; the rest
//! is the data source name handed to the SQL driver. Components are kept in
//! their raw (still percent-encoded) form so the descriptor re-serializes
//! byte for byte.

use crate::error::{MigrateError, MigrateResult};
use percent_encoding::percent_decode_str;
use std::fmt;

/// Prefix reserved by the migration engine for its own query parameters
/// (`x-migrations-table`, `x-lock-timeout`, ...).
pub const CUSTOM_PARAM_PREFIX: &str = "x-";

/// A single `key=value` query parameter, kept in raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryParam {
    /// Raw key as written in the URL
    pub key: String,
    /// Raw value, `None` for a bare `key` without `=`
    pub value: Option<String>,
}

impl QueryParam {
    /// Create a parameter with a value
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }

    /// Percent-decoded key
    pub fn decoded_key(&self) -> String {
        // Keys are validated on parse, decoding cannot fail here.
        percent_decode(&self.key).unwrap_or_else(|| self.key.clone())
    }

    /// Whether this parameter is reserved by the migration engine
    pub fn is_custom(&self) -> bool {
        self.decoded_key().starts_with(CUSTOM_PARAM_PREFIX)
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(v) => write!(f, "{}={}", self.key, v),
            None => f.write_str(&self.key),
        }
    }
}

/// Parsed connection descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    /// Registry selector, e.g. `cloudsql-mysql`
    pub scheme: Option<String>,
    pub user: Option<String>,
    pub password: Option<String>,
    /// Network protocol or connector name, e.g. `tcp` or `cloudsql-mysql`
    pub protocol: Option<String>,
    /// Address inside the protocol parentheses, e.g. `proj:region:inst`
    pub address: Option<String>,
    /// Database name (may be empty)
    pub database: String,
    pub params: Vec<QueryParam>,
}

impl Dsn {
    /// Parse a raw connection URL.
    pub fn parse(raw: &str) -> MigrateResult<Self> {
        if raw.is_empty() {
            return Err(MigrateError::parse(raw, "empty connection URL"));
        }
        if let Some(c) = raw.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(MigrateError::parse(
                raw,
                format!("invalid character {:?} in URL", c),
            ));
        }

        let (scheme, rest) = split_scheme(raw)?;

        let (body, query) = match rest.split_once('?') {
            Some((body, query)) => (body, Some(query)),
            None => (rest, None),
        };

        // The database name follows the last '/', which must sit outside any
        // address parentheses.
        let slash = body
            .rfind('/')
            .ok_or_else(|| MigrateError::parse(raw, "missing '/' before the database name"))?;
        let (server, database) = (&body[..slash], &body[slash + 1..]);
        if server.contains('(') && body.rfind(')').is_some_and(|close| close > slash) {
            return Err(MigrateError::parse(
                raw,
                "missing '/' before the database name",
            ));
        }

        let (user, password, server) = match server.rfind('@') {
            Some(at) => {
                let (userinfo, server) = (&server[..at], &server[at + 1..]);
                let (user, password) = match userinfo.split_once(':') {
                    Some((u, p)) => (u, Some(p)),
                    None => (userinfo, None),
                };
                (Some(user), password, server)
            }
            None => (None, None, server),
        };

        let (protocol, address) = split_protocol(raw, server)?;

        for component in [user, password, protocol, address, Some(database)]
            .into_iter()
            .flatten()
        {
            check_escapes(raw, component)?;
        }

        let params = match query {
            Some(query) => parse_query(raw, query)?,
            None => Vec::new(),
        };

        Ok(Dsn {
            scheme: scheme.map(str::to_string),
            user: user.map(str::to_string),
            password: password.map(str::to_string),
            protocol: protocol.map(str::to_string),
            address: address.map(str::to_string),
            database: database.to_string(),
            params,
        })
    }

    /// Parse the address as a managed instance name.
    pub fn instance(&self) -> MigrateResult<InstanceName> {
        let address = self
            .address
            .as_deref()
            .ok_or_else(|| MigrateError::parse(&self.to_string(), "no instance address"))?;
        InstanceName::parse(address)
    }

    /// Decoded user name
    pub fn decoded_user(&self) -> Option<String> {
        self.user.as_deref().and_then(percent_decode)
    }

    /// Decoded password
    pub fn decoded_password(&self) -> Option<String> {
        self.password.as_deref().and_then(percent_decode)
    }

    /// Look up a parameter value by decoded key
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|p| p.decoded_key() == key)
            .and_then(|p| p.value.as_deref())
    }

    /// Engine-reserved parameters present in this descriptor
    pub fn custom_params(&self) -> impl Iterator<Item = &QueryParam> {
        self.params.iter().filter(|p| p.is_custom())
    }

    /// Copy of this descriptor without engine-reserved parameters
    pub fn without_custom_params(&self) -> Dsn {
        let mut dsn = self.clone();
        dsn.params.retain(|p| !p.is_custom());
        dsn
    }
}

impl fmt::Display for Dsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(scheme) = &self.scheme {
            write!(f, "{}://", scheme)?;
        }
        if let Some(user) = &self.user {
            f.write_str(user)?;
            if let Some(password) = &self.password {
                write!(f, ":{}", password)?;
            }
            f.write_str("@")?;
        }
        if let Some(protocol) = &self.protocol {
            f.write_str(protocol)?;
        }
        if let Some(address) = &self.address {
            write!(f, "({})", address)?;
        }
        write!(f, "/{}", self.database)?;
        for (i, param) in self.params.iter().enumerate() {
            f.write_str(if i == 0 { "?" } else { "&" })?;
            write!(f, "{}", param)?;
        }
        Ok(())
    }
}

/// Managed instance connection name: `project:region:instance`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InstanceName {
    pub project: String,
    pub region: String,
    pub instance: String,
}

impl InstanceName {
    /// Parse `project:region:instance`.
    ///
    /// Legacy domain-scoped projects (`example.com:proj`) keep their inner
    /// colon, so the region and instance are taken from the right.
    pub fn parse(name: &str) -> MigrateResult<Self> {
        let mut parts = name.rsplitn(3, ':');
        let instance = parts.next().unwrap_or_default();
        let region = parts.next().unwrap_or_default();
        let project = parts.next().unwrap_or_default();
        if project.is_empty() || region.is_empty() || instance.is_empty() {
            return Err(MigrateError::parse(
                name,
                "instance name must have the form project:region:instance",
            ));
        }
        Ok(Self {
            project: project.to_string(),
            region: region.to_string(),
            instance: instance.to_string(),
        })
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.project, self.region, self.instance)
    }
}

fn split_scheme(raw: &str) -> MigrateResult<(Option<&str>, &str)> {
    let Some(pos) = raw.find("://") else {
        return Ok((None, raw));
    };
    let scheme = &raw[..pos];
    // A "://" inside the address or query is not a scheme separator.
    if scheme.contains(|c| matches!(c, '/' | '?' | '@' | '(')) {
        return Ok((None, raw));
    }
    if scheme.is_empty() {
        return Err(MigrateError::parse(raw, "missing scheme before '://'"));
    }
    let valid = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid {
        return Err(MigrateError::parse(
            raw,
            format!("invalid scheme '{}'", scheme),
        ));
    }
    Ok((Some(scheme), &raw[pos + 3..]))
}

fn split_protocol<'a>(
    raw: &str,
    server: &'a str,
) -> MigrateResult<(Option<&'a str>, Option<&'a str>)> {
    match server.find('(') {
        Some(open) => {
            if !server.ends_with(')') {
                return Err(MigrateError::parse(raw, "unbalanced '(' in address"));
            }
            let address = &server[open + 1..server.len() - 1];
            if address.contains(|c| c == '(' || c == ')') {
                return Err(MigrateError::parse(raw, "unbalanced '(' in address"));
            }
            let protocol = &server[..open];
            Ok((
                (!protocol.is_empty()).then_some(protocol),
                Some(address),
            ))
        }
        None if server.contains(')') => Err(MigrateError::parse(raw, "unbalanced ')' in address")),
        None if server.is_empty() => Ok((None, None)),
        None => Ok((Some(server), None)),
    }
}

fn parse_query(raw: &str, query: &str) -> MigrateResult<Vec<QueryParam>> {
    let mut params = Vec::new();
    for pair in query.split('&').filter(|p| !p.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((k, v)) => (k, Some(v)),
            None => (pair, None),
        };
        if key.is_empty() {
            return Err(MigrateError::parse(raw, "empty query parameter name"));
        }
        check_escapes(raw, key)?;
        if let Some(value) = value {
            check_escapes(raw, value)?;
        }
        params.push(QueryParam {
            key: key.to_string(),
            value: value.map(str::to_string),
        });
    }
    Ok(params)
}

fn check_escapes(raw: &str, component: &str) -> MigrateResult<()> {
    if percent_decode(component).is_none() {
        return Err(MigrateError::parse(
            raw,
            format!("invalid percent-escape in '{}'", component),
        ));
    }
    Ok(())
}

/// Placeholder written over passwords in error messages
pub const REDACTED_PASSWORD: &str = "xxxxx";

/// Replace the password in a raw connection URL with [`REDACTED_PASSWORD`].
///
/// Works on malformed input too: the userinfo is whatever precedes the last
/// `@` before the query, and the password follows its first `:`.
pub fn redact_password(raw: &str) -> String {
    let start = match raw.find("://") {
        Some(pos) if !raw[..pos].contains(|c| matches!(c, '/' | '?' | '@' | '(')) => pos + 3,
        _ => 0,
    };
    let body_end = raw[start..].find('?').map_or(raw.len(), |q| start + q);
    let Some(at) = raw[start..body_end].rfind('@').map(|at| start + at) else {
        return raw.to_string();
    };
    let Some(colon) = raw[start..at].find(':').map(|c| start + c) else {
        return raw.to_string();
    };
    format!("{}{}{}", &raw[..=colon], REDACTED_PASSWORD, &raw[at..])
}

/// Decode `%XX` escapes. Returns `None` on a malformed escape or when the
/// decoded bytes are not UTF-8.
pub fn percent_decode(s: &str) -> Option<String> {
    if !has_valid_escapes(s) {
        return None;
    }
    percent_decode_str(s)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

/// `percent_decode_str` passes malformed escapes through unchanged, so they
/// are rejected here first.
fn has_valid_escapes(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.iter().enumerate().all(|(i, &b)| {
        b != b'%'
            || bytes
                .get(i + 1..i + 3)
                .is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit))
    })
}

#[cfg(test)]
#[path = "dsn_test.rs"]
mod tests;
