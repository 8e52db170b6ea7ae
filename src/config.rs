use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{DocDbError, Result};

/// Key prefix shared by property files and (upper-cased) environment variables.
const KEY_PREFIX: &str = "docdb.";
const ENV_PREFIX: &str = "DOCDB_";

/// Authentication scheme negotiated with the server.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AuthType {
    Basic,
    Digest,
}

impl AuthType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthType::Basic => "basic",
            AuthType::Digest => "digest",
        }
    }
}

impl FromStr for AuthType {
    type Err = DocDbError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BASIC" => Ok(AuthType::Basic),
            "DIGEST" => Ok(AuthType::Digest),
            other => Err(DocDbError::Config(format!(
                "unrecognized authentication type: {other}"
            ))),
        }
    }
}

/// Privilege level a session is opened for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Admin,
    Reader,
    Writer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Reader => "reader",
            Role::Writer => "writer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A user/password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub user: String,
    pub password: String,
}

impl Credentials {
    pub fn new(user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Retry behaviour for `503 Service Unavailable` responses.
///
/// Only idempotent requests whose body can be replayed are retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::from_millis(500),
        }
    }
}

/// Connection configuration for a document-database REST endpoint.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub auth_type: AuthType,
    pub admin: Option<Credentials>,
    pub reader: Option<Credentials>,
    pub writer: Option<Credentials>,
    pub timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: u16, auth_type: AuthType) -> Self {
        Self {
            host: host.into(),
            port,
            database: None,
            auth_type,
            admin: None,
            reader: None,
            writer: None,
            timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    /// Attach credentials for one role, replacing any previous pair.
    pub fn with_credentials(mut self, role: Role, credentials: Credentials) -> Self {
        match role {
            Role::Admin => self.admin = Some(credentials),
            Role::Reader => self.reader = Some(credentials),
            Role::Writer => self.writer = Some(credentials),
        }
        self
    }

    pub fn credentials(&self, role: Role) -> Result<&Credentials> {
        let creds = match role {
            Role::Admin => self.admin.as_ref(),
            Role::Reader => self.reader.as_ref(),
            Role::Writer => self.writer.as_ref(),
        };
        creds.ok_or_else(|| DocDbError::Config(format!("no credentials configured for role {role}")))
    }

    /// Resolve a configuration from property sources.
    ///
    /// Sources are applied in order: a key present in a later source replaces
    /// the value from an earlier one. A typical ordering is
    /// `[file, environment, explicit overrides]`.
    pub fn resolve(sources: &[Properties]) -> Result<Self> {
        let mut merged = Properties::default();
        for source in sources {
            merged.merge(source);
        }

        let host = merged.require("host")?.to_string();
        let port = parse_port(merged.require("port")?)?;
        let auth_type = merged.require("authentication_type")?.parse::<AuthType>()?;

        let mut config = ConnectionConfig::new(host, port, auth_type);
        config.database = merged.get("database").map(str::to_string);
        for role in [Role::Admin, Role::Reader, Role::Writer] {
            if let Some(creds) = merged.credentials(role) {
                config = config.with_credentials(role, creds);
            }
        }
        if let Some(secs) = merged.parse_value::<u64>("timeout_secs")? {
            config.timeout = Some(Duration::from_secs(secs));
        }
        if let Some(retries) = merged.parse_value::<u32>("max_retries")? {
            config.retry.max_retries = retries;
        }
        if let Some(ms) = merged.parse_value::<u64>("retry_delay_ms")? {
            config.retry.delay = Duration::from_millis(ms);
        }

        Ok(config)
    }

    /// Build configuration from `DOCDB_*` environment variables:
    /// `DOCDB_HOST`, `DOCDB_PORT`, `DOCDB_AUTHENTICATION_TYPE`, `DOCDB_DATABASE`,
    /// `DOCDB_ADMIN_USER`, `DOCDB_ADMIN_PASSWORD` (and likewise for `READER`/`WRITER`).
    pub fn from_env() -> Result<Self> {
        Self::resolve(&[Properties::from_env()])
    }

    /// Load a properties file and let the environment override any of its keys.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = Properties::from_file(path)?;
        Self::resolve(&[file, Properties::from_env()])
    }
}

/// A flat set of configuration properties keyed without the `docdb.` prefix.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Properties {
    values: BTreeMap<String, String>,
}

impl Properties {
    /// Parse text in the Java properties format.
    ///
    /// Keys end at the first unescaped `=`, `:` or whitespace. A line ending
    /// in an odd number of backslashes continues on the next one. `\t`,
    /// `\n`, `\r`, `\f` and `\uXXXX` escapes are decoded, and any other
    /// escaped character stands for itself. Keys may carry the `docdb.` prefix.
    pub fn parse(text: &str) -> Self {
        let mut props = Properties::default();
        let mut lines = text.lines();
        while let Some(first) = lines.next() {
            let mut logical = first.trim_start().to_string();
            if logical.is_empty() || logical.starts_with(['#', '!']) {
                continue;
            }
            while continues(&logical) {
                logical.pop();
                match lines.next() {
                    Some(next) => logical.push_str(next.trim_start()),
                    None => break,
                }
            }
            let (key, value) = split_entry(&logical);
            props.set(&unescape(key), unescape(value));
        }
        props
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            DocDbError::Config(format!("cannot read properties {}: {e}", path.display()))
        })?;
        Ok(Self::parse(&text))
    }

    /// Collect `DOCDB_*` variables from the process environment.
    pub fn from_env() -> Self {
        Self::from_vars(env::vars())
    }

    /// Collect `DOCDB_*` pairs from an arbitrary variable listing.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut props = Properties::default();
        for (key, value) in vars {
            if let Some(rest) = key.as_ref().strip_prefix(ENV_PREFIX) {
                props.set(&rest.to_ascii_lowercase(), value);
            }
        }
        props
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) -> &mut Self {
        let key = key.strip_prefix(KEY_PREFIX).unwrap_or(key);
        self.values.insert(key.to_string(), value.into());
        self
    }

    /// Builder-style [`Properties::set`].
    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    fn merge(&mut self, other: &Properties) {
        for (k, v) in &other.values {
            self.values.insert(k.clone(), v.clone());
        }
    }

    fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| DocDbError::Config(format!("missing property: {KEY_PREFIX}{key}")))
    }

    fn parse_value<T: FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key) {
            None => Ok(None),
            Some(v) => v.parse::<T>().map(Some).map_err(|_| {
                DocDbError::Config(format!("invalid value for {KEY_PREFIX}{key}: {v}"))
            }),
        }
    }

    fn credentials(&self, role: Role) -> Option<Credentials> {
        let user = self.get(&format!("{}_user", role.as_str()))?;
        let password = self
            .get(&format!("{}_password", role.as_str()))
            .unwrap_or_default();
        Some(Credentials::new(user, password))
    }
}

fn continues(line: &str) -> bool {
    line.chars().rev().take_while(|&c| c == '\\').count() % 2 == 1
}

/// Split a logical line into its raw key and value.
fn split_entry(line: &str) -> (&str, &str) {
    let mut escaped = false;
    for (i, c) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' => escaped = true,
            '=' | ':' => return (&line[..i], line[i + 1..].trim_start()),
            c if c.is_whitespace() => {
                let rest = line[i..].trim_start();
                let rest = rest.strip_prefix(['=', ':']).unwrap_or(rest);
                return (&line[..i], rest.trim_start());
            }
            _ => {}
        }
    }
    (line, "")
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('t') => out.push('\t'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('f') => out.push('\u{c}'),
            Some('u') => {
                let hex: String = chars.by_ref().take(4).collect();
                match u32::from_str_radix(&hex, 16).ok().and_then(char::from_u32) {
                    Some(decoded) => out.push(decoded),
                    None => {
                        out.push_str("\\u");
                        out.push_str(&hex);
                    }
                }
            }
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn parse_port(raw: &str) -> Result<u16> {
    match raw.parse::<u16>() {
        Ok(0) | Err(_) => Err(DocDbError::Config(format!(
            "port must be an integer in 1..=65535, got {raw}"
        ))),
        Ok(port) => Ok(port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file_props() -> Properties {
        Properties::parse(
            "# connection\n\
             docdb.host=filehost\n\
             docdb.port = 8003\n\
             docdb.authentication_type: digest\n\
             docdb.admin_user=admin\n\
             docdb.admin_password=file-secret\n\
             ! reader only\n\
             docdb.reader_user=rest-reader\n\
             docdb.reader_password=x\n",
        )
    }

    #[test]
    fn parse_reads_separators_continuations_and_escapes() {
        let props = Properties::parse(
            r"
            docdb.host  filehost
            docdb.port   :   8003
            docdb.authentication_type=basic
            docdb.admin_user = ad\
                min
            docdb.admin_password = p\u0040ss\=word\\
            docdb.database
            key\ with\ spaces=v
              # indented comment \
            docdb.reader_user=rest-reader
            ",
        );
        assert_eq!(props.get("host"), Some("filehost"));
        assert_eq!(props.get("port"), Some("8003"));
        assert_eq!(props.get("admin_user"), Some("admin"));
        assert_eq!(props.get("admin_password"), Some("p@ss=word\\"));
        assert_eq!(props.get("database"), None);
        assert_eq!(props.get("key with spaces"), Some("v"));
        assert_eq!(props.get("reader_user"), Some("rest-reader"));

        let config = ConnectionConfig::resolve(&[props]).unwrap();
        assert_eq!(config.port, 8003);
        assert_eq!(config.credentials(Role::Admin).unwrap().password, "p@ss=word\\");
    }

    #[test]
    fn resolve_from_file() {
        let config = ConnectionConfig::resolve(&[file_props()]).unwrap();
        assert_eq!(config.host, "filehost");
        assert_eq!(config.port, 8003);
        assert_eq!(config.auth_type, AuthType::Digest);
        assert_eq!(config.credentials(Role::Admin).unwrap().password, "file-secret");
        assert_eq!(config.credentials(Role::Reader).unwrap().user, "rest-reader");
        assert!(matches!(
            config.credentials(Role::Writer),
            Err(DocDbError::Config(_))
        ));
    }

    #[test]
    fn later_sources_override_earlier_ones() {
        let env = Properties::from_vars([
            ("DOCDB_HOST", "envhost"),
            ("DOCDB_ADMIN_PASSWORD", "env-secret"),
            ("UNRELATED", "ignored"),
        ]);
        let explicit = Properties::default().with("host", "localhost");
        let config = ConnectionConfig::resolve(&[file_props(), env, explicit]).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.credentials(Role::Admin).unwrap().password, "env-secret");
        assert_eq!(config.credentials(Role::Admin).unwrap().user, "admin");
    }

    #[test]
    fn missing_required_fields_fail() {
        let props = Properties::default().with("host", "h").with("port", "8000");
        let err = ConnectionConfig::resolve(&[props]).unwrap_err();
        match err {
            DocDbError::Config(msg) => assert!(msg.contains("authentication_type"), "{msg}"),
            other => panic!("expected config error, got {other:?}"),
        }
    }

    #[test]
    fn invalid_port_and_auth_type_fail() {
        let base = Properties::default()
            .with("host", "h")
            .with("authentication_type", "basic");
        for port in ["0", "-1", "70000", "abc"] {
            let props = base.clone().with("port", port);
            assert!(matches!(
                ConnectionConfig::resolve(&[props]),
                Err(DocDbError::Config(_))
            ));
        }
        let props = base.with("port", "8000").with("authentication_type", "kerberos");
        assert!(matches!(
            ConnectionConfig::resolve(&[props]),
            Err(DocDbError::Config(_))
        ));
    }

    #[test]
    fn optional_tuning_keys() {
        let props = file_props()
            .with("timeout_secs", "30")
            .with("max_retries", "3")
            .with("retry_delay_ms", "10")
            .with("database", "Documents");
        let config = ConnectionConfig::resolve(&[props]).unwrap();
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.delay, Duration::from_millis(10));
        assert_eq!(config.database.as_deref(), Some("Documents"));
    }

    #[test]
    fn auth_type_parsing_is_case_insensitive() {
        assert_eq!("BASIC".parse::<AuthType>().unwrap(), AuthType::Basic);
        assert_eq!(" Digest ".parse::<AuthType>().unwrap(), AuthType::Digest);
    }

    #[test]
    fn credentials_debug_hides_password() {
        let rendered = format!("{:?}", Credentials::new("u", "hunter2"));
        assert!(!rendered.contains("hunter2"));
    }
}
