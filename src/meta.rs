/// REST endpoint paths and naming rules for server-side resources.
use crate::error::{DocDbError, Result};

pub struct ResourcePaths;

impl ResourcePaths {
    pub const PING: &'static str = "/v1/ping";
    pub const EXTENSIONS: &'static str = "/v1/config/resources";
    pub const QUERY_OPTIONS: &'static str = "/v1/config/query";
    pub const DOCUMENTS: &'static str = "/v1/documents";
    pub const RESOURCES: &'static str = "/v1/resources";

    /// Installation endpoint of a named resource extension.
    pub fn extension(name: &str) -> String {
        format!("{}/{}", Self::EXTENSIONS, name)
    }

    pub fn query_options(name: &str) -> String {
        format!("{}/{}", Self::QUERY_OPTIONS, name)
    }

    /// Invocation endpoint of an installed resource extension.
    pub fn resource(name: &str) -> String {
        format!("{}/{}", Self::RESOURCES, name)
    }
}

pub struct ResourceNames;

impl ResourceNames {
    /// Maximum length of an extension or query options name.
    pub const MAX_NAME_LEN: usize = 255;

    /// Validate an extension or query options name.
    ///
    /// Current rules:
    /// - must be non-empty
    /// - must only contain ASCII letters, digits, `_`, `-` or `.`
    /// - must not exceed `MAX_NAME_LEN`
    pub fn validate(kind: &str, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(DocDbError::InvalidInput(format!(
                "{kind} name must not be empty"
            )));
        }

        if name.len() > Self::MAX_NAME_LEN {
            return Err(DocDbError::InvalidInput(format!(
                "{kind} name too long; exceeds {} characters",
                Self::MAX_NAME_LEN
            )));
        }

        if !name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.'))
        {
            return Err(DocDbError::InvalidInput(format!(
                "{kind} name must match [a-zA-Z0-9_.-]"
            )));
        }

        Ok(())
    }

    /// Document addresses are free-form but must be non-empty and free of
    /// control characters.
    pub fn validate_address(address: &str) -> Result<()> {
        if address.trim().is_empty() {
            return Err(DocDbError::InvalidInput(
                "document address must not be empty".into(),
            ));
        }
        if address.chars().any(char::is_control) {
            return Err(DocDbError::InvalidInput(
                "document address must not contain control characters".into(),
            ));
        }
        Ok(())
    }
}
