use serde_json::Value;
use tracing::info;

use crate::error::{DocDbError, Result};
use crate::meta::{ResourceNames, ResourcePaths};
use crate::session::ClientSession;
use crate::transport::Request;
use crate::types::Format;

/// A named, reusable query configuration document.
///
/// The body is opaque to the client: it is stored and returned verbatim.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryOptions {
    pub format: Format,
    pub body: String,
}

impl QueryOptions {
    pub fn xml(body: impl Into<String>) -> Self {
        Self {
            format: Format::Xml,
            body: body.into(),
        }
    }

    pub fn json(body: impl Into<String>) -> Self {
        Self {
            format: Format::Json,
            body: body.into(),
        }
    }
}

/// Writes, reads and deletes named query options on the server.
#[derive(Clone)]
pub struct QueryOptionStore {
    session: ClientSession,
}

impl QueryOptionStore {
    pub(crate) fn new(session: ClientSession) -> Self {
        Self { session }
    }

    /// Store options under `name`, replacing any previous version.
    pub async fn write(&self, name: &str, options: &QueryOptions) -> Result<()> {
        ResourceNames::validate("query options", name)?;
        if !matches!(options.format, Format::Xml | Format::Json) {
            return Err(DocDbError::InvalidInput(format!(
                "query options must be xml or json, got {}",
                options.format.as_str()
            )));
        }
        self.session
            .send(
                Request::put(ResourcePaths::query_options(name))
                    .body(options.format.mime_type(), options.body.clone()),
            )
            .await?
            .error_for_status(&format!("write query options {name}"))?;
        info!(options = name, "wrote query options");
        Ok(())
    }

    /// Read back stored options in the requested format.
    pub async fn read(&self, name: &str, format: Format) -> Result<QueryOptions> {
        ResourceNames::validate("query options", name)?;
        let resp = self
            .session
            .send(
                Request::get(ResourcePaths::query_options(name))
                    .query("format", format.as_str())
                    .accept(format.mime_type()),
            )
            .await?
            .error_for_status(&format!("query options {name}"))?;
        let body = String::from_utf8(resp.body).map_err(|e| {
            DocDbError::InvalidInput(format!("query options {name} are not utf-8: {e}"))
        })?;
        Ok(QueryOptions { format, body })
    }

    /// Delete options. Fails with `NotFound` when absent.
    pub async fn delete(&self, name: &str) -> Result<()> {
        ResourceNames::validate("query options", name)?;
        self.session
            .send(Request::delete(ResourcePaths::query_options(name)))
            .await?
            .error_for_status(&format!("query options {name}"))?;
        info!(options = name, "deleted query options");
        Ok(())
    }

    /// Names of all stored query options.
    pub async fn list(&self) -> Result<Vec<String>> {
        let resp = self
            .session
            .send(
                Request::get(ResourcePaths::QUERY_OPTIONS)
                    .query("format", "json")
                    .accept("application/json"),
            )
            .await?
            .error_for_status("query options listing")?;
        Ok(option_names(&resp.json::<Value>()?))
    }
}

/// Listing entries are either plain strings or objects carrying `options`/`name`.
fn option_names(value: &Value) -> Vec<String> {
    let Some(items) = value.as_array() else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| match item {
            Value::String(s) => Some(s.clone()),
            Value::Object(map) => map
                .get("options")
                .or_else(|| map.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        })
        .collect()
}
