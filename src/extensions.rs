use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::{DocDbError, Result};
use crate::meta::{ResourceNames, ResourcePaths};
use crate::session::ClientSession;
use crate::transport::Request;
use crate::types::Content;

/// HTTP verb an extension method answers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MethodType {
    Get,
    Post,
    Put,
    Delete,
}

impl MethodType {
    /// Lower-case verb used as the parameter prefix on the wire (`get:q`).
    pub fn as_str(&self) -> &'static str {
        match self {
            MethodType::Get => "get",
            MethodType::Post => "post",
            MethodType::Put => "put",
            MethodType::Delete => "delete",
        }
    }
}

/// Declared parameters of one extension method, in declaration order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodParameters {
    pub method: MethodType,
    pub params: Vec<(String, String)>,
}

impl MethodParameters {
    pub fn new(method: MethodType) -> Self {
        Self {
            method,
            params: Vec::new(),
        }
    }

    /// Declare a parameter with its type (for example `xs:string`).
    pub fn add(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.params.push((name.into(), type_name.into()));
        self
    }
}

/// Descriptive metadata shown by the server for an installed extension.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtensionMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub provider: Option<String>,
    pub version: Option<String>,
}

/// Language of the extension source.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ExtensionLanguage {
    #[default]
    XQuery,
    JavaScript,
}

impl ExtensionLanguage {
    pub fn mime_type(&self) -> &'static str {
        match self {
            ExtensionLanguage::XQuery => "application/xquery",
            ExtensionLanguage::JavaScript => "application/vnd.marklogic-javascript",
        }
    }
}

/// Everything needed to install a server-side resource extension.
///
/// The source is transported as-is; this crate never interprets it.
#[derive(Debug)]
pub struct ExtensionDescriptor {
    pub name: String,
    pub metadata: ExtensionMetadata,
    pub language: ExtensionLanguage,
    pub source: Option<Content>,
    pub methods: Vec<MethodParameters>,
}

impl ExtensionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metadata: ExtensionMetadata::default(),
            language: ExtensionLanguage::default(),
            source: None,
            methods: Vec::new(),
        }
    }

    pub fn metadata(mut self, metadata: ExtensionMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn language(mut self, language: ExtensionLanguage) -> Self {
        self.language = language;
        self
    }

    pub fn source(mut self, source: impl Into<Content>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a method's parameter list. Each verb keeps its own list.
    pub fn method(mut self, params: MethodParameters) -> Self {
        self.methods.push(params);
        self
    }

    /// Query parameters of the install request, in wire order.
    fn install_query(&self) -> Vec<(String, String)> {
        let mut query = Vec::new();
        let m = &self.metadata;
        for (key, value) in [
            ("title", &m.title),
            ("description", &m.description),
            ("provider", &m.provider),
            ("version", &m.version),
        ] {
            if let Some(v) = value {
                query.push((key.to_string(), v.clone()));
            }
        }
        for method in &self.methods {
            let verb = method.method.as_str();
            query.push(("method".to_string(), verb.to_string()));
            for (name, type_name) in &method.params {
                query.push((format!("{verb}:{name}"), type_name.clone()));
            }
        }
        query
    }
}

/// Summary of an installed extension as listed by the server.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct ExtensionSummary {
    pub name: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
}

/// Installs and removes named server-side resource extensions.
#[derive(Clone)]
pub struct ExtensionRegistry {
    session: ClientSession,
}

impl ExtensionRegistry {
    pub(crate) fn new(session: ClientSession) -> Self {
        Self { session }
    }

    /// Install an extension, replacing any existing one with the same name.
    pub async fn install(&self, descriptor: ExtensionDescriptor) -> Result<()> {
        ResourceNames::validate("extension", &descriptor.name)?;
        let query = descriptor.install_query();
        let ExtensionDescriptor {
            name,
            language,
            source,
            ..
        } = descriptor;
        let source = source.ok_or_else(|| {
            DocDbError::NotFound(format!("source code for extension {name} is absent"))
        })?;

        let mut request =
            Request::put(ResourcePaths::extension(&name)).body(language.mime_type(), source);
        request.query = query;
        self.session
            .send(request)
            .await?
            .error_for_status(&format!("install extension {name}"))?;
        info!(extension = %name, "installed resource extension");
        Ok(())
    }

    /// Remove an extension. Fails with `NotFound` when none is installed.
    pub async fn remove(&self, name: &str) -> Result<()> {
        ResourceNames::validate("extension", name)?;
        self.session
            .send(Request::delete(ResourcePaths::extension(name)))
            .await?
            .error_for_status(&format!("extension {name}"))?;
        info!(extension = %name, "removed resource extension");
        Ok(())
    }

    /// Fetch the installed source of an extension.
    pub async fn read_source(&self, name: &str) -> Result<Vec<u8>> {
        ResourceNames::validate("extension", name)?;
        let resp = self
            .session
            .send(Request::get(ResourcePaths::extension(name)))
            .await?
            .error_for_status(&format!("extension {name}"))?;
        Ok(resp.body)
    }

    /// List installed extensions.
    pub async fn list(&self) -> Result<Vec<ExtensionSummary>> {
        let resp = self
            .session
            .send(
                Request::get(ResourcePaths::EXTENSIONS)
                    .query("format", "json")
                    .accept("application/json"),
            )
            .await?
            .error_for_status("extension listing")?;
        parse_listing(&resp.json::<Value>()?)
    }
}

/// Accepts `{"resources": {"resource": [...]}}` or a bare array.
fn parse_listing(value: &Value) -> Result<Vec<ExtensionSummary>> {
    let items = value
        .pointer("/resources/resource")
        .or_else(|| value.get("resources"))
        .unwrap_or(value);
    match items {
        Value::Array(_) => Ok(serde_json::from_value(items.clone())?),
        Value::Null => Ok(Vec::new()),
        Value::Object(map) if map.is_empty() => Ok(Vec::new()),
        Value::Object(_) => Ok(vec![serde_json::from_value(items.clone())?]),
        other => Err(DocDbError::InvalidInput(format!(
            "unexpected extension listing: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::config::Role;
    use crate::testing::ScriptedTransport;
    use crate::transport::Response;

    fn descriptor() -> ExtensionDescriptor {
        ExtensionDescriptor::new("collect")
            .metadata(ExtensionMetadata {
                title: Some("Search Collector".into()),
                version: Some("0.1".into()),
                ..Default::default()
            })
            .source("xquery version '1.0-ml';")
            .method(
                MethodParameters::new(MethodType::Get)
                    .add("q", "xs:string")
                    .add("start", "xs:string"),
            )
            .method(MethodParameters::new(MethodType::Post).add("start", "xs:string"))
    }

    async fn session(transport: Arc<ScriptedTransport>) -> ClientSession {
        ClientSession::connect(transport, Role::Admin).await.unwrap()
    }

    #[test]
    fn install_query_keeps_per_verb_order() {
        let query = descriptor().install_query();
        let rendered: Vec<String> = query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        assert_eq!(
            rendered,
            vec![
                "title=Search Collector",
                "version=0.1",
                "method=get",
                "get:q=xs:string",
                "get:start=xs:string",
                "method=post",
                "post:start=xs:string",
            ]
        );
    }

    #[tokio::test]
    async fn install_sends_source_and_metadata() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Response::new(204),
            Response::new(204),
        ]));
        let session = session(transport.clone()).await;
        session.extension_registry().install(descriptor()).await.unwrap();

        let seen = transport.last();
        assert_eq!(seen.line, "PUT /v1/config/resources/collect");
        assert_eq!(seen.content_type.as_deref(), Some("application/xquery"));
        assert_eq!(seen.body.as_deref(), Some(&b"xquery version '1.0-ml';"[..]));
        assert!(seen.query.contains(&("get:q".into(), "xs:string".into())));
        session.release().unwrap();
    }

    #[tokio::test]
    async fn install_without_source_is_not_found() {
        let transport = Arc::new(ScriptedTransport::new(vec![Response::new(204)]));
        let session = session(transport.clone()).await;
        let err = session
            .extension_registry()
            .install(ExtensionDescriptor::new("collect"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(transport.requests().len(), 1);
        session.release().unwrap();
    }

    #[tokio::test]
    async fn install_rejections_map_to_errors() {
        let transport = Arc::new(ScriptedTransport::new(vec![
            Response::new(204),
            Response::new(403),
            Response::with_body(
                400,
                "application/json",
                br#"{"errorResponse":{"message":"unsupported type xs:blob"}}"#.to_vec(),
            ),
        ]));
        let session = session(transport).await;
        let registry = session.extension_registry();
        assert!(matches!(
            registry.install(descriptor()).await,
            Err(DocDbError::Forbidden(_))
        ));
        match registry.install(descriptor()).await {
            Err(DocDbError::FailedRequest { status, message, .. }) => {
                assert_eq!(status, 400);
                assert!(message.contains("xs:blob"));
            }
            other => panic!("expected FailedRequest, got {other:?}"),
        }
        session.release().unwrap();
    }

    #[test]
    fn listing_shapes() {
        let nested = json!({"resources": {"resource": [
            {"name": "collect", "title": "Search Collector"},
            {"name": "other"}
        ]}});
        let list = parse_listing(&nested).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].title.as_deref(), Some("Search Collector"));

        assert!(parse_listing(&json!({"resources": {}})).unwrap().is_empty());
        assert!(parse_listing(&json!({"resources": null})).unwrap().is_empty());
        assert!(parse_listing(&json!({"resources": 3})).is_err());
    }
}
