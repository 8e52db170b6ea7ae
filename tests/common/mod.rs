#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use docdb_rs::{
    ClientSession, ConnectionConfig, DocDbError, Format, Method, Request, Response, Role,
    Transport,
};
use serde_json::{Value, json};

/// Load ConnectionConfig from environment when `DOCDB_INTEGRATION=1` is set.
/// Returns None and prints a SKIP message otherwise.
pub fn load_config_for_integration() -> Option<ConnectionConfig> {
    if std::env::var("DOCDB_INTEGRATION").ok().as_deref() != Some("1") {
        eprintln!("SKIP: set DOCDB_INTEGRATION=1 and DOCDB_* env vars to run integration tests");
        return None;
    }
    ConnectionConfig::from_env().ok()
}

/// Millisecond timestamp string used to make resource names unique.
pub fn ts_suffix() -> String {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    ts.to_string()
}

#[derive(Clone, Debug)]
pub struct StoredExtension {
    pub content_type: Option<String>,
    pub source: Vec<u8>,
    pub query: Vec<(String, String)>,
}

#[derive(Default)]
struct State {
    extensions: BTreeMap<String, StoredExtension>,
    options: BTreeMap<String, Vec<u8>>,
    documents: BTreeMap<String, (Option<String>, Vec<u8>)>,
    log: Vec<String>,
}

/// In-memory stand-in for a document-database server.
///
/// Admin sessions may change configuration, writers may change documents,
/// and every role may read and search. Searches go through an installed
/// extension and named query options, like the real server.
#[derive(Default)]
pub struct MemoryServer {
    state: Mutex<State>,
}

impl MemoryServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn transport(self: &Arc<Self>, role: Role) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport {
            server: Arc::clone(self),
            role,
            authenticated: true,
        })
    }

    /// A transport whose credentials the server rejects.
    pub fn bad_credentials(self: &Arc<Self>, role: Role) -> Arc<dyn Transport> {
        Arc::new(MemoryTransport {
            server: Arc::clone(self),
            role,
            authenticated: false,
        })
    }

    pub async fn session(self: &Arc<Self>, role: Role) -> ClientSession {
        ClientSession::connect(self.transport(role), role)
            .await
            .expect("memory server accepts every role")
    }

    pub fn extension(&self, name: &str) -> Option<StoredExtension> {
        self.state.lock().unwrap().extensions.get(name).cloned()
    }

    pub fn has_options(&self, name: &str) -> bool {
        self.state.lock().unwrap().options.contains_key(name)
    }

    pub fn document_count(&self) -> usize {
        self.state.lock().unwrap().documents.len()
    }

    /// `"METHOD path"` for every request received so far.
    pub fn log(&self) -> Vec<String> {
        self.state.lock().unwrap().log.clone()
    }

    fn handle(&self, role: Role, request: Request, body: Option<Vec<u8>>) -> Response {
        let mut state = self.state.lock().unwrap();
        state
            .log
            .push(format!("{} {}", request.method, request.path));
        let path = request.path.as_str();
        let admin = role == Role::Admin;
        let writer = matches!(role, Role::Admin | Role::Writer);

        if path == "/v1/ping" {
            return Response::new(204);
        }
        if path == "/v1/config/resources" {
            let items: Vec<Value> = state
                .extensions
                .iter()
                .map(|(name, ext)| {
                    let mut item = json!({"name": name});
                    for (k, v) in &ext.query {
                        if matches!(k.as_str(), "title" | "description" | "provider" | "version") {
                            item[k.as_str()] = json!(v);
                        }
                    }
                    item
                })
                .collect();
            return json_response(json!({"resources": {"resource": items}}));
        }
        if let Some(name) = path.strip_prefix("/v1/config/resources/") {
            return match request.method {
                Method::Put if !admin => forbidden(),
                Method::Put => {
                    state.extensions.insert(
                        name.to_string(),
                        StoredExtension {
                            content_type: request.content_type.clone(),
                            source: body.unwrap_or_default(),
                            query: request.query.clone(),
                        },
                    );
                    Response::new(204)
                }
                Method::Delete if !admin => forbidden(),
                Method::Delete => match state.extensions.remove(name) {
                    Some(_) => Response::new(204),
                    None => not_found(),
                },
                Method::Get => match state.extensions.get(name) {
                    Some(ext) => Response::with_body(
                        200,
                        "application/xquery",
                        ext.source.clone(),
                    ),
                    None => not_found(),
                },
                _ => failed(405, "RESTAPI-UNSUPPORTEDMETHOD", "unsupported method"),
            };
        }
        if path == "/v1/config/query" {
            let names: Vec<Value> = state
                .options
                .keys()
                .map(|name| json!({"name": name}))
                .collect();
            return json_response(Value::Array(names));
        }
        if let Some(name) = path.strip_prefix("/v1/config/query/") {
            return match request.method {
                Method::Put if !admin => forbidden(),
                Method::Put => {
                    state
                        .options
                        .insert(name.to_string(), body.unwrap_or_default());
                    Response::new(204)
                }
                Method::Delete if !admin => forbidden(),
                Method::Delete => match state.options.remove(name) {
                    Some(_) => Response::new(204),
                    None => not_found(),
                },
                Method::Get => match state.options.get(name) {
                    Some(body) => Response::with_body(200, "application/xml", body.clone()),
                    None => not_found(),
                },
                _ => failed(405, "RESTAPI-UNSUPPORTEDMETHOD", "unsupported method"),
            };
        }
        if path == "/v1/documents" {
            let Some(uri) = request.param("uri").map(str::to_string) else {
                return failed(400, "REST-REQUIREDPARAM", "uri is required");
            };
            return match request.method {
                Method::Put if !writer => forbidden(),
                Method::Put => {
                    let created = !state.documents.contains_key(&uri);
                    state
                        .documents
                        .insert(uri, (request.content_type.clone(), body.unwrap_or_default()));
                    Response::new(if created { 201 } else { 204 })
                }
                Method::Delete if !writer => forbidden(),
                Method::Delete => match state.documents.remove(&uri) {
                    Some(_) => Response::new(204),
                    None => not_found(),
                },
                Method::Get => match state.documents.get(&uri) {
                    Some((ct, content)) => Response::with_body(
                        200,
                        ct.clone().unwrap_or_else(|| "application/octet-stream".into()),
                        content.clone(),
                    ),
                    None => not_found(),
                },
                Method::Head if state.documents.contains_key(&uri) => Response::new(200),
                Method::Head => Response::new(404),
                Method::Post => failed(405, "RESTAPI-UNSUPPORTEDMETHOD", "unsupported method"),
            };
        }
        if let Some(name) = path.strip_prefix("/v1/resources/") {
            if !state.extensions.contains_key(name) {
                return not_found();
            }
            return search(&state, &request, body.as_deref());
        }
        not_found()
    }
}

struct MemoryTransport {
    server: Arc<MemoryServer>,
    role: Role,
    authenticated: bool,
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, mut request: Request) -> docdb_rs::Result<Response> {
        if !self.authenticated {
            return Ok(Response::new(401));
        }
        let body = request.body.take().map(|c| c.into_bytes()).transpose()?;
        Ok(self.server.handle(self.role, request, body))
    }

    fn mode(&self) -> &'static str {
        "memory"
    }
}

fn search(state: &State, request: &Request, body: Option<&[u8]>) -> Response {
    let options = request.param("rs:options").unwrap_or_default();
    if !state.options.contains_key(options) {
        return failed(
            400,
            "REST-INVALIDPARAM",
            &format!("query options {options} do not exist"),
        );
    }
    let query = match request.method {
        Method::Post => body
            .and_then(|b| serde_json::from_slice::<Value>(b).ok())
            .and_then(|v| v.pointer("/query/term").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default(),
        _ => request.param("rs:q").unwrap_or_default().to_string(),
    };
    let start: usize = request
        .param("rs:start")
        .and_then(|s| s.parse().ok())
        .unwrap_or(1);
    let page_length: usize = request
        .param("rs:pageLength")
        .and_then(|s| s.parse().ok())
        .unwrap_or(10);

    let matches: Vec<(&String, &(Option<String>, Vec<u8>))> = state
        .documents
        .iter()
        .filter(|(_, (_, content))| matches_query(&query, &String::from_utf8_lossy(content)))
        .collect();
    let total = matches.len();
    let page: Vec<_> = matches
        .into_iter()
        .skip(start.saturating_sub(1))
        .take(page_length)
        .collect();

    let results: Vec<Value> = page
        .iter()
        .enumerate()
        .map(|(i, (uri, _))| json!({"index": start + i, "uri": uri}))
        .collect();
    let documents: Vec<Value> = page
        .iter()
        .map(|(uri, (ct, content))| {
            let format = ct.as_deref().map(Format::from_mime).unwrap_or_default();
            json!({
                "uri": uri,
                "format": format.as_str(),
                "content": String::from_utf8_lossy(content),
            })
        })
        .collect();

    json_response(json!({
        "search": {
            "total": total,
            "start": start,
            "page-length": page_length,
            "results": results,
        },
        "documents": documents,
    }))
}

/// Every whitespace-separated term must match. `field:"value"` matches an
/// XML element or JSON property with that value; a bare word matches anywhere.
fn matches_query(query: &str, content: &str) -> bool {
    query.split_whitespace().all(|term| match term.split_once(':') {
        Some((field, value)) => {
            let value = value.trim_matches('"');
            content.contains(&format!("<{field}>{value}</{field}>"))
                || content.contains(&format!("\"{field}\":\"{value}\""))
        }
        None => content.contains(term),
    })
}

fn json_response(value: Value) -> Response {
    Response::with_body(200, "application/json", value.to_string())
}

fn error_body(status: u16, code: &str, message: &str) -> Vec<u8> {
    json!({"errorResponse": {"statusCode": status, "messageCode": code, "message": message}})
        .to_string()
        .into_bytes()
}

fn failed(status: u16, code: &str, message: &str) -> Response {
    Response::with_body(status, "application/json", error_body(status, code, message))
}

fn forbidden() -> Response {
    failed(403, "SEC-PRIV", "you do not have permission for this operation")
}

fn not_found() -> Response {
    failed(404, "RESTAPI-NODOCUMENT", "resource not found")
}

/// Convenience so tests can assert on the kind of error only.
pub fn is_forbidden(err: &DocDbError) -> bool {
    matches!(err, DocDbError::Forbidden(_))
}
