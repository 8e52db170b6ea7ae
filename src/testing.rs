//! Scripted transport for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{DocDbError, Result};
use crate::transport::{Request, Response, Transport};

/// Answers requests from a fixed queue of responses and records what it saw.
pub(crate) struct ScriptedTransport {
    responses: Mutex<VecDeque<Response>>,
    seen: Mutex<Vec<SeenRequest>>,
}

#[derive(Clone, Debug)]
pub(crate) struct SeenRequest {
    pub line: String,
    pub query: Vec<(String, String)>,
    pub content_type: Option<String>,
    pub body: Option<Vec<u8>>,
}

impl ScriptedTransport {
    pub fn new(responses: Vec<Response>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, response: Response) {
        self.responses.lock().unwrap().push_back(response);
    }

    /// `"METHOD path"` for every request received so far.
    pub fn requests(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.line.clone())
            .collect()
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }

    pub fn last(&self) -> SeenRequest {
        self.seen.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let body = request.body.map(|c| c.into_bytes()).transpose()?;
        self.seen.lock().unwrap().push(SeenRequest {
            line: format!("{} {}", request.method, request.path),
            query: request.query,
            content_type: request.content_type,
            body,
        });
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| DocDbError::Connect("no scripted response left".into()))
    }

    fn mode(&self) -> &'static str {
        "scripted"
    }
}
