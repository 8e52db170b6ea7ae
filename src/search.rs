//! Paginated search through a collecting resource extension.
//!
//! A [`SearchCollector`] calls an installed resource extension that runs a
//! search with named query options and returns, per page, the raw search
//! response together with the content of every matched document. The
//! [`CollectorResults`] it hands out hides page boundaries behind
//! `has_next` / `next`: when the buffered page runs dry and the server reported
//! more matches, the next page is fetched on demand.
//!
//! Page response contract with the extension:
//!
//! ```json
//! {
//!   "search": {"total": 3, "start": 1, "page-length": 10, "results": [{"uri": "/a.xml"}]},
//!   "documents": [{"uri": "/a.xml", "format": "xml", "content": "<a/>"}]
//! }
//! ```

use std::collections::VecDeque;

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::error::{DocDbError, Result};
use crate::extensions::{MethodParameters, MethodType};
use crate::meta::{ResourceNames, ResourcePaths};
use crate::session::ClientSession;
use crate::transport::Request;
use crate::types::{Document, SearchResult};

pub const DEFAULT_PAGE_LENGTH: u32 = 10;
pub const DEFAULT_VIEW: &str = "results";

/// What to search for.
#[derive(Clone, Debug, PartialEq)]
pub enum SearchQuery {
    /// Query string in the server's search grammar, sent as `rs:q` via GET.
    Text(String),
    /// Structured query sent as a JSON body via POST.
    Structured(Value),
}

/// A search as issued to the collecting extension.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchRequest {
    pub query: SearchQuery,
    pub start_page: u64,
    pub options: String,
    pub page_length: u32,
    pub view: String,
}

impl SearchRequest {
    /// 1-based index of the first match on `start_page`, or `InvalidInput`
    /// when it does not fit in a `u64`.
    pub fn first_start(&self) -> Result<u64> {
        self.start_page
            .checked_sub(1)
            .and_then(|skipped| skipped.checked_mul(u64::from(self.page_length)))
            .and_then(|skipped| skipped.checked_add(1))
            .ok_or_else(|| {
                DocDbError::InvalidInput(format!(
                    "start page {} with page length {} is out of range",
                    self.start_page, self.page_length
                ))
            })
    }

    fn to_request(&self, extension: &str, start: u64) -> Request {
        let path = ResourcePaths::resource(extension);
        let mut request = match &self.query {
            SearchQuery::Text(q) => Request::get(path).query("rs:q", q.as_str()),
            SearchQuery::Structured(body) => {
                Request::post(path).body("application/json", body.to_string())
            }
        };
        request = request
            .query("rs:start", start.to_string())
            .query("rs:pageLength", self.page_length.to_string())
            .query("rs:options", self.options.as_str())
            .query("rs:view", self.view.as_str())
            .query("rs:format", "json")
            .accept("application/json");
        request
    }
}

/// One page of collected results.
#[derive(Clone, Debug, PartialEq)]
pub struct SearchPage {
    pub result: SearchResult,
    pub documents: Vec<Document>,
    /// Index of the first match on the following page, if there is one.
    pub next_start: Option<u64>,
}

impl SearchPage {
    pub fn has_more(&self) -> bool {
        self.next_start.is_some()
    }

    fn decode(body: &[u8], requested_start: u64) -> Result<Self> {
        #[derive(Deserialize)]
        struct Envelope {
            search: Value,
            #[serde(default)]
            documents: Vec<Document>,
        }

        let envelope: Envelope = serde_json::from_slice(body)?;
        let result = SearchResult(envelope.search);
        let start = result
            .raw()
            .get("start")
            .and_then(Value::as_u64)
            .unwrap_or(requested_start);
        let matched = result.results().len().max(envelope.documents.len()) as u64;
        let next_start = start
            .checked_add(matched)
            .filter(|next| matched > 0 && next - 1 < result.total());

        Ok(Self {
            result,
            documents: envelope.documents,
            next_start,
        })
    }
}

/// Issues searches through a named collecting extension.
#[derive(Clone)]
pub struct SearchCollector {
    session: ClientSession,
    extension: String,
    page_length: u32,
    view: String,
}

impl SearchCollector {
    pub(crate) fn new(session: ClientSession, extension: impl Into<String>) -> Self {
        Self {
            session,
            extension: extension.into(),
            page_length: DEFAULT_PAGE_LENGTH,
            view: DEFAULT_VIEW.to_string(),
        }
    }

    /// Number of matches requested per page.
    pub fn page_length(mut self, page_length: u32) -> Self {
        self.page_length = page_length;
        self
    }

    /// Search response view requested from the server (`results`, `metadata`, `all`, ...).
    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Parameter declarations the collecting extension must be installed with.
    pub fn method_parameters() -> [MethodParameters; 2] {
        let common = ["format", "options", "pageLength", "start", "view"];
        let get = common
            .iter()
            .fold(MethodParameters::new(MethodType::Get), |m, p| m.add(*p, "xs:string"))
            .add("q", "xs:string");
        let post = common
            .iter()
            .fold(MethodParameters::new(MethodType::Post), |m, p| m.add(*p, "xs:string"));
        [get, post]
    }

    /// Run a text search and fetch its first page before returning.
    pub async fn collect(
        &self,
        query_text: &str,
        start_page: u64,
        options: &str,
    ) -> Result<CollectorResults> {
        self.collect_query(SearchQuery::Text(query_text.to_string()), start_page, options)
            .await
    }

    /// Run a structured (POST) search and fetch its first page before returning.
    pub async fn collect_structured(
        &self,
        query: Value,
        start_page: u64,
        options: &str,
    ) -> Result<CollectorResults> {
        self.collect_query(SearchQuery::Structured(query), start_page, options)
            .await
    }

    async fn collect_query(
        &self,
        query: SearchQuery,
        start_page: u64,
        options: &str,
    ) -> Result<CollectorResults> {
        let mut results = self.prepare(query, start_page, options)?;
        results.has_next().await?;
        Ok(results)
    }

    /// Build results without contacting the server; the first page is
    /// fetched by the first `has_next` / `next` call.
    pub fn prepare(
        &self,
        query: SearchQuery,
        start_page: u64,
        options: &str,
    ) -> Result<CollectorResults> {
        ResourceNames::validate("extension", &self.extension)?;
        ResourceNames::validate("query options", options)?;
        if start_page == 0 {
            return Err(DocDbError::InvalidInput("start page must be at least 1".into()));
        }
        if self.page_length == 0 {
            return Err(DocDbError::InvalidInput("page length must be at least 1".into()));
        }
        let request = SearchRequest {
            query,
            start_page,
            options: options.to_string(),
            page_length: self.page_length,
            view: self.view.clone(),
        };
        let first = request.first_start()?;
        Ok(CollectorResults::new(self.clone(), request, first))
    }

    /// Fetch a single page starting at the 1-based match index `start`.
    pub async fn fetch_page(&self, request: &SearchRequest, start: u64) -> Result<SearchPage> {
        debug!(extension = %self.extension, start, page_length = request.page_length, "fetching search page");
        let resp = self
            .session
            .send(request.to_request(&self.extension, start))
            .await?
            .error_for_status(&format!("resource extension {}", self.extension))?;
        SearchPage::decode(&resp.body, start)
    }
}

/// Lifecycle of a [`CollectorResults`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CollectorState {
    Created,
    Fetching,
    HasPage,
    Exhausted,
    Closed,
}

/// Lazily paged sequence of documents matched by a search.
///
/// Must be closed by its owner; `close` is idempotent.
pub struct CollectorResults {
    collector: SearchCollector,
    request: SearchRequest,
    state: CollectorState,
    search_result: Option<SearchResult>,
    buffer: VecDeque<Document>,
    next_start: Option<u64>,
    pages_fetched: u32,
}

impl CollectorResults {
    fn new(collector: SearchCollector, request: SearchRequest, first: u64) -> Self {
        Self {
            collector,
            request,
            state: CollectorState::Created,
            search_result: None,
            buffer: VecDeque::new(),
            next_start: Some(first),
            pages_fetched: 0,
        }
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn request(&self) -> &SearchRequest {
        &self.request
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    /// Whether another matched document is available, fetching the next page
    /// if the current one is used up and the server reported more.
    pub async fn has_next(&mut self) -> Result<bool> {
        loop {
            match self.state {
                CollectorState::Closed | CollectorState::Exhausted => return Ok(false),
                CollectorState::HasPage if !self.buffer.is_empty() => return Ok(true),
                CollectorState::HasPage | CollectorState::Created | CollectorState::Fetching => {
                    match self.next_start {
                        Some(start) => self.fetch(start).await?,
                        None => {
                            self.state = CollectorState::Exhausted;
                            return Ok(false);
                        }
                    }
                }
            }
        }
    }

    /// Next matched document, in result order.
    #[allow(clippy::should_implement_trait)]
    pub async fn next(&mut self) -> Result<Document> {
        if self.state == CollectorState::Closed {
            return Err(DocDbError::IllegalState("collector results are closed".into()));
        }
        if !self.has_next().await? {
            return Err(DocDbError::IllegalState("no more matched documents".into()));
        }
        self.buffer
            .pop_front()
            .ok_or_else(|| DocDbError::IllegalState("no more matched documents".into()))
    }

    /// The search response of the first fetched page.
    pub fn search_result(&self) -> Result<&SearchResult> {
        if self.state == CollectorState::Closed {
            return Err(DocDbError::IllegalState("collector results are closed".into()));
        }
        self.search_result.as_ref().ok_or_else(|| {
            DocDbError::IllegalState("search result is not available before the first fetch".into())
        })
    }

    /// Drain every remaining document, then close.
    pub async fn drain(&mut self) -> Result<Vec<Document>> {
        let mut out = Vec::new();
        while self.has_next().await? {
            out.push(self.next().await?);
        }
        self.close();
        Ok(out)
    }

    /// Release buffered pages. Safe to call repeatedly and before iterating.
    pub fn close(&mut self) {
        if self.state == CollectorState::Closed {
            return;
        }
        self.buffer.clear();
        self.next_start = None;
        self.state = CollectorState::Closed;
        debug!(extension = %self.collector.extension, pages = self.pages_fetched, "collector results closed");
    }

    async fn fetch(&mut self, start: u64) -> Result<()> {
        let previous = self.state;
        self.state = CollectorState::Fetching;
        let page = match self.collector.fetch_page(&self.request, start).await {
            Ok(page) => page,
            Err(e) => {
                self.state = previous;
                return Err(e);
            }
        };

        self.pages_fetched += 1;
        if self.search_result.is_none() {
            self.search_result = Some(page.result.clone());
        }
        // Pages must advance.
        self.next_start = page.next_start.filter(|next| *next > start);
        self.buffer.extend(page.documents);
        self.state = if self.buffer.is_empty() && self.next_start.is_none() {
            CollectorState::Exhausted
        } else {
            CollectorState::HasPage
        };
        debug!(start, buffered = self.buffer.len(), next = ?self.next_start, "search page fetched");
        Ok(())
    }
}

impl Drop for CollectorResults {
    fn drop(&mut self) {
        if !matches!(self.state, CollectorState::Closed | CollectorState::Exhausted) {
            debug!(extension = %self.collector.extension, state = ?self.state, "collector results dropped without close");
        }
    }
}
