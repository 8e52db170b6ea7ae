use std::sync::Arc;

use serde_json::Value;

use crate::config::{ConnectionConfig, Role};
use crate::documents::DocumentStore;
use crate::error::{DocDbError, Result};
use crate::extensions::{ExtensionDescriptor, ExtensionRegistry, ExtensionSummary};
use crate::options::{QueryOptionStore, QueryOptions};
use crate::search::{CollectorResults, CollectorState, SearchCollector, SearchQuery};
use crate::session::ClientSession;
use crate::transport::Transport;
use crate::types::{Content, Document, Format, SearchResult};

/// Shared inner state for synchronous wrappers.
///
/// Holds a Tokio runtime and the underlying async `ClientSession`.
struct Inner {
    rt: tokio::runtime::Runtime,
    session: ClientSession,
}

/// Blocking/synchronous wrapper around [`ClientSession`].
///
/// This type is only available when the `sync` feature is enabled. It runs all
/// operations on an internal Tokio runtime using `block_on`.
///
/// Note: do not call these blocking APIs from within an existing Tokio runtime,
/// as that can lead to deadlocks. In async contexts, use the async
/// [`ClientSession`] APIs directly instead.
#[derive(Clone)]
pub struct SyncClientSession {
    inner: Arc<Inner>,
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| DocDbError::Other(anyhow::Error::new(e)))
}

impl SyncClientSession {
    /// Open a blocking session over HTTP.
    #[cfg(feature = "http")]
    pub fn open(config: &ConnectionConfig, role: Role) -> Result<Self> {
        let rt = runtime()?;
        let session = rt.block_on(ClientSession::open(config, role))?;
        Ok(Self {
            inner: Arc::new(Inner { rt, session }),
        })
    }

    /// Open a blocking session over a caller-supplied transport.
    pub fn connect(transport: Arc<dyn Transport>, role: Role) -> Result<Self> {
        let rt = runtime()?;
        let session = rt.block_on(ClientSession::connect(transport, role))?;
        Ok(Self {
            inner: Arc::new(Inner { rt, session }),
        })
    }

    /// The async session this wrapper drives.
    pub fn session(&self) -> &ClientSession {
        &self.inner.session
    }

    pub fn release(&self) -> Result<()> {
        self.inner.session.release()
    }

    pub fn ping(&self) -> Result<()> {
        self.inner.rt.block_on(self.inner.session.ping())
    }

    pub fn extension_registry(&self) -> SyncExtensionRegistry {
        SyncExtensionRegistry {
            inner: Arc::clone(&self.inner),
            registry: self.inner.session.extension_registry(),
        }
    }

    pub fn query_option_store(&self) -> SyncQueryOptionStore {
        SyncQueryOptionStore {
            inner: Arc::clone(&self.inner),
            store: self.inner.session.query_option_store(),
        }
    }

    pub fn document_store(&self) -> SyncDocumentStore {
        SyncDocumentStore {
            inner: Arc::clone(&self.inner),
            store: self.inner.session.document_store(),
        }
    }

    pub fn search_collector(&self, extension: impl Into<String>) -> SyncSearchCollector {
        SyncSearchCollector {
            inner: Arc::clone(&self.inner),
            collector: self.inner.session.search_collector(extension),
        }
    }
}

/// Blocking [`ExtensionRegistry`].
pub struct SyncExtensionRegistry {
    inner: Arc<Inner>,
    registry: ExtensionRegistry,
}

impl SyncExtensionRegistry {
    pub fn install(&self, descriptor: ExtensionDescriptor) -> Result<()> {
        self.inner.rt.block_on(self.registry.install(descriptor))
    }

    pub fn remove(&self, name: &str) -> Result<()> {
        self.inner.rt.block_on(self.registry.remove(name))
    }

    pub fn read_source(&self, name: &str) -> Result<Vec<u8>> {
        self.inner.rt.block_on(self.registry.read_source(name))
    }

    pub fn list(&self) -> Result<Vec<ExtensionSummary>> {
        self.inner.rt.block_on(self.registry.list())
    }
}

/// Blocking [`QueryOptionStore`].
pub struct SyncQueryOptionStore {
    inner: Arc<Inner>,
    store: QueryOptionStore,
}

impl SyncQueryOptionStore {
    pub fn write(&self, name: &str, options: &QueryOptions) -> Result<()> {
        self.inner.rt.block_on(self.store.write(name, options))
    }

    pub fn read(&self, name: &str, format: Format) -> Result<QueryOptions> {
        self.inner.rt.block_on(self.store.read(name, format))
    }

    pub fn delete(&self, name: &str) -> Result<()> {
        self.inner.rt.block_on(self.store.delete(name))
    }

    pub fn list(&self) -> Result<Vec<String>> {
        self.inner.rt.block_on(self.store.list())
    }
}

/// Blocking [`DocumentStore`].
pub struct SyncDocumentStore {
    inner: Arc<Inner>,
    store: DocumentStore,
}

impl SyncDocumentStore {
    pub fn write(&self, address: &str, content: impl Into<Content>, format: Format) -> Result<()> {
        self.inner
            .rt
            .block_on(self.store.write(address, content, format))
    }

    pub fn read(&self, address: &str) -> Result<Document> {
        self.inner.rt.block_on(self.store.read(address))
    }

    pub fn exists(&self, address: &str) -> Result<bool> {
        self.inner.rt.block_on(self.store.exists(address))
    }

    pub fn delete(&self, address: &str) -> Result<()> {
        self.inner.rt.block_on(self.store.delete(address))
    }
}

/// Blocking [`SearchCollector`].
pub struct SyncSearchCollector {
    inner: Arc<Inner>,
    collector: SearchCollector,
}

impl SyncSearchCollector {
    pub fn page_length(mut self, page_length: u32) -> Self {
        self.collector = self.collector.page_length(page_length);
        self
    }

    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.collector = self.collector.view(view);
        self
    }

    pub fn collect(
        &self,
        query_text: &str,
        start_page: u64,
        options: &str,
    ) -> Result<SyncCollectorResults> {
        let results = self
            .inner
            .rt
            .block_on(self.collector.collect(query_text, start_page, options))?;
        Ok(SyncCollectorResults {
            inner: Arc::clone(&self.inner),
            results,
        })
    }

    pub fn collect_structured(
        &self,
        query: Value,
        start_page: u64,
        options: &str,
    ) -> Result<SyncCollectorResults> {
        let results = self
            .inner
            .rt
            .block_on(self.collector.collect_structured(query, start_page, options))?;
        Ok(SyncCollectorResults {
            inner: Arc::clone(&self.inner),
            results,
        })
    }

    pub fn prepare(
        &self,
        query: SearchQuery,
        start_page: u64,
        options: &str,
    ) -> Result<SyncCollectorResults> {
        let results = self.collector.prepare(query, start_page, options)?;
        Ok(SyncCollectorResults {
            inner: Arc::clone(&self.inner),
            results,
        })
    }
}

/// Blocking [`CollectorResults`], usable as an [`Iterator`].
///
/// Iteration stops after the last match, after `close`, or after yielding the
/// first error.
pub struct SyncCollectorResults {
    inner: Arc<Inner>,
    results: CollectorResults,
}

impl SyncCollectorResults {
    pub fn has_next(&mut self) -> Result<bool> {
        self.inner.rt.block_on(self.results.has_next())
    }

    pub fn next_document(&mut self) -> Result<Document> {
        self.inner.rt.block_on(self.results.next())
    }

    pub fn search_result(&self) -> Result<&SearchResult> {
        self.results.search_result()
    }

    pub fn state(&self) -> CollectorState {
        self.results.state()
    }

    pub fn close(&mut self) {
        self.results.close();
    }
}

impl Iterator for SyncCollectorResults {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.has_next() {
            Ok(true) => Some(self.next_document()),
            Ok(false) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}
