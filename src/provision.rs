//! Setup and teardown of the server-side resources a search depends on.

use tracing::{info, warn};

use crate::error::{DocDbError, Result};
use crate::extensions::ExtensionDescriptor;
use crate::options::QueryOptions;
use crate::session::ClientSession;
use crate::types::{Content, Format};

/// A document to load during setup.
#[derive(Debug)]
pub struct SeedDocument {
    pub address: String,
    pub format: Format,
    pub content: Content,
}

impl SeedDocument {
    pub fn new(address: impl Into<String>, format: Format, content: impl Into<Content>) -> Self {
        Self {
            address: address.into(),
            format,
            content: content.into(),
        }
    }
}

/// Extension, query options and documents installed together and torn down
/// together.
#[derive(Debug, Default)]
pub struct Provisioning {
    pub extension: Option<ExtensionDescriptor>,
    pub options: Vec<(String, QueryOptions)>,
    pub documents: Vec<SeedDocument>,
}

/// Outcome of a best-effort teardown.
#[derive(Debug, Default)]
pub struct TeardownReport {
    /// Resources that were removed.
    pub removed: Vec<String>,
    /// Resources that were already gone.
    pub missing: Vec<String>,
    /// Resources whose removal failed for another reason.
    pub failed: Vec<(String, DocDbError)>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    fn record(&mut self, what: String, result: Result<()>) {
        match result {
            Ok(()) => self.removed.push(what),
            Err(DocDbError::NotFound(_)) => {
                warn!(resource = %what, "teardown: resource already absent");
                self.missing.push(what);
            }
            Err(e) => {
                warn!(resource = %what, error = %e, "teardown: removal failed");
                self.failed.push((what, e));
            }
        }
    }
}

impl Provisioning {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extension(mut self, descriptor: ExtensionDescriptor) -> Self {
        self.extension = Some(descriptor);
        self
    }

    pub fn options(mut self, name: impl Into<String>, options: QueryOptions) -> Self {
        self.options.push((name.into(), options));
        self
    }

    pub fn document(mut self, document: SeedDocument) -> Self {
        self.documents.push(document);
        self
    }

    /// Install everything: extension, then options, then documents.
    ///
    /// Stops at the first error; nothing already installed is rolled back.
    /// Streamed contents are read into memory on first use, so calling
    /// `install` again after a failure sends the same bytes.
    pub async fn install(&mut self, session: &ClientSession) -> Result<()> {
        if let Some(descriptor) = self.extension.as_mut() {
            let source = descriptor.source.as_mut().map(buffered).transpose()?;
            let request = ExtensionDescriptor {
                name: descriptor.name.clone(),
                metadata: descriptor.metadata.clone(),
                language: descriptor.language,
                source: source.map(Content::Bytes),
                methods: descriptor.methods.clone(),
            };
            session.extension_registry().install(request).await?;
        }

        let store = session.query_option_store();
        for (name, options) in &self.options {
            store.write(name, options).await?;
        }

        let docs = session.document_store();
        for doc in &mut self.documents {
            let content = buffered(&mut doc.content)?;
            docs.write(&doc.address, content, doc.format).await?;
        }

        info!(
            extension = self.extension.as_ref().map(|e| e.name.as_str()),
            options = self.options.len(),
            documents = self.documents.len(),
            "provisioning installed"
        );
        Ok(())
    }

    /// Remove everything in reverse order of installation, continuing past
    /// failures.
    pub async fn teardown(&self, session: &ClientSession) -> TeardownReport {
        let mut report = TeardownReport::default();

        let docs = session.document_store();
        for doc in &self.documents {
            let result = docs.delete(&doc.address).await;
            report.record(format!("document {}", doc.address), result);
        }

        let store = session.query_option_store();
        for (name, _) in &self.options {
            let result = store.delete(name).await;
            report.record(format!("query options {name}"), result);
        }

        if let Some(descriptor) = &self.extension {
            let result = session.extension_registry().remove(&descriptor.name).await;
            report.record(format!("extension {}", descriptor.name), result);
        }

        info!(
            removed = report.removed.len(),
            missing = report.missing.len(),
            failed = report.failed.len(),
            "provisioning torn down"
        );
        report
    }
}

/// Copy of `content`'s bytes, draining a reader into `content` first.
fn buffered(content: &mut Content) -> Result<Vec<u8>> {
    if let Content::Bytes(bytes) = content {
        return Ok(bytes.clone());
    }
    let bytes = std::mem::replace(content, Content::Bytes(Vec::new())).into_bytes()?;
    *content = Content::Bytes(bytes.clone());
    Ok(bytes)
}
