use tracing::{debug, info};

use crate::error::Result;
use crate::meta::{ResourceNames, ResourcePaths};
use crate::session::ClientSession;
use crate::transport::Request;
use crate::types::{Content, Document, Format};

/// Writes, reads and deletes documents addressed by URI.
#[derive(Clone)]
pub struct DocumentStore {
    session: ClientSession,
}

impl DocumentStore {
    pub(crate) fn new(session: ClientSession) -> Self {
        Self { session }
    }

    /// Write `content` at `address`, overwriting any existing document.
    pub async fn write(
        &self,
        address: &str,
        content: impl Into<Content>,
        format: Format,
    ) -> Result<()> {
        ResourceNames::validate_address(address)?;
        self.session
            .send(
                Request::put(ResourcePaths::DOCUMENTS)
                    .query("uri", address)
                    .body(format.mime_type(), content),
            )
            .await?
            .error_for_status(&format!("write document {address}"))?;
        info!(uri = address, format = format.as_str(), "wrote document");
        Ok(())
    }

    /// Read the document at `address`. Fails with `NotFound` when absent.
    pub async fn read(&self, address: &str) -> Result<Document> {
        ResourceNames::validate_address(address)?;
        let resp = self
            .session
            .send(Request::get(ResourcePaths::DOCUMENTS).query("uri", address))
            .await?
            .error_for_status(&format!("document {address}"))?;
        let format = resp
            .content_type
            .as_deref()
            .map(Format::from_mime)
            .unwrap_or(Format::Binary);
        Ok(Document {
            uri: address.to_string(),
            format,
            content: resp.body,
        })
    }

    /// Whether a document exists at `address`.
    pub async fn exists(&self, address: &str) -> Result<bool> {
        ResourceNames::validate_address(address)?;
        let resp = self
            .session
            .send(Request::head(ResourcePaths::DOCUMENTS).query("uri", address))
            .await?;
        if resp.status == 404 {
            debug!(uri = address, "document absent");
            return Ok(false);
        }
        resp.error_for_status(&format!("document {address}"))?;
        Ok(true)
    }

    /// Delete the document at `address`. Fails with `NotFound` when absent.
    pub async fn delete(&self, address: &str) -> Result<()> {
        ResourceNames::validate_address(address)?;
        self.session
            .send(Request::delete(ResourcePaths::DOCUMENTS).query("uri", address))
            .await?
            .error_for_status(&format!("document {address}"))?;
        info!(uri = address, "deleted document");
        Ok(())
    }
}
