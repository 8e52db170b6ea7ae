//! Rust client SDK for a REST document-database server.
//!
//! Open a [`ClientSession`] for one role, then use its managers to install
//! server-side extensions, store query options, write documents and page
//! through search results with a [`SearchCollector`].

#[cfg(feature = "http")]
mod auth;
#[cfg(test)]
mod testing;

pub mod config;
pub mod documents;
pub mod error;
pub mod extensions;
#[cfg(feature = "http")]
pub mod http;
pub mod meta;
pub mod options;
pub mod provision;
pub mod search;
pub mod session;
#[cfg(feature = "sync")]
pub mod sync;
pub mod transport;
pub mod types;

pub use crate::config::{AuthType, ConnectionConfig, Credentials, Properties, RetryPolicy, Role};
pub use crate::documents::DocumentStore;
pub use crate::error::{DocDbError, Result, tolerate_not_found};
pub use crate::extensions::{
    ExtensionDescriptor, ExtensionLanguage, ExtensionMetadata, ExtensionRegistry,
    ExtensionSummary, MethodParameters, MethodType,
};
#[cfg(feature = "http")]
pub use crate::http::HttpTransport;
pub use crate::meta::{ResourceNames, ResourcePaths};
pub use crate::options::{QueryOptionStore, QueryOptions};
pub use crate::provision::{Provisioning, SeedDocument, TeardownReport};
pub use crate::search::{
    CollectorResults, CollectorState, SearchCollector, SearchPage, SearchQuery, SearchRequest,
};
pub use crate::session::{ClientSession, ClientSessionBuilder, scoped, with_session};
#[cfg(feature = "sync")]
pub use crate::sync::{SyncClientSession, SyncCollectorResults};
pub use crate::transport::{Method, Request, Response, Transport};
pub use crate::types::{Content, Document, Format, SearchResult};
