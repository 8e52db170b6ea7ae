use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::config::{AuthType, ConnectionConfig, Credentials, Role};
use crate::documents::DocumentStore;
use crate::error::{DocDbError, Result};
use crate::extensions::ExtensionRegistry;
use crate::meta::ResourcePaths;
use crate::options::QueryOptionStore;
use crate::search::SearchCollector;
use crate::transport::{Request, Response, Transport};

struct SessionInner {
    transport: Arc<dyn Transport>,
    role: Role,
    released: AtomicBool,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if !self.released.load(Ordering::Acquire) {
            warn!(role = %self.role, mode = self.transport.mode(), "client session dropped without release");
        }
    }
}

/// Authenticated handle on a document-database server for one role.
///
/// Clones are views of the same session: releasing through any of them
/// releases all of them. Every opened session must be released exactly once;
/// [`with_session`] does this on every exit path.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<SessionInner>,
}

impl ClientSession {
    /// Open a session over HTTP using the credentials configured for `role`.
    ///
    /// The server is pinged so that unreachable hosts and rejected credentials
    /// surface here. Missing privileges only surface on the first call that
    /// needs them.
    #[cfg(feature = "http")]
    pub async fn open(config: &ConnectionConfig, role: Role) -> Result<Self> {
        let transport = crate::http::HttpTransport::new(config, role)?;
        debug!(host = %config.host, port = config.port, %role, "opening client session");
        Self::connect(Arc::new(transport), role).await
    }

    /// Open a session over a caller-supplied transport.
    pub async fn connect(transport: Arc<dyn Transport>, role: Role) -> Result<Self> {
        let session = Self {
            inner: Arc::new(SessionInner {
                transport,
                role,
                released: AtomicBool::new(false),
            }),
        };
        if let Err(e) = session.ping().await {
            session.inner.released.store(true, Ordering::Release);
            return Err(e);
        }
        Ok(session)
    }

    pub fn builder() -> ClientSessionBuilder {
        ClientSessionBuilder::new()
    }

    pub fn role(&self) -> Role {
        self.inner.role
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Release the session. A second release is a caller error.
    pub fn release(&self) -> Result<()> {
        self.inner
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| DocDbError::IllegalState("client session already released".into()))?;
        debug!(role = %self.inner.role, "client session released");
        Ok(())
    }

    /// Check that the server is reachable and accepts this session's credentials.
    pub async fn ping(&self) -> Result<()> {
        self.send(Request::get(ResourcePaths::PING))
            .await?
            .error_for_status("server ping")?;
        Ok(())
    }

    pub fn extension_registry(&self) -> ExtensionRegistry {
        ExtensionRegistry::new(self.clone())
    }

    pub fn query_option_store(&self) -> QueryOptionStore {
        QueryOptionStore::new(self.clone())
    }

    pub fn document_store(&self) -> DocumentStore {
        DocumentStore::new(self.clone())
    }

    /// Collector that searches through the named resource extension.
    pub fn search_collector(&self, extension: impl Into<String>) -> SearchCollector {
        SearchCollector::new(self.clone(), extension)
    }

    /// Send a raw request, failing if the session has been released.
    pub async fn send(&self, request: Request) -> Result<Response> {
        if self.is_released() {
            return Err(DocDbError::IllegalState(
                "client session used after release".into(),
            ));
        }
        self.inner.transport.send(request).await
    }
}

/// Open a session, run `f` with it, and release it whatever the outcome.
///
/// An error from `f` takes precedence over an error from releasing.
pub async fn with_session<T, F, Fut>(config: &ConnectionConfig, role: Role, f: F) -> Result<T>
where
    F: FnOnce(ClientSession) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    #[cfg(feature = "http")]
    {
        let session = ClientSession::open(config, role).await?;
        scoped(session, f).await
    }
    #[cfg(not(feature = "http"))]
    {
        let _ = (config, role, f);
        Err(DocDbError::Config(
            "the http feature is required to open sessions from a ConnectionConfig".into(),
        ))
    }
}

/// Run `f` with an already-open session and release it afterwards.
pub async fn scoped<T, F, Fut>(session: ClientSession, f: F) -> Result<T>
where
    F: FnOnce(ClientSession) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let result = f(session.clone()).await;
    let released = session.release();
    match (result, released) {
        (Err(e), _) => Err(e),
        (Ok(_), Err(e)) => Err(e),
        (Ok(v), Ok(())) => Ok(v),
    }
}

/// Builder for configuring and opening a [`ClientSession`].
///
/// Chainable alternative to assembling a [`ConnectionConfig`] by hand.
pub struct ClientSessionBuilder {
    config: ConnectionConfig,
    role: Role,
}

impl ClientSessionBuilder {
    fn new() -> Self {
        Self {
            config: ConnectionConfig::new("localhost", 8000, AuthType::Digest),
            role: Role::Reader,
        }
    }

    /// Start from a resolved configuration. Individual fields can still be
    /// overridden afterwards via the other builder methods.
    pub fn from_config(config: ConnectionConfig) -> Self {
        Self {
            config,
            role: Role::Reader,
        }
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    pub fn auth_type(mut self, auth_type: AuthType) -> Self {
        self.config.auth_type = auth_type;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Credentials to authenticate with; the session is opened for `role`.
    pub fn credentials(
        mut self,
        role: Role,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.config = self
            .config
            .with_credentials(role, Credentials::new(user, password));
        self.role = role;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Open a [`ClientSession`] using the current builder configuration.
    #[cfg(feature = "http")]
    pub async fn open(self) -> Result<ClientSession> {
        if self.config.port == 0 {
            return Err(DocDbError::Config("port must be positive".into()));
        }
        ClientSession::open(&self.config, self.role).await
    }
}
