use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER, WWW_AUTHENTICATE};
use reqwest::Url;
use tracing::debug;

use crate::auth::{DigestChallenge, DigestSession};
use crate::config::{AuthType, ConnectionConfig, Credentials, RetryPolicy, Role};
use crate::error::{DocDbError, Result};
use crate::transport::{Method, Request, Response, Transport};

/// REST transport over HTTP using `reqwest`, authenticating as one role.
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: Url,
    database: Option<String>,
    auth_type: AuthType,
    credentials: Credentials,
    retry: RetryPolicy,
    digest: Mutex<Option<DigestSession>>,
}

impl HttpTransport {
    /// Build a transport for the given role's credentials.
    pub fn new(config: &ConnectionConfig, role: Role) -> Result<Self> {
        let credentials = config.credentials(role)?.clone();
        let base_url = Url::parse(&format!("http://{}:{}/", config.host, config.port))
            .map_err(|e| DocDbError::Config(format!("invalid host {}: {e}", config.host)))?;

        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder
            .build()
            .map_err(|e| DocDbError::Connect(format!("failed to build http client: {e}")))?;

        Ok(Self {
            http,
            base_url,
            database: config.database.clone(),
            auth_type: config.auth_type,
            credentials,
            retry: config.retry,
            digest: Mutex::new(None),
        })
    }

    fn url_for(&self, request: &Request) -> Result<Url> {
        let mut url = self
            .base_url
            .join(request.path.trim_start_matches('/'))
            .map_err(|e| DocDbError::InvalidInput(format!("invalid path {}: {e}", request.path)))?;
        if !request.query.is_empty() || self.database.is_some() {
            let mut pairs = url.query_pairs_mut();
            for (k, v) in &request.query {
                pairs.append_pair(k, v);
            }
            if let Some(db) = &self.database {
                pairs.append_pair("database", db);
            }
        }
        Ok(url)
    }

    fn authorization(&self, method: Method, url: &Url) -> Result<Option<String>> {
        if self.auth_type != AuthType::Digest {
            return Ok(None);
        }
        let mut guard = self
            .digest
            .lock()
            .map_err(|_| DocDbError::IllegalState("failed to lock digest state".into()))?;
        let Some(session) = guard.as_mut() else {
            return Ok(None);
        };
        let uri = match url.query() {
            Some(q) => format!("{}?{q}", url.path()),
            None => url.path().to_string(),
        };
        Ok(Some(session.authorize(&self.credentials, method.as_str(), &uri)))
    }

    /// Cache a fresh Digest challenge. Returns false when the response
    /// carried none, meaning the credentials themselves were rejected.
    fn accept_challenge(&self, header: Option<&str>, had_nonce: bool) -> Result<bool> {
        let Some(challenge) = header.and_then(DigestChallenge::parse) else {
            return Ok(false);
        };
        // A repeated rejection of a non-stale nonce means bad credentials.
        if had_nonce && !challenge.stale {
            return Ok(false);
        }
        let mut guard = self
            .digest
            .lock()
            .map_err(|_| DocDbError::IllegalState("failed to lock digest state".into()))?;
        *guard = Some(DigestSession::new(challenge));
        Ok(true)
    }

    fn has_nonce(&self) -> bool {
        self.digest.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Per-request bookkeeping for challenge replays and retries.
#[derive(Debug)]
struct Attempt {
    method: Method,
    resendable: bool,
    challenged: bool,
    retries: u32,
}

/// What to do with a response before handing it back.
#[derive(Debug, PartialEq, Eq)]
enum Step {
    Deliver,
    /// Send again with the freshly cached Digest challenge.
    Replay,
    /// Challenged, but the body was a one-shot stream.
    Resend,
    Retry(Duration),
}

impl HttpTransport {
    fn next_step(
        &self,
        attempt: &mut Attempt,
        status: u16,
        challenge: Option<&str>,
        retry_after: Option<&str>,
    ) -> Result<Step> {
        if status == 401 && self.auth_type == AuthType::Digest && !attempt.challenged {
            let had_nonce = self.has_nonce();
            if self.accept_challenge(challenge, had_nonce)? {
                attempt.challenged = true;
                return Ok(if attempt.resendable {
                    Step::Replay
                } else {
                    Step::Resend
                });
            }
        }

        if status == 503
            && attempt.retries < self.retry.max_retries
            && attempt.method.is_idempotent()
            && attempt.resendable
        {
            attempt.retries += 1;
            let delay = retry_after
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs)
                .unwrap_or(self.retry.delay);
            return Ok(Step::Retry(delay));
        }

        Ok(Step::Deliver)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: Request) -> Result<Response> {
        let resendable = request.is_resendable();
        let method = request.method;
        let url = self.url_for(&request)?;
        let content_type = request.content_type.clone();
        let accept = request.accept.clone();
        let body = request.body.map(|c| c.into_bytes()).transpose()?;

        let mut attempt = Attempt {
            method,
            resendable,
            challenged: false,
            retries: 0,
        };
        loop {
            let mut builder = self.http.request(to_reqwest(method), url.clone());
            if let Some(ct) = &content_type {
                builder = builder.header(CONTENT_TYPE, ct);
            }
            if let Some(a) = &accept {
                builder = builder.header(ACCEPT, a);
            }
            builder = match self.auth_type {
                AuthType::Basic => {
                    builder.basic_auth(&self.credentials.user, Some(&self.credentials.password))
                }
                AuthType::Digest => match self.authorization(method, &url)? {
                    Some(header) => builder.header(AUTHORIZATION, header),
                    None => builder,
                },
            };
            if let Some(bytes) = &body {
                builder = builder.body(bytes.clone());
            }

            debug!(%method, url = %url, "sending request");
            let resp = builder.send().await?;
            let status = resp.status().as_u16();

            let headers = resp.headers();
            let challenge = headers.get(WWW_AUTHENTICATE).and_then(|v| v.to_str().ok());
            let retry_after = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok());
            match self.next_step(&mut attempt, status, challenge, retry_after)? {
                Step::Deliver => {}
                Step::Replay => {
                    debug!(%method, url = %url, "replaying request after digest challenge");
                    continue;
                }
                Step::Retry(delay) => {
                    debug!(%method, url = %url, retries = attempt.retries, ?delay, "service unavailable; retrying");
                    tokio::time::sleep(delay).await;
                    continue;
                }
                Step::Resend => {
                    return Err(DocDbError::Resend(format!(
                        "{method} {} was challenged but its content stream cannot be replayed",
                        url.path()
                    )));
                }
            }

            let content_type = resp
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = resp.bytes().await?.to_vec();
            debug!(%method, url = %url, status, bytes = body.len(), "received response");
            return Ok(Response {
                status,
                content_type,
                body,
            });
        }
    }

    fn mode(&self) -> &'static str {
        "http"
    }
}

fn to_reqwest(method: Method) -> reqwest::Method {
    match method {
        Method::Get => reqwest::Method::GET,
        Method::Head => reqwest::Method::HEAD,
        Method::Put => reqwest::Method::PUT,
        Method::Post => reqwest::Method::POST,
        Method::Delete => reqwest::Method::DELETE,
    }
}
