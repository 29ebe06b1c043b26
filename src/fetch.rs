//! Network access used by content processors.
//!
//! Processors never call an HTTP client directly; they go through the
//! [`Fetch`] handle carried by [`Fetcher`] on the render options. The
//! dispatcher inspects that choice: the default client is rebuilt inside
//! each execution unit, while a custom one cannot be handed to isolated
//! units and forces sequential rendering.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use ureq::Agent;

/// Timeout for a single outbound request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("request to {url} returned HTTP {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },
}

/// Minimal HTTP surface processors need.
pub trait Fetch: Send + Sync + fmt::Debug {
    /// POST a text body and return the response body as text.
    fn post_text(&self, url: &str, body: &str, user_agent: &str) -> Result<String, FetchError>;
}

/// Fetch strategy selected for a build.
#[derive(Debug, Clone, Default)]
pub enum Fetcher {
    /// The built-in HTTP client; each execution unit builds its own.
    #[default]
    Default,
    /// Caller-supplied implementation; rendering stays in-process.
    Custom(Arc<dyn Fetch>),
}

impl Fetcher {
    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom(_))
    }

    /// Materialize the strategy for one execution unit.
    pub fn instantiate(&self) -> Arc<dyn Fetch> {
        match self {
            Self::Default => Arc::new(HttpFetch::new()),
            Self::Custom(fetch) => Arc::clone(fetch),
        }
    }
}

/// Default client backed by a pooled `ureq` agent.
pub struct HttpFetch {
    agent: Agent,
}

impl fmt::Debug for HttpFetch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpFetch").finish_non_exhaustive()
    }
}

impl HttpFetch {
    pub fn new() -> Self {
        let agent = Agent::config_builder()
            .timeout_global(Some(REQUEST_TIMEOUT))
            .http_status_as_error(false)
            .build()
            .into();
        Self { agent }
    }
}

impl Default for HttpFetch {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetch for HttpFetch {
    fn post_text(&self, url: &str, body: &str, user_agent: &str) -> Result<String, FetchError> {
        let transport = |e: ureq::Error| FetchError::Transport {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self
            .agent
            .post(url)
            .header("Content-Type", "text/plain")
            .header("User-Agent", user_agent)
            .send(body.as_bytes())
            .map_err(transport)?;

        let status = response.status().as_u16();
        let mut response_body = response.into_body();
        if status >= 400 {
            let body = response_body
                .read_to_string()
                .unwrap_or_else(|_| String::from("(unable to read error body)"));
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                body,
            });
        }
        response_body.read_to_string().map_err(transport)
    }
}
