//! HTTP transport for tile requests.

use std::io::{self, Write};

use async_trait::async_trait;
use reqwest::header::USER_AGENT;
use reqwest::{Client, Response};
use thiserror::Error;

/// User agent sent with every tile request.
pub const DEFAULT_USER_AGENT: &str = "tilegrab/0.1";

/// Transport-level errors encountered while issuing tile requests.
///
/// Both variants are treated as transient by the fetch loop: the
/// request is retried once after a cooldown before the download phase
/// gives up for the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Fully qualified request URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description supplied by the server.
        message: String,
    },
    /// The request failed due to an I/O error.
    #[error("network error contacting {url}: {source}")]
    Network {
        /// Fully qualified request URL.
        url: String,
        /// I/O error reported by the transport.
        source: io::Error,
    },
}

/// One tile request: stream the response body into `sink`.
#[async_trait(?Send)]
pub trait TileSource {
    /// Fetch `url` and write the body to `sink`, returning the number
    /// of bytes written.
    async fn fetch_tile(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError>;
}

/// HTTP implementation of [`TileSource`].
#[derive(Debug)]
pub struct HttpTileSource {
    client: Client,
    user_agent: String,
}

impl HttpTileSource {
    /// Construct an HTTP-backed tile source with the default client
    /// settings.
    #[must_use]
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("client builder only fails with invalid configuration");
        Self {
            client,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }

    /// Override the default user agent string.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    async fn call(&self, url: &str) -> Result<Response, TransportError> {
        self.client
            .get(url)
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|err| convert_reqwest_error(err, url))?
            .error_for_status()
            .map_err(|err| convert_reqwest_error(err, url))
    }
}

impl Default for HttpTileSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait(?Send)]
impl TileSource for HttpTileSource {
    async fn fetch_tile(&self, url: &str, sink: &mut dyn Write) -> Result<u64, TransportError> {
        let response = self.call(url).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| convert_reqwest_error(err, url))?;
        sink.write_all(&body).map_err(|source| TransportError::Network {
            url: url.to_owned(),
            source,
        })?;
        Ok(body.len() as u64)
    }
}

fn convert_reqwest_error(error: reqwest::Error, url: &str) -> TransportError {
    if let Some(status) = error.status() {
        return TransportError::Http {
            url: url.to_owned(),
            status: status.as_u16(),
            message: error.to_string(),
        };
    }

    let kind = if error.is_timeout() {
        io::ErrorKind::TimedOut
    } else {
        io::ErrorKind::Other
    };
    TransportError::Network {
        url: url.to_owned(),
        source: io::Error::new(kind, error),
    }
}
