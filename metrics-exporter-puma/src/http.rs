use std::{io, time::Duration};

use http_body_util::{BodyExt as _, Collected, Empty};
use hyper::{body::Bytes, Uri};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use thiserror::Error;
use tokio::runtime::{self, Runtime};

/// Errors that could occur while fetching a document over HTTP.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URI could not be parsed.
    #[error("invalid URI '{uri}': {reason}")]
    InvalidUri {
        /// The URI as given.
        uri: String,

        /// Details about the parsing failure.
        reason: String,
    },

    /// The request could not be sent, or no response was received.
    #[error("request failed: {0}")]
    Request(#[from] hyper_util::client::legacy::Error),

    /// The server responded with a non-success status.
    #[error("unexpected status {status}")]
    Status {
        /// The response status code.
        status: u16,
    },

    /// The response body could not be read.
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),

    /// The response body was not valid UTF-8.
    #[error("response body is not valid UTF-8")]
    Utf8,

    /// No complete response was received before the timeout elapsed.
    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

/// A blocking HTTP/1 client for small JSON documents.
///
/// Requests are driven on a private current-thread Tokio runtime, so this client can be used from a plain OS thread.
/// Every request is bounded by the configured timeout, covering connecting, sending, and reading the body.
pub struct HttpFetcher {
    runtime: Runtime,
    client: Client<HttpConnector, Empty<Bytes>>,
    timeout: Duration,
}

impl HttpFetcher {
    /// Creates a new `HttpFetcher` with the given request timeout.
    ///
    /// # Errors
    ///
    /// If the underlying runtime cannot be created, an error is returned.
    pub fn new(timeout: Duration) -> io::Result<Self> {
        let runtime = runtime::Builder::new_current_thread().enable_all().build()?;
        let client = {
            let _guard = runtime.enter();
            Client::builder(TokioExecutor::new()).build_http()
        };

        Ok(Self { runtime, client, timeout })
    }

    /// Returns the request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Issues a GET request to `uri` and returns the response body as a string.
    ///
    /// # Errors
    ///
    /// If the URI is invalid, the request fails or times out, the status is not a success, or the body is not valid
    /// UTF-8, an error is returned.
    pub fn get(&self, uri: &str) -> Result<String, FetchError> {
        let uri = uri.parse::<Uri>().map_err(|e| FetchError::InvalidUri {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;

        let body = self.runtime.block_on(async {
            tokio::time::timeout(self.timeout, fetch(&self.client, uri))
                .await
                .unwrap_or(Err(FetchError::Timeout(self.timeout)))
        })?;

        String::from_utf8(body.to_vec()).map_err(|_| FetchError::Utf8)
    }
}

async fn fetch(client: &Client<HttpConnector, Empty<Bytes>>, uri: Uri) -> Result<Bytes, FetchError> {
    let response = client.get(uri).await?;
    if !response.status().is_success() {
        return Err(FetchError::Status { status: response.status().as_u16() });
    }

    let body = response.into_body().collect().await.map(Collected::to_bytes)?;
    Ok(body)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{FetchError, HttpFetcher};

    #[test]
    fn invalid_uri() {
        let fetcher = HttpFetcher::new(Duration::from_millis(100)).unwrap();
        let result = fetcher.get("not a uri");
        assert!(matches!(result, Err(FetchError::InvalidUri { .. })));
    }
}
