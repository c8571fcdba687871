use std::time::Duration;

use thiserror::Error;

use crate::http::{FetchError, HttpFetcher};

/// Errors that could occur while pulling a stats snapshot.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The snapshot could not be fetched over HTTP.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// The server's statistics are not available right now.
    #[error("stats unavailable: {0}")]
    Unavailable(String),
}

/// A source of raw Puma statistics.
///
/// Each call returns the current statistics as a JSON document, in the format produced by `Puma.stats`.
pub trait StatsSource: Send {
    /// Pulls the current statistics.
    ///
    /// # Errors
    ///
    /// If the statistics cannot be obtained, an error is returned.
    fn fetch(&mut self) -> Result<String, SourceError>;
}

impl<F> StatsSource for F
where
    F: FnMut() -> Result<String, SourceError> + Send,
{
    fn fetch(&mut self) -> Result<String, SourceError> {
        self()
    }
}

/// Reads statistics from Puma's control app.
///
/// The control app must be activated on a TCP address, such as with `activate_control_app 'tcp://127.0.0.1:9293',
/// { auth_token: 'secret' }`. Both `tcp://` and `http://` control URLs are accepted.
pub struct ControlAppSource {
    stats_uri: String,
    fetcher: HttpFetcher,
}

impl ControlAppSource {
    /// Creates a new `ControlAppSource`.
    ///
    /// # Errors
    ///
    /// If the underlying HTTP runtime cannot be created, an error is returned.
    pub fn new(control_url: &str, token: Option<&str>, timeout: Duration) -> std::io::Result<Self> {
        Ok(Self { stats_uri: stats_uri(control_url, token), fetcher: HttpFetcher::new(timeout)? })
    }

    /// Returns the URI polled for statistics.
    pub fn stats_uri(&self) -> &str {
        &self.stats_uri
    }
}

impl StatsSource for ControlAppSource {
    fn fetch(&mut self) -> Result<String, SourceError> {
        Ok(self.fetcher.get(&self.stats_uri)?)
    }
}

fn stats_uri(control_url: &str, token: Option<&str>) -> String {
    let base = control_url.strip_prefix("tcp://").map_or_else(
        || control_url.trim_end_matches('/').to_string(),
        |host_port| format!("http://{}", host_port.trim_end_matches('/')),
    );

    match token {
        Some(token) => format!("{base}/stats?token={token}"),
        None => format!("{base}/stats"),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{stats_uri, ControlAppSource, SourceError, StatsSource};

    #[test]
    fn control_app_uri() {
        assert_eq!(
            stats_uri("tcp://127.0.0.1:9293", Some("secret")),
            "http://127.0.0.1:9293/stats?token=secret"
        );
        assert_eq!(stats_uri("http://localhost:9293/", None), "http://localhost:9293/stats");

        let source =
            ControlAppSource::new("tcp://127.0.0.1:9293", Some("abc"), Duration::from_secs(1)).unwrap();
        assert_eq!(source.stats_uri(), "http://127.0.0.1:9293/stats?token=abc");
    }

    #[test]
    fn closure_source() {
        let mut calls = 0;
        let mut source = move || {
            calls += 1;
            if calls == 1 {
                Err(SourceError::Unavailable("booting".to_string()))
            } else {
                Ok(r#"{"running":1}"#.to_string())
            }
        };

        assert!(matches!(source.fetch(), Err(SourceError::Unavailable(_))));
        assert_eq!(source.fetch().unwrap(), r#"{"running":1}"#);
    }
}
