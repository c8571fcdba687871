use std::{fs, io, process::Command};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error};

use crate::{
    environment::Environment,
    http::{FetchError, HttpFetcher},
};

/// Variable holding the ECS task metadata endpoint (version 4) for the running container.
pub const ECS_METADATA_URI_VAR: &str = "ECS_CONTAINER_METADATA_URI_V4";

/// Resolves an identifier for the container or host the exporter runs in.
pub trait IdentityResolver: Send {
    /// Returns the identifier, or `None` if no identity could be determined.
    ///
    /// Resolution is best-effort and never fails: errors are logged and treated as a missing identity.
    fn resolve(&mut self) -> Option<String>;

    /// Returns `true` if the identity most recently returned by [`resolve`](IdentityResolver::resolve) is final.
    ///
    /// A final identity can be kept for the life of the process. An identity obtained through a fallback while the
    /// preferred source is failing is not final, and should be resolved again later.
    fn is_settled(&self) -> bool {
        true
    }
}

impl<F> IdentityResolver for F
where
    F: FnMut() -> Option<String> + Send,
{
    fn resolve(&mut self) -> Option<String> {
        self()
    }
}

/// Client used to query the container metadata endpoint.
pub trait MetadataClient: Send {
    /// Fetches the document at `uri`.
    ///
    /// # Errors
    ///
    /// If the document cannot be fetched, an error is returned.
    fn get(&self, uri: &str) -> Result<String, FetchError>;
}

impl MetadataClient for HttpFetcher {
    fn get(&self, uri: &str) -> Result<String, FetchError> {
        HttpFetcher::get(self, uri)
    }
}

/// Accessor for the operating system's hostname.
pub trait HostnameProvider: Send {
    /// Returns the hostname, possibly with surrounding whitespace.
    ///
    /// # Errors
    ///
    /// If the hostname cannot be read, an error is returned.
    fn hostname(&self) -> io::Result<String>;
}

impl<F> HostnameProvider for F
where
    F: Fn() -> io::Result<String> + Send,
{
    fn hostname(&self) -> io::Result<String> {
        self()
    }
}

/// Reads the hostname from the kernel, falling back to `/etc/hostname` and then the `hostname` command.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHostname;

impl HostnameProvider for SystemHostname {
    fn hostname(&self) -> io::Result<String> {
        fs::read_to_string("/proc/sys/kernel/hostname")
            .or_else(|_| fs::read_to_string("/etc/hostname"))
            .or_else(|_| {
                let output = Command::new("hostname").output()?;
                if !output.status.success() {
                    return Err(io::Error::other(format!("`hostname` exited with {}", output.status)));
                }

                String::from_utf8(output.stdout)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
            })
    }
}

/// Errors that could occur while reading the container metadata.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The metadata document could not be fetched.
    #[error("failed to fetch container metadata: {0}")]
    Fetch(#[from] FetchError),

    /// The metadata document could not be decoded.
    #[error("failed to decode container metadata: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Deserialize)]
struct ContainerMetadata {
    #[serde(rename = "ContainerARN")]
    container_arn: Option<String>,
}

/// Resolves the container identity from the ECS metadata endpoint, falling back to the hostname.
///
/// The ECS endpoint is only queried when [`ECS_METADATA_URI_VAR`] is set. The container ID is the last segment of the
/// container's ARN, such as `def456` in `arn:aws:ecs:us-east-1:123456789012:container/my-cluster/abc123/def456`.
pub struct ContainerIdentity {
    env: Box<dyn Environment>,
    client: Box<dyn MetadataClient>,
    hostname: Box<dyn HostnameProvider>,
    settled: bool,
}

impl ContainerIdentity {
    /// Creates a new `ContainerIdentity`.
    pub fn new<E, M, H>(env: E, client: M, hostname: H) -> Self
    where
        E: Environment + 'static,
        M: MetadataClient + 'static,
        H: HostnameProvider + 'static,
    {
        Self { env: Box::new(env), client: Box::new(client), hostname: Box::new(hostname), settled: false }
    }

    fn fetch_container_arn(&self, uri: &str) -> Result<Option<String>, IdentityError> {
        let body = self.client.get(uri)?;
        let metadata: ContainerMetadata = serde_json::from_str(&body)?;
        Ok(metadata.container_arn)
    }

    /// Returns `Ok(None)` when the metadata endpoint is not configured, or the container has no usable ARN.
    fn ecs_container_id(&self) -> Result<Option<String>, IdentityError> {
        let Some(uri) = self.env.var(ECS_METADATA_URI_VAR) else {
            return Ok(None);
        };

        match self.fetch_container_arn(&uri) {
            Ok(maybe_arn) => {
                Ok(maybe_arn.as_deref().and_then(container_id_from_arn).map(str::to_string))
            }
            Err(e) => {
                error!(error = %e, metadata_uri = %uri, "Unable to retrieve container metadata.");
                Err(e)
            }
        }
    }

    fn system_hostname(&self) -> Option<String> {
        match self.hostname.hostname() {
            Ok(hostname) => {
                let hostname = hostname.trim();
                (!hostname.is_empty()).then(|| hostname.to_string())
            }
            Err(e) => {
                debug!(error = %e, "Unable to read hostname.");
                None
            }
        }
    }
}

impl IdentityResolver for ContainerIdentity {
    fn resolve(&mut self) -> Option<String> {
        // A hostname obtained because the metadata lookup failed is only a stand-in until the lookup succeeds.
        let (container_id, settled) = match self.ecs_container_id() {
            Ok(Some(container_id)) => (Some(container_id), true),
            Ok(None) => (self.system_hostname(), true),
            Err(_) => (self.system_hostname(), false),
        };

        self.settled = settled;
        container_id
    }

    fn is_settled(&self) -> bool {
        self.settled
    }
}

/// Extracts the container ID from the last non-empty segment of an ARN.
///
/// ARNs without any `/` have no container ID.
fn container_id_from_arn(arn: &str) -> Option<&str> {
    if !arn.contains('/') {
        return None;
    }

    arn.trim_end_matches('/').rsplit('/').next().filter(|id| !id.trim().is_empty())
}

/// Caches the first settled identity resolved by the wrapped resolver.
///
/// Until a non-blank identity is resolved and the wrapped resolver reports it as settled, every call consults the
/// wrapped resolver again.
pub struct CachedIdentity {
    inner: Box<dyn IdentityResolver>,
    cached: Option<String>,
}

impl CachedIdentity {
    /// Creates a new `CachedIdentity` wrapping `inner`.
    pub fn new<R>(inner: R) -> Self
    where
        R: IdentityResolver + 'static,
    {
        Self::from_boxed(Box::new(inner))
    }

    pub(crate) fn from_boxed(inner: Box<dyn IdentityResolver>) -> Self {
        Self { inner, cached: None }
    }
}

impl IdentityResolver for CachedIdentity {
    fn resolve(&mut self) -> Option<String> {
        if let Some(cached) = &self.cached {
            return Some(cached.clone());
        }

        let resolved = self.inner.resolve().filter(|id| !id.trim().is_empty());
        if self.inner.is_settled() {
            self.cached.clone_from(&resolved);
        }

        resolved
    }

    fn is_settled(&self) -> bool {
        self.cached.is_some()
    }
}
