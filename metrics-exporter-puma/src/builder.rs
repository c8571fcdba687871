use std::{io, sync::Arc, thread::JoinHandle, time::Duration};

use thiserror::Error;

use crate::{
    environment::{environment_name, Environment, ProcessEnv},
    exporter::{Clock, PumaExporter, SystemClock},
    http::HttpFetcher,
    identity::{CachedIdentity, ContainerIdentity, IdentityResolver, SystemHostname},
    sink::{DogStatsDSinkBuilder, MetricSink},
    source::{ControlAppSource, StatsSource},
    stats::Topology,
};

const DEFAULT_WARMUP_DELAY: Duration = Duration::from_secs(5);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(2);
const DEFAULT_METADATA_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_CONTROL_APP_TIMEOUT: Duration = Duration::from_secs(2);

/// Errors that could occur while building or installing a Puma exporter.
#[derive(Debug, Error)]
pub enum BuildError {
    /// No sink was configured.
    #[error("no metric sink configured")]
    MissingSink,

    /// No stats source was configured.
    #[error("no stats source configured")]
    MissingStatsSource,

    /// Failed to parse the remote address.
    #[error("invalid remote address: {reason}")]
    InvalidRemoteAddress {
        /// Details about the parsing failure.
        reason: String,
    },

    /// The maximum payload length is too small to hold a gauge, or too large to be framed.
    #[error("invalid maximum payload length: {len}")]
    InvalidMaximumPayloadLength {
        /// The configured length.
        len: usize,
    },

    /// Failed to create the runtime used for HTTP requests.
    #[error("failed to create HTTP runtime")]
    Runtime(#[source] io::Error),

    /// Failed to spawn the background thread.
    #[error("failed to spawn background thread for exporter")]
    Backend(#[source] io::Error),
}

/// Builder for a Puma exporter.
///
/// At minimum, a stats source and a sink must be configured:
///
/// ```no_run
/// # use metrics_exporter_puma::{DogStatsDSink, PumaExporterBuilder};
/// let handle = PumaExporterBuilder::new()
///     .with_control_app("tcp://127.0.0.1:9293", Some("secret"))?
///     .with_sink(DogStatsDSink::builder().build()?)
///     .install()?;
/// # Ok::<(), metrics_exporter_puma::BuildError>(())
/// ```
pub struct PumaExporterBuilder {
    source: Option<Box<dyn StatsSource>>,
    sink: Option<Box<dyn MetricSink>>,
    topology: Option<Topology>,
    environment_name: Option<String>,
    env: Arc<dyn Environment + Sync>,
    resolver: Option<Box<dyn IdentityResolver>>,
    identity_caching: bool,
    metadata_timeout: Duration,
    warmup_delay: Duration,
    interval: Duration,
    clock: Box<dyn Clock>,
    telemetry: bool,
}

impl PumaExporterBuilder {
    /// Creates a new `PumaExporterBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the source of raw Puma statistics.
    ///
    /// Closures returning `Result<String, SourceError>` can be used directly.
    #[must_use]
    pub fn with_stats_source<S>(mut self, source: S) -> Self
    where
        S: StatsSource + 'static,
    {
        self.source = Some(Box::new(source));
        self
    }

    /// Reads statistics from Puma's control app at `control_url`, authenticating with `token` if given.
    ///
    /// # Errors
    ///
    /// If the runtime used for HTTP requests cannot be created, an error will be returned.
    pub fn with_control_app(self, control_url: &str, token: Option<&str>) -> Result<Self, BuildError> {
        let source = ControlAppSource::new(control_url, token, DEFAULT_CONTROL_APP_TIMEOUT)
            .map_err(BuildError::Runtime)?;
        Ok(self.with_stats_source(source))
    }

    /// Set the sink that gauges are sent to.
    #[must_use]
    pub fn with_sink<S>(mut self, sink: S) -> Self
    where
        S: MetricSink + 'static,
    {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Sends gauges to DogStatsD, using the given sink configuration.
    ///
    /// # Errors
    ///
    /// If the sink configuration is invalid, an error will be returned.
    pub fn with_dogstatsd(self, builder: DogStatsDSinkBuilder) -> Result<Self, BuildError> {
        Ok(self.with_sink(builder.build()?))
    }

    /// Set the server topology.
    ///
    /// Defaults to the topology implied by `WEB_CONCURRENCY`: clustered when it is at least 1, single otherwise.
    #[must_use]
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    /// Set the environment name used for the `environment` tag.
    ///
    /// Defaults to `RAILS_ENV`, then `RACK_ENV`, then `development`.
    #[must_use]
    pub fn with_environment_name<N: Into<String>>(mut self, name: N) -> Self {
        self.environment_name = Some(name.into());
        self
    }

    /// Set the environment variables used for tags, topology, and container metadata.
    ///
    /// Defaults to the environment of the current process.
    #[must_use]
    pub fn with_environment<E>(mut self, env: E) -> Self
    where
        E: Environment + Sync + 'static,
    {
        self.env = Arc::new(env);
        self
    }

    /// Set the resolver used for the `container_id` tag.
    ///
    /// Defaults to looking up the ECS container metadata, and falling back to the hostname.
    #[must_use]
    pub fn with_identity_resolver<R>(mut self, resolver: R) -> Self
    where
        R: IdentityResolver + 'static,
    {
        self.resolver = Some(Box::new(resolver));
        self
    }

    /// Sets whether or not to keep the first resolved container identity for the life of the exporter.
    ///
    /// When disabled, the identity is resolved again on every tick.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_identity_caching(mut self, identity_caching: bool) -> Self {
        self.identity_caching = identity_caching;
        self
    }

    /// Set the timeout for container metadata requests.
    ///
    /// Only used by the default identity resolver.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_metadata_timeout(mut self, timeout: Duration) -> Self {
        self.metadata_timeout = timeout;
        self
    }

    /// Set the delay before the first tick.
    ///
    /// Defaults to 5 seconds.
    #[must_use]
    pub fn with_warmup_delay(mut self, delay: Duration) -> Self {
        self.warmup_delay = delay;
        self
    }

    /// Set the delay after each tick.
    ///
    /// Defaults to 2 seconds.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Set the clock used to wait between ticks.
    #[must_use]
    pub fn with_clock<C>(mut self, clock: C) -> Self
    where
        C: Clock + 'static,
    {
        self.clock = Box::new(clock);
        self
    }

    /// Sets whether or not to report the exporter's own telemetry through the global `metrics` recorder.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the exporter.
    ///
    /// The exporter is not started: call [`PumaExporter::run`] or [`PumaExporter::tick`] to drive it.
    ///
    /// # Errors
    ///
    /// If no stats source or no sink is configured, or if the default identity resolver cannot create its HTTP
    /// runtime, an error will be returned.
    pub fn build(self) -> Result<PumaExporter, BuildError> {
        let source = self.source.ok_or(BuildError::MissingStatsSource)?;
        let sink = self.sink.ok_or(BuildError::MissingSink)?;

        let mut resolver: Box<dyn IdentityResolver> = match self.resolver {
            Some(resolver) => resolver,
            None => {
                let client = HttpFetcher::new(self.metadata_timeout).map_err(BuildError::Runtime)?;
                Box::new(ContainerIdentity::new(Arc::clone(&self.env), client, SystemHostname))
            }
        };
        if self.identity_caching {
            resolver = Box::new(CachedIdentity::from_boxed(resolver));
        }

        let topology = self.topology.unwrap_or_else(|| Topology::from_env(&*self.env));
        let environment_name =
            self.environment_name.unwrap_or_else(|| environment_name(&*self.env));

        Ok(PumaExporter {
            source,
            sink,
            resolver,
            env: Box::new(self.env),
            environment_name,
            topology,
            warmup_delay: self.warmup_delay,
            interval: self.interval,
            clock: self.clock,
            telemetry_enabled: self.telemetry,
            telemetry: None,
        })
    }

    /// Builds the exporter and runs it on a background thread.
    ///
    /// The thread runs for the life of the process.
    ///
    /// # Errors
    ///
    /// If the exporter cannot be built, or the background thread cannot be spawned, an error will be returned.
    pub fn install(self) -> Result<JoinHandle<()>, BuildError> {
        let exporter = self.build()?;

        std::thread::Builder::new()
            .name("metrics-exporter-puma".to_string())
            .spawn(move || exporter.run())
            .map_err(BuildError::Backend)
    }
}

impl Default for PumaExporterBuilder {
    fn default() -> Self {
        PumaExporterBuilder {
            source: None,
            sink: None,
            topology: None,
            environment_name: None,
            env: Arc::new(ProcessEnv),
            resolver: None,
            identity_caching: true,
            metadata_timeout: DEFAULT_METADATA_TIMEOUT,
            warmup_delay: DEFAULT_WARMUP_DELAY,
            interval: DEFAULT_INTERVAL,
            clock: Box::new(SystemClock),
            telemetry: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::{BuildError, PumaExporterBuilder};
    use crate::{sink::RecorderSink, source::SourceError, stats::Topology};

    fn stats() -> Result<String, SourceError> {
        Ok("{}".to_string())
    }

    fn env(vars: &[(&str, &str)]) -> HashMap<String, String> {
        vars.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
    }

    #[test]
    fn missing_collaborators() {
        let result = PumaExporterBuilder::new().with_sink(RecorderSink::new()).build();
        assert!(matches!(result, Err(BuildError::MissingStatsSource)));

        let result = PumaExporterBuilder::new().with_stats_source(stats).build();
        assert!(matches!(result, Err(BuildError::MissingSink)));
    }

    #[test]
    fn defaults_come_from_environment() {
        let exporter = PumaExporterBuilder::new()
            .with_stats_source(stats)
            .with_sink(RecorderSink::new())
            .with_environment(env(&[("WEB_CONCURRENCY", "4"), ("RACK_ENV", "production")]))
            .build()
            .unwrap();

        assert_eq!(exporter.topology(), Topology::Clustered);
        assert_eq!(exporter.environment_name(), "production");
    }

    #[test]
    fn explicit_settings_override_environment() {
        let exporter = PumaExporterBuilder::new()
            .with_stats_source(stats)
            .with_sink(RecorderSink::new())
            .with_environment(env(&[("WEB_CONCURRENCY", "4"), ("RAILS_ENV", "production")]))
            .with_topology(Topology::Single)
            .with_environment_name("qa")
            .with_identity_resolver(|| None::<String>)
            .build()
            .unwrap();

        assert_eq!(exporter.topology(), Topology::Single);
        assert_eq!(exporter.environment_name(), "qa");
    }

    #[test]
    fn invalid_dogstatsd_sink() {
        let sink = crate::DogStatsDSink::builder().with_maximum_payload_length(0);
        let result = PumaExporterBuilder::new().with_dogstatsd(sink);
        assert!(matches!(result, Err(BuildError::InvalidMaximumPayloadLength { len: 0 })));
    }
}
