use std::{net::SocketAddr, time::Duration};

use tracing::error;

use crate::{
    batch::MetricBatch,
    builder::BuildError,
    environment::Environment,
    forwarder::{sync::Forwarder, ForwarderConfiguration, RemoteAddr},
    telemetry::{Telemetry, TelemetryUpdate},
    writer::PayloadWriter,
};

use super::{MetricSink, SinkError};

const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_PAYLOAD_LEN: usize = 8192;
const DEFAULT_METRIC_PREFIX: &str = "puma";
const DEFAULT_AGENT_HOST: &str = "127.0.0.1";
const DEFAULT_DOGSTATSD_PORT: &str = "8125";

/// Builder for a [`DogStatsDSink`].
pub struct DogStatsDSinkBuilder {
    remote_addr: RemoteAddr,
    write_timeout: Duration,
    max_payload_len: usize,
    prefix: Option<String>,
    telemetry: bool,
}

impl DogStatsDSinkBuilder {
    /// Set the remote address to forward metrics to.
    ///
    /// For UDP, the address needs to be in the format of `<host>:<port>`, optionally prefixed with `udp://`. For Unix
    /// domain sockets, an address in the format of `<scheme>://<path>`. The scheme can be either `unix` or `unixgram`,
    /// for a stream (`SOCK_STREAM`) or datagram (`SOCK_DGRAM`) socket, respectively.
    ///
    /// Defaults to sending to `127.0.0.1:8125` over UDP.
    ///
    /// # Errors
    ///
    /// If the given address is not able to be parsed as a valid address, an error will be returned indicating the
    /// reason.
    pub fn with_remote_address<A>(mut self, addr: A) -> Result<Self, BuildError>
    where
        A: AsRef<str>,
    {
        self.remote_addr = RemoteAddr::try_from(addr.as_ref())
            .map_err(|reason| BuildError::InvalidRemoteAddress { reason })?;
        Ok(self)
    }

    /// Configures the remote address from the standard Datadog variables.
    ///
    /// `DD_DOGSTATSD_URL` is used as-is when set. Otherwise, if either `DD_AGENT_HOST` or `DD_DOGSTATSD_PORT` is set,
    /// the address is `<DD_AGENT_HOST>:<DD_DOGSTATSD_PORT>`, defaulting to `127.0.0.1` and `8125` respectively. If none
    /// are set, the remote address is left unchanged.
    ///
    /// # Errors
    ///
    /// If the resulting address is not able to be parsed as a valid address, an error will be returned.
    pub fn from_env(self, env: &dyn Environment) -> Result<Self, BuildError> {
        if let Some(url) = env.var("DD_DOGSTATSD_URL") {
            return self.with_remote_address(url);
        }

        let host = env.var("DD_AGENT_HOST");
        let port = env.var("DD_DOGSTATSD_PORT");
        if host.is_none() && port.is_none() {
            return Ok(self);
        }

        let host = host.unwrap_or_else(|| DEFAULT_AGENT_HOST.to_string());
        let port = port.unwrap_or_else(|| DEFAULT_DOGSTATSD_PORT.to_string());
        self.with_remote_address(format!("{host}:{port}"))
    }

    /// Set the write timeout for forwarding metrics.
    ///
    /// When the write timeout is reached, the write operation will be aborted and the payload being sent at the time
    /// will be dropped without retrying.
    ///
    /// Defaults to 1 second.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Set the maximum payload length for forwarding metrics.
    ///
    /// This should generally be set to the same value (or lower) as `dogstatsd_buffer_size` in the Datadog Agent.
    ///
    /// Defaults to 8192 bytes.
    #[must_use]
    pub fn with_maximum_payload_length(mut self, max_payload_len: usize) -> Self {
        self.max_payload_len = max_payload_len;
        self
    }

    /// Set the prefix prepended to every gauge name, separated by a period.
    ///
    /// Defaults to `puma`, which yields names such as `puma.running`.
    #[must_use]
    pub fn with_metric_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Sends gauge names without any prefix.
    #[must_use]
    pub fn without_metric_prefix(mut self) -> Self {
        self.prefix = None;
        self
    }

    /// Sets whether or not to report transport telemetry through the global `metrics` recorder.
    ///
    /// Defaults to `true`.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: bool) -> Self {
        self.telemetry = telemetry;
        self
    }

    /// Builds the sink.
    ///
    /// No connection is made until the first batch is sent.
    ///
    /// # Errors
    ///
    /// If the maximum payload length is too small to hold any gauge, or larger than 2^32 bytes, an error is returned.
    pub fn build(self) -> Result<DogStatsDSink, BuildError> {
        if self.max_payload_len < PayloadWriter::minimum_payload_len()
            || u32::try_from(self.max_payload_len).is_err()
        {
            return Err(BuildError::InvalidMaximumPayloadLength { len: self.max_payload_len });
        }

        let config = ForwarderConfiguration {
            remote_addr: self.remote_addr,
            write_timeout: self.write_timeout,
        };

        Ok(DogStatsDSink {
            writer: PayloadWriter::new(self.max_payload_len, config.requires_length_prefix()),
            transport: config.remote_addr.transport_id(),
            forwarder: Forwarder::new(config),
            prefix: self.prefix,
            telemetry_enabled: self.telemetry,
            telemetry: None,
            telemetry_update: TelemetryUpdate::default(),
        })
    }
}

impl Default for DogStatsDSinkBuilder {
    fn default() -> Self {
        DogStatsDSinkBuilder {
            remote_addr: RemoteAddr::Udp(vec![SocketAddr::from(([127, 0, 0, 1], 8125))]),
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            max_payload_len: DEFAULT_MAX_PAYLOAD_LEN,
            prefix: Some(DEFAULT_METRIC_PREFIX.to_string()),
            telemetry: true,
        }
    }
}

/// A sink that sends gauges to a DogStatsD server.
///
/// Each batch is written as one gauge line per metric, such as `puma.running:8|g|#environment:production`, and packed
/// into as few payloads as the maximum payload length allows.
pub struct DogStatsDSink {
    writer: PayloadWriter,
    forwarder: Forwarder,
    transport: &'static str,
    prefix: Option<String>,
    telemetry_enabled: bool,
    telemetry: Option<Telemetry>,
    telemetry_update: TelemetryUpdate,
}

impl DogStatsDSink {
    /// Creates a [`DogStatsDSinkBuilder`].
    pub fn builder() -> DogStatsDSinkBuilder {
        DogStatsDSinkBuilder::default()
    }

    /// Builds a sink with default settings, sending to the address given by the standard Datadog variables.
    ///
    /// See [`DogStatsDSinkBuilder::from_env`] for how the address is determined.
    ///
    /// # Errors
    ///
    /// If the configured address is not able to be parsed as a valid address, an error will be returned.
    pub fn from_env(env: &dyn Environment) -> Result<Self, BuildError> {
        Self::builder().from_env(env)?.build()
    }

    fn update_telemetry(&mut self) {
        // Telemetry handles are registered lazily, so that they're created against whichever recorder is installed by
        // the time metrics actually flow.
        if self.telemetry_enabled && self.telemetry_update.had_updates() {
            let transport = self.transport;
            let telemetry = self.telemetry.get_or_insert_with(|| Telemetry::new(transport));
            telemetry.apply_update(&self.telemetry_update);
        }
    }
}

impl MetricSink for DogStatsDSink {
    fn send_batch(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        self.telemetry_update.clear();

        let mut points_dropped = 0;
        for gauge in batch.gauges() {
            let result = self.writer.write_gauge(
                self.prefix.as_deref(),
                gauge.name(),
                gauge.value(),
                batch.tags(),
            );
            if result.any_failures() {
                error!(metric_name = gauge.name(), "Failed to build gauge payload.");
                points_dropped += result.points_dropped();
            } else {
                self.telemetry_update.increment_gauge_points(result.payloads_written());
            }
        }
        self.telemetry_update.increment_gauge_points_dropped(points_dropped);

        let send_result = self.forwarder.send_payloads(&mut self.writer, &mut self.telemetry_update);
        self.update_telemetry();

        send_result?;
        if points_dropped > 0 {
            return Err(SinkError::PayloadTooLarge { points_dropped });
        }

        Ok(())
    }

    fn transport_id(&self) -> &'static str {
        self.transport
    }
}
