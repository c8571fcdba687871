use std::{error::Error as _, fmt::Write as _, thread, time::Duration};

use quanta::Instant;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::{
    batch::MetricBatch,
    environment::Environment,
    identity::IdentityResolver,
    sink::{MetricSink, SinkError},
    source::{SourceError, StatsSource},
    stats::{StatsSnapshot, Topology},
    tags::build_tags,
    telemetry::ExporterTelemetry,
};

/// Errors that could occur during a single export tick.
///
/// Tick errors are never fatal: the exporter logs them and tries again on the next tick.
#[derive(Debug, Error)]
pub enum TickError {
    /// The stats snapshot could not be pulled.
    #[error("failed to pull Puma stats")]
    Source(#[from] SourceError),

    /// The stats snapshot was not valid JSON, or had fields of the wrong type.
    #[error("failed to decode Puma stats")]
    Decode(#[from] serde_json::Error),

    /// The gauges could not be sent.
    #[error("failed to send Puma gauges")]
    Sink(#[from] SinkError),
}

/// Source of delays between ticks.
pub trait Clock: Send {
    /// Blocks the current thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// A [`Clock`] backed by [`std::thread::sleep`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

/// Periodically exports Puma statistics.
///
/// Use [`PumaExporterBuilder`](crate::PumaExporterBuilder) to create one.
pub struct PumaExporter {
    pub(crate) source: Box<dyn StatsSource>,
    pub(crate) sink: Box<dyn MetricSink>,
    pub(crate) resolver: Box<dyn IdentityResolver>,
    pub(crate) env: Box<dyn Environment>,
    pub(crate) environment_name: String,
    pub(crate) topology: Topology,
    pub(crate) warmup_delay: Duration,
    pub(crate) interval: Duration,
    pub(crate) clock: Box<dyn Clock>,
    pub(crate) telemetry_enabled: bool,
    pub(crate) telemetry: Option<ExporterTelemetry>,
}

impl PumaExporter {
    /// Returns the topology the exporter was configured with.
    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Returns the environment name used for the `environment` tag.
    pub fn environment_name(&self) -> &str {
        &self.environment_name
    }

    /// Runs the export loop on the current thread.
    ///
    /// After the warm-up delay, a tick runs every interval. Failed ticks are logged and the loop carries on. This never
    /// returns.
    pub fn run(mut self) -> ! {
        info!(cluster_mode = self.topology.is_clustered(), "Puma stats exporter enabled.");

        self.clock.sleep(self.warmup_delay);
        loop {
            self.tick_and_wait();
        }
    }

    /// Runs a single tick, logging any error, and then sleeps for the interval.
    pub(crate) fn tick_and_wait(&mut self) {
        let start = Instant::now();
        let result = self.tick();
        let duration = Instant::now().duration_since(start);

        if let Err(e) = &result {
            error!(error = %e, cause = %error_chain(e), "Failed to export Puma stats.");
        }

        if self.telemetry_enabled {
            self.telemetry
                .get_or_insert_with(ExporterTelemetry::new)
                .track_tick(duration, result.is_ok());
        }

        self.clock.sleep(self.interval);
    }

    /// Pulls, reduces, tags and sends one batch of gauges.
    ///
    /// # Errors
    ///
    /// If the stats cannot be pulled or decoded, or the batch cannot be sent, an error is returned.
    pub fn tick(&mut self) -> Result<(), TickError> {
        let raw = self.source.fetch()?;
        debug!(stats = %raw, "Pulled Puma stats.");

        let snapshot = StatsSnapshot::from_json(&raw)?;
        let tags = build_tags(&self.environment_name, self.env.as_ref(), self.resolver.as_mut());
        let batch = MetricBatch::new(&snapshot, self.topology, tags);

        self.sink.send_batch(&batch)?;
        Ok(())
    }
}

fn error_chain(e: &TickError) -> String {
    let mut chain = String::new();
    let mut source = e.source();
    while let Some(cause) = source {
        if !chain.is_empty() {
            chain.push_str(": ");
        }
        let _ = write!(chain, "{cause}");
        source = cause.source();
    }
    chain
}
