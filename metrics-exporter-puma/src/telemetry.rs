use std::time::Duration;

use metrics::{counter, histogram, Counter, Histogram};

/// Export loop telemetry.
///
/// Tracks how many ticks ran, how many failed, and how long each took, regardless of which sink the gauges go to.
pub struct ExporterTelemetry {
    ticks: Counter,
    tick_errors: Counter,
    tick_duration: Histogram,
}

impl ExporterTelemetry {
    /// Creates an `ExporterTelemetry` instance.
    pub fn new() -> Self {
        let labels = telemetry_tags!();

        Self {
            ticks: counter!("puma.exporter.ticks", labels.iter()),
            tick_errors: counter!("puma.exporter.tick_errors", labels.iter()),
            tick_duration: histogram!("puma.exporter.tick_duration_seconds", labels.iter()),
        }
    }

    /// Tracks a completed tick, successful or not.
    pub fn track_tick(&mut self, duration: Duration, succeeded: bool) {
        self.ticks.increment(1);
        if !succeeded {
            self.tick_errors.increment(1);
        }
        self.tick_duration.record(duration.as_secs_f64());
    }
}

impl Default for ExporterTelemetry {
    fn default() -> Self {
        Self::new()
    }
}

/// DogStatsD transport telemetry.
///
/// `Telemetry` collects information about the sink's own behavior and can be optionally enabled to report it as
/// normal metrics through the globally installed `metrics` recorder.
///
/// Transport metrics live under the `datadog.dogstatsd.client` namespace, to align with the internal telemetry emitted
/// by official DogStatsD clients.
pub struct Telemetry {
    gauge_points: Counter,
    gauge_points_dropped: Counter,
    packets_sent: Counter,
    packets_dropped: Counter,
    packets_dropped_writer: Counter,
    bytes_sent: Counter,
    bytes_dropped: Counter,
    bytes_dropped_writer: Counter,
}

impl Telemetry {
    /// Creates a `Telemetry` instance.
    pub fn new(transport: &'static str) -> Self {
        let base_labels = telemetry_tags!("client_transport" => transport);
        let gauge_labels =
            telemetry_tags!("client_transport" => transport, "metrics_type" => "gauge");

        Self {
            gauge_points: counter!("datadog.dogstatsd.client.metrics_by_type", gauge_labels.iter()),
            gauge_points_dropped: counter!(
                "datadog.dogstatsd.client.metrics_dropped_by_type",
                gauge_labels.iter()
            ),
            packets_sent: counter!("datadog.dogstatsd.client.packets_sent", base_labels.iter()),
            packets_dropped: counter!(
                "datadog.dogstatsd.client.packets_dropped",
                base_labels.iter()
            ),
            packets_dropped_writer: counter!(
                "datadog.dogstatsd.client.packets_dropped_writer",
                base_labels.iter()
            ),
            bytes_sent: counter!("datadog.dogstatsd.client.bytes_sent", base_labels.iter()),
            bytes_dropped: counter!("datadog.dogstatsd.client.bytes_dropped", base_labels.iter()),
            bytes_dropped_writer: counter!(
                "datadog.dogstatsd.client.bytes_dropped_writer",
                base_labels.iter()
            ),
        }
    }

    /// Applies the given telemetry update, updating the internal metrics.
    pub fn apply_update(&mut self, update: &TelemetryUpdate) {
        self.gauge_points.increment(update.gauge_points);
        self.gauge_points_dropped.increment(update.gauge_points_dropped);
        self.packets_sent.increment(update.packets_sent);
        self.packets_dropped.increment(update.packets_dropped);
        self.packets_dropped_writer.increment(update.packets_dropped);
        self.bytes_sent.increment(update.bytes_sent);
        self.bytes_dropped.increment(update.bytes_dropped);
        self.bytes_dropped_writer.increment(update.bytes_dropped);
    }
}

/// A buffer for collecting telemetry updates.
#[derive(Debug, Default)]
pub struct TelemetryUpdate {
    gauge_points: u64,
    gauge_points_dropped: u64,
    packets_sent: u64,
    packets_dropped: u64,
    bytes_sent: u64,
    bytes_dropped: u64,
}

impl TelemetryUpdate {
    /// Clears the update buffer, resetting it back to an empty state.
    pub fn clear(&mut self) {
        self.gauge_points = 0;
        self.gauge_points_dropped = 0;
        self.packets_sent = 0;
        self.packets_dropped = 0;
        self.bytes_sent = 0;
        self.bytes_dropped = 0;
    }

    /// Returns `true` if any updates have been recorded.
    pub fn had_updates(&self) -> bool {
        self.gauge_points > 0
            || self.gauge_points_dropped > 0
            || self.packets_sent > 0
            || self.packets_dropped > 0
    }

    /// Increments the number of gauge points written.
    pub fn increment_gauge_points(&mut self, value: u64) {
        self.gauge_points += value;
    }

    /// Increments the number of gauge points that could not be written.
    pub fn increment_gauge_points_dropped(&mut self, value: u64) {
        self.gauge_points_dropped += value;
    }

    /// Tracks a successful packet send.
    pub fn track_packet_send_succeeded(&mut self, bytes_len: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes_len as u64;
    }

    /// Tracks a failed packet send.
    pub fn track_packet_send_failed(&mut self, bytes_len: usize) {
        self.packets_dropped += 1;
        self.bytes_dropped += bytes_len as u64;
    }
}

macro_rules! _telemetry_tags {
    ($($k:literal => $v:expr),*) => {
        [
            ::metrics::Label::from_static_parts("client", "rust"),
            ::metrics::Label::from_static_parts("client_version", env!("CARGO_PKG_VERSION")),
            $(::metrics::Label::from_static_parts($k, $v),)*
        ]
    };
}

pub(crate) use _telemetry_tags as telemetry_tags;
