use metrics::Label;

use crate::batch::MetricBatch;

use super::{MetricSink, SinkError};

/// A sink that reports gauges through the installed [`metrics`] recorder.
///
/// This allows the Puma gauges to flow through any `metrics`-compatible exporter, such as Prometheus, rather than
/// being sent to DogStatsD directly. Tags in the form of `key:value` become labels, split on the first colon. Tags
/// without a colon become labels with an empty value.
pub struct RecorderSink {
    prefix: Option<String>,
}

impl RecorderSink {
    /// Creates a new `RecorderSink` using the default `puma` prefix.
    pub fn new() -> Self {
        Self { prefix: Some("puma".to_string()) }
    }

    /// Set the prefix prepended to every gauge name, separated by a period.
    #[must_use]
    pub fn with_metric_prefix<P: Into<String>>(mut self, prefix: P) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Reports gauge names without any prefix.
    #[must_use]
    pub fn without_metric_prefix(mut self) -> Self {
        self.prefix = None;
        self
    }

    fn gauge_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{prefix}.{name}"),
            None => name.to_string(),
        }
    }
}

impl Default for RecorderSink {
    fn default() -> Self {
        Self::new()
    }
}

fn tag_to_label(tag: &str) -> Label {
    match tag.split_once(':') {
        Some((key, value)) => Label::new(key.to_string(), value.to_string()),
        None => Label::new(tag.to_string(), String::new()),
    }
}

impl MetricSink for RecorderSink {
    fn send_batch(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        let labels = batch.tags().iter().map(|tag| tag_to_label(tag)).collect::<Vec<_>>();

        for gauge in batch.gauges() {
            metrics::gauge!(self.gauge_name(gauge.name()), labels.clone()).set(gauge.value() as f64);
        }

        Ok(())
    }

    fn transport_id(&self) -> &'static str {
        "recorder"
    }
}

#[cfg(test)]
mod tests {
    use metrics::Label;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};

    use super::{tag_to_label, RecorderSink};
    use crate::{
        batch::MetricBatch,
        sink::MetricSink,
        stats::{StatsSnapshot, Topology},
        tags::TagSet,
    };

    #[test]
    fn tags_become_labels() {
        assert_eq!(tag_to_label("env:shopvox-prod"), Label::new("env", "shopvox-prod"));
        assert_eq!(tag_to_label("region:us:east"), Label::new("region", "us:east"));
        assert_eq!(tag_to_label("canary"), Label::new("canary", ""));
    }

    #[test]
    fn batch_is_recorded_as_gauges() {
        let snapshot = StatsSnapshot::from_json(r#"{"running":4,"backlog":2,"pool_capacity":1,"max_threads":5}"#)
            .unwrap();
        let tags = ["environment:test", "container_id:abc"].into_iter().collect::<TagSet>();
        let batch = MetricBatch::new(&snapshot, Topology::Single, tags);

        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || {
            RecorderSink::new().send_batch(&batch).unwrap();
        });

        let metrics = snapshotter.snapshot().into_vec();
        assert_eq!(metrics.len(), 6);

        let (key, _, _, value) = metrics
            .iter()
            .find(|(key, _, _, _)| key.key().name() == "puma.running")
            .unwrap();
        assert!(matches!(value, DebugValue::Gauge(v) if (v.into_inner() - 4.0).abs() < f64::EPSILON));
        let labels = key.key().labels().cloned().collect::<Vec<_>>();
        assert_eq!(
            labels,
            vec![Label::new("environment", "test"), Label::new("container_id", "abc")]
        );
    }
}
