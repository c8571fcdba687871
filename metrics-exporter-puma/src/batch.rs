use crate::{
    stats::{aggregate, StatKey, StatsSnapshot, Topology},
    tags::TagSet,
};

/// A single gauge observation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GaugePoint {
    name: &'static str,
    value: i64,
}

impl GaugePoint {
    /// Name of the gauge, without any prefix.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Observed value.
    pub const fn value(&self) -> i64 {
        self.value
    }
}

/// The gauges exported for a single tick, all sharing the same tags.
///
/// A batch always holds exactly six gauges, in this order: `workers`, `booted_workers`, `running`, `backlog`,
/// `pool_capacity` and `max_threads`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MetricBatch {
    gauges: [GaugePoint; 6],
    tags: TagSet,
}

impl MetricBatch {
    /// Computes the batch for `snapshot`.
    pub fn new(snapshot: &StatsSnapshot, topology: Topology, tags: TagSet) -> Self {
        let reduced = |key: StatKey| GaugePoint {
            name: key.as_str(),
            value: aggregate(snapshot, topology, key),
        };

        Self {
            gauges: [
                GaugePoint { name: "workers", value: snapshot.workers() },
                GaugePoint { name: "booted_workers", value: snapshot.booted_workers() },
                reduced(StatKey::Running),
                reduced(StatKey::Backlog),
                reduced(StatKey::PoolCapacity),
                reduced(StatKey::MaxThreads),
            ],
            tags,
        }
    }

    /// Returns the gauges, in export order.
    pub fn gauges(&self) -> &[GaugePoint] {
        &self.gauges
    }

    /// Returns the value of the gauge called `name`, if there is one.
    pub fn get(&self, name: &str) -> Option<i64> {
        self.gauges.iter().find(|gauge| gauge.name == name).map(GaugePoint::value)
    }

    /// Returns the tags shared by every gauge.
    pub fn tags(&self) -> &TagSet {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::MetricBatch;
    use crate::{
        stats::{StatsSnapshot, Topology, WorkerStatus},
        tags::TagSet,
    };

    #[test]
    fn clustered_batch() {
        let snapshot = StatsSnapshot::clustered(
            2,
            2,
            vec![
                WorkerStatus::new([("running", 3), ("backlog", 1)]),
                WorkerStatus::new([("running", 5), ("backlog", 0)]),
            ],
        );
        let tags = ["environment:test"].into_iter().collect::<TagSet>();
        let batch = MetricBatch::new(&snapshot, Topology::Clustered, tags.clone());

        let names = batch.gauges().iter().map(|g| g.name()).collect::<Vec<_>>();
        assert_eq!(
            names,
            ["workers", "booted_workers", "running", "backlog", "pool_capacity", "max_threads"]
        );
        assert_eq!(batch.get("workers"), Some(2));
        assert_eq!(batch.get("booted_workers"), Some(2));
        assert_eq!(batch.get("running"), Some(8));
        assert_eq!(batch.get("backlog"), Some(1));
        assert_eq!(batch.get("pool_capacity"), Some(0));
        assert_eq!(batch.get("max_threads"), Some(0));
        assert_eq!(batch.get("requests_count"), None);
        assert_eq!(batch.tags(), &tags);
    }

    #[test]
    fn empty_single_batch_uses_defaults() {
        let batch = MetricBatch::new(&StatsSnapshot::default(), Topology::Single, TagSet::new());

        assert_eq!(batch.gauges().len(), 6);
        assert_eq!(batch.get("workers"), Some(1));
        assert_eq!(batch.get("booted_workers"), Some(1));
        assert_eq!(batch.get("running"), Some(0));
        assert_eq!(batch.get("max_threads"), Some(0));
    }
}
