//! An exporter that reports [Puma][puma] server statistics as [DogStatsD][dsd] gauges.
//!
//! [puma]: https://puma.io/
//! [dsd]: https://docs.datadoghq.com/developers/dogstatsd/
//!
//! # Usage
//!
//! The exporter runs on its own thread, alongside the Puma server:
//!
//! ```no_run
//! # use metrics_exporter_puma::{DogStatsDSink, ProcessEnv, PumaExporterBuilder};
//! // Statistics are read from Puma's control app, and gauges are sent to the DogStatsD server given by the usual
//! // Datadog variables (`DD_DOGSTATSD_URL`, or `DD_AGENT_HOST` and `DD_DOGSTATSD_PORT`).
//! let sink = DogStatsDSink::from_env(&ProcessEnv)?;
//! let builder = PumaExporterBuilder::new()
//!     .with_control_app("tcp://127.0.0.1:9293", Some("secret"))?
//!     .with_sink(sink);
//!
//! // Installing spawns the background thread. It waits for the server to warm up, and then exports the gauges every
//! // two seconds for the life of the process.
//! builder.install()?;
//!
//! // For custom scheduling, the exporter can instead be built and driven one tick at a time:
//! # let builder = PumaExporterBuilder::new().with_control_app("tcp://127.0.0.1:9293", None)?.with_sink(DogStatsDSink::from_env(&ProcessEnv)?);
//! let mut exporter = builder.build()?;
//! if let Err(e) = exporter.tick() {
//!     eprintln!("tick failed: {e}");
//! }
//! # Ok::<(), metrics_exporter_puma::BuildError>(())
//! ```
//!
//! # Gauges
//!
//! Every tick sends six gauges: `puma.workers`, `puma.booted_workers`, `puma.running`, `puma.backlog`,
//! `puma.pool_capacity` and `puma.max_threads`. In clustered mode, the last four are summed across every worker.
//!
//! # Tags
//!
//! Every gauge carries the same tags: the environment name, the shopVOX environment and grouping, Datadog's unified
//! service tags (`DD_TAGS`, `DD_ENV`, `DD_SERVICE`, `DD_VERSION`), and a `container_id` tag. The container ID comes
//! from the ECS task metadata endpoint when running on ECS, and from the hostname otherwise.
//!
//! # Sinks
//!
//! [`DogStatsDSink`] sends gauges over UDP, or Unix domain sockets in either `SOCK_DGRAM` or `SOCK_STREAM` mode.
//! [`RecorderSink`] hands them to the installed [`metrics`] recorder instead, so any `metrics`-compatible exporter can
//! be used.
//!
//! # Telemetry
//!
//! The exporter captures its own telemetry, such as the number of ticks, failed ticks, and payloads/bytes sent, and
//! reports it through the installed `metrics` recorder. Transport telemetry is under the `datadog.dogstatsd.client`
//! namespace, to align with the internal telemetry emitted by official DogStatsD clients.

#![deny(clippy::all)]
#![deny(clippy::pedantic)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::module_name_repetitions)]
#![deny(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg), deny(rustdoc::broken_intra_doc_links))]

mod batch;
pub use self::batch::{GaugePoint, MetricBatch};

mod builder;
pub use self::builder::{BuildError, PumaExporterBuilder};

mod environment;
pub use self::environment::{environment_name, Environment, ProcessEnv};

mod exporter;
pub use self::exporter::{Clock, PumaExporter, SystemClock, TickError};

mod forwarder;

mod http;
pub use self::http::{FetchError, HttpFetcher};

mod identity;
pub use self::identity::{
    CachedIdentity, ContainerIdentity, HostnameProvider, IdentityError, IdentityResolver,
    MetadataClient, SystemHostname, ECS_METADATA_URI_VAR,
};

mod sink;
pub use self::sink::{DogStatsDSink, DogStatsDSinkBuilder, MetricSink, RecorderSink, SinkError};

mod source;
pub use self::source::{ControlAppSource, SourceError, StatsSource};

mod stats;
pub use self::stats::{aggregate, StatKey, StatsSnapshot, Topology, WorkerStatus};

mod tags;
pub use self::tags::{build_tags, TagSet};

mod telemetry;
mod writer;
