use std::{error::Error, io};

use thiserror::Error;

use crate::batch::MetricBatch;

mod dogstatsd;
pub use self::dogstatsd::{DogStatsDSink, DogStatsDSinkBuilder};

mod recorder;
pub use self::recorder::RecorderSink;

/// Errors that could occur while submitting a batch to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// A payload could not be sent to the remote server.
    #[error("failed to send payload")]
    Io(#[from] io::Error),

    /// Some gauges could not be written without exceeding the maximum payload length.
    #[error("{points_dropped} gauge(s) did not fit within the maximum payload length")]
    PayloadTooLarge {
        /// Number of gauges that were dropped.
        points_dropped: u64,
    },

    /// A sink-specific failure.
    #[error(transparent)]
    Custom(Box<dyn Error + Send + Sync>),
}

/// Destination for the gauges exported on each tick.
pub trait MetricSink: Send {
    /// Submits every gauge in `batch`, tagged with the batch's tags.
    ///
    /// # Errors
    ///
    /// If the batch could not be fully submitted, an error is returned. The exporter logs it and carries on with the
    /// next tick.
    fn send_batch(&mut self, batch: &MetricBatch) -> Result<(), SinkError>;

    /// Returns a short identifier for the transport used by this sink, such as `udp`.
    fn transport_id(&self) -> &'static str {
        "custom"
    }
}

impl<S: MetricSink + ?Sized> MetricSink for Box<S> {
    fn send_batch(&mut self, batch: &MetricBatch) -> Result<(), SinkError> {
        (**self).send_batch(batch)
    }

    fn transport_id(&self) -> &'static str {
        (**self).transport_id()
    }
}
