use std::{
    ops::{Deref, DerefMut},
    vec::Drain,
};

use crate::tags::TagSet;

const SMALLEST_VALID_PAYLOAD: &[u8] = b"a:0|g\n";

pub struct WriteResult {
    payloads_written: u64,
    points_dropped: u64,
}

impl WriteResult {
    const fn success(payloads_written: u64) -> Self {
        Self { payloads_written, points_dropped: 0 }
    }

    const fn failure(points_dropped: u64) -> Self {
        Self { payloads_written: 0, points_dropped }
    }

    pub const fn any_failures(&self) -> bool {
        self.points_dropped != 0
    }

    pub const fn payloads_written(&self) -> u64 {
        self.payloads_written
    }

    pub const fn points_dropped(&self) -> u64 {
        self.points_dropped
    }
}

/// Writes gauge lines into larger buffers for more efficient network I/O.
///
/// DogStatsD metrics are always newline delimited, which means that multiple metrics can be sent in a single "payload",
/// and then trivially split apart by the remote server. A batch of gauges therefore usually goes out in one datagram.
///
/// A maximum payload length must be specified. Each payload contains one or more complete metrics while not exceeding
/// the maximum payload length.
pub(crate) struct PayloadWriter {
    max_payload_len: usize,
    payloads_buf: Vec<u8>,
    offsets: Vec<usize>,
    metric_buf: Vec<u8>,
    with_length_prefix: bool,
}

impl PayloadWriter {
    /// Creates a new `PayloadWriter` with the given maximum payload length.
    ///
    /// When `with_length_prefix` is `true`, the writer will prefix each payload with a 4-byte length prefix. This
    /// prefix does not count towards the payload length.
    pub fn new(max_payload_len: usize, with_length_prefix: bool) -> Self {
        // NOTE: The builder clamps this already, but we want to double check that we're getting a sanitized value.
        assert!(
            u32::try_from(max_payload_len).is_ok(),
            "maximum payload length must be less than 2^32 bytes"
        );
        assert!(
            max_payload_len >= SMALLEST_VALID_PAYLOAD.len(),
            "maximum payload length is too small to allow any metrics to be written (must be {} or greater)",
            SMALLEST_VALID_PAYLOAD.len()
        );

        Self {
            max_payload_len,
            payloads_buf: Vec::new(),
            offsets: Vec::new(),
            metric_buf: Vec::new(),
            with_length_prefix,
        }
    }

    /// Returns the smallest maximum payload length that can hold a gauge.
    pub const fn minimum_payload_len() -> usize {
        SMALLEST_VALID_PAYLOAD.len()
    }

    fn last_offset(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    /// Returns the number of bytes in the current payload.
    ///
    /// If the current payload hasn't been started yet, this is zero.
    fn current_payload_len(&self) -> usize {
        let maybe_length_prefix_len = if self.with_length_prefix { 4 } else { 0 };
        self.payloads_buf.len().saturating_sub(self.last_offset() + maybe_length_prefix_len)
    }

    /// Starts the current payload, if it hasn't been started yet.
    fn prepare_for_write(&mut self) {
        if self.payloads_buf.len() == self.last_offset() && self.with_length_prefix {
            // Write a dummy length of zero for now, and fill it in when the payload is finalized.
            self.payloads_buf.extend_from_slice(&[0, 0, 0, 0]);
        }
    }

    /// Finalizes the current payload, filling in its length prefix if one is used.
    ///
    /// If the current payload is empty, this method does nothing.
    fn finalize_current_payload(&mut self) {
        let current_payload_len = self.current_payload_len();
        if current_payload_len == 0 {
            return;
        }

        if self.with_length_prefix {
            let current_last_offset = self.last_offset();

            // `max_payload_len` fits in a `u32`, and no payload is ever longer than it.
            let current_payload_len_buf = (current_payload_len as u32).to_le_bytes();
            self.payloads_buf[current_last_offset..current_last_offset + 4]
                .copy_from_slice(&current_payload_len_buf[..]);
        }

        self.offsets.push(self.payloads_buf.len());
    }

    /// Commits the uncommitted metric to the current payload.
    ///
    /// If the current payload cannot fit the metric without exceeding the maximum payload length, the current payload
    /// is finalized first and the metric starts a new one.
    ///
    /// Returns `false`, discarding the metric, if it is longer than the maximum payload length by itself.
    fn commit(&mut self) -> bool {
        let uncommitted_len = self.metric_buf.len();
        if uncommitted_len > self.max_payload_len {
            self.metric_buf.clear();
            return false;
        }

        if self.current_payload_len() + uncommitted_len > self.max_payload_len {
            self.finalize_current_payload();
        }

        self.prepare_for_write();
        self.payloads_buf.extend_from_slice(&self.metric_buf);
        self.metric_buf.clear();

        true
    }

    /// Writes a gauge line: `[<prefix>.]<name>:<value>|g[|#<tag>,<tag>...]`.
    pub fn write_gauge(
        &mut self,
        prefix: Option<&str>,
        name: &str,
        value: i64,
        tags: &TagSet,
    ) -> WriteResult {
        self.metric_buf.clear();

        if let Some(prefix) = prefix {
            self.metric_buf.extend_from_slice(prefix.as_bytes());
            self.metric_buf.push(b'.');
        }
        self.metric_buf.extend_from_slice(name.as_bytes());

        let mut int_writer = itoa::Buffer::new();
        self.metric_buf.push(b':');
        self.metric_buf.extend_from_slice(int_writer.format(value).as_bytes());
        self.metric_buf.extend_from_slice(b"|g");

        for (i, tag) in tags.iter().enumerate() {
            if i == 0 {
                self.metric_buf.extend_from_slice(b"|#");
            } else {
                self.metric_buf.push(b',');
            }
            self.metric_buf.extend_from_slice(tag.as_bytes());
        }

        // We always add a trailing newline, regardless of whether or not we're using a length prefix.
        self.metric_buf.push(b'\n');

        if self.commit() {
            WriteResult::success(1)
        } else {
            WriteResult::failure(1)
        }
    }

    /// Returns a consuming iterator over all payloads written by this writer.
    ///
    /// The payloads will be cleared from the writer when the iterator is dropped.
    pub fn payloads(&mut self) -> Payloads<'_> {
        self.finalize_current_payload();
        self.metric_buf.clear();

        Payloads::new(&mut self.payloads_buf, &mut self.offsets)
    }
}

/// Iterator over all payloads written by a `PayloadWriter`.
pub struct Payloads<'a> {
    payloads_buf: ConsumingBufferSwap<'a, u8>,
    start: usize,
    offsets: Drain<'a, usize>,
}

impl<'a> Payloads<'a> {
    fn new(payload_buf: &'a mut Vec<u8>, offsets: &'a mut Vec<usize>) -> Self {
        Self {
            payloads_buf: ConsumingBufferSwap::new(payload_buf),
            start: 0,
            offsets: offsets.drain(..),
        }
    }

    /// Returns the number of remaining payloads.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns the next payload.
    ///
    /// If there are no more payloads, `None` is returned.
    pub fn next_payload(&mut self) -> Option<&[u8]> {
        let offset = self.offsets.next()?;

        let offset_buf = &self.payloads_buf[self.start..offset];
        self.start = offset;

        Some(offset_buf)
    }
}

// Keeps the source buffer empty for as long as the payloads are being consumed.
//
// The buffer is swapped out up front, so the writer is already in its cleared state even if `Payloads` is leaked.
// Dropping the swap clears the original buffer and hands it back to the writer so its allocation can be reused.
struct ConsumingBufferSwap<'a, T> {
    source: &'a mut Vec<T>,
    original: Vec<T>,
}

impl<'a, T> ConsumingBufferSwap<'a, T> {
    fn new(source: &'a mut Vec<T>) -> Self {
        let original = std::mem::take(source);
        Self { source, original }
    }
}

impl<T> Drop for ConsumingBufferSwap<'_, T> {
    fn drop(&mut self) {
        self.original.clear();
        std::mem::swap(self.source, &mut self.original);
    }
}

impl<T> Deref for ConsumingBufferSwap<'_, T> {
    type Target = Vec<T>;

    fn deref(&self) -> &Self::Target {
        &self.original
    }
}

impl<T> DerefMut for ConsumingBufferSwap<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.original
    }
}

#[cfg(test)]
mod tests {
    use proptest::{collection::vec as arb_vec, prelude::*, proptest};

    use super::{PayloadWriter, SMALLEST_VALID_PAYLOAD};
    use crate::tags::TagSet;

    const SMALLEST_VALID_PAYLOAD_LEN: usize = SMALLEST_VALID_PAYLOAD.len();

    fn arb_tags() -> impl Strategy<Value = TagSet> {
        let bare_tag = "[a-z]{4,12}";
        let kv_tag = "[a-z]{4,12}:[a-z0-9]{8,16}";

        arb_vec(prop_oneof![bare_tag, kv_tag], 0..6).prop_map(|tags| tags.into_iter().collect())
    }

    fn buf_from_writer(writer: &mut PayloadWriter) -> Vec<u8> {
        let mut payloads = writer.payloads();
        let mut buf = Vec::new();
        while let Some(payload) = payloads.next_payload() {
            buf.extend_from_slice(payload);
        }

        buf
    }

    fn string_from_writer(writer: &mut PayloadWriter) -> String {
        String::from_utf8(buf_from_writer(writer)).unwrap()
    }

    #[test]
    fn gauge() {
        // Cases are defined as: prefix, name, value, tags, expected output.
        let cases = [
            (None, "workers", 2, &[][..], "workers:2|g\n"),
            (Some("puma"), "running", 8, &[][..], "puma.running:8|g\n"),
            (Some("puma"), "backlog", -1, &["env:prod"][..], "puma.backlog:-1|g|#env:prod\n"),
            (
                Some("puma"),
                "pool_capacity",
                0,
                &["environment:production", "team", "container_id:abc"][..],
                "puma.pool_capacity:0|g|#environment:production,team,container_id:abc\n",
            ),
        ];

        for (prefix, name, value, tags, expected) in cases {
            let tags = tags.iter().copied().collect::<TagSet>();
            let mut writer = PayloadWriter::new(8192, false);
            let result = writer.write_gauge(prefix, name, value, &tags);
            assert_eq!(result.payloads_written(), 1);
            assert!(!result.any_failures());

            assert_eq!(string_from_writer(&mut writer), expected);
        }
    }

    #[test]
    fn batch_shares_a_payload() {
        let tags = ["env:prod"].into_iter().collect::<TagSet>();
        let mut writer = PayloadWriter::new(8192, false);
        writer.write_gauge(Some("puma"), "workers", 2, &tags);
        writer.write_gauge(Some("puma"), "booted_workers", 2, &tags);

        let mut payloads = writer.payloads();
        assert_eq!(payloads.len(), 1);
        assert_eq!(
            payloads.next_payload(),
            Some(&b"puma.workers:2|g|#env:prod\npuma.booted_workers:2|g|#env:prod\n"[..])
        );
        assert_eq!(payloads.next_payload(), None);
    }

    #[test]
    fn splits_payloads_at_limit() {
        let tags = TagSet::new();
        let mut writer = PayloadWriter::new(12, false);
        writer.write_gauge(None, "aaaa", 1, &tags);
        writer.write_gauge(None, "bbbb", 2, &tags);

        let mut payloads = writer.payloads();
        assert_eq!(payloads.len(), 2);
        assert_eq!(payloads.next_payload(), Some(&b"aaaa:1|g\n"[..]));
        assert_eq!(payloads.next_payload(), Some(&b"bbbb:2|g\n"[..]));
    }

    #[test]
    fn oversized_metric_is_dropped() {
        let tags = ["a-very-long-tag-value"].into_iter().collect::<TagSet>();
        let mut writer = PayloadWriter::new(16, false);
        let result = writer.write_gauge(Some("puma"), "running", 1, &tags);
        assert!(result.any_failures());
        assert_eq!(result.points_dropped(), 1);

        let result = writer.write_gauge(None, "ok", 1, &TagSet::new());
        assert_eq!(result.payloads_written(), 1);
        assert_eq!(string_from_writer(&mut writer), "ok:1|g\n");
    }

    #[test]
    fn length_prefix() {
        let prefixed = |buf: &str| {
            let mut prefixed_buf = Vec::with_capacity(buf.len() + 4);
            prefixed_buf.extend_from_slice(&(buf.len() as u32).to_le_bytes());
            prefixed_buf.extend_from_slice(buf.as_bytes());
            prefixed_buf
        };

        let tags = ["env:prod"].into_iter().collect::<TagSet>();
        let mut writer = PayloadWriter::new(8192, true);
        writer.write_gauge(Some("puma"), "running", 3, &tags);
        writer.write_gauge(Some("puma"), "backlog", 0, &tags);

        let actual = buf_from_writer(&mut writer);
        assert_eq!(actual, prefixed("puma.running:3|g|#env:prod\npuma.backlog:0|g|#env:prod\n"));
    }

    #[test]
    fn writer_is_reusable_after_draining() {
        let tags = TagSet::new();
        let mut writer = PayloadWriter::new(8192, true);
        writer.write_gauge(None, "first", 1, &tags);
        let _ = buf_from_writer(&mut writer);

        writer.write_gauge(None, "second", 2, &tags);
        let actual = buf_from_writer(&mut writer);
        assert_eq!(&actual[4..], b"second:2|g\n");
        assert_eq!(&actual[..4], &11u32.to_le_bytes());
    }

    proptest! {
        #[test]
        fn property_test_gauntlet(
            payload_limit in SMALLEST_VALID_PAYLOAD_LEN..1024usize,
            inputs in arb_vec(("[a-z_]{4,24}", any::<i64>(), arb_tags()), 1..64),
        ) {
            let mut writer = PayloadWriter::new(payload_limit, false);
            let mut points_written = 0;
            let mut points_dropped = 0;

            for (name, value, tags) in &inputs {
                let result = writer.write_gauge(Some("puma"), name, *value, tags);
                points_written += result.payloads_written();
                points_dropped += result.points_dropped();
            }

            let mut payloads = writer.payloads();
            let mut lines_emitted = 0;
            while let Some(payload) = payloads.next_payload() {
                prop_assert!(payload.len() <= payload_limit);

                // Every line in a payload is a complete gauge.
                for line in std::str::from_utf8(payload).unwrap().lines() {
                    prop_assert!(line.starts_with("puma."));
                    prop_assert!(line.contains("|g"));
                    lines_emitted += 1;
                }
            }

            prop_assert_eq!(points_written, lines_emitted);
            prop_assert_eq!(inputs.len() as u64, points_written + points_dropped);
        }
    }
}
