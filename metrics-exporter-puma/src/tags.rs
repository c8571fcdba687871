use std::fmt;

use crate::{environment::Environment, identity::IdentityResolver};

/// An ordered set of DogStatsD tags.
///
/// Tags are either `key:value` pairs or bare strings. Order is preserved, and duplicate keys are allowed: when two tags
/// share a key, it's up to the downstream server to decide which one wins.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TagSet(Vec<String>);

impl TagSet {
    /// Creates an empty `TagSet`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a tag.
    pub fn push<T: Into<String>>(&mut self, tag: T) {
        self.0.push(tag.into());
    }

    /// Returns an iterator over the tags, in order.
    pub fn iter(&self) -> impl ExactSizeIterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Returns the number of tags.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` if there are no tags.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the tags joined with commas, as they appear on the wire.
    pub fn joined(&self) -> String {
        self.0.join(",")
    }
}

impl fmt::Display for TagSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.joined())
    }
}

impl<T: Into<String>> FromIterator<T> for TagSet {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Builds the tags attached to every exported metric.
///
/// Tags are added in a fixed order:
///
/// - `environment:<environment_name>`
/// - `env:shopvox-<ENVIRONMENT>`, if `ENVIRONMENT` is set
/// - `grouping:<STATSD_GROUPING>`, if `STATSD_GROUPING` is set
/// - every tag in `DD_TAGS`, separated by commas or whitespace
/// - `env:<DD_ENV>`, `service:<DD_SERVICE>` and `version:<DD_VERSION>`, for each one that is set
/// - `container_id:<identity>`, if the resolver returns a non-blank identity
///
/// `DD_TAGS`, `DD_ENV`, `DD_SERVICE` and `DD_VERSION` follow Datadog's unified service tagging, so the exported
/// metrics carry the same tags as the application's own telemetry.
pub fn build_tags(
    environment_name: &str,
    env: &dyn Environment,
    resolver: &mut dyn IdentityResolver,
) -> TagSet {
    let mut tags = TagSet::new();
    tags.push(format!("environment:{environment_name}"));

    if let Some(environment) = env.var("ENVIRONMENT") {
        tags.push(format!("env:shopvox-{environment}"));
    }

    if let Some(grouping) = env.var("STATSD_GROUPING") {
        tags.push(format!("grouping:{grouping}"));
    }

    if let Some(dd_tags) = env.var("DD_TAGS") {
        for tag in dd_tags.split(|c: char| c == ',' || c.is_whitespace()).filter(|t| !t.is_empty()) {
            tags.push(tag);
        }
    }

    for (var, key) in [("DD_ENV", "env"), ("DD_SERVICE", "service"), ("DD_VERSION", "version")] {
        if let Some(value) = env.var(var) {
            tags.push(format!("{key}:{value}"));
        }
    }

    if let Some(container_id) = resolver.resolve() {
        if !container_id.trim().is_empty() {
            tags.push(format!("container_id:{container_id}"));
        }
    }

    tags
}
