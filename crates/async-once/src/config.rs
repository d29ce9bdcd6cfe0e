use serde::Deserialize;

/// Controls the behavior of a single [`AsyncOnce`](crate::AsyncOnce).
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OnceConfig {
    /// The name of the cache.
    ///
    /// This is used as the `cache` field of log events and as the `cache` tag of all metrics.
    pub name: String,

    /// Abort the task running the operation when a pending attempt is invalidated.
    ///
    /// By default, invalidation only detaches the callers waiting on an attempt, and the
    /// operation keeps running in the background until it completes. Its outcome is discarded
    /// either way.
    pub abort_on_invalidate: bool,
}

impl OnceConfig {
    /// Creates a default config with the given name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Default for OnceConfig {
    fn default() -> Self {
        Self {
            name: "default".into(),
            abort_on_invalidate: false,
        }
    }
}
