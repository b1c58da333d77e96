//! Tuning knobs for the buffer manager and frame dispatcher.
//!
//! Route-tree and backend configuration is out of scope for this crate; it
//! is carried around as an opaque [`SharedConfig`] handle that the request
//! context stores and clones but never inspects.

use std::any::Any;
use std::sync::Arc;

use serde::Deserialize;

/// An opaque, type-erased configuration snapshot.
///
/// The proxy core never reads these bytes; it only attaches one to a
/// [`crate::context::RequestContext`] at hand-off time and clones it into
/// every sub-request. Callers that know the concrete config type recover it
/// with [`SharedConfig::downcast_ref`].
#[derive(Clone)]
pub struct SharedConfig(Arc<dyn Any + Send + Sync>);

impl SharedConfig {
    /// Wraps a concrete configuration value.
    pub fn new<T: Any + Send + Sync>(config: T) -> Self {
        Self(Arc::new(config))
    }

    /// Recovers the concrete configuration type, if it matches.
    pub fn downcast_ref<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }
}

/// Buffer manager and dispatcher tuning knobs.
///
/// Loaded from TOML via [`ProxyConfig::from_toml_str`]; every field has a
/// default matching the values named in this crate's specification.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Initial and post-shrink target size for each connection's read buffer.
    pub min_buffer_size: usize,
    /// Capacity above which an idle buffer is eligible to shrink back down.
    pub max_buffer_size: usize,
    /// Whether oversized frames are read into a madvise(DONTDUMP) buffer
    /// instead of the ordinary growable one.
    pub use_secure_allocator: bool,
    /// Number of delivered frames between shrink-policy checks.
    pub adjust_interval: u64,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            min_buffer_size: 4 * 1024,
            max_buffer_size: 1024 * 1024,
            use_secure_allocator: false,
            adjust_interval: 10_000,
        }
    }
}

impl ProxyConfig {
    /// Parses a `ProxyConfig` out of a TOML document, falling back to
    /// defaults for any key left unset.
    pub fn from_toml_str(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }
}
