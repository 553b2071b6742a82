//! Producer Abstraction Layer
//!
//! Appends opaque payloads to a stream, one entry per call, with optional
//! length-bounded trimming.
//!
//! # Example
//!
//! ```rust,no_run
//! use rsq_client::{Producer, ProducerConfig, RedisBackend, create_group};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = RedisBackend::connect("redis://127.0.0.1:6379").await?;
//!     create_group(&backend, "orders", "billing").await?;
//!
//!     let producer = Producer::new(
//!         backend,
//!         ProducerConfig::new().with_max_len(1000).with_approx(true),
//!     );
//!     let id = producer.add("orders", b"order-42".as_slice()).await?;
//!     println!("Appended {}", id);
//!     Ok(())
//! }
//! ```

use bytes::Bytes;
use tracing::trace;

use crate::backend::{StreamBackend, Trim};
use crate::error::Result;
use crate::message::EntryId;

/// Configuration for the producer
#[derive(Debug, Clone)]
pub struct ProducerConfig {
    /// Maximum stream length requested on each append (0 = unbounded)
    pub max_len: u64,
    /// Approximate trimming (`MAXLEN ~`): may keep more than `max_len`
    /// entries but is cheaper for the service
    pub approx: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            max_len: 0,
            approx: true,
        }
    }
}

impl ProducerConfig {
    /// Create a new producer configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum stream length
    pub fn with_max_len(mut self, max_len: u64) -> Self {
        self.max_len = max_len;
        self
    }

    /// Choose between approximate and exact trimming
    pub fn with_approx(mut self, approx: bool) -> Self {
        self.approx = approx;
        self
    }

    fn trim(&self) -> Option<Trim> {
        (self.max_len > 0).then_some(Trim {
            max_len: self.max_len,
            approx: self.approx,
        })
    }
}

/// Appends entries to streams.
///
/// Failures are returned as-is; retry policy belongs to the caller.
pub struct Producer<B> {
    backend: B,
    config: ProducerConfig,
}

impl<B: StreamBackend> Producer<B> {
    pub fn new(backend: B, config: ProducerConfig) -> Self {
        Self { backend, config }
    }

    /// Append `body` to `stream` and return the ID the service assigned.
    pub async fn add(&self, stream: &str, body: impl Into<Bytes>) -> Result<EntryId> {
        let body = body.into();
        let len = body.len();
        let id = self.backend.append(stream, body, self.config.trim()).await?;
        trace!(stream, %id, bytes = len, "Appended entry");
        Ok(id)
    }

    /// Get the producer configuration
    pub fn config(&self) -> &ProducerConfig {
        &self.config
    }

    /// Access the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }
}
