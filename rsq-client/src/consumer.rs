//! Consumer abstraction for reading from a stream through a consumer group
//!
//! Every read runs the same two-phase policy:
//!
//! 1. **New entries**: a group read for entries never delivered to the
//!    group, waiting up to the configured block duration.
//! 2. **Claim**: only when phase 1 timed out empty, a non-blocking scan of
//!    the group's pending entry list that takes over entries idle longer than
//!    `min_idle` (their owner crashed or stalled).
//!
//! ```text
//! WAITING_NEW --(entries within block)-------> return entries
//! WAITING_NEW --(timeout, nothing)-----------> CLAIMING
//! CLAIMING    --(idle entries, cursor moved)-> return entries
//! CLAIMING    --(none, cursor moved/wrapped)-> return empty
//! any phase   --(transport fault)------------> return error
//! ```
//!
//! The claim cursor is the only state carried between calls. It is kept per
//! consumer so successive calls sweep the whole pending list instead of
//! rescanning it from the start each time. It lives in memory only: a new
//! process starts its sweep at `0-0`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use rsq_client::{Consumer, ConsumerConfig, RedisBackend, create_group};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = RedisBackend::connect("redis://127.0.0.1:6379").await?;
//!     create_group(&backend, "orders", "billing").await?;
//!
//!     let mut consumer = Consumer::new(
//!         backend,
//!         ConsumerConfig::new("orders", "billing", "worker-1")
//!             .with_block(Duration::from_secs(2))
//!             .with_min_idle(Duration::from_secs(30)),
//!     );
//!
//!     loop {
//!         if let Some(msg) = consumer.read().await? {
//!             // process msg.body, then
//!             consumer.ack(&[msg.id]).await?;
//!         }
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::backend::{ClaimRequest, ReadGroupRequest, StreamBackend};
use crate::error::{ClientError, Result};
use crate::message::{EntryId, Message};

/// Configuration for a consumer
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Stream to consume from
    pub stream: String,
    /// Consumer group shared by cooperating consumers
    pub group: String,
    /// This consumer's identity within the group
    pub name: String,
    /// Maximum wait for new entries per call (default: 2s, zero = no wait)
    pub block: Duration,
    /// Minimum idle time before a pending entry may be claimed (default: 30s)
    pub min_idle: Duration,
}

impl ConsumerConfig {
    /// Create a new consumer configuration
    pub fn new(
        stream: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            stream: stream.into(),
            group: group.into(),
            name: name.into(),
            block: Duration::from_secs(2),
            min_idle: Duration::from_secs(30),
        }
    }

    /// Set the maximum time to wait for new entries
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Set the idle threshold for claiming pending entries
    pub fn with_min_idle(mut self, min_idle: Duration) -> Self {
        self.min_idle = min_idle;
        self
    }

    fn block_for_read(&self) -> Option<Duration> {
        (!self.block.is_zero()).then_some(self.block)
    }
}

/// Delivery counters for a consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    /// Entries delivered by the new-entry phase
    pub delivered: AtomicU64,
    /// Entries taken over from idle owners by the claim phase
    pub claimed: AtomicU64,
    /// Calls where neither phase produced anything
    pub empty_polls: AtomicU64,
    /// Entries acknowledged through this consumer
    pub acked: AtomicU64,
}

impl ConsumerStats {
    /// Get a snapshot of current counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            claimed: self.claimed.load(Ordering::Relaxed),
            empty_polls: self.empty_polls.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of consumer counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub delivered: u64,
    pub claimed: u64,
    pub empty_polls: u64,
    pub acked: u64,
}

/// A consumer within a consumer group.
///
/// `read` and `read_batch` take `&mut self` because they advance the claim
/// cursor; run one `Consumer` per task. Several consumers, in this process
/// or others, may share a group name. The log service decides which of them
/// gets each entry.
pub struct Consumer<B> {
    backend: B,
    config: ConsumerConfig,
    claim_cursor: EntryId,
    stats: ConsumerStats,
}

impl<B: StreamBackend> Consumer<B> {
    /// Create a consumer. The group must already exist (see
    /// [`crate::create_group`]).
    pub fn new(backend: B, config: ConsumerConfig) -> Self {
        Self {
            backend,
            config,
            claim_cursor: EntryId::MIN,
            stats: ConsumerStats::default(),
        }
    }

    /// Fetch a single message.
    ///
    /// Returns `Ok(None)` when no new entry arrived within the block duration
    /// and no pending entry was idle long enough to claim. Call again (for
    /// example on a timer) to keep making progress.
    pub async fn read(&mut self) -> Result<Option<Message>> {
        let mut messages = self.fetch(1).await?;
        Ok(messages.pop())
    }

    /// Fetch up to `batch_size` messages.
    ///
    /// Same policy as [`Consumer::read`]. The claim phase never blocks, so
    /// one call waits at most one block duration even when it returns
    /// nothing. This method does not schedule itself; tick it from your own
    /// interval for periodic batch draining.
    pub async fn read_batch(&mut self, batch_size: usize) -> Result<Vec<Message>> {
        if batch_size == 0 {
            return Err(ClientError::Config(
                "batch size must be greater than zero".to_string(),
            ));
        }
        self.fetch(batch_size).await
    }

    /// Acknowledge processed entries, removing them from the group's pending
    /// list. Returns how many were actually pending; unknown or already
    /// acknowledged IDs count as zero.
    pub async fn ack(&self, ids: &[EntryId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let acked = self
            .backend
            .ack(&self.config.stream, &self.config.group, ids)
            .await?;
        self.stats.acked.fetch_add(acked, Ordering::Relaxed);
        trace!(
            stream = %self.config.stream,
            group = %self.config.group,
            requested = ids.len(),
            acked,
            "Acknowledged entries"
        );
        Ok(acked)
    }

    async fn fetch(&mut self, count: usize) -> Result<Vec<Message>> {
        let fresh = self
            .backend
            .read_group(ReadGroupRequest {
                stream: &self.config.stream,
                group: &self.config.group,
                consumer: &self.config.name,
                count,
                block: self.config.block_for_read(),
            })
            .await?;

        if !fresh.is_empty() {
            let messages = fresh
                .into_iter()
                .map(Message::from_entry)
                .collect::<Result<Vec<_>>>()?;
            self.stats
                .delivered
                .fetch_add(messages.len() as u64, Ordering::Relaxed);
            trace!(consumer = %self.config.name, count = messages.len(), "Read new entries");
            return Ok(messages);
        }

        debug!(
            consumer = %self.config.name,
            cursor = %self.claim_cursor,
            "No new entries within block window, scanning pending list"
        );
        let claimed = self.claim(count).await?;

        if claimed.is_empty() {
            self.stats.empty_polls.fetch_add(1, Ordering::Relaxed);
        } else {
            self.stats
                .claimed
                .fetch_add(claimed.len() as u64, Ordering::Relaxed);
        }
        Ok(claimed)
    }

    async fn claim(&mut self, count: usize) -> Result<Vec<Message>> {
        let outcome = self
            .backend
            .autoclaim(ClaimRequest {
                stream: &self.config.stream,
                group: &self.config.group,
                consumer: &self.config.name,
                count,
                min_idle: self.config.min_idle,
                cursor: self.claim_cursor,
            })
            .await;

        let batch = match outcome {
            Ok(batch) => batch,
            Err(failure) => {
                // Progress reported with a fault is kept; entries between the
                // old and new cursor are skipped until the sweep wraps around.
                if let Some(next) = failure.next_cursor {
                    warn!(
                        consumer = %self.config.name,
                        from = %self.claim_cursor,
                        to = %next,
                        error = %failure.error,
                        "Claim scan failed after advancing cursor"
                    );
                    self.claim_cursor = next;
                }
                return Err(failure.error);
            },
        };

        self.claim_cursor = batch.next_cursor;

        if !batch.deleted.is_empty() {
            warn!(
                consumer = %self.config.name,
                deleted = batch.deleted.len(),
                "Pending entries no longer in stream were dropped by the service"
            );
        }

        if batch.entries.is_empty() {
            trace!(consumer = %self.config.name, next = %self.claim_cursor, "Nothing to claim");
        } else {
            debug!(
                consumer = %self.config.name,
                count = batch.entries.len(),
                next = %self.claim_cursor,
                "Claimed idle pending entries"
            );
        }

        batch.entries.into_iter().map(Message::from_entry).collect()
    }

    /// Get the consumer configuration
    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Delivery counters
    pub fn stats(&self) -> &ConsumerStats {
        &self.stats
    }

    /// Access the underlying backend
    pub fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub(crate) fn claim_cursor(&self) -> EntryId {
        self.claim_cursor
    }
}
