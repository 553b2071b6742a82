//! Log service abstraction
//!
//! The consumer-group state machine only needs five primitives from the log
//! service. [`StreamBackend`] captures them so the same `Producer` and
//! `Consumer` run against Redis Streams ([`crate::RedisBackend`]) or the
//! in-process [`crate::MemoryBackend`].
//!
//! The service alone arbitrates exclusive delivery and exclusive claiming
//! between consumers sharing a group. Implementations must not rely on any
//! client-side locking for that.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::{ClientError, Result};
use crate::message::EntryId;

/// A single field value as stored by the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Bytes(Bytes),
    Int(i64),
    Nil,
}

/// Raw entry as returned by group reads and claims, before payload decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    /// Field/value pairs in stored order. Empty when the entry was deleted
    /// from the stream while still pending.
    pub fields: Vec<(String, FieldValue)>,
}

/// Length bound requested on append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trim {
    /// Maximum number of entries to keep
    pub max_len: u64,
    /// Allow the service to keep more than `max_len` entries in exchange for
    /// cheaper trimming
    pub approx: bool,
}

/// Outcome of a group creation request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupStatus {
    Created,
    AlreadyExists,
}

/// Parameters of a blocking group read for strictly new entries.
#[derive(Debug, Clone, Copy)]
pub struct ReadGroupRequest<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    pub count: usize,
    /// Maximum time to wait for new entries. `None` returns immediately.
    pub block: Option<Duration>,
}

/// Parameters of a single claim scan over the pending entry list.
#[derive(Debug, Clone, Copy)]
pub struct ClaimRequest<'a> {
    pub stream: &'a str,
    pub group: &'a str,
    pub consumer: &'a str,
    pub count: usize,
    pub min_idle: Duration,
    /// Where to resume the scan. `0-0` starts from the beginning.
    pub cursor: EntryId,
}

/// Successful claim scan
#[derive(Debug, Clone, Default)]
pub struct ClaimBatch {
    /// Entries whose ownership was transferred to the requesting consumer
    pub entries: Vec<StreamEntry>,
    /// Cursor to resume the next scan from; `0-0` once the end was reached
    pub next_cursor: EntryId,
    /// Pending IDs whose stream entry no longer exists; dropped by the service
    pub deleted: Vec<EntryId>,
}

/// Failed claim scan.
///
/// Some services report how far the scan got before the fault. The consumer
/// stores `next_cursor` when present even though the call failed.
#[derive(Debug)]
pub struct ClaimFailure {
    pub next_cursor: Option<EntryId>,
    pub error: ClientError,
}

impl From<ClientError> for ClaimFailure {
    fn from(error: ClientError) -> Self {
        Self {
            next_cursor: None,
            error,
        }
    }
}

impl From<redis::RedisError> for ClaimFailure {
    fn from(err: redis::RedisError) -> Self {
        ClientError::from(err).into()
    }
}

/// Primitives the log service must provide.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Append `body` as the `body` field of a new entry with a service
    /// generated ID, optionally bounding the stream length.
    async fn append(&self, stream: &str, body: Bytes, trim: Option<Trim>) -> Result<EntryId>;

    /// Read up to `count` entries never delivered to this group, waiting up
    /// to `block`. A timeout with no data is an empty vector.
    async fn read_group(&self, request: ReadGroupRequest<'_>) -> Result<Vec<StreamEntry>>;

    /// Scan the group's pending entry list from `cursor`, transferring
    /// entries idle at least `min_idle` to `consumer`. Never blocks.
    async fn autoclaim(
        &self,
        request: ClaimRequest<'_>,
    ) -> std::result::Result<ClaimBatch, ClaimFailure>;

    /// Remove IDs from the group's pending entry list. Returns how many were
    /// actually pending.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64>;

    /// Create the stream if missing and a group whose cursor starts after the
    /// current last entry. An existing group is left untouched.
    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus>;
}
