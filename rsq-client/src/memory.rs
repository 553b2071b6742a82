//! In-process log service
//!
//! [`MemoryBackend`] implements [`StreamBackend`] with the same observable
//! semantics as Redis Streams: millisecond/sequence IDs, `MAXLEN` trimming,
//! `$` group cursors, blocking group reads woken by appends, a pending entry
//! list per group, and cursor-paged claiming. State is lost when the process
//! exits. Use it for tests, or to embed a queue in a single process.
//!
//! Clones share the same state, so one backend can serve many producers and
//! consumers on different tasks.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use redis::{ErrorKind, RedisError};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::backend::{
    ClaimBatch, ClaimFailure, ClaimRequest, FieldValue, GroupStatus, ReadGroupRequest,
    StreamBackend, StreamEntry, Trim,
};
use crate::error::{ClientError, Result};
use crate::message::{BODY_FIELD, EntryId};

/// Approximate trimming only removes whole chunks of this many entries.
pub const APPROX_TRIM_CHUNK: usize = 100;

/// Pending entries examined per requested entry during one claim scan.
pub const CLAIM_SCAN_FACTOR: usize = 10;

/// Backend operation, used to target injected faults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Append,
    ReadGroup,
    Autoclaim,
    Ack,
    CreateGroup,
}

/// Snapshot of one pending entry list element
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingInfo {
    pub id: EntryId,
    pub consumer: String,
    pub delivery_count: u64,
}

#[derive(Debug)]
struct Fault {
    op: Operation,
    next_cursor: Option<EntryId>,
}

#[derive(Debug)]
struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
    delivery_count: u64,
}

#[derive(Debug, Default)]
struct GroupState {
    last_delivered: EntryId,
    pending: BTreeMap<EntryId, PendingEntry>,
}

#[derive(Debug, Default)]
struct StreamState {
    entries: BTreeMap<EntryId, Vec<(String, FieldValue)>>,
    last_id: EntryId,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn next_id(&self) -> EntryId {
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        // Never go backwards, even if the wall clock does
        if now_ms > self.last_id.ms() {
            EntryId::new(now_ms, 0)
        } else {
            self.last_id.successor()
        }
    }

    fn trim(&mut self, trim: Trim) {
        let max_len = usize::try_from(trim.max_len).unwrap_or(usize::MAX);
        if trim.approx {
            while self.entries.len().saturating_sub(max_len) >= APPROX_TRIM_CHUNK {
                for _ in 0..APPROX_TRIM_CHUNK {
                    self.entries.pop_first();
                }
            }
        } else {
            while self.entries.len() > max_len {
                self.entries.pop_first();
            }
        }
    }
}

#[derive(Debug, Default)]
struct State {
    streams: HashMap<String, StreamState>,
    faults: VecDeque<Fault>,
}

impl State {
    fn take_fault(&mut self, op: Operation) -> Option<Fault> {
        let pos = self.faults.iter().position(|f| f.op == op)?;
        self.faults.remove(pos)
    }

    fn stream_with_group(&mut self, stream: &str, group: &str) -> Result<&mut StreamState> {
        match self.streams.get_mut(stream) {
            Some(s) if s.groups.contains_key(group) => Ok(s),
            _ => Err(no_group(stream, group)),
        }
    }
}

/// Same error reply Redis gives for a missing stream or group.
fn no_group(stream: &str, group: &str) -> ClientError {
    RedisError::from((
        ErrorKind::ExtensionError,
        "NOGROUP",
        format!("No such key '{}' or consumer group '{}'", stream, group),
    ))
    .into()
}

/// Injected faults look like a dropped connection.
fn injected(op: Operation) -> ClientError {
    let reset = io::Error::new(
        io::ErrorKind::ConnectionReset,
        format!("injected fault in {:?}", op),
    );
    RedisError::from(reset).into()
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    appended: Notify,
}

/// In-memory [`StreamBackend`]
#[derive(Debug, Default, Clone)]
pub struct MemoryBackend {
    shared: Arc<Shared>,
}

impl MemoryBackend {
    /// Create a new, empty backend
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, State>> {
        self.shared
            .state
            .lock()
            .map_err(|e| {
                RedisError::from((ErrorKind::ClientError, "Lock poisoned", e.to_string())).into()
            })
    }

    /// Append an entry with arbitrary fields, bypassing the `body` layout.
    ///
    /// Lets tests store entries a foreign producer might have written.
    pub fn append_fields(
        &self,
        stream: &str,
        fields: Vec<(String, FieldValue)>,
    ) -> Result<EntryId> {
        let id = {
            let mut state = self.lock()?;
            let s = state.streams.entry(stream.to_string()).or_default();
            let id = s.next_id();
            s.entries.insert(id, fields);
            s.last_id = id;
            id
        };
        self.shared.appended.notify_waiters();
        Ok(id)
    }

    /// Remove an entry from the stream, leaving any pending references to it.
    pub fn delete_entry(&self, stream: &str, id: EntryId) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(state
            .streams
            .get_mut(stream)
            .is_some_and(|s| s.entries.remove(&id).is_some()))
    }

    /// Number of entries currently stored in `stream`
    pub fn stream_len(&self, stream: &str) -> Result<usize> {
        let state = self.lock()?;
        Ok(state.streams.get(stream).map_or(0, |s| s.entries.len()))
    }

    /// Pending entry list of a group, in ID order
    pub fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingInfo>> {
        let state = self.lock()?;
        let g = state
            .streams
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .ok_or_else(|| no_group(stream, group))?;
        Ok(g.pending
            .iter()
            .map(|(id, p)| PendingInfo {
                id: *id,
                consumer: p.consumer.clone(),
                delivery_count: p.delivery_count,
            })
            .collect())
    }

    /// Make the next call of `op` fail with a transport error.
    pub fn inject_fault(&self, op: Operation) -> Result<()> {
        self.lock()?.faults.push_back(Fault {
            op,
            next_cursor: None,
        });
        Ok(())
    }

    /// Make the next claim scan fail with a transport error that still
    /// reports `next_cursor` as scan progress.
    pub fn inject_claim_fault_with_cursor(&self, next_cursor: EntryId) -> Result<()> {
        self.lock()?.faults.push_back(Fault {
            op: Operation::Autoclaim,
            next_cursor: Some(next_cursor),
        });
        Ok(())
    }

    fn deliver_new(&self, request: &ReadGroupRequest<'_>) -> Result<Vec<StreamEntry>> {
        let mut state = self.lock()?;
        if state.take_fault(Operation::ReadGroup).is_some() {
            return Err(injected(Operation::ReadGroup));
        }

        let s = state.stream_with_group(request.stream, request.group)?;
        let StreamState {
            entries, groups, ..
        } = s;
        let Some(g) = groups.get_mut(request.group) else {
            return Err(no_group(request.stream, request.group));
        };

        let now = Instant::now();
        let delivered: Vec<StreamEntry> = entries
            .range(g.last_delivered.successor()..)
            .take(request.count)
            .map(|(id, fields)| StreamEntry {
                id: *id,
                fields: fields.clone(),
            })
            .collect();

        for entry in &delivered {
            g.last_delivered = entry.id;
            g.pending.insert(
                entry.id,
                PendingEntry {
                    consumer: request.consumer.to_string(),
                    delivered_at: now,
                    delivery_count: 1,
                },
            );
        }
        Ok(delivered)
    }
}

#[async_trait]
impl StreamBackend for MemoryBackend {
    async fn append(&self, stream: &str, body: Bytes, trim: Option<Trim>) -> Result<EntryId> {
        let id = {
            let mut state = self.lock()?;
            if state.take_fault(Operation::Append).is_some() {
                return Err(injected(Operation::Append));
            }
            let s = state.streams.entry(stream.to_string()).or_default();
            let id = s.next_id();
            s.entries
                .insert(id, vec![(BODY_FIELD.to_string(), FieldValue::Bytes(body))]);
            s.last_id = id;
            if let Some(trim) = trim {
                s.trim(trim);
            }
            id
        };
        self.shared.appended.notify_waiters();
        Ok(id)
    }

    async fn read_group(&self, request: ReadGroupRequest<'_>) -> Result<Vec<StreamEntry>> {
        let Some(block) = request.block else {
            return self.deliver_new(&request);
        };

        let deadline = Instant::now() + block;
        loop {
            // Register for wakeups before looking, so an append between the
            // check and the wait is not missed
            let notified = self.shared.appended.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let entries = self.deliver_new(&request)?;
            if !entries.is_empty() {
                return Ok(entries);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn autoclaim(
        &self,
        request: ClaimRequest<'_>,
    ) -> std::result::Result<ClaimBatch, ClaimFailure> {
        let mut state = self.lock()?;
        if let Some(fault) = state.take_fault(Operation::Autoclaim) {
            return Err(ClaimFailure {
                next_cursor: fault.next_cursor,
                error: injected(Operation::Autoclaim),
            });
        }

        let s = state.stream_with_group(request.stream, request.group)?;
        let StreamState {
            entries, groups, ..
        } = s;
        let Some(g) = groups.get_mut(request.group) else {
            return Err(no_group(request.stream, request.group).into());
        };

        let now = Instant::now();
        let mut attempts = request.count.saturating_mul(CLAIM_SCAN_FACTOR);
        let mut wanted = request.count;
        let mut scan_from = request.cursor;
        let mut batch = ClaimBatch::default();

        loop {
            let Some(id) = g.pending.range(scan_from..).next().map(|(id, _)| *id) else {
                // End of the pending list: the next scan starts over
                batch.next_cursor = EntryId::MIN;
                break;
            };
            if attempts == 0 || wanted == 0 {
                batch.next_cursor = id;
                break;
            }
            attempts -= 1;
            scan_from = id.successor();

            let Some(fields) = entries.get(&id) else {
                g.pending.remove(&id);
                batch.deleted.push(id);
                continue;
            };
            let Some(pending) = g.pending.get_mut(&id) else {
                continue;
            };
            if now.saturating_duration_since(pending.delivered_at) < request.min_idle {
                continue;
            }

            pending.consumer = request.consumer.to_string();
            pending.delivered_at = now;
            pending.delivery_count += 1;
            batch.entries.push(StreamEntry {
                id,
                fields: fields.clone(),
            });
            wanted -= 1;
        }

        Ok(batch)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        let mut state = self.lock()?;
        if state.take_fault(Operation::Ack).is_some() {
            return Err(injected(Operation::Ack));
        }

        // Unknown stream or group acknowledges nothing
        let Some(g) = state
            .streams
            .get_mut(stream)
            .and_then(|s| s.groups.get_mut(group))
        else {
            return Ok(0);
        };

        let removed = ids
            .iter()
            .filter(|id| g.pending.remove(*id).is_some())
            .count();
        Ok(removed as u64)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus> {
        let mut state = self.lock()?;
        if state.take_fault(Operation::CreateGroup).is_some() {
            return Err(injected(Operation::CreateGroup));
        }

        let s = state.streams.entry(stream.to_string()).or_default();
        if s.groups.contains_key(group) {
            return Ok(GroupStatus::AlreadyExists);
        }
        let last_delivered = s.last_id;
        s.groups.insert(
            group.to_string(),
            GroupState {
                last_delivered,
                pending: BTreeMap::new(),
            },
        );
        Ok(GroupStatus::Created)
    }
}
