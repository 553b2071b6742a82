//! Redis Streams backend
//!
//! Maps the [`StreamBackend`] primitives onto `XADD`, `XREADGROUP`,
//! `XAUTOCLAIM`, `XACK` and `XGROUP CREATE ... MKSTREAM`. The wire layout
//! (single `body` field, `*` IDs, `MAXLEN ~`, `>` reads, `$` groups) is shared
//! with existing deployments and must not change.
//!
//! A blocking `XREADGROUP` occupies its connection until it returns, delaying
//! any other command multiplexed on it. Give each consumer its own
//! [`RedisBackend`] rather than cloning one across consumers.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::{RedisWrite, ToRedisArgs, Value};
use tracing::debug;

use crate::backend::{
    ClaimBatch, ClaimFailure, ClaimRequest, FieldValue, GroupStatus, ReadGroupRequest,
    StreamBackend, StreamEntry, Trim,
};
use crate::error::{ClientError, Result};
use crate::message::{BODY_FIELD, EntryId};

/// Error code Redis replies with when the group already exists.
const BUSYGROUP: &str = "BUSYGROUP";

impl ToRedisArgs for EntryId {
    fn write_redis_args<W>(&self, out: &mut W)
    where
        W: ?Sized + RedisWrite,
    {
        out.write_arg(self.to_string().as_bytes());
    }
}

/// [`StreamBackend`] over a Redis server.
///
/// The connection reconnects automatically after failures; the failed
/// command itself is reported as [`ClientError::Transport`] and not retried.
#[derive(Clone)]
pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    /// Connect to the server at `url` (for example `redis://127.0.0.1:6379`).
    pub async fn connect(url: &str) -> Result<Self> {
        debug!(url, "Connecting to Redis");
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        debug!(url, "Connected to Redis");
        Ok(Self { conn })
    }

    /// Wrap an existing connection manager
    pub fn from_connection(conn: ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl StreamBackend for RedisBackend {
    async fn append(&self, stream: &str, body: Bytes, trim: Option<Trim>) -> Result<EntryId> {
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream);
        if let Some(trim) = trim {
            cmd.arg("MAXLEN")
                .arg(if trim.approx { "~" } else { "=" })
                .arg(trim.max_len);
        }
        cmd.arg("*").arg(BODY_FIELD).arg(&body[..]);

        let mut conn = self.conn.clone();
        let id: String = cmd.query_async(&mut conn).await?;
        id.parse()
    }

    async fn read_group(&self, request: ReadGroupRequest<'_>) -> Result<Vec<StreamEntry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(request.group)
            .arg(request.consumer)
            .arg("COUNT")
            .arg(request.count);
        if let Some(block) = request.block {
            cmd.arg("BLOCK").arg(block_millis(block));
        }
        cmd.arg("STREAMS").arg(request.stream).arg(">");

        let mut conn = self.conn.clone();
        let reply: Value = cmd.query_async(&mut conn).await?;
        parse_read_reply(reply)
    }

    async fn autoclaim(
        &self,
        request: ClaimRequest<'_>,
    ) -> std::result::Result<ClaimBatch, ClaimFailure> {
        let mut cmd = redis::cmd("XAUTOCLAIM");
        cmd.arg(request.stream)
            .arg(request.group)
            .arg(request.consumer)
            .arg(request.min_idle.as_millis() as u64)
            .arg(request.cursor)
            .arg("COUNT")
            .arg(request.count);

        // Redis never reports a cursor together with an error reply
        let mut conn = self.conn.clone();
        let reply: Value = cmd.query_async(&mut conn).await?;
        Ok(parse_autoclaim_reply(reply)?)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<u64> {
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group).arg(ids);

        let mut conn = self.conn.clone();
        let acked: u64 = cmd.query_async(&mut conn).await?;
        Ok(acked)
    }

    async fn create_group(&self, stream: &str, group: &str) -> Result<GroupStatus> {
        let mut cmd = redis::cmd("XGROUP");
        cmd.arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM");

        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = cmd.query_async(&mut conn).await;
        match result {
            Ok(()) => Ok(GroupStatus::Created),
            Err(e) if e.code() == Some(BUSYGROUP) => Ok(GroupStatus::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }
}

/// `BLOCK 0` waits forever, so sub-millisecond waits round up to 1ms.
fn block_millis(block: Duration) -> u64 {
    (block.as_millis() as u64).max(1)
}

fn invalid(what: &str, value: &Value) -> ClientError {
    ClientError::InvalidResponse(format!("expected {}, got {:?}", what, value))
}

fn as_text(value: &Value) -> Option<&[u8]> {
    match value {
        Value::BulkString(data) => Some(data.as_slice()),
        Value::SimpleString(s) => Some(s.as_bytes()),
        _ => None,
    }
}

fn parse_id(value: &Value) -> Result<EntryId> {
    as_text(value)
        .ok_or_else(|| invalid("entry ID", value))
        .and_then(|raw| EntryId::try_from(raw))
}

fn parse_field_value(value: Value) -> Result<FieldValue> {
    match value {
        Value::BulkString(data) => Ok(FieldValue::Bytes(Bytes::from(data))),
        Value::SimpleString(s) => Ok(FieldValue::Bytes(Bytes::from(s))),
        Value::Int(n) => Ok(FieldValue::Int(n)),
        Value::Nil => Ok(FieldValue::Nil),
        other => Err(invalid("field value", &other)),
    }
}

fn parse_field_name(value: &Value) -> Result<String> {
    as_text(value)
        .map(|raw| String::from_utf8_lossy(raw).into_owned())
        .ok_or_else(|| invalid("field name", value))
}

/// Parse one `[id, [field, value, ...]]` element. Fields are `None` when the
/// entry was deleted from the stream while pending.
fn parse_entry(value: Value) -> Result<(EntryId, Option<Vec<(String, FieldValue)>>)> {
    let mut parts = match value {
        Value::Array(parts) if parts.len() == 2 => parts,
        other => return Err(invalid("[id, fields] pair", &other)),
    };
    let raw_fields = parts.pop().unwrap_or(Value::Nil);
    let id = parse_id(&parts[0])?;

    let pairs: Vec<(Value, Value)> = match raw_fields {
        Value::Nil => return Ok((id, None)),
        Value::Map(pairs) => pairs,
        Value::Array(flat) if flat.len() % 2 == 0 => {
            let mut pairs = Vec::with_capacity(flat.len() / 2);
            let mut it = flat.into_iter();
            while let (Some(name), Some(value)) = (it.next(), it.next()) {
                pairs.push((name, value));
            }
            pairs
        },
        other => return Err(invalid("field list", &other)),
    };

    let fields = pairs
        .into_iter()
        .map(|(name, value)| Ok((parse_field_name(&name)?, parse_field_value(value)?)))
        .collect::<Result<Vec<_>>>()?;
    Ok((id, Some(fields)))
}

fn parse_entries(value: Value) -> Result<Vec<StreamEntry>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Nil => return Ok(Vec::new()),
        other => return Err(invalid("entry list", &other)),
    };
    items
        .into_iter()
        .map(|item| {
            let (id, fields) = parse_entry(item)?;
            Ok(StreamEntry {
                id,
                fields: fields.unwrap_or_default(),
            })
        })
        .collect()
}

/// Parse an `XREADGROUP` reply for a single stream. Nil means the block
/// window elapsed with no data.
pub(crate) fn parse_read_reply(reply: Value) -> Result<Vec<StreamEntry>> {
    let streams: Vec<(Value, Value)> = match reply {
        Value::Nil => return Ok(Vec::new()),
        Value::Map(pairs) => pairs,
        Value::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Value::Array(mut pair) if pair.len() == 2 => {
                    let entries = pair.pop().unwrap_or(Value::Nil);
                    let name = pair.pop().unwrap_or(Value::Nil);
                    Ok((name, entries))
                },
                other => Err(invalid("[stream, entries] pair", &other)),
            })
            .collect::<Result<Vec<_>>>()?,
        other => return Err(invalid("stream list", &other)),
    };

    // Only one stream is ever requested
    match streams.into_iter().next() {
        Some((_, entries)) => parse_entries(entries),
        None => Ok(Vec::new()),
    }
}

/// Parse an `XAUTOCLAIM` reply: `[next_cursor, entries, deleted_ids]`. The
/// third element only exists on Redis 7+; older servers return deleted
/// entries inline with nil fields, which are moved to `deleted` here.
pub(crate) fn parse_autoclaim_reply(reply: Value) -> Result<ClaimBatch> {
    let mut parts = match reply {
        Value::Array(parts) if parts.len() == 2 || parts.len() == 3 => parts.into_iter(),
        other => return Err(invalid("[cursor, entries, deleted]", &other)),
    };

    let next_cursor = parse_id(&parts.next().unwrap_or(Value::Nil))?;
    let mut batch = ClaimBatch {
        next_cursor,
        ..ClaimBatch::default()
    };

    match parts.next().unwrap_or(Value::Nil) {
        Value::Array(items) => {
            for item in items {
                match parse_entry(item)? {
                    (id, Some(fields)) => batch.entries.push(StreamEntry { id, fields }),
                    (id, None) => batch.deleted.push(id),
                }
            }
        },
        other => return Err(invalid("claimed entry list", &other)),
    }

    if let Some(Value::Array(ids)) = parts.next() {
        for id in &ids {
            batch.deleted.push(parse_id(id)?);
        }
    }

    Ok(batch)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    fn entry(id: &str, fields: &[(&str, &str)]) -> Value {
        let flat = fields
            .iter()
            .flat_map(|(k, v)| [bulk(k), bulk(v)])
            .collect();
        Value::Array(vec![bulk(id), Value::Array(flat)])
    }

    #[test]
    fn test_parse_read_timeout() {
        assert!(parse_read_reply(Value::Nil).unwrap().is_empty());
    }

    #[test]
    fn test_parse_read_reply_resp2() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![
                entry("1700000000000-0", &[("body", "order-42")]),
                entry("1700000000000-1", &[("body", "order-43")]),
            ]),
        ])]);

        let entries = parse_read_reply(reply).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].id, EntryId::new(1_700_000_000_000, 0));
        assert_eq!(
            entries[0].fields,
            vec![(
                "body".to_string(),
                FieldValue::Bytes(Bytes::from_static(b"order-42"))
            )]
        );
        assert_eq!(entries[1].id, EntryId::new(1_700_000_000_000, 1));
    }

    #[test]
    fn test_parse_read_reply_resp3_map() {
        let reply = Value::Map(vec![(
            bulk("orders"),
            Value::Array(vec![entry("5-0", &[("body", "x")])]),
        )]);
        let entries = parse_read_reply(reply).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, EntryId::new(5, 0));
    }

    #[test]
    fn test_parse_read_reply_rejects_bad_id() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("orders"),
            Value::Array(vec![entry("not-an-id", &[("body", "x")])]),
        ])]);
        assert!(matches!(
            parse_read_reply(reply),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_parse_autoclaim_redis7() {
        let reply = Value::Array(vec![
            bulk("12-0"),
            Value::Array(vec![entry("10-0", &[("body", "a")])]),
            Value::Array(vec![bulk("11-0")]),
        ]);
        let batch = parse_autoclaim_reply(reply).unwrap();
        assert_eq!(batch.next_cursor, EntryId::new(12, 0));
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].id, EntryId::new(10, 0));
        assert_eq!(batch.deleted, vec![EntryId::new(11, 0)]);
    }

    #[test]
    fn test_parse_autoclaim_legacy_nil_fields() {
        let reply = Value::Array(vec![
            bulk("0-0"),
            Value::Array(vec![
                Value::Array(vec![bulk("3-0"), Value::Nil]),
                entry("4-0", &[("body", "b")]),
            ]),
        ]);
        let batch = parse_autoclaim_reply(reply).unwrap();
        assert_eq!(batch.next_cursor, EntryId::MIN);
        assert_eq!(batch.deleted, vec![EntryId::new(3, 0)]);
        assert_eq!(batch.entries.len(), 1);
        assert_eq!(batch.entries[0].id, EntryId::new(4, 0));
    }

    #[test]
    fn test_parse_autoclaim_empty() {
        let reply = Value::Array(vec![bulk("0-0"), Value::Array(vec![]), Value::Array(vec![])]);
        let batch = parse_autoclaim_reply(reply).unwrap();
        assert_eq!(batch.next_cursor, EntryId::MIN);
        assert!(batch.entries.is_empty());
        assert!(batch.deleted.is_empty());
    }

    #[test]
    fn test_integer_field_survives_parsing() {
        let reply = Value::Array(vec![Value::Array(vec![
            bulk("s"),
            Value::Array(vec![Value::Array(vec![
                bulk("1-0"),
                Value::Array(vec![bulk("body"), Value::Int(7)]),
            ])]),
        ])]);
        let entries = parse_read_reply(reply).unwrap();
        assert_eq!(entries[0].fields[0].1, FieldValue::Int(7));
    }

    #[test]
    fn test_block_millis_never_zero() {
        assert_eq!(block_millis(Duration::from_micros(10)), 1);
        assert_eq!(block_millis(Duration::from_secs(2)), 2000);
    }
}
