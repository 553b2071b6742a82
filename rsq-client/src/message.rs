//! Entry identifiers and the message type exchanged with callers.
//!
//! # Structure
//!
//! - **Milliseconds (64 bits)**: service wall-clock time at append
//! - **Sequence (64 bits)**: counter disambiguating entries within one millisecond
//!
//! IDs are rendered as `"<ms>-<seq>"` on the wire and order by `(ms, seq)`.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;

use crate::backend::{FieldValue, StreamEntry};
use crate::error::{ClientError, Result};

/// Name of the single field every entry stores its payload under.
pub const BODY_FIELD: &str = "body";

/// Two-part identifier assigned by the log service on append.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId {
    ms: u64,
    seq: u64,
}

impl EntryId {
    /// The smallest possible ID, `0-0`. Also the start marker for claim scans.
    pub const MIN: EntryId = EntryId { ms: 0, seq: 0 };

    #[inline]
    #[must_use]
    pub const fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// Millisecond timestamp component.
    #[inline]
    #[must_use]
    pub const fn ms(&self) -> u64 {
        self.ms
    }

    /// Per-millisecond sequence component.
    #[inline]
    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// True for `0-0`.
    #[inline]
    #[must_use]
    pub const fn is_min(&self) -> bool {
        self.ms == 0 && self.seq == 0
    }

    /// The next ID in total order, saturating at the maximum.
    #[must_use]
    pub fn successor(&self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms.saturating_add(1),
                seq: 0,
            },
        }
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || ClientError::InvalidResponse(format!("malformed entry ID: {:?}", s));

        // A bare millisecond part means sequence 0, as the service accepts it
        let (ms, seq) = match s.split_once('-') {
            Some((ms, seq)) => (ms, seq),
            None => (s, "0"),
        };
        let ms = ms.parse::<u64>().map_err(|_| invalid())?;
        let seq = seq.parse::<u64>().map_err(|_| invalid())?;
        Ok(Self { ms, seq })
    }
}

impl TryFrom<&[u8]> for EntryId {
    type Error = ClientError;

    fn try_from(raw: &[u8]) -> Result<Self> {
        std::str::from_utf8(raw)
            .map_err(|_| ClientError::InvalidResponse("entry ID is not UTF-8".to_string()))?
            .parse()
    }
}

/// A delivered entry: service-assigned ID and opaque payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: EntryId,
    pub body: Bytes,
}

impl Message {
    /// Decode a raw stream entry into a message.
    ///
    /// The entry must carry a `body` field holding bytes. A missing field, a
    /// nil value (entry deleted while pending), or any other value type is a
    /// [`ClientError::DecodePayload`].
    pub fn from_entry(entry: StreamEntry) -> Result<Self> {
        let StreamEntry { id, fields } = entry;

        let value = fields
            .into_iter()
            .find(|(name, _)| name == BODY_FIELD)
            .map(|(_, value)| value);

        match value {
            Some(FieldValue::Bytes(body)) => Ok(Self { id, body }),
            Some(FieldValue::Int(n)) => Err(ClientError::DecodePayload {
                id,
                reason: format!("`{}` field holds integer {}, expected bytes", BODY_FIELD, n),
            }),
            Some(FieldValue::Nil) => Err(ClientError::DecodePayload {
                id,
                reason: format!("`{}` field is nil", BODY_FIELD),
            }),
            None => Err(ClientError::DecodePayload {
                id,
                reason: format!("entry has no `{}` field", BODY_FIELD),
            }),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_id_parse_and_display() {
        let id: EntryId = "1700000000000-3".parse().unwrap();
        assert_eq!(id.ms(), 1_700_000_000_000);
        assert_eq!(id.seq(), 3);
        assert_eq!(id.to_string(), "1700000000000-3");
    }

    #[test]
    fn test_entry_id_bare_ms() {
        let id: EntryId = "42".parse().unwrap();
        assert_eq!(id, EntryId::new(42, 0));
    }

    #[test]
    fn test_entry_id_rejects_garbage() {
        assert!("".parse::<EntryId>().is_err());
        assert!("abc-1".parse::<EntryId>().is_err());
        assert!("1-".parse::<EntryId>().is_err());
        assert!("1-2-3".parse::<EntryId>().is_err());
        assert!(matches!(
            "x".parse::<EntryId>(),
            Err(ClientError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_entry_id_ordering_is_numeric() {
        let a = EntryId::new(9, 5);
        let b = EntryId::new(10, 0);
        let c = EntryId::new(10, 1);
        assert!(a < b && b < c);
        // lexical order of the rendered form would put "10-0" first
        assert!("9-5" > "10-0");
        assert!(EntryId::MIN < a);
    }

    #[test]
    fn test_successor() {
        assert_eq!(EntryId::new(1, 1).successor(), EntryId::new(1, 2));
        assert_eq!(EntryId::new(1, u64::MAX).successor(), EntryId::new(2, 0));
    }

    #[test]
    fn test_decode_body() {
        let entry = StreamEntry {
            id: EntryId::new(1, 0),
            fields: vec![(
                BODY_FIELD.to_string(),
                FieldValue::Bytes(Bytes::from_static(b"order-42")),
            )],
        };
        let msg = Message::from_entry(entry).unwrap();
        assert_eq!(msg.id, EntryId::new(1, 0));
        assert_eq!(&msg.body[..], b"order-42");
    }

    #[test]
    fn test_decode_ignores_extra_fields() {
        let entry = StreamEntry {
            id: EntryId::new(1, 0),
            fields: vec![
                ("trace".to_string(), FieldValue::Bytes(Bytes::from_static(b"t"))),
                (BODY_FIELD.to_string(), FieldValue::Bytes(Bytes::from_static(b"b"))),
            ],
        };
        assert_eq!(&Message::from_entry(entry).unwrap().body[..], b"b");
    }

    #[test]
    fn test_decode_missing_body() {
        let entry = StreamEntry {
            id: EntryId::new(7, 1),
            fields: vec![("payload".to_string(), FieldValue::Bytes(Bytes::new()))],
        };
        match Message::from_entry(entry) {
            Err(ClientError::DecodePayload { id, .. }) => assert_eq!(id, EntryId::new(7, 1)),
            other => panic!("expected DecodePayload, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_mistyped_body() {
        let entry = StreamEntry {
            id: EntryId::new(7, 2),
            fields: vec![(BODY_FIELD.to_string(), FieldValue::Int(5))],
        };
        assert!(matches!(
            Message::from_entry(entry),
            Err(ClientError::DecodePayload { .. })
        ));

        let deleted = StreamEntry {
            id: EntryId::new(7, 3),
            fields: Vec::new(),
        };
        assert!(matches!(
            Message::from_entry(deleted),
            Err(ClientError::DecodePayload { .. })
        ));
    }
}
