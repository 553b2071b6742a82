#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

pub mod backend;
mod consumer;
mod error;
mod group;
pub mod memory;
mod message;
pub mod producer;
mod redis_backend;

pub use backend::{
    ClaimBatch, ClaimFailure, ClaimRequest, FieldValue, GroupStatus, ReadGroupRequest,
    StreamBackend, StreamEntry, Trim,
};
pub use consumer::{Consumer, ConsumerConfig, ConsumerStats, StatsSnapshot};
pub use error::{ClientError, Result};
pub use group::create_group;
pub use memory::{MemoryBackend, Operation, PendingInfo};
pub use message::{BODY_FIELD, EntryId, Message};
pub use producer::{Producer, ProducerConfig};
pub use redis_backend::RedisBackend;
