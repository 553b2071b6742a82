//! Stream and consumer group initialization
//!
//! Call [`create_group`] on every process start, from producers and consumers
//! alike. It is idempotent and never moves the cursor of an existing group.

use tracing::debug;

use crate::backend::{GroupStatus, StreamBackend};
use crate::error::{ClientError, Result};

/// Ensure `stream` exists and has a consumer group named `group`.
///
/// A new group only sees entries appended after this call. A group that
/// already exists is treated as success. Any other failure is returned as
/// [`ClientError::Init`].
pub async fn create_group<B>(backend: &B, stream: &str, group: &str) -> Result<()>
where
    B: StreamBackend + ?Sized,
{
    match backend.create_group(stream, group).await {
        Ok(GroupStatus::Created) => {
            debug!(stream, group, "Created consumer group");
            Ok(())
        },
        Ok(GroupStatus::AlreadyExists) => {
            debug!(stream, group, "Consumer group already exists");
            Ok(())
        },
        Err(e) => Err(ClientError::Init {
            stream: stream.to_string(),
            group: group.to_string(),
            source: Box::new(e),
        }),
    }
}
