//! Job intake from the durable stream.
//!
//! ```text
//! producer → XADD vods → [group: transcribers] → worker (claim → run → ack)
//! ```
//!
//! - **stream**: the consumer-group contract (`JobStream`, `DeadLetterSink`)
//! - **redis**: Redis streams implementation
//! - **memory**: in-process implementation for tests and dry runs

pub mod memory;
pub mod redis;
pub mod stream;

pub use self::memory::MemoryStream;
pub use self::redis::{PendingSummary, RedisStream};
pub use self::stream::{ClaimedJob, DeadLetterSink, GroupStatus, JobStream, QueueError};
