//! BigEars - queue publishing past the message size limit.
//!
//! Queues cap message size, producers do not. [`Publisher::publish`] sends
//! each JSON payload inline when its envelope fits under 64 KiB, and otherwise
//! writes it to a bucket and enqueues a pointer to it.
//!
//! ## Architecture
//!
//! ```text
//! publish(payload) → envelope size check ─┬─→ Queue (inline envelope)
//!                                         └─→ Store (payload) → Queue (pointer envelope)
//! ```
//!
//! `Queue` and `Store` are traits; [`AmqpQueue`] and [`S3Bucket`] are the
//! production implementations and [`memory`] holds in-memory fakes.

pub mod config;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod publisher;
pub mod queue;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use envelope::{
    payload_key, Envelope, Location, MessageAttribute, MessageAttributes,
    MAX_INLINE_MESSAGE_BYTES,
};
pub use error::{PublishError, ResolveError};
pub use publisher::{Publisher, PublisherOptions};
pub use queue::{AmqpQueue, Queue};
pub use store::{S3Bucket, S3Options, Store};
