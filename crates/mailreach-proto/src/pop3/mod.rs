//! POP3 retrieval handle with request pipelining.
//!
//! A [`Pop3Handle`] reads the greeting, queries CAPA, optionally upgrades
//! with STLS and authenticates with [`Pop3Mechanism::CHAIN`]. Once
//! `Authenticated` it offers both direct commands and the deferred
//! [`queue`](Pop3Handle::queue) interface:
//!
//! ```ignore
//! handle.queue(RequestKind::Retr, 1, |event, _| match event {
//!     PopEvent::Data(line) => body.extend_from_slice(line),
//!     PopEvent::Done => println!("message 1 complete"),
//!     PopEvent::Status(_) => {}
//! }).await?;
//! handle.flush_pending().await?;
//! ```

mod auth;
mod capability;
mod connector;
mod handle;
mod pipeline;

pub use auth::Pop3Mechanism;
pub use capability::{Pop3Capabilities, Pop3Capability};
pub use connector::Pop3Connector;
pub use handle::Pop3Handle;
pub use pipeline::{
    FollowUps, PIPELINED_BATCH, PopCallback, PopEvent, QUEUE_CAPACITY, RequestKind,
};

/// POP3-specific handle settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pop3Options {
    /// Skip APOP even when the greeting carries a timestamp.
    pub disable_apop: bool,
    /// Turn CRLF line endings of retrieved messages into LF.
    pub filter_cr: bool,
    /// Replies read per pipelined round, overriding the CAPA-based choice.
    pub pipeline_depth: Option<usize>,
}
