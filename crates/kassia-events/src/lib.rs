#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Event bus for job progress.
//!
//! The bus assigns sequential identifiers and keeps a replay ring so observers that
//! reconnect with their last seen id receive what they missed. Internally it uses
//! `tokio::broadcast` with a bounded buffer; slow receivers lose the oldest events.

pub mod payloads;
pub mod routing;

pub use payloads::{DEFAULT_REPLAY_CAPACITY, Event, EventEnvelope, EventId};
pub use routing::{EventBus, EventStream};
