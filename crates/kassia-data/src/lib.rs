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
#![allow(clippy::module_name_repetitions)]

//! Job store implementations for Kassia.
//!
//! Layout: `sqlite.rs` (sqlx-backed store with embedded migrations), `memory.rs`
//! (process-local store), `codec.rs` (column encoding), `error.rs`.

mod codec;
pub mod error;
pub mod memory;
pub mod sqlite;

pub use error::{DataError, Result as DataResult};
pub use memory::MemoryJobStore;
pub use sqlite::SqliteJobStore;
