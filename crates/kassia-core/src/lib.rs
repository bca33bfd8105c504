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

//! Job model and persistence seam shared by every Kassia crate.
//!
//! Layout: `model/` (jobs, stages, logs, requests), `store/` (the `JobStore` trait),
//! `error.rs` (model and store errors).

pub mod error;
pub mod model;
pub mod store;

pub use error::{ModelError, StoreError, StoreResult};
pub use model::{
    BuildRequest, BuildStage, INTERRUPTED_BY_RESTART, Job, JobFilter, JobFlags, JobId,
    JobLogEntry, JobPatch, JobSnapshot, JobStatus, LogLevel, TOTAL_STAGES,
};
pub use store::JobStore;
