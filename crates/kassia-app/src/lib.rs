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

//! Kassia application wiring.
//!
//! Layout: `orchestrator.rs` (nine-stage build state machine), `manager.rs` (job cache,
//! submission, cancellation, restart reconciliation), `broadcaster.rs` (drop-oldest
//! progress notices), `recorder.rs` (cache-first job updates), `servicer.rs` (metered
//! servicing), `bootstrap.rs` and `cli.rs` (binary entrypoint).

pub mod bootstrap;
pub mod broadcaster;
pub mod cli;
pub mod error;
pub mod manager;
pub mod orchestrator;
pub mod recorder;
pub mod report;
pub mod servicer;

pub use bootstrap::{AppContext, run_app};
pub use broadcaster::{DEFAULT_NOTICE_CAPACITY, ProgressBroadcaster};
pub use error::{AppError, AppResult};
pub use manager::{JobManager, ManagerSettings};
pub use orchestrator::{BuildOrchestrator, OrchestratorError};
pub use recorder::JobRecorder;
pub use report::BuildReport;
pub use servicer::InstrumentedServicer;
