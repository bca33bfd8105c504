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

//! Applies resolved assets to a mounted image.
//!
//! Layout: `model.rs` (results, summaries, targets), `router.rs` (strategy selection),
//! `immediate.rs` (servicing-utility executor), `deferred.rs` (staging executor),
//! `aggregator.rs` (ordered best-effort loop), `fsops.rs` (tree copy and sizing).

pub mod aggregator;
pub mod deferred;
pub mod error;
pub mod fsops;
pub mod immediate;
pub mod model;
pub mod router;

pub use aggregator::IntegrationAggregator;
pub use deferred::{DeferredExecutor, STAGED_SIDECAR, StagedRecord};
pub use error::{IntegrationError, Result};
pub use immediate::ImmediateExecutor;
pub use model::{IntegrationReport, IntegrationResult, IntegrationSummary, IntegrationTarget, Strategy};
pub use router::{Route, Router, strategy_for};
