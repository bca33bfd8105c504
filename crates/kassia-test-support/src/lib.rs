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

//! Shared test helpers used across integration suites.
//! Layout: servicer.rs (scripted servicing fake), fixtures.rs (catalog and config trees).

pub mod fixtures;
pub mod servicer;

pub use fixtures::CatalogFixture;
pub use servicer::{Scripted, ScriptedServicer};
