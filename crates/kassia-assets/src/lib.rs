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

//! Asset catalog scanning and compatibility resolution.
//!
//! Layout: `model.rs` (descriptors and catalogs), `descriptor.rs` (on-disk records),
//! `scanner.rs` (directory walks), `resolver.rs` (OS/device filtering and ordering).

pub mod descriptor;
pub mod error;
pub mod model;
pub mod resolver;
pub mod scanner;

pub use error::{AssetError, AssetResult};
pub use model::{
    AssetCatalog, AssetDescriptor, AssetKind, CompatibleAssetSet, DEFAULT_INSTALL_ORDER, TypeTag,
};
pub use resolver::resolve;
pub use scanner::{CatalogRoots, CatalogScanner};
