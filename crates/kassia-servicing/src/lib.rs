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

//! Adapter around the external image-servicing utility.
//!
//! Layout: `command.rs` (typed invocations and timeouts), `outcome.rs` (exit classification),
//! `servicer.rs` (the `ImageServicer` seam and the subprocess implementation),
//! `image.rs` (high-level helpers built on the seam).

pub mod command;
pub mod error;
pub mod image;
pub mod outcome;
pub mod servicer;

pub use command::{ServicingCommand, ServicingOperation, ServicingTimeouts};
pub use error::{ServicingError, ServicingResult};
pub use image::{ImageInfo, add_driver, add_package, cleanup_mounts, export, image_info, mount, unmount};
pub use outcome::{NoOpReason, ServicingOutcome, ToolOutput, classify};
pub use servicer::{DismServicer, ImageServicer};
