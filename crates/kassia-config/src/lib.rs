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

//! Typed configuration for image builds.
//!
//! Layout: `model.rs` (file-backed documents), `loader.rs` (YAML/JSON loading and
//! environment overrides), `validate.rs` (field checks), `plan.rs` (per-stage plans
//! resolved once per build request).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod plan;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{apply_env_overrides, load_build_config, load_device_config};
pub use model::{BuildConfig, DeviceConfig, OperationTimeouts, OsSupport, ServicingConfig};
pub use plan::{
    BuildPlan, DiscoveryPlan, ExportPlan, IntegrationPlan, MountPlan, PreparationPlan,
};
