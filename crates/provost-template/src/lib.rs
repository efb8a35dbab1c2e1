//! Template handling for the provisioning engine.
//!
//! - [`template`] — parsing, variable substitution and object extraction
//! - [`catalog`] — which template files feed which environment type, and
//!   the per-file version bookkeeping the fleet updater relies on
//! - [`loader`] — template retrieval from a local directory or a raw-file
//!   URL

pub mod catalog;
pub mod loader;
pub mod template;

pub use catalog::{
    mapped_versions, templates_for, version_managers, EnvData, TemplateVersions, VersionManager,
};
pub use loader::{FileLoader, RawUrlLoader, StaticLoader, TemplateLoader};
pub use template::{collect_vars, parse_objects, Template};
