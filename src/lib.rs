//! crtm installs, updates and removes prebuilt tool executables published as
//! releases, and keeps its own executable up to date the same way.

pub mod changelog;
pub mod config;
pub mod download;
pub mod error;
pub mod install;
pub mod platform;
pub mod registry;
pub mod report;
pub mod resolve;
pub mod self_update;
pub mod types;
pub mod version;

pub use error::{Error, ExtractionError, Result};
