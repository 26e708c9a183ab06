//! nginx-ui settings core.
//!
//! Loads, validates, exposes, reloads and persists the sectioned `app.ini`
//! configuration of the nginx-ui admin service, migrates files and
//! environment variables from the single-`[server]` layout, and samples host
//! CPU, network and disk counters into bounded series.

pub mod analytics;
pub mod cluster;
pub mod config;
pub mod env;
pub mod errors;
pub mod ini;
pub mod metrics;
pub mod migrate;
pub mod probe;
pub mod schema;
pub mod settings;
pub mod validate;

pub use config::{AnySection, Registered, Registry, SECTION_NAMES};
pub use errors::{ProbeError, SettingsError};
pub use settings::{init, settings, Settings};
