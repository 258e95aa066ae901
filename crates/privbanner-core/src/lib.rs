//! privbanner-core: display-count governance for the private browsing
//! search banner
//!
//! The banner advertises a separate default search engine for private
//! windows. It may appear at most once per browser session and at most
//! [`MAX_SHOW_COUNT`] times in total; closing it or following its settings
//! link retires it for good.
//!
//! # Architecture
//!
//! ```text
//! page load → SearchBanner → BannerGovernor → PrefStore (memory / TOML / SQLite)
//!                  ↓
//!           TelemetryRecorder (events, scalars, pings)
//! ```
//!
//! # Modules
//!
//! - `governor`: show decisions, session flag and persisted count
//! - `banner`: page-level banner controller and its telemetry probes
//! - `prefs`: the preference store trait, observers and an in-memory store
//! - `prefs_file`: TOML file store with cross-process locking
//! - `prefs_sqlite`: SQLite store
//! - `telemetry`: desktop-only telemetry recorder
//! - `config`: `privbanner.toml` loading and validation
//! - `logging`: tracing subscriber setup
//! - `error`: error types with remediation hints
//!
//! # Safety
//!
//! This crate forbids unsafe code.

#![forbid(unsafe_code)]

pub mod banner;
pub mod config;
pub mod error;
pub mod governor;
pub mod logging;
pub mod prefs;
pub mod prefs_file;
pub mod prefs_sqlite;
pub mod telemetry;

pub use error::{Error, PrefsError, Result};
pub use governor::{BannerGovernor, GovernorStatus, MAX_SHOW_COUNT, ShowDecision};
pub use prefs::{PrefStore, PrefValue};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
