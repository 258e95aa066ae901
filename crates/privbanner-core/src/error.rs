//! Error types for privbanner-core

use std::fmt::Write;
use thiserror::Error;

/// Remediation command for resolving an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct RemediationCommand {
    /// Short label describing the command purpose
    pub label: String,
    /// Command to run
    pub command: String,
}

/// Actionable remediation guidance for an error
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Remediation {
    /// One-line summary of how to fix the issue
    pub summary: String,
    /// Suggested commands to resolve or diagnose the issue
    pub commands: Vec<RemediationCommand>,
    /// Additional alternative guidance
    pub alternatives: Vec<String>,
}

impl Remediation {
    /// Create a new remediation with a summary
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            commands: Vec::new(),
            alternatives: Vec::new(),
        }
    }

    /// Add a command
    #[must_use]
    pub fn command(mut self, label: impl Into<String>, command: impl Into<String>) -> Self {
        self.commands.push(RemediationCommand {
            label: label.into(),
            command: command.into(),
        });
        self
    }

    /// Add an alternative suggestion
    #[must_use]
    pub fn alternative(mut self, alternative: impl Into<String>) -> Self {
        self.alternatives.push(alternative.into());
        self
    }

    /// Render remediation text for human-readable output
    #[must_use]
    pub fn render_plain(&self) -> String {
        let mut output = String::new();
        let _ = writeln!(output, "To fix:");
        let _ = writeln!(output, "  {}", self.summary);

        if !self.commands.is_empty() {
            let _ = writeln!(output, "  Commands:");
            for cmd in &self.commands {
                let _ = writeln!(output, "    - {}: {}", cmd.label, cmd.command);
            }
        }

        if !self.alternatives.is_empty() {
            let _ = writeln!(output, "  Alternatives:");
            for alt in &self.alternatives {
                let _ = writeln!(output, "    - {alt}");
            }
        }

        output
    }
}

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for privbanner-core
#[derive(Error, Debug)]
pub enum Error {
    /// Preference store errors
    #[error("Prefs error: {0}")]
    Prefs(#[from] PrefsError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Telemetry recorder errors
    #[error("Telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    /// A governor write did not reach the store. The in-memory state was
    /// already updated and the write can be retried.
    #[error("Failed to persist {key} = {value}: {source}")]
    Persist {
        key: String,
        value: i64,
        #[source]
        source: PrefsError,
    },
}

impl Error {
    /// Return remediation guidance when available.
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::Prefs(err) => Some(err.remediation()),
            Self::Config(err) => Some(err.remediation()),
            Self::Telemetry(err) => err.remediation(),
            Self::Persist { key, .. } => Some(
                Remediation::new(format!(
                    "The banner state was updated in memory but `{key}` was not saved."
                ))
                .command("Inspect prefs", "privbanner prefs")
                .alternative("Check that the prefs file or database is writable, then retry."),
            ),
        }
    }

    /// Whether the error leaves a pending write behind that can be retried.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Persist { .. })
    }
}

/// Preference store errors
#[derive(Error, Debug)]
pub enum PrefsError {
    #[error("Failed to read pref {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Failed to write pref {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Pref {key} has type {actual}, expected {expected}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Prefs file {path} is corrupt: {reason}")]
    Corrupt { path: String, reason: String },

    #[error("Prefs database error: {0}")]
    Database(String),

    #[error("Prefs database schema version ({current}) is newer than supported ({supported})")]
    SchemaTooNew { current: i32, supported: i32 },

    #[error("Prefs lock error on {path}: {reason}")]
    Lock { path: String, reason: String },
}

impl PrefsError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::ReadFailed { key, .. } => Remediation::new(format!(
                "Could not read `{key}`. The default value is used until the store recovers."
            ))
            .command("Inspect prefs", "privbanner prefs"),
            Self::WriteFailed { key, .. } => {
                Remediation::new(format!("Could not save `{key}`. Check store permissions."))
                    .alternative("Ensure the prefs file is not read-only.")
            }
            Self::TypeMismatch { key, .. } => Remediation::new(format!(
                "`{key}` holds a value of the wrong type. Reset it and retry."
            ))
            .command("Reset show count", "privbanner reset"),
            Self::Corrupt { path, .. } => Remediation::new(format!(
                "Prefs file {path} could not be parsed. Fix the TOML syntax or remove the file."
            ))
            .command("Check file", format!("cat \"{path}\"")),
            Self::Database(_) => Remediation::new("Prefs database error. Check the db file.")
                .alternative("Switch to the file backend in privbanner.toml."),
            Self::SchemaTooNew { .. } => {
                Remediation::new("The prefs database was written by a newer privbanner.")
                    .alternative("Upgrade privbanner or point [prefs].path at a new database.")
            }
            Self::Lock { path, .. } => Remediation::new(format!(
                "Could not lock {path}. Another process may be writing prefs."
            ))
            .alternative("Retry once the other process has exited."),
        }
    }
}

/// Configuration-specific errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to read config file {0}: {1}")]
    ReadFailed(String, String),

    #[error("Failed to parse config: {0}")]
    ParseFailed(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    #[must_use]
    pub fn remediation(&self) -> Remediation {
        match self {
            Self::FileNotFound(path) => Remediation::new(format!(
                "Config file not found: {path}. Verify the path and retry."
            ))
            .command("Check path", format!("ls -l \"{path}\""))
            .alternative("Pass --config with the correct path."),
            Self::ReadFailed(path, _) => Remediation::new(format!(
                "Failed to read config file: {path}. Check permissions."
            ))
            .command("Check permissions", format!("ls -l \"{path}\"")),
            Self::ParseFailed(_) => Remediation::new("Config parse failed. Fix the syntax and retry.")
                .alternative("Validate the TOML syntax of privbanner.toml."),
            Self::ValidationError(_) => {
                Remediation::new("Config validation failed. Fix the invalid fields and retry.")
                    .alternative("Review validation errors and adjust privbanner.toml.")
            }
        }
    }
}

/// Telemetry recorder errors, mirroring the extension API error surface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("This API is only supported on desktop")]
    UnsupportedPlatform,

    #[error("Unknown scalar: {0}")]
    UnknownScalar(String),

    #[error("Scalar {name} expects a {expected} value")]
    ScalarTypeMismatch { name: String, expected: &'static str },

    #[error("Unknown event category: {0}")]
    UnknownCategory(String),

    #[error("Unknown event {category}.{method}.{object}")]
    UnknownEvent {
        category: String,
        method: String,
        object: String,
    },

    #[error("Event {category}.{method} does not accept extra key {key}")]
    InvalidExtraKey {
        category: String,
        method: String,
        key: String,
    },

    #[error("Invalid name {0}: expected [a-zA-Z0-9_] with a letter first")]
    InvalidName(String),

    #[error("Invalid ping type: {0}")]
    InvalidPingType(String),

    #[error("Upload is disabled; ping {0} was not submitted")]
    UploadDisabled(String),

    #[error("Scalar {0} is already registered with a different definition")]
    AlreadyRegistered(String),

    #[error("Scalar {name} is {actual}; use the {actual} scalar calls")]
    KeyedMismatch { name: String, actual: &'static str },

    #[error("Invalid key for keyed scalar {name}: {key:?}")]
    InvalidScalarKey { name: String, key: String },
}

impl TelemetryError {
    #[must_use]
    pub fn remediation(&self) -> Option<Remediation> {
        match self {
            Self::UnsupportedPlatform => Some(
                Remediation::new("Telemetry recording requires the desktop platform.")
                    .alternative("Set [telemetry].platform = \"desktop\" in privbanner.toml."),
            ),
            Self::UploadDisabled(_) => Some(
                Remediation::new("Enable data upload before submitting pings.")
                    .alternative("Set datareporting.healthreport.uploadEnabled = true."),
            ),
            _ => None,
        }
    }
}

/// Format an error with remediation guidance for display.
#[must_use]
pub fn format_error_with_remediation(error: &Error) -> String {
    let mut output = format!("Error: {error}");
    if let Some(remediation) = error.remediation() {
        output.push('\n');
        output.push('\n');
        output.push_str(&remediation.render_plain());
    }
    output
}
