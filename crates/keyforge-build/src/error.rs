//! Error types for keyforge-build.

use miette::Diagnostic;
use std::path::PathBuf;
use thiserror::Error;

/// Result type for keyforge-build operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Errors that can occur while preparing or inspecting a build.
#[derive(Error, Debug, Diagnostic)]
pub enum BuildError {
    /// Filesystem access failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse a TOML configuration file.
    #[error("Failed to parse TOML config: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// Failed to parse or serialize JSON.
    #[error("Failed to parse JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    /// The keymap payload is unusable as a build target.
    #[error("Invalid keymap payload: {0}")]
    #[diagnostic(help("the payload must be a JSON object with at least a \"keyboard\" entry"))]
    Payload(String),

    /// Not enough information was given to pick a build target.
    #[error("{0}")]
    #[diagnostic(help("supply both --keyboard and --keymap, or run from a keyboard or keymap directory"))]
    Usage(String),

    /// A keymap could not be found in either the firmware tree or userspace.
    #[error("Keymap '{keymap}' not found for keyboard '{keyboard}'")]
    KeymapNotFound { keyboard: String, keymap: String },

    /// A subprocess could not be started.
    #[error("Failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// A subprocess exited unsuccessfully.
    #[error("Command `{command}` failed with {}", code.map_or_else(|| "a signal".to_string(), |c| format!("exit code {c}")))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    /// The dry run produced nothing recognizable as a compile step.
    #[error("Failed to parse output from make output:\n{output}")]
    #[diagnostic(help("the build engine's trace format may have changed, or the target compiled nothing"))]
    EmptyTrace { output: String },

    /// A file could not be copied to its mirror location.
    #[error("Failed to copy {from} to {to}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    /// Create a payload error.
    pub fn payload(message: impl Into<String>) -> Self {
        Self::Payload(message.into())
    }

    /// Create a usage error.
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}
