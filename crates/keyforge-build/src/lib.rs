//! Build orchestration for keyforge.
//!
//! This crate provides:
//! - Build targets: a keyboard/keymap identity turned into a `make` invocation
//! - Staging of JSON keymap payloads into per-target intermediate directories
//! - compile_commands.json generation from a dry run of the build
//! - Build configuration (`keyforge.toml`)
//!
//! # Example
//!
//! ```toml
//! # keyforge.toml
//! [general]
//! verbose = false
//! color = true
//!
//! [paths]
//! userspace_root = "../qmk_userspace"
//!
//! [make]
//! executable = "gmake"
//! ```

pub mod catalog;
mod compile_commands;
mod config;
mod error;
pub mod introspect;
pub mod paths;
pub mod process;
pub mod target;
pub mod trace;

pub use catalog::{FilesystemCatalog, KeyboardCatalog};
pub use compile_commands::{CompilationDatabase, CompileCommand, CompileCommands, DatabaseRequest};
pub use config::{BuildConfig, BuildContext, GeneralConfig, MakeConfig, PathsConfig, CONFIG_FILE_NAME};
pub use error::{BuildError, Result};
pub use process::{CommandOutput, CommandRunner, SystemRunner};
pub use target::{BuildOptions, BuildRequest, BuildTarget, KeymapTarget, MakeVars, PayloadTarget};
