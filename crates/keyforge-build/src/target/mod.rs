//! Build targets.
//!
//! A [`BuildTarget`] names one keyboard/keymap build and knows how to turn
//! itself into a build engine invocation. Two kinds exist:
//!
//! - [`KeymapTarget`]: a keymap already stored in the firmware tree or a userspace.
//! - [`PayloadTarget`]: a keymap described by a JSON payload, staged into an
//!   intermediate directory before building.
//!
//! Identity (kind, keyboard, keymap, extra arguments) drives equality,
//! ordering and hashing. Execution options and the resolved configuration
//! do not.

mod keymap;
mod payload;

pub use keymap::KeymapTarget;
pub use payload::PayloadTarget;

use serde_json::Value;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::PathBuf;

use crate::catalog::KeyboardCatalog;
use crate::compile_commands::{CompilationDatabase, DatabaseRequest};
use crate::process::{display_command, make_parallel_args, CommandRunner};
use crate::{BuildContext, Result};

/// Variables appended to the target filename, in the order the makefiles apply them.
///
/// The order must match the build engine's own naming of `$(TARGET)`.
pub const TARGET_FILENAME_MODIFIERS: [&str; 2] = ["FORCE_LAYOUT", "CONVERT_TO"];

/// `KEY=VALUE` variables handed to the build engine.
pub type MakeVars = BTreeMap<String, String>;

/// Per-invocation inputs shared by every build step.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    /// Explicit make goal (e.g. `flash`).
    pub goal: Option<String>,
    /// Ask the engine to print commands instead of running them.
    pub dry_run: bool,
    /// Run-time variable overrides; these win over a target's extra arguments.
    pub env: MakeVars,
}

impl BuildRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// The identity fields shared by both target kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetIdentity {
    keyboard: String,
    keyboard_filesafe: String,
    keymap: String,
    extra_args: MakeVars,
}

impl TargetIdentity {
    pub fn new(keyboard: impl Into<String>, keymap: impl Into<String>) -> Self {
        let keyboard = keyboard.into();
        let keyboard_filesafe = keyboard.replace(['/', '\\'], "_");
        Self {
            keyboard,
            keyboard_filesafe,
            keymap: keymap.into(),
            extra_args: MakeVars::new(),
        }
    }

    pub fn keyboard(&self) -> &str {
        &self.keyboard
    }

    /// Keyboard name with path separators replaced by underscores.
    pub fn keyboard_filesafe(&self) -> &str {
        &self.keyboard_filesafe
    }

    pub fn keymap(&self) -> &str {
        &self.keymap
    }

    pub fn extra_args(&self) -> &MakeVars {
        &self.extra_args
    }

    /// Extra arguments merged with `env`; `env` wins on conflict.
    pub fn all_vars(&self, env: &MakeVars) -> MakeVars {
        let mut vars = self.extra_args.clone();
        vars.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
        vars
    }

    /// Undecorated `{keyboard_filesafe}_{keymap}` name.
    pub fn base_name(&self) -> String {
        format!("{}_{}", self.keyboard_filesafe, self.keymap)
    }

    /// Target filename, decorated with any filename modifiers present.
    pub fn target_name(&self, env: &MakeVars) -> String {
        let vars = self.all_vars(env);
        let mut target = self.base_name();
        for modifier in TARGET_FILENAME_MODIFIERS {
            if let Some(value) = vars.get(modifier) {
                target.push('_');
                target.push_str(value);
            }
        }
        target
    }

    /// Arguments common to every target kind, in the order the engine expects.
    pub fn common_make_args(
        &self,
        ctx: &BuildContext,
        options: &BuildOptions,
        request: &BuildRequest,
    ) -> Vec<String> {
        let mut args = vec![ctx.make.clone()];
        args.extend(make_parallel_args(options.parallel));
        args.extend([
            "-r".to_string(),
            "-R".to_string(),
            "-f".to_string(),
            ctx.makefile.clone(),
        ]);

        if !ctx.verbose {
            args.push("-s".to_string());
        }
        if request.dry_run {
            args.push("-n".to_string());
        }
        if let Some(goal) = &request.goal {
            args.push(goal.clone());
        }

        args.extend([
            format!("KEYBOARD={}", self.keyboard),
            format!("KEYMAP={}", self.keymap),
            format!("KEYBOARD_FILESAFE={}", self.keyboard_filesafe),
            // The makefiles decorate TARGET themselves.
            format!("TARGET={}", self.base_name()),
            format!("VERBOSE={}", ctx.verbose),
            format!("COLOR={}", ctx.color),
            "SILENT=false".to_string(),
            "QMK_BIN=\"qmk\"".to_string(),
        ]);

        args.extend(
            self.all_vars(&request.env)
                .into_iter()
                .map(|(k, v)| format!("{}={}", k, v)),
        );
        args
    }

    fn describe(&self, kind: &str) -> String {
        let mut out = format!("{}(keyboard={}, keymap={}", kind, self.keyboard, self.keymap);
        if !self.extra_args.is_empty() {
            let args = serde_json::to_string(&self.extra_args).unwrap_or_default();
            out.push_str(", extra_args=");
            out.push_str(&args);
        }
        out.push(')');
        out
    }
}

/// Execution parameters; never part of a target's identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    /// Parallel jobs; `0` means unlimited.
    pub parallel: usize,
    /// Remove previous build products first.
    pub clean: bool,
    /// Also generate a compilation database when compiling.
    pub compiledb: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            parallel: 1,
            clean: false,
            compiledb: false,
        }
    }
}

/// A keyboard/keymap build.
#[derive(Debug, Clone)]
pub enum BuildTarget {
    Keymap(KeymapTarget),
    Payload(PayloadTarget),
}

impl BuildTarget {
    pub fn identity(&self) -> &TargetIdentity {
        match self {
            BuildTarget::Keymap(t) => t.identity(),
            BuildTarget::Payload(t) => t.identity(),
        }
    }

    fn identity_mut(&mut self) -> &mut TargetIdentity {
        match self {
            BuildTarget::Keymap(t) => &mut t.identity,
            BuildTarget::Payload(t) => &mut t.identity,
        }
    }

    pub fn options(&self) -> &BuildOptions {
        match self {
            BuildTarget::Keymap(t) => &t.options,
            BuildTarget::Payload(t) => &t.options,
        }
    }

    fn options_mut(&mut self) -> &mut BuildOptions {
        match self {
            BuildTarget::Keymap(t) => &mut t.options,
            BuildTarget::Payload(t) => &mut t.options,
        }
    }

    pub fn keyboard(&self) -> &str {
        self.identity().keyboard()
    }

    pub fn keymap(&self) -> &str {
        self.identity().keymap()
    }

    pub fn extra_args(&self) -> &MakeVars {
        self.identity().extra_args()
    }

    /// Replace the extra make arguments.
    pub fn set_extra_args(&mut self, args: MakeVars) {
        self.identity_mut().extra_args = args;
    }

    /// Update execution options; `None` keeps the current value.
    pub fn configure(&mut self, parallel: Option<usize>, clean: Option<bool>, compiledb: Option<bool>) {
        let options = self.options_mut();
        if let Some(parallel) = parallel {
            options.parallel = parallel;
        }
        if let Some(clean) = clean {
            options.clean = clean;
        }
        if let Some(compiledb) = compiledb {
            options.compiledb = compiledb;
        }
    }

    /// Canonical identity string; the key for equality, ordering and hashing.
    pub fn identity_key(&self) -> String {
        match self {
            BuildTarget::Keymap(t) => t.identity().describe("KeyboardKeymapTarget"),
            BuildTarget::Payload(t) => t.identity().describe("JsonKeymapTarget"),
        }
    }

    pub fn target_name(&self, env: &MakeVars) -> String {
        self.identity().target_name(env)
    }

    pub fn common_make_args(&self, ctx: &BuildContext, request: &BuildRequest) -> Vec<String> {
        self.identity().common_make_args(ctx, self.options(), request)
    }

    /// Resolved configuration tree, loaded on first use.
    pub fn configuration(&self, catalog: &dyn KeyboardCatalog) -> Result<&Value> {
        match self {
            BuildTarget::Keymap(t) => t.resolve_configuration(catalog),
            BuildTarget::Payload(t) => Ok(t.configuration()),
        }
    }

    /// Look up a dotted path (e.g. `usb.vid`) in the configuration.
    pub fn config_value(&self, catalog: &dyn KeyboardCatalog, path: &str) -> Result<Option<&Value>> {
        Ok(lookup_dotted(self.configuration(catalog)?, path))
    }

    /// Stage anything the build needs on disk.
    pub fn prepare_build(&self, ctx: &BuildContext, request: &BuildRequest) -> Result<()> {
        match self {
            BuildTarget::Keymap(t) => t.prepare_build(ctx, request),
            BuildTarget::Payload(t) => t.prepare_build(ctx, request),
        }
    }

    /// Full argument vector for the build engine.
    pub fn compile_command(
        &self,
        ctx: &BuildContext,
        catalog: &dyn KeyboardCatalog,
        request: &BuildRequest,
    ) -> Result<Vec<String>> {
        match self {
            BuildTarget::Keymap(t) => t.compile_command(ctx, catalog, request),
            BuildTarget::Payload(t) => Ok(t.compile_command(ctx, request)),
        }
    }

    /// Generate `compile_commands.json` from a dry run of this target.
    pub fn generate_compilation_database<R: CommandRunner + ?Sized>(
        &self,
        ctx: &BuildContext,
        catalog: &dyn KeyboardCatalog,
        runner: &R,
        request: &BuildRequest,
        skip_clean: bool,
    ) -> Result<PathBuf> {
        self.prepare_build(ctx, request)?;
        let dry_run = BuildRequest {
            dry_run: true,
            ..request.clone()
        };
        let command = self.compile_command(ctx, catalog, &dry_run)?;

        let database = CompilationDatabase::new(ctx, catalog, runner);
        database.try_write(&DatabaseRequest {
            command: Some(command),
            skip_clean,
            env: request.env.clone(),
            ..DatabaseRequest::default()
        })
    }

    /// Build this target.
    ///
    /// Returns the build engine's exit code, or `None` for a dry run where
    /// nothing was executed.
    pub fn compile<R: CommandRunner + ?Sized>(
        &self,
        ctx: &BuildContext,
        catalog: &dyn KeyboardCatalog,
        runner: &R,
        request: &BuildRequest,
    ) -> Result<Option<i32>> {
        let options = self.options();

        if options.clean {
            let mut command = vec![ctx.make.clone(), "clean".to_string()];
            if request.dry_run {
                command.push("-n".to_string());
            }
            tracing::info!("Cleaning with {}", display_command(&command));
            runner.run(&command)?;
        }

        if options.compiledb && !request.dry_run {
            self.generate_compilation_database(ctx, catalog, runner, request, true)?;
        }

        self.prepare_build(ctx, request)?;
        let command = self.compile_command(ctx, catalog, request)?;
        tracing::info!("Compiling keymap with {}", display_command(&command));

        if request.dry_run {
            return Ok(None);
        }
        runner.run(&command)
    }
}

impl From<KeymapTarget> for BuildTarget {
    fn from(target: KeymapTarget) -> Self {
        BuildTarget::Keymap(target)
    }
}

impl From<PayloadTarget> for BuildTarget {
    fn from(target: PayloadTarget) -> Self {
        BuildTarget::Payload(target)
    }
}

impl fmt::Display for BuildTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.keyboard(), self.keymap())
    }
}

impl PartialEq for BuildTarget {
    fn eq(&self, other: &Self) -> bool {
        self.identity_key() == other.identity_key()
    }
}

impl Eq for BuildTarget {}

impl PartialOrd for BuildTarget {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BuildTarget {
    fn cmp(&self, other: &Self) -> Ordering {
        self.identity_key().cmp(&other.identity_key())
    }
}

impl Hash for BuildTarget {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity_key().hash(state);
    }
}

/// Walk a JSON tree along a `.`-separated path.
pub fn lookup_dotted<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |node, key| match node {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}
