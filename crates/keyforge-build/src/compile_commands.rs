//! compile_commands.json generation.
//!
//! The keyboard makefiles cannot emit a compilation database themselves, so
//! one is reconstructed: the build is dry-run, the printed compiler
//! commands are recovered from the trace, and each command is extended with
//! the compiler's implicit include directories and predefined macros so
//! tooling that does not know the cross compiler still sees the real
//! environment.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::catalog::KeyboardCatalog;
use crate::introspect::CompilerProbe;
use crate::process::{check_output, check_run, display_command, join_command, CommandRunner};
use crate::target::{BuildRequest, KeymapTarget, MakeVars};
use crate::trace::{TraceEntry, TraceParser};
use crate::{BuildContext, BuildError, Result};

/// A single entry of compile_commands.json.
///
/// The generator only fills `command`. `arguments` and the `get_*` accessors
/// exist for reading a database back, including ones written by other
/// generators that use the array form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompileCommand {
    /// The working directory for compilation.
    pub directory: PathBuf,

    /// The full compilation command, shell-quoted.
    #[serde(default)]
    pub command: String,

    /// The source file path.
    pub file: PathBuf,

    /// The compilation arguments (array form), as written by other generators.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<Vec<String>>,
}

impl CompileCommand {
    /// Get the compilation arguments as a vector.
    pub fn get_args(&self) -> Vec<String> {
        if let Some(args) = &self.arguments {
            args.clone()
        } else {
            shlex::split(&self.command).unwrap_or_default()
        }
    }

    /// Extract include directories from the arguments.
    pub fn get_includes(&self) -> Vec<PathBuf> {
        let args = self.get_args();
        let mut includes = Vec::new();

        let mut i = 0;
        while i < args.len() {
            if (args[i] == "-I" || args[i] == "-isystem") && i + 1 < args.len() {
                includes.push(PathBuf::from(&args[i + 1]));
                i += 2;
            } else if let Some(dir) = args[i].strip_prefix("-I") {
                includes.push(PathBuf::from(dir));
                i += 1;
            } else {
                i += 1;
            }
        }

        includes
    }

    /// Extract preprocessor definitions from the arguments.
    pub fn get_defines(&self) -> Vec<String> {
        let args = self.get_args();
        let mut defines = Vec::new();

        let mut i = 0;
        while i < args.len() {
            if args[i] == "-D" && i + 1 < args.len() {
                defines.push(args[i + 1].clone());
                i += 2;
            } else if let Some(def) = args[i].strip_prefix("-D") {
                defines.push(def.to_string());
                i += 1;
            } else {
                i += 1;
            }
        }

        defines
    }
}

/// Collection of compile commands, as generated or as read back from
/// compile_commands.json.
#[derive(Debug, Clone, Default)]
pub struct CompileCommands {
    commands: Vec<CompileCommand>,
}

impl CompileCommands {
    pub fn new(commands: Vec<CompileCommand>) -> Self {
        Self { commands }
    }

    /// Load compile commands from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse compile commands from a JSON string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(json: &str) -> Result<Self> {
        let commands: Vec<CompileCommand> = serde_json::from_str(json)?;
        Ok(Self { commands })
    }

    /// Get all compile commands.
    pub fn commands(&self) -> &[CompileCommand] {
        &self.commands
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Find the compile command for a specific source file.
    pub fn find_command(&self, source: &Path) -> Option<&CompileCommand> {
        self.commands
            .iter()
            .find(|cmd| cmd.file == source || cmd.file.ends_with(source))
    }

    /// Render as a JSON array indented by four spaces.
    pub fn to_json(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.commands.serialize(&mut serializer)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }

    /// Write the database to `path`, replacing any existing file.
    pub fn write_to(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// What to build a database for.
#[derive(Debug, Clone, Default)]
pub struct DatabaseRequest {
    /// Ready-made dry-run command; when absent one is built from `keyboard` and `keymap`.
    pub command: Option<Vec<String>>,
    pub keyboard: Option<String>,
    pub keymap: Option<String>,
    /// Skip `make clean` before the dry run.
    pub skip_clean: bool,
    /// Run-time variable overrides for a generated command.
    pub env: MakeVars,
}

type BinaryResolver = Rc<dyn Fn(&str) -> Option<PathBuf>>;

/// Generates compile_commands.json for one firmware tree.
pub struct CompilationDatabase<'a, R: CommandRunner + ?Sized> {
    ctx: &'a BuildContext,
    catalog: &'a dyn KeyboardCatalog,
    runner: &'a R,
    probe: CompilerProbe,
    resolve_binary: Option<BinaryResolver>,
}

impl<'a, R: CommandRunner + ?Sized> CompilationDatabase<'a, R> {
    pub fn new(ctx: &'a BuildContext, catalog: &'a dyn KeyboardCatalog, runner: &'a R) -> Self {
        Self {
            ctx,
            catalog,
            runner,
            probe: CompilerProbe::default(),
            resolve_binary: None,
        }
    }

    /// Look compilers up with `resolve` instead of `PATH`.
    pub fn with_binary_resolver(mut self, resolve: impl Fn(&str) -> Option<PathBuf> + 'static) -> Self {
        self.resolve_binary = Some(Rc::new(resolve));
        self
    }

    /// Generate and write the database, logging any failure.
    ///
    /// Returns whether the database was written.
    pub fn write(&self, request: &DatabaseRequest) -> bool {
        match self.try_write(request) {
            Ok(_) => true,
            Err(BuildError::Usage(message)) => {
                tracing::error!("{}", message);
                tracing::info!("usage: keyforge generate-compilation-database [-kb KEYBOARD] [-km KEYMAP]");
                false
            }
            Err(BuildError::CommandFailed {
                command,
                code,
                stderr,
                ..
            }) => {
                tracing::error!("`{}` exited with {:?}\n{}", command, code, stderr);
                false
            }
            Err(BuildError::EmptyTrace { output }) => {
                tracing::error!("Failed to parse output from make output:\n{}", output);
                false
            }
            Err(e) => {
                tracing::error!("Failed to write compilation database: {}", e);
                false
            }
        }
    }

    /// Generate and write the database, returning the primary output path.
    pub fn try_write(&self, request: &DatabaseRequest) -> Result<PathBuf> {
        let database = self.collect(request)?;

        let output_path = self.ctx.compilation_database_path();
        tracing::info!("Writing build database to {}", output_path.display());
        database.write_to(&output_path)?;

        if let Some(mirror) = self.ctx.userspace_database_path() {
            std::fs::copy(&output_path, &mirror).map_err(|source| BuildError::Copy {
                from: output_path.clone(),
                to: mirror.clone(),
                source,
            })?;
        }

        Ok(output_path)
    }

    /// Run the dry run and build the enriched database without writing it.
    pub fn collect(&self, request: &DatabaseRequest) -> Result<CompileCommands> {
        let command = self.dry_run_command(request)?;

        if !request.skip_clean {
            let clean = vec![self.ctx.make.clone(), "clean".to_string()];
            tracing::info!("Making clean with {}", display_command(&clean));
            check_run(self.runner, &clean)?;
        }

        tracing::info!("Gathering build instructions from {}", display_command(&command));
        let output = check_output(self.runner, &command, None)?;

        let mut parser = match &self.resolve_binary {
            Some(resolve) => {
                let resolve = Rc::clone(resolve);
                TraceParser::with_resolver(move |program| resolve(program))
            }
            None => TraceParser::new(),
        };
        for line in output.stdout.lines() {
            parser.feed(line);
        }
        let entries = parser.finish();

        if entries.is_empty() {
            return Err(BuildError::EmptyTrace {
                output: output.stdout,
            });
        }
        tracing::info!("Found {} compile commands", entries.len());

        let commands = entries
            .into_iter()
            .map(|entry| self.enrich(entry))
            .collect::<Result<Vec<_>>>()?;
        Ok(CompileCommands::new(commands))
    }

    fn dry_run_command(&self, request: &DatabaseRequest) -> Result<Vec<String>> {
        if let Some(command) = request.command.as_ref().filter(|c| !c.is_empty()) {
            return Ok(command.clone());
        }

        let (Some(keyboard), Some(keymap)) = (&request.keyboard, &request.keymap) else {
            return Err(BuildError::usage(
                "You must supply both `--keyboard` and `--keymap`, or be in a directory for a keyboard or keymap.",
            ));
        };

        let target = KeymapTarget::resolve(self.catalog, keyboard, keymap)?;
        let build = BuildRequest {
            dry_run: true,
            env: request.env.clone(),
            ..BuildRequest::default()
        };
        target.compile_command(self.ctx, self.catalog, &build)
    }

    fn enrich(&self, entry: TraceEntry) -> Result<CompileCommand> {
        let binary = entry.binary.as_deref();
        let includes = self.probe.system_include_paths(self.runner, binary)?;
        let defines = self.probe.macro_defines(self.runner, binary, &entry.args)?;

        let mut args = entry.args;
        for include in includes {
            args.push("-isystem".to_string());
            args.push(include.to_string_lossy().into_owned());
        }
        args.extend(defines);

        Ok(CompileCommand {
            directory: self.ctx.firmware_root.clone(),
            command: join_command(&args),
            file: PathBuf::from(entry.file),
            arguments: None,
        })
    }
}
