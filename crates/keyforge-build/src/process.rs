//! Subprocess execution for the build engine and compiler probes.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::{BuildError, Result};

/// Captured result of a finished subprocess.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Something that can execute an argument vector.
///
/// The first element of `argv` is the program. Implementations must not
/// interpret a non-zero exit as an error; callers decide via [`check_output`].
pub trait CommandRunner {
    /// Run to completion, capturing stdout and stderr. `input` is written to
    /// stdin when given, otherwise stdin is empty.
    fn capture(&self, argv: &[String], input: Option<&str>) -> Result<CommandOutput>;

    /// Run to completion with inherited stdio and return the exit code.
    fn run(&self, argv: &[String]) -> Result<Option<i32>>;
}

/// Runs commands with `std::process`, from a fixed working directory.
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    cwd: Option<PathBuf>,
}

impl SystemRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run every command from `dir`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self {
            cwd: Some(dir.as_ref().to_path_buf()),
        }
    }

    fn command(&self, argv: &[String]) -> Result<Command> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| BuildError::usage("Cannot run an empty command"))?;

        let mut cmd = Command::new(program);
        cmd.args(args);
        // Inherited job-server flags from an outer make confuse the engine's dry run.
        cmd.env_remove("MAKEFLAGS");
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        Ok(cmd)
    }
}

impl CommandRunner for SystemRunner {
    fn capture(&self, argv: &[String], input: Option<&str>) -> Result<CommandOutput> {
        let mut cmd = self.command(argv)?;
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        tracing::debug!("Running command: {}", display_command(argv));

        let mut child = cmd.spawn().map_err(|source| BuildError::Spawn {
            program: argv[0].clone(),
            source,
        })?;

        if let (Some(text), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(text.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn run(&self, argv: &[String]) -> Result<Option<i32>> {
        let mut cmd = self.command(argv)?;
        tracing::debug!("Running command: {}", display_command(argv));
        let status = cmd.status().map_err(|source| BuildError::Spawn {
            program: argv[0].clone(),
            source,
        })?;
        Ok(status.code())
    }
}

/// Capture a command and turn a non-zero exit into [`BuildError::CommandFailed`].
pub fn check_output<R: CommandRunner + ?Sized>(
    runner: &R,
    argv: &[String],
    input: Option<&str>,
) -> Result<CommandOutput> {
    let output = runner.capture(argv, input)?;
    if !output.success() {
        return Err(BuildError::CommandFailed {
            command: display_command(argv),
            code: output.code,
            stdout: output.stdout,
            stderr: output.stderr,
        });
    }
    Ok(output)
}

/// Run a command with inherited stdio, failing on a non-zero exit.
pub fn check_run<R: CommandRunner + ?Sized>(runner: &R, argv: &[String]) -> Result<()> {
    match runner.run(argv)? {
        Some(0) => Ok(()),
        code => Err(BuildError::CommandFailed {
            command: display_command(argv),
            code,
            stdout: String::new(),
            stderr: String::new(),
        }),
    }
}

/// Space-joined rendering of a command for log messages.
pub fn display_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Shell-quote an argument vector into a single command line.
pub fn join_command(argv: &[String]) -> String {
    shlex::try_join(argv.iter().map(String::as_str)).unwrap_or_else(|_| argv.join(" "))
}

/// Locate the make executable: `$MAKE`, then `gmake`, then `make`.
pub fn find_make() -> String {
    if let Ok(make) = std::env::var("MAKE") {
        if !make.is_empty() {
            return make;
        }
    }
    if which::which("gmake").is_ok() {
        "gmake".to_string()
    } else {
        "make".to_string()
    }
}

/// Job control flags for the build engine.
///
/// `0` requests unlimited jobs. Anything other than a single job also
/// synchronizes output per target so logs stay readable.
pub fn make_parallel_args(parallel: usize) -> Vec<String> {
    let mut args = Vec::new();
    if parallel == 0 {
        args.push("--jobs".to_string());
    } else if parallel > 1 {
        args.push(format!("--jobs={}", parallel));
    }
    if parallel != 1 {
        args.push("--output-sync=target".to_string());
    }
    args
}
