use clap::{Args, Parser, Subcommand};
use keyforge_build::{
    BuildConfig, BuildContext, BuildError, BuildRequest, BuildTarget, CompilationDatabase,
    DatabaseRequest, FilesystemCatalog, KeyboardCatalog, KeymapTarget, MakeVars, PayloadTarget,
    SystemRunner,
};
use miette::Result;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "keyforge")]
#[command(author, version, about = "Build keyboard firmware and generate compilation databases")]
struct Cli {
    /// Log debug output and run the build engine verbosely
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,

    /// Firmware checkout to build in (defaults to the current directory)
    #[arg(long, global = true)]
    firmware_root: Option<PathBuf>,

    /// External userspace holding additional keymaps
    #[arg(long, global = true)]
    userspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a keymap, or a JSON keymap payload
    Compile(CompileArgs),

    /// Create compile_commands.json for a keyboard and keymap
    GenerateCompilationDatabase(DatabaseArgs),
}

#[derive(Args)]
struct CompileArgs {
    /// JSON keymap payload to build, or `-` to read it from stdin
    #[arg(conflicts_with_all = ["keyboard", "keymap"])]
    payload: Option<PathBuf>,

    /// The keyboard to build a firmware for
    #[arg(short = 'b', long, visible_alias = "kb", requires = "keymap")]
    keyboard: Option<String>,

    /// The keymap to build a firmware for
    #[arg(short = 'm', long, visible_alias = "km", requires = "keyboard")]
    keymap: Option<String>,

    /// Set a variable to be passed to make
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Number of parallel jobs; 0 means unlimited
    #[arg(short = 'j', long, default_value_t = 1)]
    parallel: usize,

    /// Remove build artifacts before building
    #[arg(short, long)]
    clean: bool,

    /// Also write compile_commands.json before building
    #[arg(long)]
    compiledb: bool,

    /// Print the build commands without running them
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// Make goal, e.g. `flash`
    #[arg(short, long)]
    target: Option<String>,
}

#[derive(Args)]
struct DatabaseArgs {
    /// The keyboard's name
    #[arg(short = 'b', long, visible_alias = "kb")]
    keyboard: Option<String>,

    /// The keymap's name
    #[arg(short = 'm', long, visible_alias = "km")]
    keymap: Option<String>,

    /// Run `make clean` before the dry run
    #[arg(long)]
    clean: bool,

    /// Set a variable to be passed to make
    #[arg(short = 'e', long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,
}

/// Parse a `KEY=VALUE` assignment.
fn parse_env(arg: &str) -> std::result::Result<(String, String), String> {
    match arg.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got `{}`", arg)),
    }
}

fn main() -> Result<ExitCode> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))?;

    let cli = Cli::parse();

    let cwd = std::env::current_dir().map_err(BuildError::from)?;
    let firmware_root = match &cli.firmware_root {
        Some(root) => absolute_from(&cwd, root),
        None => cwd.clone(),
    };
    let config = BuildConfig::load(&firmware_root)?;

    let mut ctx = BuildContext::from_config(&config, &firmware_root)
        .with_verbose(cli.verbose || config.general.verbose)
        .with_color(config.general.color && !cli.no_color);
    if let Some(userspace) = &cli.userspace {
        ctx = ctx.with_userspace(absolute_from(&cwd, userspace));
    }

    let default_level = if ctx.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry()
        .with(fmt::layer().with_ansi(ctx.color).without_time())
        .with(filter)
        .init();

    let catalog = FilesystemCatalog::from_context(&ctx);
    let runner = SystemRunner::in_dir(&ctx.firmware_root);

    match cli.command {
        Commands::Compile(args) => compile(&ctx, &catalog, &runner, args),
        Commands::GenerateCompilationDatabase(args) => {
            let database = CompilationDatabase::new(&ctx, &catalog, &runner);
            let written = database.write(&DatabaseRequest {
                command: None,
                keyboard: args.keyboard,
                keymap: args.keymap,
                skip_clean: !args.clean,
                env: args.env.into_iter().collect(),
            });
            Ok(if written {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}

fn compile(
    ctx: &BuildContext,
    catalog: &FilesystemCatalog,
    runner: &SystemRunner,
    args: CompileArgs,
) -> Result<ExitCode> {
    let mut request = BuildRequest::new().dry_run(args.dry_run);
    if let Some(goal) = args.target {
        request = request.with_goal(goal);
    }
    request.env = args.env.into_iter().collect::<MakeVars>();

    let mut target = select_target(
        catalog,
        args.payload.as_deref(),
        args.keyboard.as_deref(),
        args.keymap.as_deref(),
        &request.env,
    )?;
    target.configure(Some(args.parallel), Some(args.clean), Some(args.compiledb));

    tracing::debug!("Building {}", target);
    match target.compile(ctx, catalog, runner, &request)? {
        None | Some(0) => Ok(ExitCode::SUCCESS),
        Some(code) => {
            tracing::error!("Build of {} failed with exit code {}", target, code);
            Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)))
        }
    }
}

/// Pick the target named on the command line.
///
/// A keymap must exist, honoring a `FORCE_LAYOUT` override, before anything runs.
fn select_target(
    catalog: &dyn KeyboardCatalog,
    payload: Option<&Path>,
    keyboard: Option<&str>,
    keymap: Option<&str>,
    env: &MakeVars,
) -> keyforge_build::Result<BuildTarget> {
    match (payload, keyboard, keymap) {
        (Some(path), _, _) => Ok(PayloadTarget::from_path(catalog, path)?.into()),
        (None, Some(keyboard), Some(keymap)) => {
            let target = KeymapTarget::resolve(catalog, keyboard, keymap)?;
            let force_layout = env.get("FORCE_LAYOUT").map(String::as_str);
            let keyboard = target.identity().keyboard();
            if catalog.locate_keymap(keyboard, keymap, force_layout).is_none() {
                return Err(BuildError::KeymapNotFound {
                    keyboard: keyboard.to_string(),
                    keymap: keymap.to_string(),
                });
            }
            Ok(target.into())
        }
        _ => Err(BuildError::usage(
            "You must supply a configurator export, both `--keyboard` and `--keymap`, or be in a directory for a keyboard or keymap.",
        )),
    }
}

/// Resolve a command-line path against the working directory.
fn absolute_from(cwd: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}
