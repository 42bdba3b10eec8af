//! Build configuration (`keyforge.toml`) and the per-run build context.

use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::process::find_make;

/// Name of the configuration file looked up at the firmware root.
pub const CONFIG_FILE_NAME: &str = "keyforge.toml";

/// Root build configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Output behaviour.
    pub general: GeneralConfig,

    /// Source tree locations.
    pub paths: PathsConfig,

    /// Build engine settings.
    pub make: MakeConfig,
}

/// Output behaviour shared by every invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Let the build engine echo every command.
    pub verbose: bool,

    /// Ask the build engine for coloured output.
    pub color: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            color: true,
        }
    }
}

/// Source tree locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Firmware checkout (default: the directory holding the config file).
    pub firmware_root: Option<PathBuf>,

    /// Optional external userspace holding out-of-tree keymaps.
    pub userspace_root: Option<PathBuf>,

    /// Prefix for per-target intermediate directories, relative to the firmware root.
    pub intermediate_prefix: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            firmware_root: None,
            userspace_root: None,
            intermediate_prefix: ".build/obj_".to_string(),
        }
    }
}

/// Build engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MakeConfig {
    /// Explicit make executable (default: `$MAKE`, then `gmake`, then `make`).
    pub executable: Option<String>,

    /// Makefile driving a single keyboard build.
    pub makefile: String,
}

impl Default for MakeConfig {
    fn default() -> Self {
        Self {
            executable: None,
            makefile: "builddefs/build_keyboard.mk".to_string(),
        }
    }
}

impl BuildConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: BuildConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load `keyforge.toml` from a directory, falling back to defaults when absent.
    pub fn load(dir: &Path) -> crate::Result<Self> {
        let path = dir.join(CONFIG_FILE_NAME);
        if path.exists() {
            tracing::debug!("Loading configuration from {}", path.display());
            Self::from_file(&path)
        } else {
            Ok(Self::default())
        }
    }
}

/// Everything an invocation builder needs to know about the current run.
///
/// This is threaded explicitly through target and database operations
/// instead of living in process-wide state.
#[derive(Debug, Clone)]
pub struct BuildContext {
    /// Absolute path of the firmware checkout; the build engine runs from here.
    pub firmware_root: PathBuf,
    /// Absolute path of the userspace, if one is in use.
    pub userspace_root: Option<PathBuf>,
    pub verbose: bool,
    pub color: bool,
    /// Build engine executable.
    pub make: String,
    pub makefile: String,
    pub intermediate_prefix: String,
}

impl BuildContext {
    /// Context with default settings rooted at `firmware_root`.
    pub fn new(firmware_root: impl AsRef<Path>) -> Self {
        Self::from_config(&BuildConfig::default(), firmware_root)
    }

    /// Resolve a loaded configuration against a firmware root.
    ///
    /// `paths.firmware_root` in the config, when set, takes precedence over
    /// `default_root`. Relative paths are taken relative to `default_root`.
    pub fn from_config(config: &BuildConfig, default_root: impl AsRef<Path>) -> Self {
        let default_root = default_root.as_ref();
        let firmware_root = match &config.paths.firmware_root {
            Some(root) => absolutize(default_root, root),
            None => absolutize(default_root, Path::new(".")),
        };
        let userspace_root = config
            .paths
            .userspace_root
            .as_ref()
            .map(|root| absolutize(default_root, root));
        let make = config.make.executable.clone().unwrap_or_else(find_make);

        Self {
            firmware_root,
            userspace_root,
            verbose: config.general.verbose,
            color: config.general.color,
            make,
            makefile: config.make.makefile.clone(),
            intermediate_prefix: config.paths.intermediate_prefix.clone(),
        }
    }

    pub fn with_userspace(mut self, root: impl AsRef<Path>) -> Self {
        self.userspace_root = Some(absolutize(&self.firmware_root, root.as_ref()));
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_color(mut self, color: bool) -> Self {
        self.color = color;
        self
    }

    pub fn with_make(mut self, make: impl Into<String>) -> Self {
        self.make = make.into();
        self
    }

    /// Intermediate output directory for a decorated target name.
    pub fn intermediate_output(&self, target_name: &str) -> PathBuf {
        self.firmware_root
            .join(format!("{}{}", self.intermediate_prefix, target_name))
    }

    /// Primary location of the generated compilation database.
    pub fn compilation_database_path(&self) -> PathBuf {
        self.firmware_root.join("compile_commands.json")
    }

    /// Mirror location of the compilation database inside the userspace.
    pub fn userspace_database_path(&self) -> Option<PathBuf> {
        self.userspace_root
            .as_ref()
            .map(|root| root.join("compile_commands.json"))
    }
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    dunce::canonicalize(&joined).unwrap_or_else(|_| drop_cur_dir(&joined))
}

/// Remove `.` segments from a path that cannot be canonicalized yet.
fn drop_cur_dir(path: &Path) -> PathBuf {
    path.components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[general]
verbose = true
color = false

[paths]
userspace_root = "/home/user/keymaps"

[make]
executable = "gmake"
        "#;

        let config: BuildConfig = toml::from_str(toml).unwrap();

        assert!(config.general.verbose);
        assert!(!config.general.color);
        assert_eq!(
            config.paths.userspace_root,
            Some(PathBuf::from("/home/user/keymaps"))
        );
        assert_eq!(config.paths.intermediate_prefix, ".build/obj_");
        assert_eq!(config.make.executable.as_deref(), Some("gmake"));
        assert_eq!(config.make.makefile, "builddefs/build_keyboard.mk");
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: BuildConfig = toml::from_str("").unwrap();
        assert!(!config.general.verbose);
        assert!(config.general.color);
        assert!(config.paths.userspace_root.is_none());
    }

    #[test]
    fn test_context_paths() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig {
            make: MakeConfig {
                executable: Some("make".to_string()),
                ..MakeConfig::default()
            },
            ..BuildConfig::default()
        };
        let ctx = BuildContext::from_config(&config, dir.path());

        assert_eq!(ctx.make, "make");
        assert!(ctx.firmware_root.is_absolute());
        assert_eq!(
            ctx.intermediate_output("acme_board_default"),
            ctx.firmware_root.join(".build/obj_acme_board_default")
        );
        assert_eq!(
            ctx.compilation_database_path(),
            ctx.firmware_root.join("compile_commands.json")
        );
        assert!(ctx.userspace_database_path().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_root_has_no_dot_segments() {
        let ctx = BuildContext::new("/nonexistent/fw").with_make("make");
        assert_eq!(ctx.firmware_root, PathBuf::from("/nonexistent/fw"));
        assert_eq!(
            ctx.intermediate_output("acme_mine"),
            PathBuf::from("/nonexistent/fw/.build/obj_acme_mine")
        );

        let ctx = ctx.with_userspace("./keymaps");
        assert_eq!(ctx.userspace_root, Some(PathBuf::from("/nonexistent/fw/keymaps")));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::load(dir.path()).unwrap();
        assert_eq!(config.make.makefile, "builddefs/build_keyboard.mk");
    }
}
