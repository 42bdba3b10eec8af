//! Targets backed by a JSON keymap payload.
//!
//! The payload is staged as `<intermediate>/src/keymap.json` and the build
//! engine is pointed at it. The file is only rewritten when its content
//! changes, so an unchanged payload does not trigger a rebuild.

use serde_json::Value;
use std::io::Read;
use std::path::{Path, PathBuf};

use super::{BuildOptions, BuildRequest, TargetIdentity};
use crate::catalog::KeyboardCatalog;
use crate::paths::unix_style_path;
use crate::{BuildContext, BuildError, Result};

/// Keymap name used when a payload does not carry one.
pub const DEFAULT_JSON_KEYMAP: &str = "default_json";

/// A keymap described by a JSON payload rather than a keymap directory.
#[derive(Debug, Clone)]
pub struct PayloadTarget {
    pub(crate) identity: TargetIdentity,
    pub(crate) options: BuildOptions,
    json: Value,
    source: Option<PathBuf>,
}

impl PayloadTarget {
    /// Load a payload from a file, or from stdin when `path` is `-`.
    pub fn from_path(catalog: &dyn KeyboardCatalog, path: &Path) -> Result<Self> {
        if path == Path::new("-") {
            return Self::from_reader(catalog, std::io::stdin().lock(), None);
        }
        let file = std::fs::File::open(path).map_err(|e| {
            BuildError::payload(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_reader(catalog, file, Some(path.to_path_buf()))
    }

    /// Load a payload from any reader.
    pub fn from_reader(
        catalog: &dyn KeyboardCatalog,
        mut reader: impl Read,
        source: Option<PathBuf>,
    ) -> Result<Self> {
        let mut content = String::new();
        reader
            .read_to_string(&mut content)
            .map_err(|e| BuildError::payload(format!("cannot read payload: {}", e)))?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| BuildError::payload(format!("not valid JSON: {}", e)))?;

        let mut target = Self::from_value(value, Some(catalog))?;
        target.source = source;
        Ok(target)
    }

    /// Build a target from an already parsed payload.
    ///
    /// With a catalog the keyboard name is normalized through it; without
    /// one it is taken verbatim.
    pub fn from_value(mut json: Value, catalog: Option<&dyn KeyboardCatalog>) -> Result<Self> {
        let Value::Object(map) = &mut json else {
            return Err(BuildError::payload("expected a JSON object"));
        };

        // Payloads copied straight out of a keymap directory carry no keymap name.
        map.entry("keymap")
            .or_insert_with(|| Value::String(DEFAULT_JSON_KEYMAP.to_string()));

        let keyboard = match map.get("keyboard") {
            Some(Value::String(kb)) if !kb.trim().is_empty() => kb.clone(),
            Some(_) => return Err(BuildError::payload("\"keyboard\" must be a non-empty string")),
            None => return Err(BuildError::payload("missing \"keyboard\"")),
        };
        let keymap = match map.get("keymap") {
            Some(Value::String(km)) if !km.is_empty() => km.clone(),
            _ => return Err(BuildError::payload("\"keymap\" must be a non-empty string")),
        };

        let keyboard = match catalog {
            Some(catalog) => catalog.keyboard_folder(&keyboard)?,
            None => keyboard,
        };

        Ok(Self {
            identity: TargetIdentity::new(keyboard, keymap),
            options: BuildOptions::default(),
            json,
            source: None,
        })
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    /// The parsed payload.
    pub fn configuration(&self) -> &Value {
        &self.json
    }

    /// File the payload was read from, `None` for stdin or in-memory payloads.
    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Intermediate directory owned by this target for the given request.
    pub fn intermediate_output(&self, ctx: &BuildContext, request: &BuildRequest) -> PathBuf {
        ctx.intermediate_output(&self.identity.target_name(&request.env))
    }

    /// Write the payload to `<intermediate>/src/keymap.json`.
    pub fn prepare_build(&self, ctx: &BuildContext, request: &BuildRequest) -> Result<()> {
        let intermediate = self.intermediate_output(ctx, request);
        let generated = intermediate.join("src");
        let keymap_json = generated.join("keymap.json");

        if self.options.clean && intermediate.exists() {
            tracing::debug!("Removing {}", intermediate.display());
            std::fs::remove_dir_all(&intermediate)?;
        }

        std::fs::create_dir_all(&generated)?;

        // Compare minified forms; keeping the old file keeps its mtime.
        let new_content = serde_json::to_string(&self.json)?;
        if keymap_json.exists() {
            let existing = std::fs::read_to_string(&keymap_json)?;
            match serde_json::from_str::<Value>(&existing) {
                Ok(old) if serde_json::to_string(&old)? == new_content => {
                    tracing::debug!("{} is up to date", keymap_json.display());
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Replacing unreadable {}: {}", keymap_json.display(), e),
            }
        }

        std::fs::write(&keymap_json, new_content)?;
        Ok(())
    }

    pub fn compile_command(&self, ctx: &BuildContext, request: &BuildRequest) -> Vec<String> {
        let mut args = self.identity.common_make_args(ctx, &self.options, request);

        let intermediate = self.intermediate_output(ctx, request);
        let generated = intermediate.join("src");
        let keymap_json = generated.join("keymap.json");

        let intermediate = unix_style_path(&intermediate);
        for layer in 1..=5 {
            args.push(format!("MAIN_KEYMAP_PATH_{}={}", layer, intermediate));
        }
        args.push(format!("KEYMAP_JSON={}", unix_style_path(&keymap_json)));
        args.push(format!("KEYMAP_PATH={}", unix_style_path(&generated)));
        args
    }
}
