//! Targets backed by a keymap stored on disk.

use serde_json::Value;
use std::cell::OnceCell;

use super::{BuildOptions, BuildRequest, TargetIdentity};
use crate::catalog::KeyboardCatalog;
use crate::paths::{is_under, unix_style_path};
use crate::{BuildContext, Result};

/// A keyboard/keymap pair whose keymap already exists in the firmware tree or userspace.
#[derive(Debug, Clone)]
pub struct KeymapTarget {
    pub(crate) identity: TargetIdentity,
    pub(crate) options: BuildOptions,
    configuration: OnceCell<Value>,
}

impl KeymapTarget {
    /// Target for an already-normalized keyboard name.
    pub fn new(keyboard: impl Into<String>, keymap: impl Into<String>) -> Self {
        Self {
            identity: TargetIdentity::new(keyboard, keymap),
            options: BuildOptions::default(),
            configuration: OnceCell::new(),
        }
    }

    /// Target whose keyboard name is normalized through the catalog first.
    pub fn resolve(catalog: &dyn KeyboardCatalog, keyboard: &str, keymap: &str) -> Result<Self> {
        Ok(Self::new(catalog.keyboard_folder(keyboard)?, keymap))
    }

    /// Target with a configuration that was loaded elsewhere.
    pub fn with_configuration(mut self, configuration: Value) -> Self {
        self.configuration = OnceCell::from(configuration);
        self
    }

    pub fn identity(&self) -> &TargetIdentity {
        &self.identity
    }

    /// Configuration for this keymap, fetched from the catalog once.
    pub fn resolve_configuration(&self, catalog: &dyn KeyboardCatalog) -> Result<&Value> {
        if let Some(configuration) = self.configuration.get() {
            return Ok(configuration);
        }
        let loaded = catalog.keymap_json(self.identity.keyboard(), self.identity.keymap())?;
        Ok(self.configuration.get_or_init(|| loaded))
    }

    /// Nothing to stage: the keymap is already on disk.
    pub fn prepare_build(&self, _ctx: &BuildContext, _request: &BuildRequest) -> Result<()> {
        Ok(())
    }

    pub fn compile_command(
        &self,
        ctx: &BuildContext,
        catalog: &dyn KeyboardCatalog,
        request: &BuildRequest,
    ) -> Result<Vec<String>> {
        let mut args = self.identity.common_make_args(ctx, &self.options, request);

        // A userspace keymap must be pointed at explicitly. This also keeps
        // keyboard aliases working when userspace holds the keymap under a
        // historical keyboard location.
        let vars = self.identity.all_vars(&request.env);
        let location = catalog.locate_keymap(
            self.identity.keyboard(),
            self.identity.keymap(),
            vars.get("FORCE_LAYOUT").map(String::as_str),
        );

        let Some(location) = location else {
            return Ok(args);
        };
        let in_userspace = ctx
            .userspace_root
            .as_deref()
            .is_some_and(|root| is_under(&location, root));

        if in_userspace && !is_under(&location, &ctx.firmware_root) {
            if let Some(keymap_dir) = location.parent() {
                let keymap_dir = unix_style_path(keymap_dir);
                // Five separate layers of the makefiles resolve the keymap path.
                for layer in 1..=5 {
                    args.push(format!("MAIN_KEYMAP_PATH_{}={}", layer, keymap_dir));
                }
            }
        }

        Ok(args)
    }
}
