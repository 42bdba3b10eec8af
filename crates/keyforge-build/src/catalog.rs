//! Keyboard and keymap lookup.
//!
//! Target variants only need three answers from the source tree: the
//! canonical keyboard name, the resolved configuration of a keymap, and
//! where that keymap lives on disk. [`KeyboardCatalog`] is that seam;
//! [`FilesystemCatalog`] answers it from a firmware checkout plus an
//! optional userspace.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

use crate::{BuildContext, BuildError, Result};

/// Source of keyboard and keymap facts.
pub trait KeyboardCatalog {
    /// Canonical keyboard folder name (e.g. `acme/board/rev1`).
    fn keyboard_folder(&self, keyboard: &str) -> Result<String>;

    /// Resolved configuration tree for a keyboard and keymap.
    fn keymap_json(&self, keyboard: &str, keymap: &str) -> Result<Value>;

    /// Path of the keymap source file (`keymap.c` or `keymap.json`), if any.
    fn locate_keymap(&self, keyboard: &str, keymap: &str, force_layout: Option<&str>)
        -> Option<PathBuf>;
}

const KEYMAP_FILES: [&str; 2] = ["keymap.c", "keymap.json"];

/// Catalog backed by the firmware checkout and userspace on disk.
#[derive(Debug, Clone)]
pub struct FilesystemCatalog {
    firmware_root: PathBuf,
    userspace_root: Option<PathBuf>,
}

impl FilesystemCatalog {
    pub fn new(firmware_root: impl AsRef<Path>, userspace_root: Option<&Path>) -> Self {
        Self {
            firmware_root: firmware_root.as_ref().to_path_buf(),
            userspace_root: userspace_root.map(Path::to_path_buf),
        }
    }

    pub fn from_context(ctx: &BuildContext) -> Self {
        Self::new(&ctx.firmware_root, ctx.userspace_root.as_deref())
    }

    /// Userspace first, so out-of-tree keymaps shadow in-tree ones.
    fn search_roots(&self) -> impl Iterator<Item = &Path> {
        self.userspace_root
            .as_deref()
            .into_iter()
            .chain(std::iter::once(self.firmware_root.as_path()))
    }

    fn find_in_keyboards(&self, root: &Path, keyboard: &str, keymap: &str) -> Option<PathBuf> {
        let mut found = None;
        let mut checked = PathBuf::from("keyboards");
        // Deeper keyboard folders override their parents.
        for part in keyboard.split('/') {
            checked.push(part);
            let keymap_dir = root.join(&checked).join("keymaps").join(keymap);
            if let Some(file) = find_keymap_file(&keymap_dir) {
                found = Some(file);
            }
        }
        found
    }

    fn read_object(path: &Path) -> Result<Map<String, Value>> {
        let content = std::fs::read_to_string(path)?;
        match serde_json::from_str(&content)? {
            Value::Object(map) => Ok(map),
            _ => Err(BuildError::payload(format!(
                "{} does not contain a JSON object",
                path.display()
            ))),
        }
    }
}

impl KeyboardCatalog for FilesystemCatalog {
    fn keyboard_folder(&self, keyboard: &str) -> Result<String> {
        let folder = keyboard.replace('\\', "/");
        let folder = folder.trim_matches('/');
        if folder.is_empty() {
            return Err(BuildError::usage("No keyboard given"));
        }
        Ok(folder.to_string())
    }

    fn keymap_json(&self, keyboard: &str, keymap: &str) -> Result<Value> {
        let mut config = Map::new();

        let mut checked = self.firmware_root.join("keyboards");
        for part in keyboard.split('/') {
            checked.push(part);
            for name in ["info.json", "keyboard.json"] {
                let info = checked.join(name);
                if info.is_file() {
                    config.extend(Self::read_object(&info)?);
                }
            }
        }

        if let Some(location) = self.locate_keymap(keyboard, keymap, None) {
            let json = location.with_file_name("keymap.json");
            if json.is_file() {
                config.extend(Self::read_object(&json)?);
            }
        }

        config.insert("keyboard".to_string(), Value::String(keyboard.to_string()));
        config.insert("keymap".to_string(), Value::String(keymap.to_string()));
        Ok(Value::Object(config))
    }

    fn locate_keymap(
        &self,
        keyboard: &str,
        keymap: &str,
        force_layout: Option<&str>,
    ) -> Option<PathBuf> {
        if force_layout.is_none() {
            for root in self.search_roots() {
                if let Some(found) = self.find_in_keyboards(root, keyboard, keymap) {
                    return Some(found);
                }
            }
        }

        let layout = force_layout?;
        self.search_roots().find_map(|root| {
            let layouts = root.join("layouts");
            let entries = std::fs::read_dir(&layouts).ok()?;
            entries
                .filter_map(|entry| entry.ok())
                .map(|entry| entry.path().join(layout).join(keymap))
                .find_map(|dir| find_keymap_file(&dir))
        })
    }
}

fn find_keymap_file(dir: &Path) -> Option<PathBuf> {
    KEYMAP_FILES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}
