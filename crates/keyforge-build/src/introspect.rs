//! Compiler introspection.
//!
//! Asks a gcc-style compiler for the include directories and predefined
//! macros it uses implicitly, so editors see the same environment the real
//! build does. Answers are memoized per binary (and per flag set for
//! macros) in small LRU caches.

use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::BTreeSet;
use std::hash::Hash;
use std::path::{Path, PathBuf};

use crate::process::{check_output, CommandRunner};
use crate::Result;

/// Entries kept per cache unless configured otherwise.
pub const DEFAULT_CACHE_CAPACITY: usize = 10;

/// Fixed-capacity map evicting the least recently used entry.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    entries: IndexMap<K, V>,
}

impl<K: Hash + Eq, V: Clone> BoundedCache<K, V> {
    /// Create a cache; a capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: IndexMap::new(),
        }
    }

    /// Fetch a value and mark it most recently used.
    pub fn get(&mut self, key: &K) -> Option<V> {
        let index = self.entries.get_index_of(key)?;
        let last = self.entries.len() - 1;
        self.entries.move_index(index, last);
        self.entries.get_index(last).map(|(_, v)| v.clone())
    }

    pub fn insert(&mut self, key: K, value: V) {
        self.entries.shift_remove(&key);
        if self.entries.len() >= self.capacity {
            self.entries.shift_remove_index(0);
        }
        self.entries.insert(key, value);
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Source language implied by a compiler driver's name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerLanguage {
    C,
    Cpp,
}

impl CompilerLanguage {
    /// Recognize `*gcc` and `*g++` drivers (a trailing `.exe` is ignored).
    pub fn detect(binary: &Path) -> Option<Self> {
        let name = binary.to_string_lossy();
        let name = name.strip_suffix(".exe").unwrap_or(&name);
        if name.ends_with("g++") {
            Some(CompilerLanguage::Cpp)
        } else if name.ends_with("gcc") {
            Some(CompilerLanguage::C)
        } else {
            None
        }
    }

    /// Argument for `-x`.
    pub fn as_arg(self) -> &'static str {
        match self {
            CompilerLanguage::C => "c",
            CompilerLanguage::Cpp => "c++",
        }
    }
}

/// Keep only flags that can change the predefined macro set.
///
/// Machine (`-m…`) and feature (`-f…`) flags are the only ones passed on;
/// the result is sorted and deduplicated so it doubles as a cache key.
pub fn macro_affecting_flags(flags: &[String]) -> Vec<String> {
    flags
        .iter()
        .filter(|f| f.starts_with("-m") || f.starts_with("-f"))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Parse `gcc -dM -E` output into sorted, unique `-D` arguments.
pub fn parse_macro_dump(output: &str) -> Vec<String> {
    let mut defines = BTreeSet::new();
    for line in output.lines() {
        let parts: Vec<&str> = line.splitn(3, ' ').collect();
        match parts.as_slice() {
            ["#define", name, value] => {
                defines.insert(format!("-D{}={}", name, value));
            }
            ["#define", name] => {
                defines.insert(format!("-D{}", name));
            }
            _ => {}
        }
    }
    defines.into_iter().collect()
}

/// Parse `gcc -E -Wp,-v` diagnostics into the search directories it lists.
pub fn parse_include_search(stderr: &str) -> Vec<PathBuf> {
    stderr
        .lines()
        .filter(|line| line.starts_with(' '))
        .map(|line| {
            let path = PathBuf::from(line.trim());
            dunce::canonicalize(&path).unwrap_or(path)
        })
        .collect()
}

type DefinesKey = (PathBuf, Vec<String>);

/// Memoizing front-end for compiler queries.
///
/// Not `Sync`; a multi-threaded caller needs one probe per thread or a lock around it.
#[derive(Debug)]
pub struct CompilerProbe {
    includes: RefCell<BoundedCache<PathBuf, Vec<PathBuf>>>,
    defines: RefCell<BoundedCache<DefinesKey, Vec<String>>>,
}

impl Default for CompilerProbe {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl CompilerProbe {
    pub fn new(capacity: usize) -> Self {
        Self {
            includes: RefCell::new(BoundedCache::new(capacity)),
            defines: RefCell::new(BoundedCache::new(capacity)),
        }
    }

    /// Directories the compiler searches for `#include <...>` by default.
    ///
    /// Unknown compilers fall back to `<install root>/*/include`. A missing
    /// binary yields an empty list.
    pub fn system_include_paths<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        binary: Option<&Path>,
    ) -> Result<Vec<PathBuf>> {
        let Some(binary) = binary.filter(|b| !b.as_os_str().is_empty()) else {
            return Ok(Vec::new());
        };
        if let Some(paths) = self.includes.borrow_mut().get(&binary.to_path_buf()) {
            return Ok(paths);
        }

        tracing::debug!("Searching for system include directories of {}", binary.display());
        let paths = if CompilerLanguage::detect(binary).is_some() {
            let argv = vec![
                binary.to_string_lossy().into_owned(),
                "-E".to_string(),
                "-Wp,-v".to_string(),
                "-".to_string(),
            ];
            let output = check_output(runner, &argv, Some("\n"))?;
            parse_include_search(&output.stderr)
        } else {
            sibling_include_dirs(binary)
        };

        self.includes
            .borrow_mut()
            .insert(binary.to_path_buf(), paths.clone());
        Ok(paths)
    }

    /// Predefined macros for `binary` under the given compiler flags.
    pub fn macro_defines<R: CommandRunner + ?Sized>(
        &self,
        runner: &R,
        binary: Option<&Path>,
        flags: &[String],
    ) -> Result<Vec<String>> {
        let Some(binary) = binary else {
            return Ok(Vec::new());
        };
        let Some(language) = CompilerLanguage::detect(binary) else {
            return Ok(Vec::new());
        };

        let flags = macro_affecting_flags(flags);
        let key = (binary.to_path_buf(), flags);
        if let Some(defines) = self.defines.borrow_mut().get(&key) {
            return Ok(defines);
        }

        tracing::debug!(
            "Gathering definitions for compilation: {} {}",
            binary.display(),
            key.1.join(" ")
        );
        let mut argv = vec![
            binary.to_string_lossy().into_owned(),
            "-dM".to_string(),
            "-E".to_string(),
            "-x".to_string(),
            language.as_arg().to_string(),
        ];
        argv.extend(key.1.iter().cloned());
        argv.push("-".to_string());

        let output = check_output(runner, &argv, Some("\n"))?;
        let defines = parse_macro_dump(&output.stdout);

        self.defines.borrow_mut().insert(key, defines.clone());
        Ok(defines)
    }
}

fn sibling_include_dirs(binary: &Path) -> Vec<PathBuf> {
    let resolved = dunce::canonicalize(binary).unwrap_or_else(|_| binary.to_path_buf());
    let Some(root) = resolved.parent().and_then(Path::parent) else {
        return Vec::new();
    };
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };

    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("include"))
        .filter(|include| include.is_dir())
        .collect();
    dirs.sort();
    dirs
}
