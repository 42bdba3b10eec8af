//! Dry-run trace scanning.
//!
//! `make -n` against the keyboard makefiles prints, for each object, a
//! `printf "Compiling: <file>"` line followed somewhere later by
//! `LOG=$(<compiler command> && ...)`. The scanner pairs them up. It only
//! understands these two markers; all other chatter is skipped.

use std::path::PathBuf;

const HEADER_MARKER: &str = "printf \"Compiling: ";
const COMMAND_MARKER: &str = "LOG=$(";

/// One compile step recovered from a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceEntry {
    /// Source file as named by the build engine.
    pub file: String,
    /// Compiler command exactly as printed.
    pub command: String,
    /// `command` split into shell words.
    pub args: Vec<String>,
    /// Absolute path of the compiler, when it could be found on `PATH`.
    pub binary: Option<PathBuf>,
}

/// File announced by a `printf "Compiling: <file>` line.
pub fn match_compile_header(line: &str) -> Option<&str> {
    let start = line.find(HEADER_MARKER)? + HEADER_MARKER.len();
    let rest = &line[start..];
    let file = rest.split('"').next().unwrap_or(rest);
    (!file.is_empty()).then_some(file)
}

/// Command captured by a `LOG=$(<command> &&` line.
pub fn match_compile_command(line: &str) -> Option<&str> {
    let start = line.find(COMMAND_MARKER)? + COMMAND_MARKER.len();
    let rest = &line[start..];
    // The command is never empty, so the conjunction is searched from the second byte.
    let first = rest.chars().next()?;
    let end = rest[first.len_utf8()..].find("&&")? + first.len_utf8();
    Some(&rest[..end])
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ScanState {
    SeekHeader,
    SeekCommand { file: String },
}

type BinaryResolver = Box<dyn Fn(&str) -> Option<PathBuf>>;

/// Line-at-a-time scanner over a dry-run trace.
pub struct TraceParser {
    state: ScanState,
    entries: Vec<TraceEntry>,
    resolve_binary: BinaryResolver,
}

impl Default for TraceParser {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceParser {
    /// Parser resolving compilers through `PATH`.
    pub fn new() -> Self {
        Self::with_resolver(|program| which::which(program).ok())
    }

    /// Parser with a custom compiler lookup.
    pub fn with_resolver(resolve: impl Fn(&str) -> Option<PathBuf> + 'static) -> Self {
        Self {
            state: ScanState::SeekHeader,
            entries: Vec::new(),
            resolve_binary: Box::new(resolve),
        }
    }

    pub fn feed(&mut self, line: &str) {
        // The most recent header always wins; a header without a command is dropped.
        if let Some(file) = match_compile_header(line) {
            self.state = ScanState::SeekCommand {
                file: file.to_string(),
            };
        }

        let ScanState::SeekCommand { file } = &self.state else {
            return;
        };
        let Some(command) = match_compile_command(line) else {
            return;
        };

        match shlex::split(command) {
            Some(args) if !args.is_empty() => {
                let binary = (self.resolve_binary)(&args[0]);
                if binary.is_none() {
                    tracing::warn!("Compiler {} for {} not found on PATH", args[0], file);
                }
                self.entries.push(TraceEntry {
                    file: file.clone(),
                    command: command.to_string(),
                    args,
                    binary,
                });
            }
            _ => tracing::warn!("Could not split compile command for {}: {}", file, command),
        }
        self.state = ScanState::SeekHeader;
    }

    pub fn finish(self) -> Vec<TraceEntry> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(file: &str) -> String {
        format!("printf \"Compiling: {}\" | $(AWK_CMD)", file)
    }

    fn command(file: &str) -> String {
        format!(
            "LOG=$(arm-none-eabi-gcc -c -mcpu=cortex-m4 -Os {} -o .build/{}.o 2>&1) && echo ok",
            file, file
        )
    }

    fn parse(lines: &[String]) -> Vec<TraceEntry> {
        let mut parser =
            TraceParser::with_resolver(|program| Some(PathBuf::from("/opt/bin").join(program)));
        for line in lines {
            parser.feed(line);
        }
        parser.finish()
    }

    #[test]
    fn test_match_compile_header() {
        assert_eq!(
            match_compile_header(r#"printf "Compiling: quantum/keymap.c" | $(AWK)"#),
            Some("quantum/keymap.c")
        );
        assert_eq!(match_compile_header(r#"printf "Compiling: main.c"#), Some("main.c"));
        assert_eq!(match_compile_header(r#"printf "Compiling: ""#), None);
        assert_eq!(match_compile_header("echo Compiling: main.c"), None);
    }

    #[test]
    fn test_match_compile_command() {
        assert_eq!(
            match_compile_command("LOG=$(gcc -c a.c 2>&1 && true) && echo"),
            Some("gcc -c a.c 2>&1 ")
        );
        assert_eq!(match_compile_command("LOG=$(&&x&&"), Some("&&x"));
        assert_eq!(match_compile_command("LOG=$(gcc -c a.c"), None);
        assert_eq!(match_compile_command("gcc -c a.c && true"), None);
    }

    #[test]
    fn test_header_without_command_is_dropped() {
        let lines = vec![
            header("f1.c"),
            command("f1.c"),
            header("f2.c"),
            header("f3.c"),
            command("f3.c"),
        ];
        let entries = parse(&lines);

        let files: Vec<&str> = entries.iter().map(|e| e.file.as_str()).collect();
        assert_eq!(files, vec!["f1.c", "f3.c"]);
        assert!(entries[1].command.contains("f3.c"));
    }

    #[test]
    fn test_command_without_header_is_ignored() {
        let lines = vec![command("orphan.c"), "make: Nothing to be done".to_string()];
        assert!(parse(&lines).is_empty());
    }

    #[test]
    fn test_noise_between_header_and_command() {
        let lines = vec![
            "mkdir -p .build/obj".to_string(),
            header("keymap.c"),
            "mkdir -p .build/obj/keymap".to_string(),
            command("keymap.c"),
            command("keymap.c"),
        ];
        let entries = parse(&lines);

        assert_eq!(entries.len(), 1);
        let entry = &entries[0];
        assert_eq!(entry.args[0], "arm-none-eabi-gcc");
        assert_eq!(entry.args[2], "-mcpu=cortex-m4");
        assert_eq!(entry.binary, Some(PathBuf::from("/opt/bin/arm-none-eabi-gcc")));
    }

    #[test]
    fn test_header_and_command_on_one_line() {
        let line = format!("{}; {}", header("a.c"), command("a.c"));
        let entries = parse(&[line]);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].file, "a.c");
    }

    #[test]
    fn test_unresolved_binary_is_kept() {
        let mut parser = TraceParser::with_resolver(|_| None);
        parser.feed(&header("a.c"));
        parser.feed(&command("a.c"));
        let entries = parser.finish();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].binary.is_none());
    }
}
