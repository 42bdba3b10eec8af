//! Shared helpers for keyforge-build integration tests.

#![allow(dead_code)]

use keyforge_build::{CommandOutput, CommandRunner, Result};
use std::cell::RefCell;

/// Stands in for make and a gcc toolchain, answering by the shape of each command.
#[derive(Default)]
pub struct ScriptedRunner {
    pub dry_run_stdout: String,
    pub dry_run_code: i32,
    pub clean_code: i32,
    pub build_code: i32,
    pub include_stderr: String,
    pub macro_stdout: String,
    pub captured: RefCell<Vec<Vec<String>>>,
    pub ran: RefCell<Vec<Vec<String>>>,
}

impl ScriptedRunner {
    pub fn new(dry_run_stdout: &str) -> Self {
        Self {
            dry_run_stdout: dry_run_stdout.to_string(),
            include_stderr: " /toolchain/include\n".to_string(),
            macro_stdout: "#define __ARM_ARCH 7\n#define __thumb__\n".to_string(),
            ..Self::default()
        }
    }

    /// Every command seen, captured or not, in order.
    pub fn count_matching(&self, pred: impl Fn(&[String]) -> bool) -> usize {
        let captured = self.captured.borrow();
        let ran = self.ran.borrow();
        captured.iter().chain(ran.iter()).filter(|c| pred(c)).count()
    }
}

impl CommandRunner for ScriptedRunner {
    fn capture(&self, argv: &[String], _input: Option<&str>) -> Result<CommandOutput> {
        self.captured.borrow_mut().push(argv.to_vec());

        let output = if argv.iter().any(|a| a == "-Wp,-v") {
            CommandOutput {
                code: Some(0),
                stdout: String::new(),
                stderr: self.include_stderr.clone(),
            }
        } else if argv.iter().any(|a| a == "-dM") {
            CommandOutput {
                code: Some(0),
                stdout: self.macro_stdout.clone(),
                stderr: String::new(),
            }
        } else {
            CommandOutput {
                code: Some(self.dry_run_code),
                stdout: self.dry_run_stdout.clone(),
                stderr: String::new(),
            }
        };
        Ok(output)
    }

    fn run(&self, argv: &[String]) -> Result<Option<i32>> {
        self.ran.borrow_mut().push(argv.to_vec());
        if argv.get(1).map(String::as_str) == Some("clean") {
            Ok(Some(self.clean_code))
        } else {
            Ok(Some(self.build_code))
        }
    }
}

/// Dry-run output in the shape the keyboard makefiles print.
pub fn dry_run_trace(files: &[&str]) -> String {
    let mut out = String::from("mkdir -p .build\n");
    for file in files {
        out.push_str(&format!(
            "printf \"Compiling: {file}\" | $(AWK_CMD)\n\
             mkdir -p .build/obj_acme_default/$(dirname {file})\n\
             LOG=$(arm-none-eabi-gcc -c -mcpu=cortex-m4 -mthumb -Os -Iquantum {file} -o .build/obj_acme_default/{file}.o 2>&1) && $(call CHECK)\n"
        ));
    }
    out
}

pub fn touch(path: &std::path::Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}
