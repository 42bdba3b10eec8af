//! Staging and building JSON keymap payloads.

mod common;

use common::{dry_run_trace, touch, ScriptedRunner};
use keyforge_build::{BuildContext, BuildRequest, BuildTarget, FilesystemCatalog, PayloadTarget};
use serde_json::json;
use std::path::PathBuf;

fn payload(ctx: &BuildContext, layers: serde_json::Value) -> PayloadTarget {
    let catalog = FilesystemCatalog::from_context(ctx);
    let content = json!({"keyboard": "acme/board", "keymap": "mine", "layers": layers});
    PayloadTarget::from_reader(&catalog, content.to_string().as_bytes(), None).unwrap()
}

fn staged_keymap(ctx: &BuildContext) -> PathBuf {
    ctx.intermediate_output("acme_board_mine").join("src/keymap.json")
}

#[test]
fn test_unchanged_payload_keeps_file() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let target = payload(&ctx, json!([["KC_A"]]));
    let request = BuildRequest::new();

    target.prepare_build(&ctx, &request).unwrap();
    let keymap_json = staged_keymap(&ctx);
    let first = std::fs::metadata(&keymap_json).unwrap().modified().unwrap();

    target.prepare_build(&ctx, &request).unwrap();
    let second = std::fs::metadata(&keymap_json).unwrap().modified().unwrap();

    assert_eq!(first, second);
}

#[test]
fn test_reformatted_payload_is_not_rewritten() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let target = payload(&ctx, json!([["KC_A"]]));

    // Same document, different whitespace.
    let keymap_json = staged_keymap(&ctx);
    let pretty = serde_json::to_string_pretty(target.configuration()).unwrap();
    touch(&keymap_json, &pretty);

    target.prepare_build(&ctx, &BuildRequest::new()).unwrap();
    assert_eq!(std::fs::read_to_string(&keymap_json).unwrap(), pretty);
}

#[test]
fn test_changed_payload_is_rewritten() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let request = BuildRequest::new();

    payload(&ctx, json!([["KC_A"]]))
        .prepare_build(&ctx, &request)
        .unwrap();
    payload(&ctx, json!([["KC_B"]]))
        .prepare_build(&ctx, &request)
        .unwrap();

    let written: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(staged_keymap(&ctx)).unwrap()).unwrap();
    assert_eq!(written["layers"], json!([["KC_B"]]));
}

#[test]
fn test_corrupt_staged_file_is_replaced() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let target = payload(&ctx, json!([["KC_A"]]));
    touch(&staged_keymap(&ctx), "{not json");

    target.prepare_build(&ctx, &BuildRequest::new()).unwrap();

    let written = std::fs::read_to_string(staged_keymap(&ctx)).unwrap();
    assert_eq!(written, serde_json::to_string(target.configuration()).unwrap());
}

#[test]
fn test_clean_removes_stale_outputs() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let stale = ctx.intermediate_output("acme_board_mine").join("keymap.o");
    touch(&stale, "object");

    let mut target: BuildTarget = payload(&ctx, json!([])).into();
    target.configure(None, Some(true), None);
    target.prepare_build(&ctx, &BuildRequest::new()).unwrap();

    assert!(!stale.exists());
    assert!(staged_keymap(&ctx).is_file());
}

#[test]
fn test_env_changes_intermediate_directory() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let target = payload(&ctx, json!([]));
    let request = BuildRequest::new().with_env("FORCE_LAYOUT", "60_ansi");

    target.prepare_build(&ctx, &request).unwrap();

    let expected = ctx.intermediate_output("acme_board_mine_60_ansi");
    assert_eq!(target.intermediate_output(&ctx, &request), expected);
    assert!(expected.join("src/keymap.json").is_file());
}

#[test]
fn test_compile_runs_clean_and_build() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let catalog = FilesystemCatalog::from_context(&ctx);
    let runner = ScriptedRunner::new("");

    let mut target: BuildTarget = payload(&ctx, json!([])).into();
    target.configure(Some(4), Some(true), None);
    let code = target
        .compile(&ctx, &catalog, &runner, &BuildRequest::new())
        .unwrap();

    assert_eq!(code, Some(0));
    let ran = runner.ran.borrow();
    assert_eq!(ran.len(), 2);
    assert_eq!(ran[0], vec!["make".to_string(), "clean".to_string()]);
    assert!(ran[1].contains(&"--jobs=4".to_string()));
    assert!(ran[1]
        .iter()
        .any(|a| a.starts_with("KEYMAP_JSON=") && a.ends_with("/src/keymap.json")));
    assert!(staged_keymap(&ctx).is_file());
}

#[test]
fn test_compile_dry_run_executes_nothing_but_clean() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let catalog = FilesystemCatalog::from_context(&ctx);
    let runner = ScriptedRunner::new("");

    let mut target: BuildTarget = payload(&ctx, json!([])).into();
    target.configure(None, Some(true), Some(true));
    let code = target
        .compile(&ctx, &catalog, &runner, &BuildRequest::new().dry_run(true))
        .unwrap();

    assert_eq!(code, None);
    // The clean step is still issued, but as a dry run of its own.
    assert_eq!(
        *runner.ran.borrow(),
        vec![vec!["make".to_string(), "clean".to_string(), "-n".to_string()]]
    );
    assert!(runner.captured.borrow().is_empty());
}

#[test]
fn test_compile_with_compiledb_writes_database_first() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let catalog = FilesystemCatalog::from_context(&ctx);
    let runner = ScriptedRunner::new(&dry_run_trace(&["quantum/main.c"]));

    let mut target: BuildTarget = payload(&ctx, json!([])).into();
    target.configure(None, None, Some(true));
    let code = target
        .compile(&ctx, &catalog, &runner, &BuildRequest::new())
        .unwrap();

    assert_eq!(code, Some(0));
    assert!(ctx.compilation_database_path().is_file());

    // The database is generated from a dry run without cleaning first.
    let dry_run = &runner.captured.borrow()[0];
    assert!(dry_run.contains(&"-n".to_string()));
    let ran = runner.ran.borrow();
    assert_eq!(ran.len(), 1);
    assert!(!ran[0].contains(&"clean".to_string()));
}

#[test]
fn test_failed_build_reports_exit_code() {
    let fw = tempfile::tempdir().unwrap();
    let ctx = BuildContext::new(fw.path()).with_make("make");
    let catalog = FilesystemCatalog::from_context(&ctx);
    let mut runner = ScriptedRunner::new("");
    runner.build_code = 2;

    let target: BuildTarget = payload(&ctx, json!([])).into();
    let code = target
        .compile(&ctx, &catalog, &runner, &BuildRequest::new())
        .unwrap();

    assert_eq!(code, Some(2));
}
