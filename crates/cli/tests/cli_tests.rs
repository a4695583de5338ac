//! Driver-level tests for compile and run flows.

use std::fs;

use clap::Parser as _;

use jv_cli::args::{CompileArgs, RunArgs};

const PROGRAM: &str = "\
module prog
  push 2
  push 3
  push 4
  mult
  push
  add
  set x
  res x
  push print
  call
  exit 0
";

#[test]
fn compile_emits_assembly_and_bytecode() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.ja");
    fs::write(&input, PROGRAM).unwrap();
    let out = dir.path().join("out");

    let args = CompileArgs::parse_from([
        "jvc",
        input.to_str().unwrap(),
        "--optimize",
        "--out-asm",
        "--out-bin",
        "--asm-dir",
        out.to_str().unwrap(),
        "--bin-dir",
        out.to_str().unwrap(),
    ]);
    jv_cli::compile(&args).unwrap();

    let asm = fs::read_to_string(out.join("prog.ja")).unwrap();
    assert!(asm.starts_with("module prog\n"));

    let bytes = fs::read(out.join("prog.jb")).unwrap();
    let tape = jv_core::tape_read_binary(&bytes).unwrap();
    assert_eq!(tape.module_name().as_str(), "prog");
    // The optimizer folded at least one pair away.
    assert!(tape.len() < PROGRAM.lines().count() - 1);
}

#[test]
fn compiled_bytecode_matches_assembly_roundtrip() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.ja");
    fs::write(&input, PROGRAM).unwrap();
    let out = dir.path().join("out");

    let args = CompileArgs::parse_from([
        "jvc",
        input.to_str().unwrap(),
        "--out-asm",
        "--out-bin",
        "--asm-dir",
        out.to_str().unwrap(),
        "--bin-dir",
        out.to_str().unwrap(),
    ]);
    jv_cli::compile(&args).unwrap();

    let asm = fs::read_to_string(out.join("prog.ja")).unwrap();
    let from_asm = jv_asm::tape_read(&asm, "prog.ja", "prog").unwrap();
    let from_bin = jv_core::tape_read_binary(&fs::read(out.join("prog.jb")).unwrap()).unwrap();
    assert_eq!(from_asm.instructions(), from_bin.instructions());
    assert_eq!(from_asm.functions(), from_bin.functions());
}

#[test]
fn run_executes_the_first_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("prog.ja");
    fs::write(&input, PROGRAM).unwrap();

    let args = RunArgs::parse_from(["jlr", input.to_str().unwrap()]);
    let code = jv_cli::run(&args).unwrap();
    assert_eq!(code, 0);
}

#[test]
fn compile_reports_static_errors() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("broken.ja");
    fs::write(&input, "module broken\n  warble 3\n").unwrap();

    let args = CompileArgs::parse_from(["jvc", input.to_str().unwrap(), "--out-bin"]);
    let error = jv_cli::compile(&args).unwrap_err();
    assert!(format!("{error:#}").contains("unknown op"));
}
