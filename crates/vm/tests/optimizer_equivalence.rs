//! Optimized tapes must behave exactly like their sources.

use jv_core::{optimize, Entity};
use jv_vm::Vm;

/// Runs a tape and returns (resval, printed output).
fn run_tape(tape: jv_core::Tape) -> (Entity, String) {
    let (mut vm, capture) = Vm::with_capture();
    let module = vm.load_tape(tape).expect("hydrate");
    let result = vm.run_module(module).expect("run");
    let output = capture.lock().clone();
    (result, output)
}

/// Asserts raw and optimized executions agree on resval and output.
fn assert_equivalent(src: &str) {
    let raw = jv_asm::tape_read(src, "program.ja", "main").expect("assembly");
    let optimized = optimize(raw.clone());
    let (raw_result, raw_output) = run_tape(raw);
    let (opt_result, opt_output) = run_tape(optimized);
    assert_eq!(raw_result, opt_result, "resval diverged for:\n{src}");
    assert_eq!(raw_output, opt_output, "output diverged for:\n{src}");
}

#[test]
fn arithmetic_program() {
    assert_equivalent(
        "\
module main
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
",
    );
}

#[test]
fn res_push_and_set_res_patterns() {
    assert_equivalent(
        "\
module main
  res 9
  set x
  res x
  push
  res 1
  push
  add
  push print
  call
  exit 0
",
    );
}

#[test]
fn increment_pattern() {
    assert_equivalent(
        "\
module main
  res 0
  set i
  push i
  push 1
  add
  set i
  push i
  push 1
  add
  set i
  res i
  push print
  call
  exit 0
",
    );
}

#[test]
fn nil_pattern() {
    assert_equivalent(
        "\
module main
  res Nil
  set x
  push Nil
  res
  push print
  call
  exit 0
",
    );
}

#[test]
fn loop_program_with_branch_targets() {
    assert_equivalent(
        "\
module main
  res 5
  set i
  res 0
  set total
  res i
  gt 0
  ifn 10
  res total
  push
  res i
  push
  add
  set total
  res i
  sub 1
  set i
  jmp -13
  res total
  push print
  call
  exit 0
",
    );
}

#[test]
fn catch_program() {
    assert_equivalent(
        "\
module main
  ctch 4
  res \"bad\"
  rais
  push print
  call
  set e
  res e
  get msg
  push print
  call
  exit 0
",
    );
}

#[test]
fn function_calls_survive_optimization() {
    assert_equivalent(
        "\
module main
  res 4
  push square
  call
  push print
  call
  exit 0
@square
  set n
  push n
  push n
  mult
  ret
",
    );
}

#[test]
fn simple_math_fold() {
    assert_equivalent(
        "\
module main
  push 10
  push 4
  sub
  push print
  call
  exit 0
",
    );
}