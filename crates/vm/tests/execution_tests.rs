//! End-to-end execution tests over assembled modules.

use jv_core::Entity;
use jv_vm::Vm;

/// Assembles `src`, runs it as the main module, and returns the root task's
/// final resval plus everything printed.
fn run_ja(src: &str) -> (Entity, String) {
    let (mut vm, capture) = Vm::with_capture();
    let tape = jv_asm::tape_read(src, "test.ja", "main").expect("assembly");
    let module = vm.load_tape(tape).expect("hydrate");
    let result = vm.run_module(module).expect("run");
    let output = capture.lock().clone();
    (result, output)
}

#[test]
fn arithmetic_with_precedence() {
    // let x = 2 + 3 * 4; print(x)
    let (result, output) = run_ja(
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
    assert_eq!(output, "14");
    assert_eq!(result, Entity::int(0));
}

#[test]
fn constructor_stores_field() {
    // class A { new(field v) { } }; let a = A(7); print(a.v)
    let (_, output) = run_ja(
        "\
module main
  res 7
  push A
  call
  set a
  res a
  get v
  push print
  call
  exit 0
class A
  field v
@new
  push
  res self
  fld v
  res self
  ret
endclass
",
    );
    assert_eq!(output, "7");
}

#[test]
fn raise_is_caught_and_skips_rest_of_try() {
    // try { raise "bad"; print("no") } catch e { print(e.msg) }
    let (_, output) = run_ja(
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
    assert_eq!(output, "bad");
}

#[test]
fn arrays_index_and_assign() {
    // a = [1,2,3]; a[1] = 99; print(a[0] + a[1] + a[2])
    let (_, output) = run_ja(
        "\
module main
  push 3
  push 2
  push 1
  anew 3
  set a
  push 99
  push a
  res 1
  aset
  res 0
  push a
  aidx
  push
  res 1
  push a
  aidx
  push
  add
  push
  res 2
  push a
  aidx
  push
  add
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "103");
}

#[test]
fn cycle_collection_frees_both_then_nothing() {
    // x.peer = y; y.peer = x; drop both; __collect_garbage() twice
    let (_, output) = run_ja(
        "\
module main
  push X
  call
  set x
  push X
  call
  set y
  push y
  res x
  fld peer
  push x
  res y
  fld peer
  res Nil
  set x
  res Nil
  set y
  res Nil
  push __collect_garbage
  call
  set freed
  res Nil
  push __collect_garbage
  call
  set again
  res freed
  push print
  call
  res \" \"
  push print
  call
  res again
  push print
  call
  exit 0
class X
endclass
",
    );
    let parts: Vec<&str> = output.split(' ').collect();
    assert_eq!(parts.len(), 2);
    let first: i32 = parts[0].parse().expect("first collection count");
    let second: i32 = parts[1].parse().expect("second collection count");
    assert!(first >= 2, "first collection freed {first}");
    assert_eq!(second, 0);
}

#[test]
fn inner_catch_wins_over_outer() {
    let (_, output) = run_ja(
        "\
module main
  ctch 14
  nblk
  ctch 3
  res \"boom\"
  rais
  nop
  res \"inner \"
  push print
  call
  bblk
  res \"after \"
  push print
  call
  jmp 4
  nop
  res \"outer \"
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "inner after ");
}

#[test]
fn error_in_block_without_catch_unwinds_to_outer() {
    let (_, output) = run_ja(
        "\
module main
  ctch 9
  nblk
  res \"boom\"
  rais
  nop
  nop
  nop
  nop
  nop
  nop
  res \"caught \"
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "caught ");
}

#[test]
fn child_task_error_reroutes_to_caller() {
    let (_, output) = run_ja(
        "\
module main
  ctch 2
  push boomer
  call
  set e
  res e
  get msg
  push print
  call
  exit 0
@boomer
  res \"kapow\"
  rais
",
    );
    assert_eq!(output, "kapow");
}

#[test]
fn function_call_returns_value() {
    let (_, output) = run_ja(
        "\
module main
  res 5
  push double
  call
  push print
  call
  exit 0
@double
  push
  push 2
  mult
  ret
",
    );
    assert_eq!(output, "10");
}

#[test]
fn method_dispatch_walks_super_chain() {
    let (_, output) = run_ja(
        "\
module main
  res Nil
  push B
  call
  set b
  push b
  call speak
  push print
  call
  exit 0
class A
@speak
  res \"from-a\"
  ret
endclass
class B : A
endclass
",
    );
    assert_eq!(output, "from-a");
}

#[test]
fn missing_method_raises_catchable_error() {
    let (_, output) = run_ja(
        "\
module main
  ctch 5
  res Nil
  push A
  call
  push
  call nope
  res \"caught\"
  push print
  call
  exit 0
class A
endclass
",
    );
    assert_eq!(output, "caught");
}

#[test]
fn loop_with_jumps_counts_down() {
    // i = 3; while (i > 0) { i = i - 1 }; print(i)
    let (_, output) = run_ja(
        "\
module main
  res 3
  set i
  res i
  gt 0
  ifn 4
  res i
  sub 1
  set i
  jmp -7
  res i
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "0");
}

#[test]
fn string_equality_dispatches_through_class_operator() {
    let (_, output) = run_ja(
        "\
module main
  res \"abc\"
  push
  res \"abc\"
  push
  eq
  if 2
  res \"ne\"
  jmp 1
  res \"eq\"
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "eq");
}

#[test]
fn is_checks_class_membership() {
    let (_, output) = run_ja(
        "\
module main
  res Nil
  push A
  call
  push
  push A
  is
  if 2
  res \"no\"
  jmp 1
  res \"yes\"
  push print
  call
  exit 0
class A
endclass
",
    );
    assert_eq!(output, "yes");
}

#[test]
fn truthiness_zero_is_truthy_and_nil_is_falsy() {
    let (_, output) = run_ja(
        "\
module main
  res 0
  not
  if 2
  res \"zero-truthy \"
  jmp 1
  res \"zero-falsy \"
  push print
  call
  res Nil
  not
  if 2
  res \"nil-truthy\"
  jmp 1
  res \"nil-falsy\"
  push print
  call
  exit 0
",
    );
    // `not` of 0 is Nil (0 is truthy); `not` of Nil is 1.
    assert_eq!(output, "zero-truthy nil-falsy");
}

#[test]
fn tuple_build_and_get() {
    let (_, output) = run_ja(
        "\
module main
  push 2
  push 1
  tupl 2
  set t
  res t
  tget 1
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "2");
}

#[test]
fn modulo_on_float_raises() {
    let (_, output) = run_ja(
        "\
module main
  ctch 3
  res 1.5
  mod 2
  res \"no\"
  get msg
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "op 'MOD' not valid for floating-point operands");
}

#[test]
fn const_binding_cannot_be_reassigned() {
    let (_, output) = run_ja(
        "\
module main
  ctch 4
  res 1
  letc k
  res 2
  set k
  res \"ok\"
  push print
  call
  exit 0
",
    );
    // the catch lands after the failed set
    assert_eq!(output, "ok");
}

#[test]
fn uncaught_error_is_reported() {
    let (_, output) = run_ja(
        "\
module main
  res \"doomed\"
  rais
",
    );
    assert!(output.starts_with("Error: doomed"));
}

#[test]
fn native_string_methods() {
    let (_, output) = run_ja(
        "\
module main
  res \"hello\"
  set s
  push s
  call len
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "5");
}

#[test]
fn builtin_str_and_int_roundtrip() {
    let (_, output) = run_ja(
        "\
module main
  res 42
  push str
  call
  push int
  call
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "42");
}

#[test]
fn run_result_is_exit_operand() {
    let (result, _) = run_ja("module main\n  exit 7\n");
    assert_eq!(result, Entity::int(7));
}

#[test]
fn import_installs_reflection_member() {
    // lmdl of an unknown module raises
    let (_, output) = run_ja(
        "\
module main
  ctch 1
  lmdl missing
  get msg
  push print
  call
  exit 0
",
    );
    assert_eq!(output, "Module 'missing' not found.");
}

#[test]
fn increments_and_suffix_increment() {
    let (_, output) = run_ja(
        "\
module main
  res 5
  set i
  inc i
  sinc i
  push print
  call
  res \" \"
  push print
  call
  res i
  push print
  call
  exit 0
",
    );
    // inc makes 6; sinc loads 6 and stores 7
    assert_eq!(output, "6 7");
}

#[test]
fn field_increment() {
    let (_, output) = run_ja(
        "\
module main
  res Nil
  push A
  call
  set a
  push 4
  res a
  fld n
  res a
  finc n
  push print
  call
  exit 0
class A
endclass
",
    );
    assert_eq!(output, "5");
}

#[test]
fn user_defined_index_operator_dispatches() {
    let (_, output) = run_ja(
        "\
module main
  res Nil
  push Box
  call
  set b
  res 9
  push b
  aidx
  push print
  call
  exit 0
class Box
@__index__
  push
  push 1
  add
  ret
endclass
",
    );
    // __index__ receives the index and returns index + 1
    assert_eq!(output, "10");
}

#[test]
fn block_assignment_updates_enclosing_binding() {
    let (_, output) = run_ja(
        "\
module main
  res 1
  set shadowed
  nblk
  res 2
  set shadowed
  res shadowed
  push print
  call
  bblk
  res shadowed
  push print
  call
  exit 0
",
    );
    // assignment in the block updates the outer binding
    assert_eq!(output, "22");
}
