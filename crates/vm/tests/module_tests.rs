//! Module registration, lazy initialization and import cycles.

use std::fs;

use jv_core::Symbol;
use jv_vm::Vm;

#[test]
fn import_cycle_initializes_each_module_once() {
    let dir = tempfile::tempdir().expect("tempdir");
    let m1 = dir.path().join("m1.ja");
    let m2 = dir.path().join("m2.ja");
    fs::write(
        &m1,
        "\
module m1
  lmdl m2
  res \"m1-init \"
  push print
  call
  exit 0
",
    )
    .unwrap();
    fs::write(
        &m2,
        "\
module m2
  lmdl m1
  res \"m2-init \"
  push print
  call
  exit 0
",
    )
    .unwrap();

    let (mut vm, capture) = Vm::with_capture();
    vm.register_file(&m1).unwrap();
    vm.register_file(&m2).unwrap();
    vm.run_main(Symbol::intern("m1")).unwrap();

    // m1 marks itself initialized before importing, so m2's import of m1
    // resolves without running m1's top level again.
    assert_eq!(capture.lock().as_str(), "m2-init m1-init ");

    // Both imports resolve to the loaded modules' reflection objects.
    let m1_id = vm.mm.module_by_name(Symbol::intern("m1")).unwrap();
    let m2_id = vm.mm.module_by_name(Symbol::intern("m2")).unwrap();
    let m2_reflection = vm.mm.module(m2_id).reflection;
    let m1_reflection = vm.mm.module(m1_id).reflection;
    let heap = &vm.main_process().heap;
    assert_eq!(
        heap.get(m1_reflection)
            .get_member(Symbol::intern("m2"))
            .and_then(|e| e.as_object()),
        Some(m2_reflection)
    );
    assert_eq!(
        heap.get(m2_reflection)
            .get_member(Symbol::intern("m1"))
            .and_then(|e| e.as_object()),
        Some(m1_reflection)
    );
}

#[test]
fn imported_function_is_callable() {
    let dir = tempfile::tempdir().expect("tempdir");
    let main = dir.path().join("app.ja");
    let lib = dir.path().join("helpers.ja");
    fs::write(
        &main,
        "\
module app
  lmdl helpers
  res 20
  push helpers
  call triple
  push print
  call
  exit 0
",
    )
    .unwrap();
    fs::write(
        &lib,
        "\
module helpers
  exit 0
@triple
  push
  push 3
  mult
  ret
",
    )
    .unwrap();

    let (mut vm, capture) = Vm::with_capture();
    vm.register_file(&main).unwrap();
    vm.register_file(&lib).unwrap();
    vm.run_main(Symbol::intern("app")).unwrap();
    assert_eq!(capture.lock().as_str(), "60");
}

#[test]
fn binary_module_loads_and_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let src = "\
module packed
  push 6
  push 7
  mult
  push print
  call
  exit 0
";
    let tape = jv_asm::tape_read(src, "packed.ja", "packed").unwrap();
    let jb = dir.path().join("packed.jb");
    fs::write(&jb, jv_core::tape_write_binary(&tape)).unwrap();

    let (mut vm, capture) = Vm::with_capture();
    vm.register_file(&jb).unwrap();
    vm.run_main(Symbol::intern("packed")).unwrap();
    assert_eq!(capture.lock().as_str(), "42");
}

#[test]
fn jv_sources_are_rejected_without_a_front_end() {
    let dir = tempfile::tempdir().expect("tempdir");
    let jv = dir.path().join("prog.jv");
    fs::write(&jv, "let x = 1\n").unwrap();

    let mut vm = Vm::new();
    vm.register_file(&jv).unwrap();
    let error = vm.run_main(Symbol::intern("prog")).unwrap_err();
    assert!(error.to_string().contains("no compiler front-end"));
}

#[test]
fn args_object_is_visible_to_programs() {
    let (mut vm, capture) = Vm::with_capture();
    vm.set_args(&[("mode".to_owned(), "fast".to_owned())]);
    let tape = jv_asm::tape_read(
        "\
module main
  res args
  get mode
  push print
  call
  exit 0
",
        "main.ja",
        "main",
    )
    .unwrap();
    let module = vm.load_tape(tape).unwrap();
    vm.run_module(module).unwrap();
    assert_eq!(capture.lock().as_str(), "fast");
}
